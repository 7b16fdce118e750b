use clap::{Parser, Subcommand};
use clinic_core::*;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "clinic")]
#[command(about = "Clinic administration dashboard client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory (holds the stored credential)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Override backend base URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Read configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the effective configuration (including overrides) to disk
    Init {
        /// Replace an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Sign in and store the credential
    Login {
        #[arg(long)]
        email: String,

        #[arg(long, env = "CLINIC_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Sign out and forget the stored credential
    Logout,

    /// Validate the stored credential and show who it belongs to
    Whoami {
        #[arg(long)]
        json: bool,
    },

    /// Load one resource collection
    Fetch {
        /// departments, branches, doctors, services, offers, appointments, landing-pages
        resource: String,

        #[arg(long)]
        json: bool,
    },

    /// Show session and cache state
    Status {
        /// Load every collection first
        #[arg(long)]
        refresh: bool,

        #[arg(long)]
        json: bool,
    },

    /// Record an outreach call on an appointment
    CallLog {
        appointment_id: String,

        /// Call outcome (no_answer, busy, booked, ...)
        #[arg(long)]
        status: String,

        #[arg(long)]
        notes: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    clinic_core::logging::init(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("✗ {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let creating = matches!(cli.command, Commands::Init { .. });
    let mut config = match &cli.config {
        Some(path) if creating && !path.exists() => Config::default(),
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(data_dir) = cli.data_dir {
        config.data.data_dir = data_dir;
    }
    if let Some(api_url) = cli.api_url {
        config.api.base_url = api_url;
    }

    let store = StoreRoot::open(config)?;

    match cli.command {
        Commands::Init { force } => cmd_init(store.config(), cli.config.as_deref(), force),
        Commands::Login { email, password } => cmd_login(&store, &email, &password).await,
        Commands::Logout => cmd_logout(&store).await,
        Commands::Whoami { json } => cmd_whoami(&store, json).await,
        Commands::Fetch { resource, json } => cmd_fetch(&store, resource.parse()?, json).await,
        Commands::Status { refresh, json } => cmd_status(&store, refresh, json).await,
        Commands::CallLog {
            appointment_id,
            status,
            notes,
        } => cmd_call_log(&store, &appointment_id, CallStatus::from(status), notes).await,
    }
}

fn cmd_init(config: &Config, path: Option<&Path>, force: bool) -> Result<ExitCode> {
    let target = path.map_or_else(Config::default_config_path, Path::to_path_buf);
    if target.exists() && !force {
        eprintln!(
            "✗ {} already exists (use --force to overwrite)",
            target.display()
        );
        return Ok(ExitCode::FAILURE);
    }

    match path {
        Some(path) => config.save_to(path)?,
        None => config.save()?,
    }
    println!("✓ Wrote {}", target.display());
    println!("  api.base_url = {}", config.api.base_url);
    println!("  data.data_dir = {}", config.data.data_dir.display());
    Ok(ExitCode::SUCCESS)
}

async fn cmd_login(store: &StoreRoot, email: &str, password: &str) -> Result<ExitCode> {
    match store.session().login(email, password).await {
        SessionState::Authenticated => {
            println!("✓ Signed in as {}", identity(store));
            Ok(ExitCode::SUCCESS)
        }
        SessionState::AuthFailed { message } => {
            eprintln!("✗ Sign-in failed: {}", message);
            Ok(ExitCode::FAILURE)
        }
        other => Err(Error::Other(format!("Unexpected session state: {}", other))),
    }
}

async fn cmd_logout(store: &StoreRoot) -> Result<ExitCode> {
    let was_signed_in = store.session().is_authenticated();
    store.session().logout().await;
    if was_signed_in {
        println!("✓ Signed out");
    } else {
        println!("Already signed out");
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_whoami(store: &StoreRoot, json: bool) -> Result<ExitCode> {
    if !store.session().is_authenticated() {
        return Err(Error::NotAuthenticated);
    }

    if store.session().validate().await != SessionState::Authenticated {
        eprintln!("✗ Session expired; please sign in again");
        return Ok(ExitCode::FAILURE);
    }

    if json {
        let out = serde_json::json!({
            "role": store.session().role(),
            "user": store.session().profile(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", identity(store));
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_fetch(store: &StoreRoot, kind: ResourceKind, json: bool) -> Result<ExitCode> {
    store.start().await;

    let outcome = store.fetch(kind).await;
    if let Some(error) = outcome.error() {
        eprintln!("✗ Failed to load {}: {}", kind, error);
        if error.is_auth_rejection() {
            eprintln!("  Session expired; signed out");
        }
        return Ok(ExitCode::FAILURE);
    }

    let items = store.items_json(kind)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for item in &items {
            println!("{}", describe(kind, item));
        }
        println!("\n{} {}", items.len(), kind);
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_status(store: &StoreRoot, refresh: bool, json: bool) -> Result<ExitCode> {
    let mut refresh_failed = false;
    if refresh {
        store.start().await;
        refresh_failed = store
            .fetch_all()
            .await
            .iter()
            .any(|(_, outcome)| outcome.is_failed());
    }
    let code = if refresh_failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    };

    let snapshot = store.snapshot();
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(code);
    }

    println!("Session: {}", snapshot.session);
    if snapshot.session.is_authenticated() {
        println!("User:    {}", identity(store));
    }
    println!();
    for slice in &snapshot.slices {
        let error = slice
            .error
            .as_deref()
            .map(|e| format!("  ({})", e))
            .unwrap_or_default();
        println!(
            "  {:<14} {:<8} {:>5}{}",
            slice.kind.to_string(),
            format!("{:?}", slice.phase).to_lowercase(),
            slice.count,
            error
        );
    }
    Ok(code)
}

async fn cmd_call_log(
    store: &StoreRoot,
    appointment_id: &str,
    status: CallStatus,
    notes: Option<String>,
) -> Result<ExitCode> {
    if !status.is_known() {
        tracing::warn!("Recording unrecognized call status {:?}", status.as_str());
    }

    store.start().await;
    let appointment = store.record_call(appointment_id, status, notes).await?;

    println!("✓ Call recorded for {} ({})", appointment.name, appointment.phone);
    if let Some(latest) = appointment.latest_call() {
        println!(
            "  {}  {}",
            latest.timestamp.format("%Y-%m-%d %H:%M"),
            latest.status
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn identity(store: &StoreRoot) -> String {
    let role = store.session().role();
    match store.session().profile() {
        Some(profile) => format!("{} ({})", profile.display_name(), role),
        None => role.to_string(),
    }
}

/// One-line rendering of a cached record
fn describe(kind: ResourceKind, item: &Value) -> String {
    let field = |name: &str| item.get(name).and_then(Value::as_str).unwrap_or("");
    let id = field("id");

    match kind {
        ResourceKind::Appointments => format!(
            "{}  {}  {}  [{}]",
            id,
            field("name"),
            field("phone"),
            field("status")
        ),
        ResourceKind::Offers | ResourceKind::LandingPages => format!("{}  {}", id, field("title")),
        _ => format!("{}  {}", id, field("name")),
    }
}
