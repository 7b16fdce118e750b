//! Authenticated-session state machine.
//!
//! ```text
//! Anonymous --login--> Authenticating --ok--> Authenticated
//!                                     --err-> AuthFailed
//! Authenticated --logout / 401 on validate--> Anonymous
//! ```
//!
//! The state is derived rather than stored: a present token always means
//! `Authenticated`, so the session flag and the credential cannot disagree.

use crate::credentials::{Credential, CredentialStore};
use crate::gateway::{HttpGateway, Method};
use crate::{HttpError, Profile, Role};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Sign-in endpoint
pub const SIGNIN_PATH: &str = "/auth/signin";
/// Token validation endpoint
pub const VALIDATE_PATH: &str = "/protected";

/// Observable session state
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated,
    AuthFailed { message: String },
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Anonymous => f.write_str("anonymous"),
            SessionState::Authenticating => f.write_str("authenticating"),
            SessionState::Authenticated => f.write_str("authenticated"),
            SessionState::AuthFailed { message } => write!(f, "auth failed: {}", message),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    #[serde(default)]
    role: Role,
    #[serde(default)]
    user: Option<Profile>,
}

#[derive(Debug, Default)]
struct LoginStatus {
    in_flight: bool,
    failure: Option<String>,
    /// Bumped by logout so a login that was already in flight is dropped
    epoch: u64,
}

/// Resets the in-flight flag even if the login future is dropped
struct InFlight<'a>(&'a Mutex<LoginStatus>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight = false;
    }
}

/// Orchestrates login, logout and validation over a [`CredentialStore`]
pub struct SessionManager {
    gateway: Arc<HttpGateway>,
    credentials: Arc<CredentialStore>,
    signout_path: Option<String>,
    status: Mutex<LoginStatus>,
}

impl SessionManager {
    pub fn new(
        gateway: Arc<HttpGateway>,
        credentials: Arc<CredentialStore>,
        signout_path: Option<String>,
    ) -> Self {
        Self {
            gateway,
            credentials,
            signout_path,
            status: Mutex::new(LoginStatus::default()),
        }
    }

    pub fn state(&self) -> SessionState {
        if self.credentials.is_authenticated() {
            return SessionState::Authenticated;
        }
        let status = self.status();
        if status.in_flight {
            SessionState::Authenticating
        } else if let Some(message) = &status.failure {
            SessionState::AuthFailed {
                message: message.clone(),
            }
        } else {
            SessionState::Anonymous
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_authenticated()
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn token(&self) -> Option<String> {
        self.credentials.token()
    }

    pub fn role(&self) -> Role {
        self.credentials.role()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.credentials.profile()
    }

    /// Exchange email and password for a bearer credential.
    ///
    /// Only starts from `Anonymous` or `AuthFailed`; otherwise the current
    /// state is returned untouched. Failures end in `AuthFailed` and never
    /// persist anything.
    pub async fn login(&self, email: &str, password: &str) -> SessionState {
        let epoch = {
            let mut status = self.status();
            if status.in_flight || self.credentials.is_authenticated() {
                tracing::debug!("Login ignored: session already active or in flight");
                drop(status);
                return self.state();
            }
            status.in_flight = true;
            status.failure = None;
            status.epoch
        };
        let in_flight = InFlight(&self.status);

        tracing::info!("Signing in as {}", email);
        let body = json!({ "email": email, "password": password });
        let result = match self
            .gateway
            .request(Method::Post, SIGNIN_PATH, Some(&body), false)
            .await
        {
            Ok(value) => self.accept_sign_in(value, epoch),
            Err(e) => Err(login_failure_message(&e)),
        };

        if let Err(message) = result {
            let mut status = self.status();
            if status.epoch == epoch {
                tracing::warn!("Sign-in failed: {}", message);
                status.failure = Some(message);
            } else {
                tracing::info!("Discarding sign-in failure that completed after logout");
            }
        }

        drop(in_flight);
        self.state()
    }

    fn accept_sign_in(&self, value: Value, epoch: u64) -> Result<(), String> {
        let response: SignInResponse = serde_json::from_value(value)
            .map_err(|e| format!("Unexpected response from the server: {}", e))?;

        if response.id_token.trim().is_empty() {
            return Err("Server returned an empty token".into());
        }

        // Held across the save so a concurrent logout lands before or after it
        let status = self.status();
        if status.epoch != epoch {
            tracing::info!("Discarding sign-in that completed after logout");
            return Ok(());
        }

        let credential = Credential::new(response.id_token, response.role, response.user);
        self.credentials
            .save(&credential)
            .map_err(|e| format!("Could not store credential: {}", e))?;
        drop(status);

        tracing::info!("Signed in with role {}", credential.role);
        Ok(())
    }

    /// End the session locally, notifying the backend if configured.
    ///
    /// The local credential is cleared whatever the remote call does.
    pub async fn logout(&self) -> SessionState {
        {
            let mut status = self.status();
            status.epoch += 1;
            status.failure = None;
        }

        if let (Some(path), true) = (&self.signout_path, self.credentials.is_authenticated()) {
            if let Err(e) = self.gateway.request(Method::Post, path, None, true).await {
                tracing::warn!("Remote sign-out failed: {}. Clearing local session anyway.", e);
            }
        }

        if let Err(e) = self.credentials.clear() {
            tracing::warn!("{}", e);
        }
        tracing::info!("Signed out");
        self.state()
    }

    /// Check the stored token against the backend.
    ///
    /// A 401 clears the credential; success refreshes the cached profile;
    /// any other failure leaves the session as it was. Never retries.
    pub async fn validate(&self) -> SessionState {
        let Some(token) = self.credentials.token() else {
            return self.state();
        };

        match self
            .gateway
            .request(Method::Get, VALIDATE_PATH, None, true)
            .await
        {
            Ok(value) => self.refresh_profile(&token, value),
            Err(e) if e.is_auth_rejection() => {
                self.handle_rejection(&token);
            }
            Err(e) => tracing::warn!("Could not validate session: {}", e),
        }

        self.state()
    }

    fn refresh_profile(&self, token: &str, value: Value) {
        let profile = value
            .get("user")
            .cloned()
            .map(serde_json::from_value::<Profile>);
        match profile {
            Some(Ok(profile)) => {
                if let Err(e) = self.credentials.update_profile_if_token(token, profile) {
                    tracing::warn!("Could not store refreshed profile: {}", e);
                }
            }
            Some(Err(e)) => tracing::warn!("Ignoring malformed profile: {}", e),
            None => tracing::debug!("Validation response carried no profile"),
        }
    }

    /// React to a 401 observed for `token`.
    ///
    /// Clears the credential only while `token` is still current, so
    /// concurrent rejections converge and a late rejection of an old token
    /// cannot end a newer session. Returns whether this call signed out.
    pub fn handle_rejection(&self, token: &str) -> bool {
        match self.credentials.clear_if_token(token) {
            Ok(true) => {
                tracing::info!("Credential rejected by server; signed out");
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!("Credential rejected by server; {}", e);
                true
            }
        }
    }

    fn status(&self) -> MutexGuard<'_, LoginStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// User-facing message for a failed sign-in
fn login_failure_message(error: &HttpError) -> String {
    match error {
        HttpError::Status {
            code: 400 | 401 | 403 | 404,
            server_message,
        } => server_message
            .clone()
            .unwrap_or_else(|| "Invalid email or password".into()),
        HttpError::Status {
            code,
            server_message,
        } => server_message
            .clone()
            .unwrap_or_else(|| format!("Sign-in failed (HTTP {})", code)),
        HttpError::Transport { cause } => format!("Cannot reach the server: {}", cause),
        HttpError::Decode { .. } => "Unexpected response from the server".into(),
    }
}
