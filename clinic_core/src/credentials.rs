//! Credential persistence with file locking.
//!
//! The Auth branch (token, role, profile) is stored as one JSON document so
//! the three fields are always written and removed together. Whether the
//! user is authenticated is derived from the token, never stored.

use crate::{Error, Profile, Result, Role};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tempfile::NamedTempFile;

/// Bearer credential plus the identity it was issued for
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Credential {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(rename = "userData", default)]
    pub profile: Option<Profile>,
}

impl Credential {
    pub fn new(token: impl Into<String>, role: Role, profile: Option<Profile>) -> Self {
        Self {
            token: Some(token.into()),
            role,
            profile,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Blank tokens count as absent
    fn normalized(mut self) -> Self {
        if self.token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            self.token = None;
        }
        if self.token.is_none() {
            return Self::default();
        }
        self
    }
}

/// File-backed holder of the current credential.
///
/// Memory and disk change under the same write lock, so a reader never
/// sees a credential that was not (or is no longer) persisted.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    current: RwLock<Credential>,
}

impl CredentialStore {
    /// Read the persisted credential from `path`
    ///
    /// Returns an empty store if the file doesn't exist.
    /// If the file is unreadable or corrupted, logs a warning and starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let credential = read_credential(&path);
        if credential.is_authenticated() {
            tracing::info!("Rehydrated {} credential from {:?}", credential.role, path);
        }
        Self {
            path,
            current: RwLock::new(credential),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current credential
    pub fn credential(&self) -> Credential {
        self.read().clone()
    }

    pub fn token(&self) -> Option<String> {
        self.read().token.clone()
    }

    pub fn role(&self) -> Role {
        self.read().role
    }

    pub fn profile(&self) -> Option<Profile> {
        self.read().profile.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_authenticated()
    }

    /// Persist all three fields as one unit, then make them current.
    ///
    /// On failure neither disk nor memory changes. Saving a credential
    /// without a token is the same as [`clear`](Self::clear).
    pub fn save(&self, credential: &Credential) -> Result<()> {
        let credential = credential.clone().normalized();
        let mut current = self.write();
        if !credential.is_authenticated() {
            return self.clear_locked(&mut current);
        }
        write_credential(&self.path, &credential)?;
        *current = credential;
        tracing::debug!("Saved credential to {:?}", self.path);
        Ok(())
    }

    /// Forget the credential in memory and on disk.
    ///
    /// Memory is cleared even when the file cannot be removed; the error is
    /// still reported so the caller can log it.
    pub fn clear(&self) -> Result<()> {
        let mut current = self.write();
        self.clear_locked(&mut current)
    }

    /// Clear only if `token` is still the current token.
    ///
    /// Returns whether anything was cleared. Repeating the call for the
    /// same token is a no-op.
    pub fn clear_if_token(&self, token: &str) -> Result<bool> {
        let mut current = self.write();
        if current.token.as_deref() != Some(token) {
            return Ok(false);
        }
        self.clear_locked(&mut current)?;
        Ok(true)
    }

    /// Swap in a fresh profile if `token` is still the current token
    pub fn update_profile_if_token(&self, token: &str, profile: Profile) -> Result<bool> {
        let mut current = self.write();
        if current.token.as_deref() != Some(token) {
            return Ok(false);
        }
        let updated = Credential {
            profile: Some(profile),
            ..current.clone()
        };
        write_credential(&self.path, &updated)?;
        *current = updated;
        Ok(true)
    }

    fn clear_locked(&self, current: &mut Credential) -> Result<()> {
        *current = Credential::default();
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!("Removed credential file {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!(
                "Failed to remove credential file {:?}: {}",
                self.path, e
            ))),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Credential> {
        self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Credential> {
        self.current.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read a credential file with shared locking
fn read_credential(path: &Path) -> Credential {
    if !path.exists() {
        tracing::debug!("No credential file at {:?}", path);
        return Credential::default();
    }

    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(
                "Unable to open credential file {:?}: {}. Starting signed out.",
                path,
                e
            );
            return Credential::default();
        }
    };

    if let Err(e) = file.lock_shared() {
        tracing::warn!("Unable to lock credential file {:?}: {}. Starting signed out.", path, e);
        return Credential::default();
    }

    let mut contents = String::new();
    let read_result = std::io::BufReader::new(&file).read_to_string(&mut contents);
    let _ = file.unlock();
    if let Err(e) = read_result {
        tracing::warn!("Failed to read credential file {:?}: {}. Starting signed out.", path, e);
        return Credential::default();
    }

    match serde_json::from_str::<Credential>(&contents) {
        Ok(credential) => credential.normalized(),
        Err(e) => {
            tracing::warn!(
                "Failed to parse credential file {:?}: {}. Starting signed out.",
                path,
                e
            );
            Credential::default()
        }
    }
}

/// Atomically write a credential file.
///
/// The temp file is created owner-only (0600 on Unix) and renamed over the
/// target, so the target is either the old document or the new one.
fn write_credential(path: &Path, credential: &Credential) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Storage(format!("Credential path {:?} has no parent", path)))?;
    std::fs::create_dir_all(parent)?;

    let temp = NamedTempFile::new_in(parent)?;
    temp.as_file().lock_exclusive()?;

    {
        let mut writer = std::io::BufWriter::new(temp.as_file());
        let contents = serde_json::to_string(credential)?;
        writer.write_all(contents.as_bytes())?;
        writer.flush()?;
    }

    temp.as_file().sync_all()?;
    temp.as_file().unlock()?;

    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
