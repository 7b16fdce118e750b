#![forbid(unsafe_code)]

//! Client-side state layer for the clinic administration dashboard.
//!
//! This crate provides:
//! - Domain records (departments, doctors, branches, appointments, ...)
//! - An HTTP gateway with typed failure outcomes
//! - Credential persistence and the authenticated-session state machine
//! - Generic fetch-lifecycle caches, one per resource kind
//! - The store root composing all of the above

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod gateway;
pub mod credentials;
pub mod session;
pub mod slice;
pub mod store;

// Re-export commonly used types
pub use error::{Error, HttpError, Result};
pub use types::*;
pub use config::Config;
pub use gateway::{HttpGateway, Method};
pub use credentials::{Credential, CredentialStore};
pub use session::{SessionManager, SessionState};
pub use slice::{FetchOutcome, FetchState, Mutation, Phase, Resource, ResourceSlice};
pub use store::{SliceSummary, StoreRoot, StoreSnapshot};
