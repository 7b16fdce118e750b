//! Generic fetch-lifecycle cache, one instance per resource kind.
//!
//! ```text
//! Idle/Ready/Failed --fetch--> Loading --ok--> Ready   (items replaced)
//!                                      --err-> Failed  (items kept)
//! Failed --clear_error--> Idle
//! ```
//!
//! Every fetch runs under a sequence number. A completion is applied only
//! while its number is still the latest, so a superseded response can never
//! overwrite a newer snapshot.
//!
//! Every protected call a slice makes, reloads and writes alike, reports a
//! 401 to the session, which clears the credential it was sent with.

use crate::gateway::{HttpGateway, Method};
use crate::session::SessionManager;
use crate::types::{
    Appointment, Branch, Department, Doctor, LandingPage, Offer, ResourceKind, Service,
};
use crate::HttpError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A record type served by one collection endpoint
pub trait Resource: DeserializeOwned + Serialize + Clone + Send + Sync + 'static {
    const KIND: ResourceKind;

    fn id(&self) -> &str;
}

macro_rules! impl_resource {
    ($($ty:ty => $kind:ident),+ $(,)?) => {
        $(
            impl Resource for $ty {
                const KIND: ResourceKind = ResourceKind::$kind;

                fn id(&self) -> &str {
                    &self.id
                }
            }
        )+
    };
}

impl_resource! {
    Department => Departments,
    Branch => Branches,
    Doctor => Doctors,
    Service => Services,
    Offer => Offers,
    Appointment => Appointments,
    LandingPage => LandingPages,
}

/// Where a slice is in its fetch lifecycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Loading,
    Ready,
    Failed,
}

/// Cached collection plus lifecycle state.
///
/// `Ready` never carries an error message; `Failed` keeps the last good
/// items alongside the message.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FetchState<T> {
    items: Vec<T>,
    phase: Phase,
    error_message: Option<String>,
}

impl<T> Default for FetchState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            phase: Phase::Idle,
            error_message: None,
        }
    }
}

impl<T> FetchState<T> {
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.phase == Phase::Loading
    }
}

/// What a fetch call did to the slice
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Items replaced with a fresh snapshot
    Applied { count: usize },
    /// Slice moved to `Failed`; items untouched
    Failed { error: HttpError },
    /// A fetch was already in flight; nothing was sent
    Coalesced,
    /// The response arrived after a newer fetch started and was dropped
    Discarded,
}

impl FetchOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, FetchOutcome::Failed { .. })
    }

    pub fn error(&self) -> Option<&HttpError> {
        match self {
            FetchOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub fn is_auth_rejection(&self) -> bool {
        self.error().is_some_and(HttpError::is_auth_rejection)
    }
}

/// A write the server accepted, and what the reload after it did.
///
/// The write stands even when `reload` failed; the slice then sits in
/// `Failed` with its previous items.
#[derive(Clone, Debug, PartialEq)]
pub struct Mutation {
    pub response: Value,
    pub reload: FetchOutcome,
}

#[derive(Debug)]
struct SliceInner<T> {
    state: FetchState<T>,
    sequence: u64,
}

/// Fetch-lifecycle cache for one resource kind.
///
/// The state mutex is never held across an await.
pub struct ResourceSlice<T: Resource> {
    gateway: Arc<HttpGateway>,
    session: Arc<SessionManager>,
    inner: Mutex<SliceInner<T>>,
}

impl<T: Resource> ResourceSlice<T> {
    pub fn new(gateway: Arc<HttpGateway>, session: Arc<SessionManager>) -> Self {
        Self {
            gateway,
            session,
            inner: Mutex::new(SliceInner {
                state: FetchState::default(),
                sequence: 0,
            }),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        T::KIND
    }

    /// Snapshot of the whole state
    pub fn state(&self) -> FetchState<T> {
        self.lock().state.clone()
    }

    pub fn phase(&self) -> Phase {
        self.lock().state.phase
    }

    pub fn items(&self) -> Vec<T> {
        self.lock().state.items.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().state.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn error_message(&self) -> Option<String> {
        self.lock().state.error_message.clone()
    }

    pub fn find(&self, id: &str) -> Option<T> {
        self.lock()
            .state
            .items
            .iter()
            .find(|item| item.id() == id)
            .cloned()
    }

    /// Load the collection unless a load is already running.
    ///
    /// Never returns an error: failures land in the slice state and are
    /// reported through the outcome.
    pub async fn trigger_fetch(&self) -> FetchOutcome {
        match self.begin(false) {
            Some(sequence) => self.run(sequence).await,
            None => {
                tracing::debug!("{} fetch coalesced", T::KIND);
                FetchOutcome::Coalesced
            }
        }
    }

    /// Load the collection even if a load is running; the older one's
    /// response will be discarded.
    pub async fn refetch(&self) -> FetchOutcome {
        match self.begin(true) {
            Some(sequence) => self.run(sequence).await,
            None => FetchOutcome::Coalesced,
        }
    }

    /// `Failed -> Idle`. Local only, never fetches. Returns whether the
    /// phase changed.
    pub fn clear_error(&self) -> bool {
        let mut inner = self.lock();
        if inner.state.phase != Phase::Failed {
            return false;
        }
        inner.state.phase = Phase::Idle;
        inner.state.error_message = None;
        true
    }

    /// `POST /R`, then reload the collection
    pub async fn create(&self, body: &Value) -> Result<Mutation, HttpError> {
        let response = self.send(Method::Post, T::KIND.path(), Some(body)).await?;
        Ok(self.reload_after(response).await)
    }

    /// `PUT /R/:id`, then reload the collection.
    ///
    /// `body` may carry only the fields being changed.
    pub async fn update(&self, id: &str, body: &Value) -> Result<Mutation, HttpError> {
        let response = self
            .send(Method::Put, &self.item_path(id), Some(body))
            .await?;
        Ok(self.reload_after(response).await)
    }

    /// `DELETE /R/:id`, then reload the collection
    pub async fn remove(&self, id: &str) -> Result<Mutation, HttpError> {
        let response = self.send(Method::Delete, &self.item_path(id), None).await?;
        Ok(self.reload_after(response).await)
    }

    async fn reload_after(&self, response: Value) -> Mutation {
        let reload = self.refetch().await;
        if let Some(error) = reload.error() {
            tracing::warn!(
                "{} write succeeded but the reload failed: {}",
                T::KIND,
                error
            );
        }
        Mutation { response, reload }
    }

    /// Protected request; a 401 ends the session that sent it
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, HttpError> {
        let token = self.session.token();
        let result = self.gateway.request(method, path, body, true).await;
        if let (Err(error), Some(token)) = (&result, token) {
            if error.is_auth_rejection() {
                self.session.handle_rejection(&token);
            }
        }
        result
    }

    fn item_path(&self, id: &str) -> String {
        format!("{}/{}", T::KIND.path(), id)
    }

    /// Enter `Loading` and claim a new sequence number
    fn begin(&self, supersede: bool) -> Option<u64> {
        let mut inner = self.lock();
        if inner.state.phase == Phase::Loading && !supersede {
            return None;
        }
        inner.sequence += 1;
        inner.state.phase = Phase::Loading;
        inner.state.error_message = None;
        tracing::debug!("{} fetch #{} started", T::KIND, inner.sequence);
        Some(inner.sequence)
    }

    async fn run(&self, sequence: u64) -> FetchOutcome {
        let mut pending = PendingFetch {
            slice: self,
            sequence,
            settled: false,
        };

        let result = self
            .send(Method::Get, T::KIND.path(), None)
            .await
            .and_then(|value| {
                serde_json::from_value::<Vec<T>>(value).map_err(|e| HttpError::Decode {
                    cause: format!("Invalid {} payload: {}", T::KIND, e),
                })
            });

        pending.settled = true;
        self.complete(sequence, result)
    }

    fn complete(&self, sequence: u64, result: Result<Vec<T>, HttpError>) -> FetchOutcome {
        let mut inner = self.lock();
        if inner.sequence != sequence {
            tracing::debug!(
                "{} fetch #{} superseded by #{}, discarding",
                T::KIND,
                sequence,
                inner.sequence
            );
            return FetchOutcome::Discarded;
        }

        match result {
            Ok(items) => {
                let count = items.len();
                inner.state.items = items;
                inner.state.phase = Phase::Ready;
                inner.state.error_message = None;
                tracing::debug!("{} ready with {} items", T::KIND, count);
                FetchOutcome::Applied { count }
            }
            Err(error) => {
                inner.state.phase = Phase::Failed;
                inner.state.error_message = Some(error.to_string());
                tracing::warn!("{} fetch failed: {}", T::KIND, error);
                FetchOutcome::Failed { error }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, SliceInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Leaves `Loading` if a fetch future is dropped before its response
/// arrives, so later triggers are not coalesced into nothing.
struct PendingFetch<'a, T: Resource> {
    slice: &'a ResourceSlice<T>,
    sequence: u64,
    settled: bool,
}

impl<T: Resource> Drop for PendingFetch<'_, T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut inner = self.slice.lock();
        if inner.sequence == self.sequence && inner.state.phase == Phase::Loading {
            tracing::debug!("{} fetch #{} abandoned", T::KIND, self.sequence);
            inner.state.phase = Phase::Idle;
        }
    }
}
