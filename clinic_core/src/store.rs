//! Store root composing the session and every resource slice.
//!
//! Opening the store rehydrates the persisted Auth branch before any slice
//! is constructed, so no fetch can run ahead of the stored token. The Auth
//! branch is the only state that outlives the process.

use crate::credentials::CredentialStore;
use crate::gateway::HttpGateway;
use crate::session::{SessionManager, SessionState};
use crate::slice::{FetchOutcome, Phase, Resource, ResourceSlice};
use crate::types::{
    Appointment, Branch, CallLog, CallStatus, Department, Doctor, LandingPage, Offer, Profile,
    ResourceKind, Role, Service,
};
use crate::{Config, Error, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Phase, size and last error of one slice
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SliceSummary {
    pub kind: ResourceKind,
    pub phase: Phase,
    pub count: usize,
    pub error: Option<String>,
}

/// Point-in-time view of the whole store
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoreSnapshot {
    pub session: SessionState,
    pub role: Option<Role>,
    pub user: Option<Profile>,
    pub slices: Vec<SliceSummary>,
}

/// Single addressable root for all client-side state
pub struct StoreRoot {
    config: Config,
    session: Arc<SessionManager>,
    departments: ResourceSlice<Department>,
    branches: ResourceSlice<Branch>,
    doctors: ResourceSlice<Doctor>,
    services: ResourceSlice<Service>,
    offers: ResourceSlice<Offer>,
    appointments: ResourceSlice<Appointment>,
    landing_pages: ResourceSlice<LandingPage>,
}

impl StoreRoot {
    /// Rehydrate the credential and build every slice on top of it
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let credentials = Arc::new(CredentialStore::load(config.data.credential_path()));
        let gateway = Arc::new(HttpGateway::new(&config.api, Arc::clone(&credentials))?);
        let session = Arc::new(SessionManager::new(
            Arc::clone(&gateway),
            credentials,
            config.api.signout_path.clone(),
        ));

        tracing::debug!("Store opened against {}", gateway.base_url());
        Ok(Self {
            departments: ResourceSlice::new(Arc::clone(&gateway), Arc::clone(&session)),
            branches: ResourceSlice::new(Arc::clone(&gateway), Arc::clone(&session)),
            doctors: ResourceSlice::new(Arc::clone(&gateway), Arc::clone(&session)),
            services: ResourceSlice::new(Arc::clone(&gateway), Arc::clone(&session)),
            offers: ResourceSlice::new(Arc::clone(&gateway), Arc::clone(&session)),
            appointments: ResourceSlice::new(Arc::clone(&gateway), Arc::clone(&session)),
            landing_pages: ResourceSlice::new(Arc::clone(&gateway), Arc::clone(&session)),
            session,
            config,
        })
    }

    /// One-time startup validation of a rehydrated credential
    pub async fn start(&self) -> SessionState {
        self.session.validate().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn departments(&self) -> &ResourceSlice<Department> {
        &self.departments
    }

    pub fn branches(&self) -> &ResourceSlice<Branch> {
        &self.branches
    }

    pub fn doctors(&self) -> &ResourceSlice<Doctor> {
        &self.doctors
    }

    pub fn services(&self) -> &ResourceSlice<Service> {
        &self.services
    }

    pub fn offers(&self) -> &ResourceSlice<Offer> {
        &self.offers
    }

    pub fn appointments(&self) -> &ResourceSlice<Appointment> {
        &self.appointments
    }

    pub fn landing_pages(&self) -> &ResourceSlice<LandingPage> {
        &self.landing_pages
    }

    /// Trigger the slice for `kind`; a 401 also ends the session
    pub async fn fetch(&self, kind: ResourceKind) -> FetchOutcome {
        match kind {
            ResourceKind::Departments => self.departments.trigger_fetch().await,
            ResourceKind::Branches => self.branches.trigger_fetch().await,
            ResourceKind::Doctors => self.doctors.trigger_fetch().await,
            ResourceKind::Services => self.services.trigger_fetch().await,
            ResourceKind::Offers => self.offers.trigger_fetch().await,
            ResourceKind::Appointments => self.appointments.trigger_fetch().await,
            ResourceKind::LandingPages => self.landing_pages.trigger_fetch().await,
        }
    }

    /// Trigger every slice concurrently
    pub async fn fetch_all(&self) -> Vec<(ResourceKind, FetchOutcome)> {
        let (departments, branches, doctors, services, offers, appointments, landing_pages) =
            tokio::join!(
                self.fetch(ResourceKind::Departments),
                self.fetch(ResourceKind::Branches),
                self.fetch(ResourceKind::Doctors),
                self.fetch(ResourceKind::Services),
                self.fetch(ResourceKind::Offers),
                self.fetch(ResourceKind::Appointments),
                self.fetch(ResourceKind::LandingPages),
            );

        ResourceKind::ALL.into_iter().zip([
            departments,
            branches,
            doctors,
            services,
            offers,
            appointments,
            landing_pages,
        ])
        .collect()
    }

    /// Rendered lists of `kind` as JSON values, in server order
    pub fn items_json(&self, kind: ResourceKind) -> Result<Vec<serde_json::Value>> {
        fn encode<T: Resource>(slice: &ResourceSlice<T>) -> Result<Vec<serde_json::Value>> {
            slice
                .items()
                .iter()
                .map(|item| serde_json::to_value(item).map_err(Error::from))
                .collect()
        }

        match kind {
            ResourceKind::Departments => encode(&self.departments),
            ResourceKind::Branches => encode(&self.branches),
            ResourceKind::Doctors => encode(&self.doctors),
            ResourceKind::Services => encode(&self.services),
            ResourceKind::Offers => encode(&self.offers),
            ResourceKind::Appointments => encode(&self.appointments),
            ResourceKind::LandingPages => encode(&self.landing_pages),
        }
    }

    pub fn summary(&self, kind: ResourceKind) -> SliceSummary {
        fn summarize<T: Resource>(slice: &ResourceSlice<T>) -> SliceSummary {
            let state = slice.state();
            SliceSummary {
                kind: T::KIND,
                phase: state.phase(),
                count: state.items().len(),
                error: state.error_message().map(str::to_owned),
            }
        }

        match kind {
            ResourceKind::Departments => summarize(&self.departments),
            ResourceKind::Branches => summarize(&self.branches),
            ResourceKind::Doctors => summarize(&self.doctors),
            ResourceKind::Services => summarize(&self.services),
            ResourceKind::Offers => summarize(&self.offers),
            ResourceKind::Appointments => summarize(&self.appointments),
            ResourceKind::LandingPages => summarize(&self.landing_pages),
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let authenticated = self.session.is_authenticated();
        StoreSnapshot {
            session: self.session.state(),
            role: authenticated.then(|| self.session.role()),
            user: self.session.profile(),
            slices: ResourceKind::ALL
                .into_iter()
                .map(|kind| self.summary(kind))
                .collect(),
        }
    }

    /// Append an outreach attempt to an appointment and write it back.
    ///
    /// The signed-in user is stamped as the agent. Loads the appointments
    /// first if the record is not cached yet. Only `callLogs` is sent, so
    /// fields this client does not model stay as the server has them.
    pub async fn record_call(
        &self,
        appointment_id: &str,
        status: CallStatus,
        notes: Option<String>,
    ) -> Result<Appointment> {
        if !self.session.is_authenticated() {
            return Err(Error::NotAuthenticated);
        }

        if self.appointments.find(appointment_id).is_none() {
            if let Some(error) = self.fetch(ResourceKind::Appointments).await.error() {
                return Err(error.clone().into());
            }
        }

        let mut appointment =
            self.appointments
                .find(appointment_id)
                .ok_or_else(|| Error::NotFound {
                    kind: ResourceKind::Appointments.to_string(),
                    id: appointment_id.to_owned(),
                })?;

        let agent = self
            .session
            .profile()
            .map(|profile| profile.display_name().to_owned());
        appointment.record_call(CallLog {
            timestamp: Utc::now(),
            status,
            notes,
            agent_name: agent,
            edited_by: None,
        });

        let body = json!({ "callLogs": appointment.call_logs });
        self.appointments.update(appointment_id, &body).await?;

        tracing::info!("Recorded call on appointment {}", appointment_id);
        Ok(appointment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;
    use serde_json::json;
    use std::path::Path;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer, data_dir: &Path) -> Config {
        crate::logging::init_test();
        let mut config = Config::default();
        config.api.base_url = server.uri();
        config.data.data_dir = data_dir.to_path_buf();
        config
    }

    fn seed_credential(data_dir: &Path, token: &str) {
        CredentialStore::load(data_dir.join("auth.json"))
            .save(&Credential::new(
                token,
                Role::CustomerCare,
                Some(Profile {
                    id: "7".into(),
                    name: Some("Mona".into()),
                    email: None,
                }),
            ))
            .unwrap();
    }

    fn appointment_json(logs: serde_json::Value) -> serde_json::Value {
        json!([{
            "_id": "a1",
            "name": "Sara",
            "phone": "0100",
            "createdAt": "2024-03-01T08:00:00Z",
            "callLogs": logs
        }])
    }

    #[tokio::test]
    async fn test_open_rehydrates_before_first_fetch() {
        let server = MockServer::start().await;
        let temp_dir = tempfile::tempdir().unwrap();
        seed_credential(temp_dir.path(), "T1");

        Mock::given(method("GET"))
            .and(path("/branches"))
            .and(header("Authorization", "Bearer T1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"_id": "b1", "name": "Maadi"}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = StoreRoot::open(config_for(&server, temp_dir.path())).unwrap();
        assert_eq!(store.session().state(), SessionState::Authenticated);

        let outcome = store.fetch(ResourceKind::Branches).await;
        assert_eq!(outcome, FetchOutcome::Applied { count: 1 });
        assert_eq!(store.branches().items()[0].name, "Maadi");
    }

    #[tokio::test]
    async fn test_start_validates_once() {
        let server = MockServer::start().await;
        let temp_dir = tempfile::tempdir().unwrap();
        seed_credential(temp_dir.path(), "T1");

        Mock::given(method("GET"))
            .and(path("/protected"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let store = StoreRoot::open(config_for(&server, temp_dir.path())).unwrap();
        assert_eq!(store.start().await, SessionState::Anonymous);
        assert!(!temp_dir.path().join("auth.json").exists());
    }

    #[tokio::test]
    async fn test_rejected_fetch_signs_out() {
        let server = MockServer::start().await;
        let temp_dir = tempfile::tempdir().unwrap();
        seed_credential(temp_dir.path(), "T1");

        Mock::given(method("GET"))
            .and(path("/appointments"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let store = StoreRoot::open(config_for(&server, temp_dir.path())).unwrap();
        let outcome = store.fetch(ResourceKind::Appointments).await;

        assert!(outcome.is_auth_rejection());
        assert_eq!(store.session().state(), SessionState::Anonymous);
        assert_eq!(store.appointments().phase(), Phase::Failed);
        assert!(!temp_dir.path().join("auth.json").exists());
    }

    #[tokio::test]
    async fn test_forbidden_fetch_keeps_session() {
        let server = MockServer::start().await;
        let temp_dir = tempfile::tempdir().unwrap();
        seed_credential(temp_dir.path(), "T1");

        Mock::given(method("GET"))
            .and(path("/landingPages"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let store = StoreRoot::open(config_for(&server, temp_dir.path())).unwrap();
        store.fetch(ResourceKind::LandingPages).await;

        assert_eq!(store.session().state(), SessionState::Authenticated);
        assert_eq!(
            store.summary(ResourceKind::LandingPages).error.as_deref(),
            Some("HTTP 403")
        );
    }

    #[tokio::test]
    async fn test_logout_then_fresh_start_is_anonymous() {
        let server = MockServer::start().await;
        let temp_dir = tempfile::tempdir().unwrap();

        Mock::given(method("POST"))
            .and(path("/auth/signin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "idToken": "T1",
                "role": "admin",
                "user": {"id": "1"}
            })))
            .mount(&server)
            .await;

        {
            let store = StoreRoot::open(config_for(&server, temp_dir.path())).unwrap();
            store.session().login("a@b.com", "x").await;
            assert!(store.session().is_authenticated());
            store.session().logout().await;
        }

        let restarted = StoreRoot::open(config_for(&server, temp_dir.path())).unwrap();
        assert_eq!(restarted.session().state(), SessionState::Anonymous);
        assert_eq!(restarted.session().token(), None);
        assert_eq!(restarted.start().await, SessionState::Anonymous);
    }

    #[tokio::test]
    async fn test_fetch_all_and_snapshot() {
        let server = MockServer::start().await;
        let temp_dir = tempfile::tempdir().unwrap();
        seed_credential(temp_dir.path(), "T1");

        for kind in ResourceKind::ALL {
            let body = if kind == ResourceKind::Offers {
                ResponseTemplate::new(500)
            } else {
                ResponseTemplate::new(200).set_body_json(json!([]))
            };
            Mock::given(method("GET"))
                .and(path(kind.path()))
                .respond_with(body)
                .expect(1)
                .mount(&server)
                .await;
        }

        let store = StoreRoot::open(config_for(&server, temp_dir.path())).unwrap();
        let outcomes = store.fetch_all().await;

        assert_eq!(outcomes.len(), 7);
        for (kind, outcome) in &outcomes {
            if *kind == ResourceKind::Offers {
                assert!(outcome.error().is_some());
            } else {
                assert_eq!(*outcome, FetchOutcome::Applied { count: 0 }, "{}", kind);
            }
        }

        let snapshot = store.snapshot();
        assert_eq!(snapshot.session, SessionState::Authenticated);
        assert_eq!(snapshot.role, Some(Role::CustomerCare));
        let offers = snapshot
            .slices
            .iter()
            .find(|s| s.kind == ResourceKind::Offers)
            .unwrap();
        assert_eq!(offers.phase, Phase::Failed);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["session"]["state"], "authenticated");
        assert_eq!(json["slices"][0]["kind"], "departments");
    }

    #[tokio::test]
    async fn test_record_call_writes_back_only_call_logs() {
        let server = MockServer::start().await;
        let temp_dir = tempfile::tempdir().unwrap();
        seed_credential(temp_dir.path(), "T1");

        let mut listed = appointment_json(json!([{
            "timestamp": "2024-03-01T09:00:00Z",
            "status": "no_answer"
        }]));
        listed[0]["email"] = json!("sara@example.com");
        listed[0]["doctor"] = json!("doc1");
        Mock::given(method("GET"))
            .and(path("/appointments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listed))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/appointments/a1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let store = StoreRoot::open(config_for(&server, temp_dir.path())).unwrap();
        let updated = store
            .record_call("a1", CallStatus::Booked, Some("Prefers mornings".into()))
            .await
            .unwrap();

        let latest = updated.latest_call().unwrap();
        assert_eq!(latest.status, CallStatus::Booked);
        assert_eq!(latest.agent_name.as_deref(), Some("Mona"));
        assert_eq!(latest.notes.as_deref(), Some("Prefers mornings"));

        let requests = server.received_requests().await.unwrap();
        let put = requests
            .iter()
            .find(|r| r.method.as_str() == "PUT")
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&put.body).unwrap();
        let fields: Vec<&String> = body.as_object().unwrap().keys().collect();
        assert_eq!(fields, vec!["callLogs"]);
        assert_eq!(body["callLogs"][0]["status"], "no_answer");
        assert_eq!(body["callLogs"][1]["status"], "booked");
        assert_eq!(body["callLogs"][1]["agentName"], "Mona");
    }

    #[tokio::test]
    async fn test_rejected_call_write_signs_out() {
        let server = MockServer::start().await;
        let temp_dir = tempfile::tempdir().unwrap();
        seed_credential(temp_dir.path(), "T1");

        Mock::given(method("GET"))
            .and(path("/appointments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(appointment_json(json!([]))))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/appointments/a1"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let store = StoreRoot::open(config_for(&server, temp_dir.path())).unwrap();
        let err = store
            .record_call("a1", CallStatus::Busy, None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Http(ref e) if e.is_auth_rejection()));
        assert_eq!(store.session().state(), SessionState::Anonymous);
        assert!(!temp_dir.path().join("auth.json").exists());
    }

    #[tokio::test]
    async fn test_record_call_requires_session_and_record() {
        let server = MockServer::start().await;
        let temp_dir = tempfile::tempdir().unwrap();

        let store = StoreRoot::open(config_for(&server, temp_dir.path())).unwrap();
        let err = store
            .record_call("a1", CallStatus::NoAnswer, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotAuthenticated));

        seed_credential(temp_dir.path(), "T1");
        Mock::given(method("GET"))
            .and(path("/appointments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let store = StoreRoot::open(config_for(&server, temp_dir.path())).unwrap();
        let err = store
            .record_call("missing", CallStatus::NoAnswer, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
