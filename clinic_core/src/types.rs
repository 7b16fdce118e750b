//! Core domain types for the clinic dashboard.
//!
//! This module defines the records the backend serves:
//! - Roles and user profiles
//! - Resource kinds and their endpoints
//! - Catalogue records (departments, branches, doctors, services, offers, landing pages)
//! - Appointments with their call-tracking history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Roles and Profiles
// ============================================================================

/// Dashboard role attached to a credential
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    CustomerCare,
    MediaBuyer,
    /// Role text the dashboard does not know about
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Admin => "admin",
            Role::CustomerCare => "customercare",
            Role::MediaBuyer => "mediabuyer",
            Role::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Signed-in user as returned by the auth endpoints
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Profile {
    /// Name to stamp on records this user edits
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.id)
    }
}

// ============================================================================
// Resource Kinds
// ============================================================================

/// Every collection the dashboard caches
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    Departments,
    Branches,
    Doctors,
    Services,
    Offers,
    Appointments,
    LandingPages,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Departments,
        ResourceKind::Branches,
        ResourceKind::Doctors,
        ResourceKind::Services,
        ResourceKind::Offers,
        ResourceKind::Appointments,
        ResourceKind::LandingPages,
    ];

    /// Collection endpoint, e.g. `/landingPages`
    pub fn path(self) -> &'static str {
        match self {
            ResourceKind::Departments => "/departments",
            ResourceKind::Branches => "/branches",
            ResourceKind::Doctors => "/doctors",
            ResourceKind::Services => "/services",
            ResourceKind::Offers => "/offers",
            ResourceKind::Appointments => "/appointments",
            ResourceKind::LandingPages => "/landingPages",
        }
    }

    pub fn name(self) -> &'static str {
        &self.path()[1..]
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResourceKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let wanted = s.replace(['-', '_'], "").to_lowercase();
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.name().to_lowercase() == wanted)
            .ok_or_else(|| crate::Error::Other(format!("Unknown resource kind: {}", s)))
    }
}

// ============================================================================
// Outcome Enumerations
// ============================================================================

/// Declares a closed set of wire literals with a lossless escape hatch.
///
/// Extension policy: values outside the known set deserialize to
/// `Other(text)`, re-serialize verbatim and compare by exact text. Adding a
/// status means adding one `Variant => "literal"` line here.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
            /// Unrecognized wire text, kept as sent
            Other(String),
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                match self {
                    $($name::$variant => $text,)+
                    $name::Other(text) => text,
                }
            }

            pub fn is_known(&self) -> bool {
                !matches!(self, $name::Other(_))
            }
        }

        impl From<String> for $name {
            fn from(text: String) -> Self {
                let known = match text.as_str() {
                    $($text => Some($name::$variant),)+
                    _ => None,
                };
                known.unwrap_or_else(|| $name::Other(text))
            }
        }

        impl From<&str> for $name {
            fn from(text: &str) -> Self {
                $name::from(text.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> String {
                match value {
                    $name::Other(text) => text,
                    known => known.as_str().to_owned(),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum! {
    /// Outcome of one outreach call
    CallStatus {
        NoAnswer => "no_answer",
        Busy => "busy",
        Unreachable => "unreachable",
        WrongNumber => "wrong_number",
        Interested => "interested",
        NotInterested => "not_interested",
        FollowUp => "follow_up",
        Booked => "booked",
        Cancelled => "cancelled",
    }
}

wire_enum! {
    /// Where an appointment stands
    AppointmentStatus {
        Pending => "pending",
        Confirmed => "confirmed",
        Attended => "attended",
        NoShow => "no_show",
        Cancelled => "cancelled",
    }
}

wire_enum! {
    /// Payment state of an appointment
    PaymentStatus {
        Unpaid => "unpaid",
        Partial => "partial",
        Paid => "paid",
        Refunded => "refunded",
    }
}

impl Default for AppointmentStatus {
    fn default() -> Self {
        AppointmentStatus::Pending
    }
}

impl Default for PaymentStatus {
    fn default() -> Self {
        PaymentStatus::Unpaid
    }
}

// ============================================================================
// Catalogue Records
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Geographic position of a branch
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Doctor {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    #[serde(alias = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_price: Option<f64>,
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Campaign landing page collecting leads
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LandingPage {
    #[serde(alias = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<String>,
    #[serde(default = "default_true")]
    pub published: bool,
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Appointments and Call Tracking
// ============================================================================

/// One outreach attempt on an appointment
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallLog {
    pub timestamp: DateTime<Utc>,
    pub status: CallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_by: Option<String>,
}

/// A booking request and its call history.
///
/// The record always carries every field; hiding parts of it per role is
/// left to whatever displays it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: AppointmentStatus,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub auth_flag: bool,
    /// Ascending by timestamp
    #[serde(default, deserialize_with = "sorted_call_logs")]
    pub call_logs: Vec<CallLog>,
}

impl Appointment {
    /// Insert a call log, keeping the history ordered by timestamp
    pub fn record_call(&mut self, log: CallLog) {
        let at = self
            .call_logs
            .partition_point(|existing| existing.timestamp <= log.timestamp);
        self.call_logs.insert(at, log);
    }

    /// Most recent outreach attempt
    pub fn latest_call(&self) -> Option<&CallLog> {
        self.call_logs.last()
    }
}

fn sorted_call_logs<'de, D>(deserializer: D) -> std::result::Result<Vec<CallLog>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut logs = Option::<Vec<CallLog>>::deserialize(deserializer)?.unwrap_or_default();
    // Stable sort keeps server order for identical timestamps
    logs.sort_by_key(|log| log.timestamp);
    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_role_wire_names() {
        let role: Role = serde_json::from_value(json!("customercare")).unwrap();
        assert_eq!(role, Role::CustomerCare);

        let role: Role = serde_json::from_value(json!("superuser")).unwrap();
        assert_eq!(role, Role::Unknown);

        assert_eq!(serde_json::to_value(Role::MediaBuyer).unwrap(), json!("mediabuyer"));
    }

    #[test]
    fn test_resource_kind_parsing() {
        assert_eq!("branches".parse::<ResourceKind>().unwrap(), ResourceKind::Branches);
        assert_eq!(
            "landing-pages".parse::<ResourceKind>().unwrap(),
            ResourceKind::LandingPages
        );
        assert_eq!(
            "landingPages".parse::<ResourceKind>().unwrap(),
            ResourceKind::LandingPages
        );
        assert!("patients".parse::<ResourceKind>().is_err());
        assert_eq!(ResourceKind::LandingPages.path(), "/landingPages");
    }

    #[test]
    fn test_unknown_call_status_preserved_verbatim() {
        let status: CallStatus = serde_json::from_value(json!("لم يتم الرد")).unwrap();
        assert_eq!(status, CallStatus::Other("لم يتم الرد".into()));
        assert!(!status.is_known());
        assert_eq!(serde_json::to_value(&status).unwrap(), json!("لم يتم الرد"));

        let known: CallStatus = serde_json::from_value(json!("no_answer")).unwrap();
        assert_eq!(known, CallStatus::NoAnswer);
        assert_eq!(CallStatus::from("No_Answer"), CallStatus::Other("No_Answer".into()));
    }

    #[test]
    fn test_appointment_call_logs_sorted_on_load() {
        let appointment: Appointment = serde_json::from_value(json!({
            "_id": "a1",
            "name": "Sara",
            "phone": "0100",
            "branch": "b1",
            "createdAt": "2024-03-01T08:00:00Z",
            "status": "confirmed",
            "paymentStatus": "paid",
            "authFlag": true,
            "callLogs": [
                {"timestamp": "2024-03-01T12:00:00Z", "status": "booked"},
                {"timestamp": "2024-03-01T09:00:00Z", "status": "no_answer", "agentName": "Mona"}
            ]
        }))
        .unwrap();

        assert_eq!(appointment.id, "a1");
        assert_eq!(appointment.status, AppointmentStatus::Confirmed);
        assert_eq!(appointment.call_logs[0].status, CallStatus::NoAnswer);
        assert_eq!(appointment.call_logs[0].agent_name.as_deref(), Some("Mona"));
        assert_eq!(appointment.latest_call().unwrap().status, CallStatus::Booked);
    }

    #[test]
    fn test_record_call_keeps_order() {
        let mut appointment: Appointment = serde_json::from_value(json!({
            "id": "a2",
            "name": "Omar",
            "phone": "0111",
            "createdAt": "2024-03-01T08:00:00Z",
            "callLogs": null
        }))
        .unwrap();
        assert!(appointment.call_logs.is_empty());
        assert_eq!(appointment.payment_status, PaymentStatus::Unpaid);

        for hour in [11, 9, 10] {
            appointment.record_call(CallLog {
                timestamp: at(hour),
                status: CallStatus::Busy,
                notes: None,
                agent_name: None,
                edited_by: None,
            });
        }

        let hours: Vec<_> = appointment.call_logs.iter().map(|l| l.timestamp).collect();
        assert_eq!(hours, vec![at(9), at(10), at(11)]);
    }

    #[test]
    fn test_profile_display_name_fallbacks() {
        let mut profile = Profile {
            id: "u1".into(),
            name: None,
            email: Some("a@b.com".into()),
        };
        assert_eq!(profile.display_name(), "a@b.com");
        profile.email = None;
        assert_eq!(profile.display_name(), "u1");
    }
}
