//! Protocol message definitions
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! Inbound frames are decoded leniently (unknown events are reported, not
//! rejected); outbound frames are a closed set.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Inbound event carrying a job request
pub const NEW_SERVICE_REQUEST: &str = "newServiceRequest";

/// Outbound event carrying a job response
pub const SERVICE_RESPONSE: &str = "serviceResponse";

/// Outbound greeting event
pub const MESSAGE: &str = "message";

// ─────────────────────────────────────────────────────────────────
// Service ID
// ─────────────────────────────────────────────────────────────────

/// Correlation id of a job; the coordinator may send it as a string or
/// an integer, it is always echoed back as a string
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ServiceId(String);

impl ServiceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl<'de> Deserialize<'de> for ServiceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Int(i64),
            UInt(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Str(s) => ServiceId(s),
            Raw::Int(n) => ServiceId(n.to_string()),
            Raw::UInt(n) => ServiceId(n.to_string()),
        })
    }
}

// ─────────────────────────────────────────────────────────────────
// Job Request / Response
// ─────────────────────────────────────────────────────────────────

/// A unit of work received from the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub service_id: ServiceId,

    /// Handler key; matched exactly and case-sensitively
    #[serde(default)]
    pub service_name: String,

    /// Opaque payload handed to the handler
    #[serde(default, alias = "service_request_details")]
    pub request_details: Value,
}

impl JobRequest {
    pub fn new(service_id: impl Into<String>, service_name: impl Into<String>, request_details: Value) -> Self {
        Self {
            service_id: ServiceId::new(service_id),
            service_name: service_name.into(),
            request_details,
        }
    }
}

/// Outcome of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Success,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Success => f.write_str("Success"),
            JobStatus::Failed => f.write_str("Failed"),
        }
    }
}

/// Result reported for exactly one job request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub service_id: ServiceId,

    /// Echoes the request's service name on success, empty on failure
    pub service_name: String,

    pub results: Option<Value>,

    pub status: JobStatus,
}

impl JobResponse {
    pub fn success(request: &JobRequest, results: Value) -> Self {
        Self {
            service_id: request.service_id.clone(),
            service_name: request.service_name.clone(),
            results: Some(results),
            status: JobStatus::Success,
        }
    }

    pub fn failed(request: &JobRequest) -> Self {
        Self {
            service_id: request.service_id.clone(),
            service_name: String::new(),
            results: None,
            status: JobStatus::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}

// ─────────────────────────────────────────────────────────────────
// Outbound Events
// ─────────────────────────────────────────────────────────────────

/// Events sent by the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum OutboundEvent {
    /// Job result
    ServiceResponse(JobResponse),

    /// Free-form greeting, no contractual meaning
    Message(String),
}

impl OutboundEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundEvent::ServiceResponse(_) => SERVICE_RESPONSE,
            OutboundEvent::Message(_) => MESSAGE,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Inbound Events
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawEvent {
    event: String,
    #[serde(default)]
    data: Value,
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// A job request to dispatch
    NewServiceRequest(JobRequest),

    /// A well-formed event this worker does not handle
    Unhandled { event: String },
}

impl InboundEvent {
    /// Decode a text frame
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawEvent = serde_json::from_str(text)?;
        Self::from_raw(raw)
    }

    /// Decode a binary frame containing UTF-8 JSON
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let raw: RawEvent = serde_json::from_slice(bytes)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawEvent) -> Result<Self, serde_json::Error> {
        if raw.event == NEW_SERVICE_REQUEST {
            let request = serde_json::from_value(raw.data)?;
            Ok(InboundEvent::NewServiceRequest(request))
        } else {
            Ok(InboundEvent::Unhandled { event: raw.event })
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
