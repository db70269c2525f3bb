//! SMS collaborator used as the protected work in the demo scenarios.
//!
//! The wire types mirror the gateway's JSON contract. [`SimulatedSmsService`]
//! answers in-process, so the demo needs no network.

mod service;

pub use service::SimulatedSmsService;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::context::Context;
use crate::error::AdmissionError;

/// Gateway error code for a malformed request.
pub const CODE_INVALID: i32 = 10;

/// An outbound SMS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsRequest {
    pub request_id: String,
    pub phone_number: String,
    pub template: String,
}

impl SmsRequest {
    /// Create a request with a fresh request id.
    pub fn new(phone_number: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            phone_number: phone_number.into(),
            template: template.into(),
        }
    }
}

/// Gateway reply. A zero `error.code` means the message was accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsResponse {
    #[serde(default)]
    pub error: SmsStatus,
    #[serde(default)]
    pub data: SmsData,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsStatus {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsData {
    pub id: String,
}

/// Gateway connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmsConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub access_token: String,

    /// Delivery attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Probability in `[0, 1]` that one attempt fails in transport
    #[serde(default)]
    pub failure_rate: f64,
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            access_token: String::new(),
            max_attempts: default_max_attempts(),
            failure_rate: 0.0,
        }
    }
}

fn default_endpoint() -> String {
    "http://localhost:10000/sms".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

#[derive(Error, Debug)]
pub enum SmsError {
    #[error("SMS payload codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("SMS transport failed after {attempts} attempts: {message}")]
    Transport { attempts: u32, message: String },

    #[error("SMS gateway rejected request ({code}): {message}")]
    Rejected { code: i32, message: String },

    #[error("SMS send cancelled")]
    Cancelled,
}

impl From<SmsError> for AdmissionError {
    fn from(err: SmsError) -> Self {
        AdmissionError::work(err)
    }
}

/// Sends SMS messages.
#[async_trait]
pub trait SmsService: Send + Sync {
    async fn send_sms(
        &self,
        ctx: &Context,
        request: &SmsRequest,
    ) -> std::result::Result<SmsResponse, SmsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        let a = SmsRequest::new("0966666666", "hello");
        let b = SmsRequest::new("0966666666", "hello");
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn test_response_tolerates_missing_sections() {
        let response: SmsResponse = serde_json::from_str(r#"{"data":{"id":"1111"}}"#).unwrap();
        assert_eq!(response.error.code, 0);
        assert_eq!(response.data.id, "1111");
    }

    #[test]
    fn test_sms_error_becomes_work_error() {
        let err: AdmissionError = SmsError::Cancelled.into();
        assert!(!err.is_denied());
        assert_eq!(err.to_string(), "SMS send cancelled");
        assert!(err
            .work_error()
            .and_then(|e| e.downcast_ref::<SmsError>())
            .is_some());
    }
}
