use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{
    SmsConfig, SmsData, SmsError, SmsRequest, SmsResponse, SmsService, SmsStatus, CODE_INVALID,
};
use crate::context::Context;

/// Base delay between delivery attempts; grows linearly per attempt.
const RETRY_DELAY: Duration = Duration::from_millis(50);

/// In-process SMS gateway.
///
/// Requests travel through the same JSON encoding a real gateway would see.
/// Transport failures are injected with probability `failure_rate` and
/// retried up to `max_attempts` times.
#[derive(Debug, Clone)]
pub struct SimulatedSmsService {
    config: SmsConfig,
}

impl SimulatedSmsService {
    pub fn new(config: SmsConfig) -> Self {
        Self { config }
    }

    /// One round trip to the gateway: raw request bytes in, raw reply out.
    fn deliver(&self, body: &[u8]) -> std::result::Result<Vec<u8>, String> {
        let failure_rate = self.config.failure_rate;
        if failure_rate > 0.0 && rand::thread_rng().gen_bool(failure_rate.min(1.0)) {
            return Err(format!("connection to {} reset", self.config.endpoint));
        }

        let response = match serde_json::from_slice::<SmsRequest>(body) {
            Ok(request) if !request.phone_number.is_empty() => SmsResponse {
                error: SmsStatus::default(),
                data: SmsData {
                    id: Uuid::new_v4().to_string(),
                },
            },
            _ => SmsResponse {
                error: SmsStatus {
                    code: CODE_INVALID,
                    message: "Invalid".to_string(),
                },
                data: SmsData::default(),
            },
        };

        serde_json::to_vec(&response).map_err(|e| e.to_string())
    }
}

#[async_trait]
impl SmsService for SimulatedSmsService {
    #[instrument(skip_all, fields(request_id = %request.request_id))]
    async fn send_sms(
        &self,
        ctx: &Context,
        request: &SmsRequest,
    ) -> std::result::Result<SmsResponse, SmsError> {
        let body = serde_json::to_vec(request)?;
        let attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if ctx.is_cancelled() {
                return Err(SmsError::Cancelled);
            }

            debug!(endpoint = %self.config.endpoint, attempt, "Sending SMS request");

            match self.deliver(&body) {
                Ok(raw) => {
                    let response: SmsResponse = serde_json::from_slice(&raw)?;
                    if response.error.code != 0 {
                        return Err(SmsError::Rejected {
                            code: response.error.code,
                            message: response.error.message,
                        });
                    }
                    debug!(id = %response.data.id, "SMS accepted");
                    return Ok(response);
                }
                Err(message) => {
                    warn!(attempt, error = %message, "SMS delivery attempt failed");
                    last_error = message;
                }
            }

            if attempt < attempts {
                tokio::select! {
                    _ = tokio::time::sleep(RETRY_DELAY * attempt) => {}
                    _ = ctx.cancelled() => return Err(SmsError::Cancelled),
                }
            }
        }

        Err(SmsError::Transport {
            attempts,
            message: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(failure_rate: f64, max_attempts: u32) -> SimulatedSmsService {
        SimulatedSmsService::new(SmsConfig {
            failure_rate,
            max_attempts,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_send_returns_message_id() {
        let service = service(0.0, 3);
        let request = SmsRequest::new("0966666666", "Your code is 1234");

        let response = service
            .send_sms(&Context::background(), &request)
            .await
            .unwrap();

        assert_eq!(response.error.code, 0);
        assert!(Uuid::parse_str(&response.data.id).is_ok());
    }

    #[tokio::test]
    async fn test_empty_phone_is_rejected() {
        let service = service(0.0, 3);
        let request = SmsRequest::new("", "hello");

        let err = service
            .send_sms(&Context::background(), &request)
            .await
            .unwrap_err();

        match err {
            SmsError::Rejected { code, message } => {
                assert_eq!(code, CODE_INVALID);
                assert_eq!(message, "Invalid");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transport_failures_exhaust_attempts() {
        let service = service(1.0, 3);
        let request = SmsRequest::new("0966666666", "hello");

        let err = service
            .send_sms(&Context::background(), &request)
            .await
            .unwrap_err();

        assert!(matches!(err, SmsError::Transport { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_cancelled_context_stops_delivery() {
        let service = service(0.0, 3);
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();

        let err = service
            .send_sms(&ctx, &SmsRequest::new("0966666666", "hello"))
            .await
            .unwrap_err();

        assert!(matches!(err, SmsError::Cancelled));
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let service = service(0.0, 0);
        let response = service
            .send_sms(&Context::background(), &SmsRequest::new("1", "x"))
            .await;
        assert!(response.is_ok());
    }
}
