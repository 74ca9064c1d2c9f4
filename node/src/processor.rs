//! # Card Payment Processor Client
//!
//! Talks to the external card processor (Circle's payments API) on behalf
//! of the top-up gateway. One call per top-up attempt, no retries: every
//! attempt carries a fresh idempotency key so a client that retries gets a
//! distinct payment rather than a silent duplicate.
//!
//! Wire format of `POST {base_url}/cards/payments`:
//!
//! ```json
//! {
//!   "idempotencyKey": "1f0c…",
//!   "amount": { "amount": "25.00", "currency": "USD" },
//!   "verification": "none",
//!   "source": { "id": "card-ref", "type": "card" },
//!   "metadata": { "walletAddress": "0x…" }
//! }
//! ```
//!
//! A successful response carries the payment under `data`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use yieldflow_protocol::AccountId;

use crate::config::ProcessorConfig;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A card charge, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub idempotency_key: Uuid,
    /// Decimal amount exactly as the client supplied it.
    pub amount: String,
    pub currency: String,
    pub card_reference: String,
    pub wallet_address: AccountId,
}

/// What the processor reported for an accepted charge.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentResponse {
    pub payment_id: String,
    pub status: String,
    /// The processor's full `data` object.
    pub data: Value,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessorError {
    /// No API key was configured.
    #[error("card processor is not configured")]
    NotConfigured,

    /// The processor answered with a non-success status.
    #[error("processor returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// The processor could not be reached or the body could not be read.
    #[error("processor unreachable: {0}")]
    Transport(String),

    /// A success status without a usable `data` object.
    #[error("unexpected processor response")]
    UnexpectedResponse,
}

impl ProcessorError {
    /// The message surfaced to the top-up client.
    pub fn client_message(&self) -> String {
        match self {
            ProcessorError::Upstream { message, .. } => message.clone(),
            ProcessorError::Transport(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Creates card payments.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_card_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentResponse, ProcessorError>;
}

// ---------------------------------------------------------------------------
// Wire Format
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CardPaymentBody<'a> {
    idempotency_key: String,
    amount: Money<'a>,
    verification: &'static str,
    source: CardSource<'a>,
    metadata: PaymentMetadata<'a>,
}

#[derive(Serialize)]
struct Money<'a> {
    amount: &'a str,
    currency: &'a str,
}

#[derive(Serialize)]
struct CardSource<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentMetadata<'a> {
    wallet_address: &'a str,
}

impl<'a> From<&'a PaymentRequest> for CardPaymentBody<'a> {
    fn from(request: &'a PaymentRequest) -> Self {
        Self {
            idempotency_key: request.idempotency_key.to_string(),
            amount: Money {
                amount: &request.amount,
                currency: &request.currency,
            },
            verification: "none",
            source: CardSource {
                id: &request.card_reference,
                kind: "card",
            },
            metadata: PaymentMetadata {
                wallet_address: request.wallet_address.as_str(),
            },
        }
    }
}

/// Picks the error text out of a failed response: its `error` field, else
/// the whole JSON body, else the raw text.
fn upstream_message(body: &str, status: reqwest::StatusCode) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("error") {
            Some(Value::String(message)) if !message.is_empty() => message.clone(),
            Some(other) if !other.is_null() => other.to_string(),
            _ => Value::Object(map).to_string(),
        },
        Ok(other) => other.to_string(),
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => status
            .canonical_reason()
            .unwrap_or("processor error")
            .to_string(),
    }
}

fn parse_payment(body: Value) -> Result<PaymentResponse, ProcessorError> {
    let data = match body.get("data") {
        Some(data @ Value::Object(_)) => data.clone(),
        _ => return Err(ProcessorError::UnexpectedResponse),
    };
    let payment_id = data
        .get("id")
        .and_then(Value::as_str)
        .ok_or(ProcessorError::UnexpectedResponse)?
        .to_string();
    let status = data
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(PaymentResponse {
        payment_id,
        status,
        data,
    })
}

// ---------------------------------------------------------------------------
// CirclePaymentClient
// ---------------------------------------------------------------------------

/// HTTP client for the Circle payments API.
#[derive(Debug, Clone)]
pub struct CirclePaymentClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl CirclePaymentClient {
    pub fn new(config: &ProcessorConfig) -> Result<Self, ProcessorError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProcessorError::Transport(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl PaymentProcessor for CirclePaymentClient {
    async fn create_card_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentResponse, ProcessorError> {
        let api_key = self.api_key.as_deref().ok_or(ProcessorError::NotConfigured)?;
        let url = format!("{}/cards/payments", self.base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&CardPaymentBody::from(request))
            .send()
            .await
            .map_err(|e| ProcessorError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProcessorError::Transport(e.to_string()))?;
        debug!(%status, idempotency_key = %request.idempotency_key, "processor responded");

        if !status.is_success() {
            return Err(ProcessorError::Upstream {
                status: status.as_u16(),
                message: upstream_message(&text, status),
            });
        }

        let body: Value =
            serde_json::from_str(&text).map_err(|_| ProcessorError::UnexpectedResponse)?;
        parse_payment(body)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::Arc;

    type Captured = Arc<parking_lot::Mutex<Vec<(Option<String>, Value)>>>;

    /// Serves `reply` at `/cards/payments` and records what it receives.
    async fn fake_processor(status: StatusCode, reply: Value) -> (String, Captured) {
        let captured: Captured = Arc::default();
        let sink = captured.clone();
        let app = Router::new().route(
            "/cards/payments",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let sink = sink.clone();
                let reply = reply.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    sink.lock().push((auth, body));
                    (status, Json(reply))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), captured)
    }

    fn client(base_url: &str, api_key: Option<&str>) -> CirclePaymentClient {
        CirclePaymentClient::new(&ProcessorConfig {
            base_url: base_url.to_string(),
            api_key: api_key.map(str::to_string),
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn request() -> PaymentRequest {
        PaymentRequest {
            idempotency_key: Uuid::new_v4(),
            amount: "25.00".into(),
            currency: "USD".into(),
            card_reference: "card-0001".into(),
            wallet_address: AccountId::parse("0x00000000000000000000000000000000000a11ce")
                .unwrap(),
        }
    }

    #[tokio::test]
    async fn successful_payment_is_parsed_and_request_shaped() {
        let (base, captured) = fake_processor(
            StatusCode::CREATED,
            serde_json::json!({ "data": { "id": "pay_1", "status": "pending", "fee": "0.30" } }),
        )
        .await;

        let req = request();
        let payment = client(&base, Some("sk_test"))
            .create_card_payment(&req)
            .await
            .unwrap();
        assert_eq!(payment.payment_id, "pay_1");
        assert_eq!(payment.status, "pending");
        assert_eq!(payment.data["fee"], "0.30");

        let calls = captured.lock();
        let (auth, body) = &calls[0];
        assert_eq!(auth.as_deref(), Some("Bearer sk_test"));
        assert_eq!(body["idempotencyKey"], req.idempotency_key.to_string());
        assert_eq!(body["amount"]["amount"], "25.00");
        assert_eq!(body["amount"]["currency"], "USD");
        assert_eq!(body["verification"], "none");
        assert_eq!(body["source"]["type"], "card");
        assert_eq!(body["source"]["id"], "card-0001");
        assert_eq!(body["metadata"]["walletAddress"], req.wallet_address.as_str());
    }

    #[tokio::test]
    async fn upstream_error_field_is_surfaced() {
        let (base, _) = fake_processor(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": "card declined" }),
        )
        .await;
        let err = client(&base, Some("k"))
            .create_card_payment(&request())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProcessorError::Upstream {
                status: 400,
                message: "card declined".into()
            }
        );
        assert_eq!(err.client_message(), "card declined");
    }

    #[tokio::test]
    async fn upstream_body_is_surfaced_without_error_field() {
        let (base, _) = fake_processor(
            StatusCode::UNPROCESSABLE_ENTITY,
            serde_json::json!({ "code": 2, "message": "Invalid entity" }),
        )
        .await;
        let err = client(&base, Some("k"))
            .create_card_payment(&request())
            .await
            .unwrap_err();
        let ProcessorError::Upstream { status, message } = err else {
            panic!("expected upstream error");
        };
        assert_eq!(status, 422);
        let echoed: Value = serde_json::from_str(&message).unwrap();
        assert_eq!(echoed["message"], "Invalid entity");
    }

    #[tokio::test]
    async fn success_without_data_is_unexpected() {
        let (base, _) = fake_processor(StatusCode::OK, serde_json::json!({ "ok": true })).await;
        assert_eq!(
            client(&base, Some("k")).create_card_payment(&request()).await,
            Err(ProcessorError::UnexpectedResponse)
        );
    }

    #[tokio::test]
    async fn unreachable_processor_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = client(&format!("http://{addr}"), Some("k"))
            .create_card_payment(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessorError::Transport(_)));
    }

    #[tokio::test]
    async fn missing_api_key_never_calls_out() {
        let (base, captured) = fake_processor(StatusCode::OK, Value::Null).await;
        let unconfigured = client(&base, None);
        assert!(!unconfigured.is_configured());
        assert_eq!(
            unconfigured.create_card_payment(&request()).await,
            Err(ProcessorError::NotConfigured)
        );
        assert!(captured.lock().is_empty());
    }

    #[test]
    fn non_json_error_body_is_used_as_text() {
        assert_eq!(
            upstream_message("  bad gateway upstream ", reqwest::StatusCode::BAD_GATEWAY),
            "bad gateway upstream"
        );
        assert_eq!(
            upstream_message("", reqwest::StatusCode::BAD_GATEWAY),
            "Bad Gateway"
        );
    }
}
