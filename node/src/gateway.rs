//! # Reputation-Gated Top-Up Gateway
//!
//! Fiat card top-ups for accounts that have earned a minimum reputation.
//! Each request moves through a fixed sequence of states, and each state is
//! its own type so a step cannot be skipped:
//!
//! ```text
//! TopUpRequest ──validate──▶ ValidatedTopUp ──gate──▶ GatedTopUp ──submit──▶ TopUpReceipt
//!      │                          │                       │
//!      ▼                          ▼                       ▼
//!  InvalidInput (400)   InsufficientReputation (403)   Upstream (502)
//!                       OracleFailure (500)            UnexpectedResponse (500)
//!                                                      ProcessorUnavailable (500)
//! ```
//!
//! Rate limiting happens before any of this, on the raw request. The
//! gateway only reads reputation; it never credits or debits the ledger.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRef, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use yieldflow_protocol::{AccountId, Ledger};

use crate::api::ErrorResponse;
use crate::config::GatewayConfig;
use crate::metrics::SharedMetrics;
use crate::processor::{PaymentProcessor, PaymentRequest, ProcessorError};
use crate::rate_limit::{CallerId, ForwardedPolicy, RateLimited, RateLimiter};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("{0}")]
    InvalidInput(Cow<'static, str>),

    #[error("Insufficient reputation for top-up.")]
    InsufficientReputation { score: u64, required: u64 },

    #[error("Too many requests, please try again later.")]
    RateLimited(RateLimited),

    #[error("Failed to check on-chain reputation.")]
    OracleFailure(String),

    /// The processor refused or could not be reached. Carries its message.
    #[error("{0}")]
    Upstream(String),

    #[error("Unexpected Circle API response.")]
    UnexpectedResponse,

    #[error("Card processor is not configured.")]
    ProcessorUnavailable,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            GatewayError::InsufficientReputation { .. } => StatusCode::FORBIDDEN,
            GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::OracleFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UnexpectedResponse => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::ProcessorUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Metric label for this outcome.
    pub fn outcome(&self) -> &'static str {
        match self {
            GatewayError::InvalidInput(_) => "invalid_input",
            GatewayError::InsufficientReputation { .. } => "insufficient_reputation",
            GatewayError::RateLimited(_) => "rate_limited",
            GatewayError::OracleFailure(_) => "oracle_failure",
            GatewayError::Upstream(_)
            | GatewayError::UnexpectedResponse
            | GatewayError::ProcessorUnavailable => "processor_failure",
        }
    }
}

impl From<ProcessorError> for GatewayError {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::NotConfigured => GatewayError::ProcessorUnavailable,
            ProcessorError::UnexpectedResponse => GatewayError::UnexpectedResponse,
            other => GatewayError::Upstream(other.client_message()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = match &self {
            GatewayError::RateLimited(limited) => Some(limited.retry_after.as_secs().max(1)),
            _ => None,
        };
        let mut response = (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

// ---------------------------------------------------------------------------
// Reputation Oracle
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
#[error("reputation lookup failed: {0}")]
pub struct OracleError(pub String);

/// Source of reputation scores for gating.
#[async_trait]
pub trait ReputationOracle: Send + Sync {
    async fn reputation_score(&self, account: &AccountId) -> Result<u64, OracleError>;
}

#[async_trait]
impl ReputationOracle for Ledger {
    async fn reputation_score(&self, account: &AccountId) -> Result<u64, OracleError> {
        Ok(Ledger::reputation_score(self, account))
    }
}

// ---------------------------------------------------------------------------
// Request States
// ---------------------------------------------------------------------------

/// A top-up as received. Fields stay untyped until validation so a wrong
/// type yields the same message as a missing field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUpRequest {
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub currency: Option<Value>,
    #[serde(default, alias = "cardId")]
    pub card_reference: Option<Value>,
    #[serde(default, alias = "walletAddress")]
    pub target_account: Option<Value>,
}

/// A well-formed top-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTopUp {
    /// Decimal amount as the client wrote it.
    pub amount: String,
    pub currency: String,
    pub card_reference: String,
    pub target_account: AccountId,
}

/// A top-up whose target account has enough reputation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatedTopUp {
    top_up: ValidatedTopUp,
    reputation: u64,
}

impl GatedTopUp {
    pub fn top_up(&self) -> &ValidatedTopUp {
        &self.top_up
    }

    pub fn reputation(&self) -> u64 {
        self.reputation
    }
}

/// The terminal success state, returned to the client as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUpReceipt {
    pub success: bool,
    pub payment_id: String,
    pub status: String,
    pub data: Value,
}

/// Validation rules, lifted from [`GatewayConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayPolicy {
    pub min_reputation: u64,
    pub supported_currency: String,
    pub min_card_reference_len: usize,
}

impl From<&GatewayConfig> for GatewayPolicy {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            min_reputation: config.min_reputation,
            supported_currency: config.supported_currency.clone(),
            min_card_reference_len: config.min_card_reference_len,
        }
    }
}

impl Default for GatewayPolicy {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

fn parse_amount(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    let parsed: f64 = text.parse().ok()?;
    (parsed.is_finite() && parsed > 0.0).then_some(text)
}

impl TopUpRequest {
    /// Checks fields in a fixed order and reports the first failure.
    pub fn validate(&self, policy: &GatewayPolicy) -> Result<ValidatedTopUp, GatewayError> {
        let amount = parse_amount(self.amount.as_ref())
            .ok_or(GatewayError::InvalidInput("Invalid amount.".into()))?;

        let currency = match &self.currency {
            Some(Value::String(c)) if *c == policy.supported_currency => c.clone(),
            _ => {
                return Err(GatewayError::InvalidInput(
                    format!("Only {} is supported.", policy.supported_currency).into(),
                ))
            }
        };

        let card_reference = match &self.card_reference {
            Some(Value::String(card)) if card.chars().count() >= policy.min_card_reference_len => {
                card.clone()
            }
            _ => return Err(GatewayError::InvalidInput("Invalid cardId.".into())),
        };

        let target_account = self
            .target_account
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|raw| AccountId::parse(raw).ok())
            .ok_or(GatewayError::InvalidInput("Invalid walletAddress.".into()))?;

        Ok(ValidatedTopUp {
            amount,
            currency,
            card_reference,
            target_account,
        })
    }
}

// ---------------------------------------------------------------------------
// Audit Log
// ---------------------------------------------------------------------------

/// One completed top-up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub target_account: AccountId,
    /// Only the last four characters are kept.
    pub card_reference: String,
    pub amount: String,
    pub currency: String,
    pub processor_payment_id: String,
    pub status: String,
    pub recorded_at: DateTime<Utc>,
}

fn mask_card(card: &str) -> String {
    let chars: Vec<char> = card.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("****{tail}")
}

/// Bounded in-memory history of completed top-ups.
#[derive(Debug)]
pub struct AuditLog {
    capacity: usize,
    records: VecDeque<AuditRecord>,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: VecDeque::new(),
        }
    }

    pub fn push(&mut self, record: AuditRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditRecord> {
        self.records.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// TopUpGateway
// ---------------------------------------------------------------------------

pub struct TopUpGateway {
    policy: GatewayPolicy,
    forwarded: ForwardedPolicy,
    limiter: RateLimiter,
    oracle: Arc<dyn ReputationOracle>,
    processor: Arc<dyn PaymentProcessor>,
    audit: Mutex<AuditLog>,
    metrics: Option<SharedMetrics>,
}

impl TopUpGateway {
    pub fn new(
        config: &GatewayConfig,
        limiter: RateLimiter,
        oracle: Arc<dyn ReputationOracle>,
        processor: Arc<dyn PaymentProcessor>,
    ) -> Self {
        Self {
            policy: GatewayPolicy::from(config),
            forwarded: ForwardedPolicy {
                trust_forwarded_for: config.trust_forwarded_for,
            },
            limiter,
            oracle,
            processor,
            audit: Mutex::new(AuditLog::new(config.audit_capacity)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> &GatewayPolicy {
        &self.policy
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn recent_topups(&self, limit: usize) -> Vec<AuditRecord> {
        self.audit.lock().recent(limit)
    }

    /// Received → Validated. A body that is not a JSON object fails as a
    /// missing amount would.
    pub fn validate(&self, body: &[u8]) -> Result<ValidatedTopUp, GatewayError> {
        let request: TopUpRequest = serde_json::from_slice(body).unwrap_or_default();
        request.validate(&self.policy)
    }

    /// Validated → Gated.
    pub async fn gate(&self, top_up: ValidatedTopUp) -> Result<GatedTopUp, GatewayError> {
        let reputation = self
            .oracle
            .reputation_score(&top_up.target_account)
            .await
            .map_err(|e| {
                warn!(account = %top_up.target_account, error = %e, "reputation lookup failed");
                GatewayError::OracleFailure(e.to_string())
            })?;

        if reputation < self.policy.min_reputation {
            return Err(GatewayError::InsufficientReputation {
                score: reputation,
                required: self.policy.min_reputation,
            });
        }
        Ok(GatedTopUp { top_up, reputation })
    }

    /// Gated → Submitted → Completed.
    pub async fn submit(&self, gated: GatedTopUp) -> Result<TopUpReceipt, GatewayError> {
        let top_up = gated.top_up;
        let request = PaymentRequest {
            idempotency_key: Uuid::new_v4(),
            amount: top_up.amount.clone(),
            currency: top_up.currency.clone(),
            card_reference: top_up.card_reference.clone(),
            wallet_address: top_up.target_account.clone(),
        };
        info!(
            account = %top_up.target_account,
            amount = %top_up.amount,
            idempotency_key = %request.idempotency_key,
            "top-up submitted"
        );

        let timer = self
            .metrics
            .as_ref()
            .map(|m| m.processor_latency_seconds.start_timer());
        let result = self.processor.create_card_payment(&request).await;
        if let Some(timer) = timer {
            timer.observe_duration();
        }

        let payment = result.map_err(|e| {
            warn!(account = %top_up.target_account, error = %e, "processor rejected top-up");
            GatewayError::from(e)
        })?;

        let record = AuditRecord {
            target_account: top_up.target_account,
            card_reference: mask_card(&top_up.card_reference),
            amount: top_up.amount,
            currency: top_up.currency,
            processor_payment_id: payment.payment_id.clone(),
            status: payment.status.clone(),
            recorded_at: Utc::now(),
        };
        info!(
            target: "yieldflow::audit",
            account = %record.target_account,
            card = %record.card_reference,
            amount = %record.amount,
            payment_id = %record.processor_payment_id,
            status = %record.status,
            "top-up completed"
        );
        self.audit.lock().push(record);

        Ok(TopUpReceipt {
            success: true,
            payment_id: payment.payment_id,
            status: payment.status,
            data: payment.data,
        })
    }

    /// Runs a raw request from `caller` through every state.
    pub async fn process(&self, caller: &str, body: &[u8]) -> Result<TopUpReceipt, GatewayError> {
        let outcome = self.run(caller, body).await;
        let label = match &outcome {
            Ok(_) => "completed",
            Err(e) => e.outcome(),
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_topup(label);
        }
        outcome
    }

    async fn run(&self, caller: &str, body: &[u8]) -> Result<TopUpReceipt, GatewayError> {
        self.limiter.check(caller).map_err(|limited| {
            warn!(caller, retry_after = ?limited.retry_after, "top-up rate limited");
            GatewayError::RateLimited(limited)
        })?;

        let validated = self.validate(body).map_err(|e| {
            debug!(caller, error = %e, "top-up rejected");
            e
        })?;
        debug!(caller, account = %validated.target_account, "top-up validated");

        let gated = self.gate(validated).await.map_err(|e| {
            info!(caller, error = %e, "top-up not gated through");
            e
        })?;
        debug!(caller, reputation = gated.reputation, "top-up gated");

        self.submit(gated).await
    }
}

impl FromRef<Arc<TopUpGateway>> for ForwardedPolicy {
    fn from_ref(gateway: &Arc<TopUpGateway>) -> Self {
        gateway.forwarded
    }
}

/// `POST /topup` and `POST /api/circle/topup`.
pub async fn topup_handler(
    State(gateway): State<Arc<TopUpGateway>>,
    CallerId(caller): CallerId,
    body: Bytes,
) -> Response {
    match gateway.process(&caller, &body).await {
        Ok(receipt) => (StatusCode::OK, Json(receipt)).into_response(),
        Err(err) => err.into_response(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
