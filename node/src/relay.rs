//! # Event Relay
//!
//! Forwards spend and withdrawal events to an external webhook (an
//! automation workflow, a notifier, a bookkeeping sheet). Delivery is best
//! effort: one attempt per event, failures are logged and counted, and the
//! ledger never waits on the relay.
//!
//! Payload:
//!
//! ```json
//! { "event": "spent", "user": "0x…", "amount": "2500000",
//!   "purpose": "groceries", "seq": 42, "timestamp": 1767225600000 }
//! ```

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use yieldflow_protocol::ledger::LedgerEventKind;
use yieldflow_protocol::{AccountId, LedgerEvent};

use crate::config::RelayConfig;
use crate::metrics::SharedMetrics;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("webhook unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("webhook returned {0}")]
    Rejected(reqwest::StatusCode),
}

/// What the webhook receives for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayPayload {
    pub event: &'static str,
    pub user: AccountId,
    /// Decimal string, so consumers without 64-bit integers keep precision.
    pub amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    pub seq: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl RelayPayload {
    /// `None` for events the relay does not forward.
    pub fn from_event(event: &LedgerEvent) -> Option<Self> {
        let (amount, purpose) = match &event.kind {
            LedgerEventKind::Spent { amount, purpose } => (*amount, Some(purpose.clone())),
            LedgerEventKind::Withdrawn { amount } => (*amount, None),
            _ => return None,
        };
        Some(Self {
            event: event.kind.name(),
            user: event.account.clone(),
            amount: amount.to_string(),
            purpose,
            seq: event.seq,
            timestamp: event.at.timestamp_millis(),
        })
    }
}

pub struct EventRelay {
    http: reqwest::Client,
    webhook_url: String,
    metrics: Option<SharedMetrics>,
}

impl EventRelay {
    /// `Ok(None)` when no webhook is configured.
    pub fn from_config(config: &RelayConfig) -> Result<Option<Self>, RelayError> {
        let Some(url) = config.webhook_url.as_ref().filter(|u| !u.is_empty()) else {
            return Ok(None);
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Some(Self {
            http,
            webhook_url: url.clone(),
            metrics: None,
        }))
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn deliver(&self, payload: &RelayPayload) -> Result<(), RelayError> {
        let response = self.http.post(&self.webhook_url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Rejected(status));
        }
        Ok(())
    }

    /// Forwards events until the ledger's channel closes.
    pub async fn run(self, mut rx: broadcast::Receiver<LedgerEvent>) {
        info!(url = %self.webhook_url, "event relay started");
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event relay lagged; events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let Some(payload) = RelayPayload::from_event(&event) else {
                continue;
            };

            let outcome = match self.deliver(&payload).await {
                Ok(()) => {
                    debug!(seq = payload.seq, event = payload.event, "event relayed");
                    "delivered"
                }
                Err(e) => {
                    warn!(seq = payload.seq, event = payload.event, error = %e, "event relay failed");
                    "failed"
                }
            };
            if let Some(metrics) = &self.metrics {
                metrics
                    .relay_deliveries_total
                    .with_label_values(&[outcome])
                    .inc();
            }
        }
        info!("event relay stopped");
    }
}
