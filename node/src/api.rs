//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the node's HTTP interface. All
//! endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                          | Description                          |
//! |--------|-------------------------------|--------------------------------------|
//! | GET    | `/health`                     | Liveness probe                       |
//! | GET    | `/status`                     | Node and ledger summary              |
//! | POST   | `/rpc`                        | JSON-RPC 2.0 gateway                 |
//! | GET    | `/ws`                         | WebSocket stream of ledger events    |
//! | GET    | `/accounts/:address`          | Balance, reputation, tier and badge  |
//! | GET    | `/accounts/:address/activity` | Recent events for one account        |
//! | GET    | `/topups`                     | Recent completed top-ups             |
//! | POST   | `/topup`                      | Reputation-gated card top-up         |
//! | POST   | `/api/circle/topup`           | Same, at the legacy client path      |
//!
//! ## JSON-RPC Methods
//!
//! Reads: `ledger_getDepositedUSDC`, `ledger_getReputationScore`,
//! `ledger_getAccount`, `ledger_totalYieldEarned`, `ledger_verifyZkSnarkProof`.
//!
//! Writes, only with `ledger.rpc_writes = true`: `ledger_deposit`,
//! `ledger_withdraw`, `ledger_spend`.
//!
//! Privileged, bearer token required: `ledger_updateReputationScore`,
//! `ledger_revokeBadge`.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        FromRef, Path, Query, State,
    },
    http::{header, HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use yieldflow_protocol::ledger::{Tier, TierPerks};
use yieldflow_protocol::zkp::FieldWord;
use yieldflow_protocol::{AccountId, AdminCapability, Ledger, LedgerError};

use crate::gateway::{topup_handler, TopUpGateway};
use crate::metrics::SharedMetrics;
use crate::rate_limit::ForwardedPolicy;

/// Default page size for list endpoints.
const DEFAULT_LIMIT: usize = 50;

/// Largest page a list endpoint returns.
const MAX_LIMIT: usize = 500;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone; everything sits behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    pub ledger: Arc<Ledger>,
    /// Held by the node on behalf of whoever presents `admin_token`.
    pub admin: Arc<AdminCapability>,
    /// Bearer token for privileged RPC methods. `None` disables them.
    pub admin_token: Option<String>,
    /// Exposes the write methods over RPC.
    pub rpc_writes: bool,
    pub gateway: Arc<TopUpGateway>,
    /// Reference to Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
    pub started_at: DateTime<Utc>,
}

impl FromRef<AppState> for Arc<TopUpGateway> {
    fn from_ref(state: &AppState) -> Self {
        state.gateway.clone()
    }
}

impl FromRef<AppState> for ForwardedPolicy {
    fn from_ref(state: &AppState) -> Self {
        ForwardedPolicy::from_ref(&state.gateway)
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/rpc", post(rpc_handler))
        .route("/ws", get(ws_handler))
        .route("/accounts/:address", get(account_handler))
        .route("/accounts/:address/activity", get(activity_handler))
        .route("/topups", get(topups_handler))
        .route("/topup", post(topup_handler))
        .route("/api/circle/topup", post(topup_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// JSON-RPC Types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version. Must be "2.0".
    pub jsonrpc: String,
    pub method: String,
    /// Positional parameters.
    pub params: Option<Value>,
    /// Echoed back in the response.
    pub id: Value,
}

/// A JSON-RPC 2.0 response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL: i32 = -32603;
    /// The ledger refused the operation.
    pub const LEDGER_REJECTED: i32 = -32001;
    /// Missing or wrong admin token.
    pub const UNAUTHORIZED: i32 = -32002;

    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    fn invalid_params(expected: &str) -> Self {
        Self::new(
            Self::INVALID_PARAMS,
            format!("Invalid params: expected {expected}"),
        )
    }
}

impl From<LedgerError> for JsonRpcError {
    fn from(err: LedgerError) -> Self {
        let code = match err {
            LedgerError::Unauthorized => Self::UNAUTHORIZED,
            _ => Self::LEDGER_REJECTED,
        };
        Self::new(code, err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Error body shared by every non-RPC endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub protocol_version: String,
    pub ledger_id: String,
    pub accounts: usize,
    /// Sum of deposited balances, as a decimal string.
    pub total_deposited: String,
    pub rpc_writes: bool,
    pub uptime_secs: i64,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// Response payload for `GET /accounts/:address` and `ledger_getAccount`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub address: String,
    pub deposited_usdc: u64,
    pub yield_principal: u64,
    pub reputation_score: u64,
    pub tier: Tier,
    pub perks: TierPerks,
    pub badge_token_id: Option<u64>,
    /// `None` when the venue could not be queried.
    pub accrued_yield: Option<u64>,
}

impl AccountResponse {
    fn load(ledger: &Ledger, address: &AccountId) -> Self {
        let account = ledger.account(address);
        let accrued_yield = match ledger.accrued_yield(address) {
            Ok(y) => Some(y),
            Err(e) => {
                tracing::warn!(%address, error = %e, "accrued yield unavailable");
                None
            }
        };
        Self {
            address: address.to_string(),
            deposited_usdc: account.deposited_balance,
            yield_principal: account.yield_principal,
            reputation_score: account.reputation_score,
            tier: ledger.tier(address),
            perks: ledger.perks(address),
            badge_token_id: account.badge_token_id.map(|b| b.value()),
            accrued_yield,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

impl LimitQuery {
    fn resolve(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }
}

fn bad_address(raw: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: format!("Invalid address: {raw}"),
        }),
    )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`: node and ledger summary.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let accounts = state.ledger.account_count();
    let now = Utc::now();
    state.metrics.ledger_accounts.set(accounts as i64);

    Json(StatusResponse {
        version: state.version.clone(),
        protocol_version: yieldflow_protocol::config::PROTOCOL_VERSION.into(),
        ledger_id: state.ledger.id().to_string(),
        accounts,
        total_deposited: state.ledger.total_deposited().to_string(),
        rpc_writes: state.rpc_writes,
        uptime_secs: (now - state.started_at).num_seconds(),
        timestamp: now.to_rfc3339(),
    })
}

/// `GET /accounts/:address`: the zero record for unseen accounts.
async fn account_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    match AccountId::parse(&address) {
        Ok(id) => Json(AccountResponse::load(&state.ledger, &id)).into_response(),
        Err(_) => bad_address(&address).into_response(),
    }
}

/// `GET /accounts/:address/activity?limit=N`: newest first.
async fn activity_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    match AccountId::parse(&address) {
        Ok(id) => Json(state.ledger.recent_activity(Some(&id), query.resolve())).into_response(),
        Err(_) => bad_address(&address).into_response(),
    }
}

/// `GET /topups?limit=N`: newest first.
async fn topups_handler(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    Json(state.gateway.recent_topups(query.resolve()))
}

/// `POST /rpc`: JSON-RPC 2.0 gateway.
///
/// Unknown methods, and write methods while writes are disabled, return
/// -32601 (Method not found).
async fn rpc_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    if req.jsonrpc != "2.0" {
        return Json(JsonRpcResponse {
            jsonrpc: "2.0".into(),
            result: None,
            error: Some(JsonRpcError::new(
                JsonRpcError::INVALID_REQUEST,
                "Invalid Request: jsonrpc must be \"2.0\"",
            )),
            id: req.id,
        });
    }

    let params = match &req.params {
        Some(Value::Array(items)) => items.as_slice(),
        _ => &[],
    };
    let (result, error) = match dispatch(&state, &headers, &req.method, params) {
        Ok(value) => (Some(value), None),
        Err(err) => {
            tracing::debug!(method = %req.method, code = err.code, message = %err.message, "rpc error");
            (None, Some(err))
        }
    };

    Json(JsonRpcResponse {
        jsonrpc: "2.0".into(),
        result,
        error,
        id: req.id,
    })
}

fn dispatch(
    state: &AppState,
    headers: &HeaderMap,
    method: &str,
    params: &[Value],
) -> Result<Value, JsonRpcError> {
    let ledger = &state.ledger;
    match method {
        "ledger_getDepositedUSDC" => {
            let account = account_param(params, 0)?;
            Ok(Value::from(ledger.deposited_usdc(&account)))
        }
        "ledger_getReputationScore" => {
            let account = account_param(params, 0)?;
            Ok(Value::from(ledger.reputation_score(&account)))
        }
        "ledger_getAccount" => {
            let account = account_param(params, 0)?;
            to_value(AccountResponse::load(ledger, &account))
        }
        "ledger_totalYieldEarned" => Ok(Value::from(ledger.total_yield_earned()?)),
        "ledger_verifyZkSnarkProof" => {
            let (a, b, c, inputs) = proof_params(params)?;
            Ok(Value::Bool(ledger.verify_zk_snark_proof(a, b, c, &inputs)))
        }

        "ledger_deposit" | "ledger_withdraw" | "ledger_spend" if state.rpc_writes => {
            let account = account_param(params, 0)?;
            let amount = amount_param(params, 1)?;
            match method {
                "ledger_deposit" => ledger.deposit(&account, amount)?,
                "ledger_withdraw" => ledger.withdraw(&account, amount)?,
                _ => {
                    let purpose = params
                        .get(2)
                        .and_then(Value::as_str)
                        .ok_or_else(|| JsonRpcError::invalid_params("purpose string"))?;
                    ledger.spend(&account, amount, purpose)?
                }
            }
            to_value(AccountResponse::load(ledger, &account))
        }

        "ledger_updateReputationScore" => {
            authorize_admin(state, headers)?;
            let account = account_param(params, 0)?;
            let score = amount_param(params, 1)?;
            ledger.update_reputation_score(&state.admin, &account, score)?;
            tracing::info!(%account, score, "reputation overridden over rpc");
            to_value(AccountResponse::load(ledger, &account))
        }
        "ledger_revokeBadge" => {
            authorize_admin(state, headers)?;
            let account = account_param(params, 0)?;
            let revoked = ledger.revoke_badge(&state.admin, &account)?;
            tracing::info!(%account, ?revoked, "badge revoked over rpc");
            Ok(revoked.map_or(Value::Null, |b| Value::from(b.value())))
        }

        _ => Err(JsonRpcError::new(
            JsonRpcError::METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
        )),
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value)
        .map_err(|e| JsonRpcError::new(JsonRpcError::INTERNAL, format!("Internal error: {e}")))
}

fn authorize_admin(state: &AppState, headers: &HeaderMap) -> Result<(), JsonRpcError> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match (&state.admin_token, presented) {
        (Some(expected), Some(token)) if !expected.is_empty() && token == expected => Ok(()),
        _ => {
            tracing::warn!("privileged rpc call without valid admin token");
            Err(JsonRpcError::new(JsonRpcError::UNAUTHORIZED, "Unauthorized"))
        }
    }
}

fn account_param(params: &[Value], index: usize) -> Result<AccountId, JsonRpcError> {
    params
        .get(index)
        .and_then(Value::as_str)
        .and_then(|raw| AccountId::parse(raw).ok())
        .ok_or_else(|| JsonRpcError::invalid_params("an account address"))
}

/// Accepts a JSON integer or a decimal string, so clients without 64-bit
/// integers can send large amounts.
fn amount_param(params: &[Value], index: usize) -> Result<u64, JsonRpcError> {
    match params.get(index) {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| JsonRpcError::invalid_params("a non-negative integer amount"))
}

type ProofParams = ([FieldWord; 2], [[FieldWord; 2]; 2], [FieldWord; 2], Vec<FieldWord>);

fn proof_params(params: &[Value]) -> Result<ProofParams, JsonRpcError> {
    serde_json::from_value(Value::Array(params.to_vec()))
        .map_err(|_| JsonRpcError::invalid_params("[a, b, c, input]"))
}

/// `GET /ws`: WebSocket upgrade for live ledger events.
///
/// Clients receive every committed [`yieldflow_protocol::LedgerEvent`] as
/// JSON. Client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Drives a single WebSocket connection, forwarding ledger events until
/// the client disconnects or the ledger goes away.
async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.ledger.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to serialize ws event");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "ws subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::metrics::NodeMetrics;
    use crate::processor::{PaymentProcessor, PaymentRequest, PaymentResponse, ProcessorError};
    use crate::rate_limit::RateLimiter;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;
    use yieldflow_contracts::{BadgeRegistry, LendingPool};

    const ALICE: &str = "0x00000000000000000000000000000000000a11ce";
    const TOKEN: &str = "s3cret";

    struct OfflineProcessor;

    #[async_trait]
    impl PaymentProcessor for OfflineProcessor {
        async fn create_card_payment(
            &self,
            _request: &PaymentRequest,
        ) -> Result<PaymentResponse, ProcessorError> {
            Err(ProcessorError::NotConfigured)
        }
    }

    /// Creates a test AppState over an in-process pool and registry.
    fn test_app_state(rpc_writes: bool) -> AppState {
        let (ledger, admin) = Ledger::builder(
            Arc::new(LendingPool::new(500)),
            Arc::new(BadgeRegistry::new()),
        )
        .build()
        .expect("ledger");
        let ledger = Arc::new(ledger);
        let gateway = TopUpGateway::new(
            &GatewayConfig::default(),
            RateLimiter::new(100, Duration::from_secs(60)),
            ledger.clone(),
            Arc::new(OfflineProcessor),
        );

        AppState {
            version: "0.1.0-test".into(),
            ledger,
            admin: Arc::new(admin),
            admin_token: Some(TOKEN.into()),
            rpc_writes,
            gateway: Arc::new(gateway),
            metrics: Arc::new(NodeMetrics::new().expect("metrics")),
            started_at: Utc::now(),
        }
    }

    fn alice() -> AccountId {
        AccountId::parse(ALICE).unwrap()
    }

    /// Sends a GET request and returns the (status, body_bytes).
    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    /// Sends a POST request with JSON body and returns (status, body_bytes).
    async fn post_json(
        router: &Router,
        path: &str,
        body: Value,
        bearer: Option<&str>,
    ) -> (StatusCode, Vec<u8>) {
        let mut req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = bearer {
            req = req.header("authorization", format!("Bearer {token}"));
        }
        let req = req
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    async fn rpc(router: &Router, method: &str, params: Value, bearer: Option<&str>) -> Value {
        let (status, body) = post_json(
            router,
            "/rpc",
            serde_json::json!({ "jsonrpc": "2.0", "method": method, "params": params, "id": 1 }),
            bearer,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_slice(&body).unwrap()
    }

    // -- 1. Health endpoint --------------------------------------------------

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = create_router(test_app_state(false));
        let (status, body) = get(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    // -- 2. Status reflects the ledger ----------------------------------------

    #[tokio::test]
    async fn status_counts_accounts_and_deposits() {
        let state = test_app_state(false);
        state.ledger.deposit(&alice(), 1_000_000).unwrap();
        let app = create_router(state);

        let (status, body) = get(&app, "/status").await;
        assert_eq!(status, StatusCode::OK);
        let resp: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.accounts, 1);
        assert_eq!(resp.total_deposited, "1000000");
        assert_eq!(resp.version, "0.1.0-test");
        assert!(!resp.rpc_writes);
    }

    // -- 3. Account endpoint returns zero record for unknown address ----------

    #[tokio::test]
    async fn account_endpoint_returns_default_for_unknown() {
        let app = create_router(test_app_state(false));
        let (status, body) = get(&app, &format!("/accounts/{ALICE}")).await;
        assert_eq!(status, StatusCode::OK);
        let resp: AccountResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.deposited_usdc, 0);
        assert_eq!(resp.reputation_score, 0);
        assert_eq!(resp.tier, Tier::Classic);
        assert_eq!(resp.badge_token_id, None);
        assert_eq!(resp.accrued_yield, Some(0));
    }

    // -- 4. Account endpoint rejects malformed address ------------------------

    #[tokio::test]
    async fn account_endpoint_rejects_bad_address() {
        let app = create_router(test_app_state(false));
        let (status, body) = get(&app, "/accounts/not-an-address").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let resp: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(resp.error.contains("not-an-address"));
    }

    // -- 5. Account endpoint shows tier and badge ------------------------------

    #[tokio::test]
    async fn account_endpoint_shows_tier_and_badge() {
        let state = test_app_state(false);
        for _ in 0..10 {
            state.ledger.deposit(&alice(), 100).unwrap();
        }
        let app = create_router(state);

        let (_, body) = get(&app, &format!("/accounts/{ALICE}")).await;
        let resp: AccountResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.deposited_usdc, 1_000);
        assert_eq!(resp.reputation_score, 10);
        assert_eq!(resp.tier, Tier::Silver);
        assert_eq!(resp.badge_token_id, Some(1));
        assert_eq!(resp.perks.next_tier, Some(Tier::Gold));
    }

    // -- 6. Activity is newest first and limited ------------------------------

    #[tokio::test]
    async fn activity_is_newest_first() {
        let state = test_app_state(false);
        state.ledger.deposit(&alice(), 5).unwrap();
        state.ledger.withdraw(&alice(), 2).unwrap();
        let app = create_router(state);

        let (status, body) = get(&app, &format!("/accounts/{ALICE}/activity?limit=2")).await;
        assert_eq!(status, StatusCode::OK);
        let events: Vec<Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["type"], "withdrawn");
        assert_eq!(events[1]["type"], "reputation_changed");
    }

    // -- 7. JSON-RPC reads ----------------------------------------------------

    #[tokio::test]
    async fn rpc_reads_balance_and_reputation() {
        let state = test_app_state(false);
        state.ledger.deposit(&alice(), 1_000_000).unwrap();
        let app = create_router(state);

        let resp = rpc(&app, "ledger_getDepositedUSDC", serde_json::json!([ALICE]), None).await;
        assert_eq!(resp["result"], 1_000_000);
        let resp = rpc(&app, "ledger_getReputationScore", serde_json::json!([ALICE]), None).await;
        assert_eq!(resp["result"], 1);
        let resp = rpc(&app, "ledger_totalYieldEarned", serde_json::json!([]), None).await;
        assert_eq!(resp["result"], 0);
    }

    // -- 8. Write methods are hidden unless enabled ---------------------------

    #[tokio::test]
    async fn rpc_writes_disabled_by_default() {
        let app = create_router(test_app_state(false));
        let resp = rpc(&app, "ledger_deposit", serde_json::json!([ALICE, 10]), None).await;
        assert_eq!(resp["error"]["code"], JsonRpcError::METHOD_NOT_FOUND);
    }

    // -- 9. Write methods move funds when enabled -----------------------------

    #[tokio::test]
    async fn rpc_writes_move_funds_when_enabled() {
        let app = create_router(test_app_state(true));
        let resp = rpc(&app, "ledger_deposit", serde_json::json!([ALICE, "1000"]), None).await;
        assert_eq!(resp["result"]["deposited_usdc"], 1_000);

        for params in [serde_json::json!([ALICE, 400]), serde_json::json!([ALICE, 400, 7])] {
            let resp = rpc(&app, "ledger_spend", params, None).await;
            assert_eq!(resp["error"]["code"], JsonRpcError::INVALID_PARAMS);
            assert!(resp["error"]["message"]
                .as_str()
                .unwrap()
                .contains("purpose string"));
        }

        let resp = rpc(&app, "ledger_spend", serde_json::json!([ALICE, 400, "coffee"]), None).await;
        assert_eq!(resp["result"]["deposited_usdc"], 600);
        assert_eq!(resp["result"]["yield_principal"], 1_000);

        let resp = rpc(&app, "ledger_withdraw", serde_json::json!([ALICE, 601]), None).await;
        assert_eq!(resp["error"]["code"], JsonRpcError::LEDGER_REJECTED);
        assert!(resp["error"]["message"]
            .as_str()
            .unwrap()
            .contains("insufficient"));
    }

    // -- 10. Privileged methods require the admin token -----------------------

    #[tokio::test]
    async fn rpc_admin_override_requires_token() {
        let app = create_router(test_app_state(false));
        let params = serde_json::json!([ALICE, 12]);

        let resp = rpc(&app, "ledger_updateReputationScore", params.clone(), None).await;
        assert_eq!(resp["error"]["code"], JsonRpcError::UNAUTHORIZED);
        let resp = rpc(&app, "ledger_updateReputationScore", params.clone(), Some("wrong")).await;
        assert_eq!(resp["error"]["code"], JsonRpcError::UNAUTHORIZED);

        let resp = rpc(&app, "ledger_updateReputationScore", params, Some(TOKEN)).await;
        assert_eq!(resp["result"]["reputation_score"], 12);
        assert_eq!(resp["result"]["badge_token_id"], 1);

        let resp = rpc(&app, "ledger_revokeBadge", serde_json::json!([ALICE]), Some(TOKEN)).await;
        assert_eq!(resp["result"], 1);
    }

    // -- 11. Proof verification falls back to false ---------------------------

    #[tokio::test]
    async fn rpc_verify_proof_without_verifier_is_false() {
        let app = create_router(test_app_state(false));
        let params = serde_json::json!([["1", "2"], [["3", "4"], ["5", "6"]], ["7", "8"], ["9"]]);
        let resp = rpc(&app, "ledger_verifyZkSnarkProof", params, None).await;
        assert_eq!(resp["result"], false);

        let resp = rpc(&app, "ledger_verifyZkSnarkProof", serde_json::json!([1, 2]), None).await;
        assert_eq!(resp["error"]["code"], JsonRpcError::INVALID_PARAMS);
    }

    // -- 12. JSON-RPC envelope errors -----------------------------------------

    #[tokio::test]
    async fn rpc_envelope_errors() {
        let app = create_router(test_app_state(false));
        let (_, body) = post_json(
            &app,
            "/rpc",
            serde_json::json!({ "jsonrpc": "1.0", "method": "ledger_getAccount", "id": 7 }),
            None,
        )
        .await;
        let resp: JsonRpcResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.error.unwrap().code, JsonRpcError::INVALID_REQUEST);
        assert_eq!(resp.id, 7);

        let resp = rpc(&app, "ledger_getAccount", serde_json::json!(["0x12"]), None).await;
        assert_eq!(resp["error"]["code"], JsonRpcError::INVALID_PARAMS);
        let resp = rpc(&app, "ledger_getBlock", serde_json::json!([]), None).await;
        assert_eq!(resp["error"]["code"], JsonRpcError::METHOD_NOT_FOUND);
    }

    // -- 13. Top-up is mounted at both paths ----------------------------------

    #[tokio::test]
    async fn topup_routes_share_the_gateway() {
        let app = create_router(test_app_state(false));
        for path in ["/topup", "/api/circle/topup"] {
            let (status, body) =
                post_json(&app, path, serde_json::json!({ "amount": 0 }), None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            let resp: ErrorResponse = serde_json::from_slice(&body).unwrap();
            assert_eq!(resp.error, "Invalid amount.");
        }

        // Valid and gated, but no processor configured.
        let state = test_app_state(false);
        state.ledger.deposit(&alice(), 1).unwrap();
        let app = create_router(state);
        let (status, body) = post_json(
            &app,
            "/topup",
            serde_json::json!({
                "amount": "10", "currency": "USD", "cardId": "card-0001", "walletAddress": ALICE
            }),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.error, "Card processor is not configured.");

        let (status, body) = get(&app, "/topups").await;
        assert_eq!(status, StatusCode::OK);
        let audit: Vec<Value> = serde_json::from_slice(&body).unwrap();
        assert!(audit.is_empty());
    }
}
