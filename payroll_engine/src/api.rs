//! HTTP API for the payroll engine.
//!
//! This module exposes the engine, the run workflow and filing
//! generation over a small REST API built on
//! [`axum`](https://crates.io/crates/axum).  Every `/api/v1` route is
//! tenant scoped via the `X-Tenant-Id` and `X-Actor-Id` headers.  The
//! two mutations with financial side effects, run creation and filing
//! generation, honour an optional `Idempotency-Key` header: retries with
//! the same key and payload replay the first response byte for byte.

use anyhow::{Context, Result};
use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::engine::compute_payroll;
use crate::error::{ApiError, StoreError};
use crate::filings::{generate_filings, FilingStore, InMemoryFilingStore};
use crate::idempotency::{
    hash_payload, read_idempotency_key, IdempotencyCoordinator, IdempotencyScope, InMemoryIdempotencyStore,
    Resolution,
};
use crate::models::{EmployeePayrollInput, PayrollComputationResult};
use crate::period::{PayrollPeriod, PeriodError};
use crate::resolver::{InMemoryRuleStore, RuleStore, StatutoryRuleResolver};
use crate::runs::{InMemoryPayrollRunStore, PayrollRun, PayrollRunStore};
use crate::workflow::PayrollRunStatus;

pub const RUNS_ENDPOINT: &str = "/api/v1/payroll/runs";
pub const FILINGS_ENDPOINT: &str = "/api/v1/filings/generate";
pub const FILINGS_LIST_ENDPOINT: &str = "/api/v1/filings";
pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ACTOR_HEADER: &str = "x-actor-id";

const IDEMPOTENCY_CONFLICT: &str = "Idempotency key conflict: payload differs from original request";
const IDEMPOTENCY_BUSY: &str = "Duplicate request is currently processing";
const FILINGS_EXIST: &str = "Base filings already exist for this payroll period. Use amend workflow instead.";

/// Application state shared across requests.
pub struct AppState {
    pub resolver: StatutoryRuleResolver,
    pub idempotency: IdempotencyCoordinator,
    pub runs: Arc<dyn PayrollRunStore>,
    pub filings: Arc<dyn FilingStore>,
}

impl AppState {
    /// State backed by in-memory run, filing and idempotency stores.
    pub fn in_memory(rules: Arc<dyn RuleStore>, config: &Config) -> Self {
        let idempotency = IdempotencyCoordinator::new(Arc::new(InMemoryIdempotencyStore::new()))
            .with_stale_window(chrono::Duration::seconds(config.idempotency_stale_secs));
        Self {
            resolver: StatutoryRuleResolver::new(rules).with_jurisdiction(config.jurisdiction.clone()),
            idempotency,
            runs: Arc::new(InMemoryPayrollRunStore::new()),
            filings: Arc::new(InMemoryFilingStore::new()),
        }
    }
}

/// The caller, as established by the upstream auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: String,
    pub actor_id: String,
}

impl<S: Send + Sync> FromRequestParts<S> for TenantContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value_of = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        match (value_of(TENANT_HEADER), value_of(ACTOR_HEADER)) {
            (Some(tenant_id), Some(actor_id)) => Ok(Self { tenant_id, actor_id }),
            _ => Err(ApiError::Unauthorized("Unauthorized".to_string())),
        }
    }
}

/// Build the API router around an existing state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(RUNS_ENDPOINT, post(create_run_handler))
        .route("/api/v1/payroll/runs/{run_id}", get(get_run_handler))
        .route("/api/v1/payroll/runs/{run_id}/status", patch(update_status_handler))
        .route(FILINGS_ENDPOINT, post(generate_filings_handler))
        .route(FILINGS_LIST_ENDPOINT, get(list_filings_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Seed the rule store from `config.rules_dir` and build in-memory state.
pub fn build_state(config: &Config) -> Result<Arc<AppState>> {
    let rules = InMemoryRuleStore::load_from_dir(&config.rules_dir)
        .with_context(|| format!("loading rule sets from {}", config.rules_dir.display()))?;
    Ok(Arc::new(AppState::in_memory(Arc::new(rules), config)))
}

/// Launch the API server.  Blocks until the server terminates.
pub async fn serve(config: Config) -> Result<()> {
    let router = build_router(build_state(&config)?);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "payroll engine listening");
    axum::serve(listener, router).await?;
    Ok(())
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// Idempotent mutations

enum Admission {
    Proceed(Option<IdempotencyScope>),
    Respond(Response),
}

async fn admit(
    state: &AppState,
    ctx: &TenantContext,
    endpoint: &str,
    headers: &HeaderMap,
    body: &Value,
) -> Result<Admission, ApiError> {
    let key = read_idempotency_key(headers);
    let request_hash = hash_payload(body).map_err(|err| ApiError::internal("Failed to hash request payload", err))?;
    let resolution = state
        .idempotency
        .resolve(&ctx.tenant_id, &ctx.actor_id, endpoint, key.as_deref(), &request_hash)
        .await?;
    match resolution {
        Resolution::None => Ok(Admission::Proceed(None)),
        Resolution::Acquired(scope) => Ok(Admission::Proceed(Some(scope))),
        Resolution::Replay { status, body } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
            Ok(Admission::Respond(raw_json(status, body)))
        }
        Resolution::Conflict => Err(ApiError::Conflict(IDEMPOTENCY_CONFLICT.to_string())),
        Resolution::Busy => Err(ApiError::Conflict(IDEMPOTENCY_BUSY.to_string())),
    }
}

/// Send the outcome and, if a key was acquired, record it against the key.
async fn finish(
    state: &AppState,
    scope: Option<IdempotencyScope>,
    outcome: Result<(StatusCode, Value), ApiError>,
) -> Response {
    match outcome {
        Ok((status, body)) => {
            let body = body.to_string();
            if let Some(scope) = scope {
                if let Err(err) = state
                    .idempotency
                    .finalize_success(&scope, status.as_u16(), body.clone())
                    .await
                {
                    tracing::error!(%scope, %err, "failed to record idempotent response");
                }
            }
            raw_json(status, body)
        }
        Err(api_err) => {
            if let Some(scope) = scope {
                if let Err(err) = state
                    .idempotency
                    .finalize_failure(&scope, api_err.status().as_u16(), api_err.body().to_string())
                    .await
                {
                    tracing::error!(%scope, %err, "failed to record idempotent failure");
                }
            }
            api_err.into_response()
        }
    }
}

fn raw_json(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

/// Unwrap a JSON body, turning axum's plain-text rejection into the
/// usual error body.
fn extract_json(body: Result<Json<Value>, JsonRejection>) -> Result<Value, ApiError> {
    body.map(|Json(value)| value).map_err(ApiError::from)
}

fn parse_body<T: DeserializeOwned>(body: Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|err| ApiError::Validation(format!("Invalid request body: {err}")))
}

// Payroll runs

#[derive(Debug, Deserialize)]
struct CreateRunRequest {
    period_year: Option<i32>,
    period_month: Option<u32>,
    #[serde(default)]
    run_label: Option<String>,
    #[serde(default)]
    employees: Vec<EmployeePayrollInput>,
}

#[derive(Serialize)]
struct RunCreated<'a> {
    payroll_run_id: Uuid,
    rule_set_id: Option<&'a str>,
    rule_version: &'a str,
    #[serde(flatten)]
    result: &'a PayrollComputationResult,
}

async fn create_run_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let body = extract_json(body)?;
    let scope = match admit(&state, &ctx, RUNS_ENDPOINT, &headers, &body).await? {
        Admission::Proceed(scope) => scope,
        Admission::Respond(response) => return Ok(response),
    };
    let outcome = create_run(&state, &ctx, body).await;
    Ok(finish(&state, scope, outcome).await)
}

async fn create_run(state: &AppState, ctx: &TenantContext, body: Value) -> Result<(StatusCode, Value), ApiError> {
    let request: CreateRunRequest = parse_body(body)?;
    let (Some(year), Some(month)) = (request.period_year, request.period_month) else {
        return Err(PeriodError::InvalidMonth.into());
    };
    let period = PayrollPeriod::new(year, month)?;
    if request.employees.is_empty() {
        return Err(ApiError::Validation("No employees supplied for payroll run".to_string()));
    }

    let rules = state.resolver.resolve(period.ends_on(), Some(&ctx.tenant_id)).await?;

    let working_days = Decimal::from(period.working_days());
    let mut employees = request.employees;
    for employee in &mut employees {
        if employee.working_days_in_period.is_none() {
            employee.working_days_in_period = Some(working_days);
        }
    }
    let result = compute_payroll(&employees, &rules.config);

    let run = PayrollRun::draft(
        ctx.tenant_id.clone(),
        period,
        request.run_label,
        &rules,
        result,
        ctx.actor_id.clone(),
        Utc::now(),
    );
    let created = serde_json::to_value(RunCreated {
        payroll_run_id: run.id,
        rule_set_id: run.rule_set_id.as_deref(),
        rule_version: &run.rule_version,
        result: &run.result,
    })
    .map_err(|err| ApiError::internal("Failed to serialise payroll run", err))?;

    tracing::info!(
        tenant_id = %ctx.tenant_id,
        run_id = %run.id,
        period = %period.label(),
        employees = run.result.items.len(),
        fallback_rules = rules.is_fallback(),
        needs_review = run.result.needs_review(),
        "payroll run created"
    );
    state.runs.insert(run).await?;
    Ok((StatusCode::CREATED, json!({ "data": created })))
}

async fn load_run(state: &AppState, ctx: &TenantContext, run_id: Uuid) -> Result<PayrollRun, ApiError> {
    state
        .runs
        .get(&ctx.tenant_id, run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Payroll run not found".to_string()))
}

async fn get_run_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(run_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let run = load_run(&state, &ctx, run_id).await?;
    Ok(Json(json!({ "data": run })))
}

#[derive(Debug, Deserialize)]
struct UpdateStatusRequest {
    target_status: String,
}

async fn update_status_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(run_id): Path<Uuid>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let request: UpdateStatusRequest = parse_body(extract_json(body)?)?;
    let target: PayrollRunStatus = request.target_status.parse()?;

    let mut run = load_run(&state, &ctx, run_id).await?;
    let from = run.status;
    run.transition(target, &ctx.actor_id, Utc::now())?;
    state.runs.save_transition(&run, from).await?;

    tracing::info!(
        tenant_id = %ctx.tenant_id,
        %run_id,
        %from,
        to = %target,
        terminal = target.is_terminal(),
        "payroll run status changed"
    );
    Ok(Json(json!({ "data": run })))
}

// Filings

#[derive(Debug, Deserialize)]
struct GenerateFilingsRequest {
    #[serde(default)]
    payroll_run_id: Option<Uuid>,
}

async fn generate_filings_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let body = extract_json(body)?;
    let scope = match admit(&state, &ctx, FILINGS_ENDPOINT, &headers, &body).await? {
        Admission::Proceed(scope) => scope,
        Admission::Respond(response) => return Ok(response),
    };
    let outcome = create_filings(&state, &ctx, body).await;
    Ok(finish(&state, scope, outcome).await)
}

async fn create_filings(state: &AppState, ctx: &TenantContext, body: Value) -> Result<(StatusCode, Value), ApiError> {
    let request: GenerateFilingsRequest = parse_body(body)?;
    let run = match request.payroll_run_id {
        Some(run_id) => load_run(state, ctx, run_id).await?,
        None => state
            .runs
            .latest(&ctx.tenant_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("No payroll run found for filing generation".to_string()))?,
    };

    let due_date = run.period.filing_due_date();
    let rules = state.resolver.resolve(due_date, Some(&ctx.tenant_id)).await?;
    let batch = generate_filings(&run, &rules, Utc::now().date_naive());

    let stored = match state.filings.insert_base_batch(&ctx.tenant_id, run.period, batch).await {
        Ok(stored) => stored,
        Err(StoreError::Duplicate(_)) => return Err(ApiError::Conflict(FILINGS_EXIST.to_string())),
        Err(err) => return Err(err.into()),
    };

    tracing::info!(
        tenant_id = %ctx.tenant_id,
        run_id = %run.id,
        period = %run.period.label(),
        %due_date,
        reminders = stored.reminders.len(),
        "statutory filings generated"
    );
    let data = serde_json::to_value(&stored).map_err(|err| ApiError::internal("Failed to serialise filings", err))?;
    Ok((StatusCode::CREATED, json!({ "data": data })))
}

#[derive(Debug, Deserialize)]
struct ListFilingsQuery {
    period_year: Option<i32>,
    period_month: Option<u32>,
}

/// The base filings and open reminders for one period.
async fn list_filings_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    query: Result<Query<ListFilingsQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let (Some(year), Some(month)) = (query.period_year, query.period_month) else {
        return Err(PeriodError::InvalidMonth.into());
    };
    let period = PayrollPeriod::new(year, month)?;
    let batch = state
        .filings
        .base_batch(&ctx.tenant_id, period)
        .await?
        .ok_or_else(|| ApiError::NotFound("No filings found for this payroll period".to_string()))?;
    Ok(Json(json!({ "data": batch })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::IDEMPOTENCY_KEY_HEADER;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<AppState>) {
        let state = Arc::new(AppState::in_memory(
            Arc::new(InMemoryRuleStore::default()),
            &Config::default(),
        ));
        (build_router(state.clone()), state)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        tenant: Option<&str>,
        key: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tenant) = tenant {
            builder = builder.header(TENANT_HEADER, tenant).header(ACTOR_HEADER, "alice");
        }
        if let Some(key) = key {
            builder = builder.header(IDEMPOTENCY_KEY_HEADER, key);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    fn json_of(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    fn run_payload(basic: &str) -> Value {
        json!({
            "period_year": 2025,
            "period_month": 6,
            "run_label": "June payroll",
            "employees": [
                {"employee_id": "E1", "basic_salary": basic},
                {"employee_id": "E2", "basic_salary": "800000", "allowance_total": "50000"}
            ]
        })
    }

    async fn seed_run(app: &Router, tenant: &str) -> String {
        let (status, body) = send(app, "POST", RUNS_ENDPOINT, Some(tenant), None, Some(run_payload("1000000"))).await;
        assert_eq!(status, StatusCode::CREATED);
        json_of(&body)["data"]["payroll_run_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let (status, body) = send(&app, "GET", "/health", None, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body), json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_missing_tenant_is_unauthorized() {
        let (app, _) = app();
        let (status, body) = send(&app, "POST", RUNS_ENDPOINT, None, None, Some(run_payload("1000000"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json_of(&body)["error"]["message"], "Unauthorized");
    }

    #[tokio::test]
    async fn test_create_run_replays_and_rejects_changed_payload() {
        let (app, state) = app();
        let (status, first) = send(&app, "POST", RUNS_ENDPOINT, Some("tenant-a"), Some("june-run"), Some(run_payload("1000000"))).await;
        assert_eq!(status, StatusCode::CREATED);
        let data = &json_of(&first)["data"];
        assert_eq!(data["rule_version"], "fallback-default");
        assert_eq!(data["rule_set_id"], Value::Null);
        assert_eq!(data["items"].as_array().unwrap().len(), 2);

        let (status, replay) = send(&app, "POST", RUNS_ENDPOINT, Some("tenant-a"), Some("june-run"), Some(run_payload("1000000"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(replay, first);

        let (status, conflict) = send(&app, "POST", RUNS_ENDPOINT, Some("tenant-a"), Some("june-run"), Some(run_payload("1200000"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json_of(&conflict)["error"]["message"], IDEMPOTENCY_CONFLICT);

        // Only the first request created a run.
        let latest = state.runs.latest("tenant-a").await.unwrap().unwrap();
        assert_eq!(latest.id.to_string(), data["payroll_run_id"].as_str().unwrap());
    }

    #[tokio::test]
    async fn test_validation_failure_releases_key() {
        let (app, _) = app();
        let empty = json!({"period_year": 2025, "period_month": 6, "employees": []});
        for _ in 0..2 {
            let (status, body) = send(&app, "POST", RUNS_ENDPOINT, Some("tenant-a"), Some("k1"), Some(empty.clone())).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
            assert_eq!(json_of(&body)["error"]["message"], "No employees supplied for payroll run");
        }

        let bad_month = json!({"period_year": 2025, "period_month": 13, "employees": [{"employee_id": "E1", "basic_salary": "1"}]});
        let (status, _) = send(&app, "POST", RUNS_ENDPOINT, Some("tenant-a"), None, Some(bad_month)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let (app, _) = app();
        let run_id = seed_run(&app, "tenant-a").await;
        let uri = format!("/api/v1/payroll/runs/{run_id}/status");

        let (status, body) = send(&app, "PATCH", &uri, Some("tenant-a"), None, Some(json!({"target_status": "approved"}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            json_of(&body)["error"]["message"],
            "Invalid payroll status transition: draft -> approved"
        );

        let (status, _) = send(&app, "PATCH", &uri, Some("tenant-a"), None, Some(json!({"target_status": "done"}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        for target in ["validated", "approved", "locked"] {
            let (status, body) = send(&app, "PATCH", &uri, Some("tenant-a"), None, Some(json!({"target_status": target}))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json_of(&body)["data"]["status"], target);
        }

        let (status, body) = send(&app, "GET", &format!("/api/v1/payroll/runs/{run_id}"), Some("tenant-a"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body)["data"]["locked_by"], "alice");

        // Other tenants cannot see the run.
        let (status, _) = send(&app, "PATCH", &uri, Some("tenant-b"), None, Some(json!({"target_status": "paid"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_filing_generation() {
        let (app, _) = app();
        let (status, _) = send(&app, "POST", FILINGS_ENDPOINT, Some("tenant-a"), None, Some(json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let run_id = seed_run(&app, "tenant-a").await;
        let (status, body) = send(&app, "POST", FILINGS_ENDPOINT, Some("tenant-a"), Some("f1"), Some(json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let data = json_of(&body)["data"].clone();
        let filings = data["filings"].as_array().unwrap().clone();
        assert_eq!(filings.len(), 2);
        assert_eq!(filings[0]["filing_type"], "SDL");
        assert_eq!(filings[1]["filing_type"], "PAYE");
        assert_eq!(filings[0]["due_date"], "2025-07-07");
        assert_eq!(filings[0]["status"], "ready");
        assert_eq!(filings[0]["metadata"]["payroll_run_id"], run_id.as_str());
        let reminders = data["reminders"].as_array().unwrap();
        assert_eq!(reminders.len(), 2);
        assert_eq!(reminders[0]["reminder_type"], "SDL_RETURN_DUE");
        assert_eq!(reminders[1]["related_period"], "2025-06");

        let (status, replay) = send(&app, "POST", FILINGS_ENDPOINT, Some("tenant-a"), Some("f1"), Some(json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(replay, body);

        let explicit = json!({"payroll_run_id": run_id});
        let (status, body) = send(&app, "POST", FILINGS_ENDPOINT, Some("tenant-a"), Some("f2"), Some(explicit)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json_of(&body)["error"]["message"], FILINGS_EXIST);
    }

    #[tokio::test]
    async fn test_filings_can_be_listed_by_period() {
        let (app, _) = app();
        let uri = format!("{FILINGS_LIST_ENDPOINT}?period_year=2025&period_month=6");
        let (status, body) = send(&app, "GET", &uri, Some("tenant-a"), None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json_of(&body)["error"]["message"], "No filings found for this payroll period");

        seed_run(&app, "tenant-a").await;
        let (status, generated) = send(&app, "POST", FILINGS_ENDPOINT, Some("tenant-a"), None, Some(json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, listed) = send(&app, "GET", &uri, Some("tenant-a"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&listed)["data"], json_of(&generated)["data"]);

        let (status, _) = send(&app, "GET", &uri, Some("tenant-b"), None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let bad = format!("{FILINGS_LIST_ENDPOINT}?period_year=2025&period_month=june");
        let (status, body) = send(&app, "GET", &bad, Some("tenant-a"), None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json_of(&body)["error"]["message"].is_string());
    }

    #[tokio::test]
    async fn test_unparseable_body_keeps_error_shape() {
        let (app, _) = app();
        let request = Request::builder()
            .method("POST")
            .uri(RUNS_ENDPOINT)
            .header(TENANT_HEADER, "tenant-a")
            .header(ACTOR_HEADER, "alice")
            .header(IDEMPOTENCY_KEY_HEADER, "k1")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = json_of(&bytes);
        assert!(body["error"]["message"].is_string());
        assert_eq!(body["error"]["details"], Value::Null);

        // The key was never acquired, so a well-formed retry goes through.
        let (status, _) = send(&app, "POST", RUNS_ENDPOINT, Some("tenant-a"), Some("k1"), Some(run_payload("1000000"))).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_extreme_amounts_are_capped_and_replayed() {
        let (app, _) = app();
        let payload = run_payload("50000000000000000000000000000");
        let (status, first) = send(&app, "POST", RUNS_ENDPOINT, Some("tenant-a"), Some("huge"), Some(payload.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let data = &json_of(&first)["data"];
        assert_eq!(data["items"][0]["warnings"][0], crate::engine::WARN_AMOUNT_CAPPED);
        assert_eq!(data["warnings"].as_array().unwrap().len(), 1);

        let (status, replay) = send(&app, "POST", RUNS_ENDPOINT, Some("tenant-a"), Some("huge"), Some(payload)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(replay, first);
    }

    struct UnavailableRunStore;

    #[async_trait::async_trait]
    impl PayrollRunStore for UnavailableRunStore {
        async fn insert(&self, _run: PayrollRun) -> Result<(), StoreError> {
            Err(StoreError::Backend("database unavailable".to_string()))
        }

        async fn get(&self, _tenant_id: &str, _id: Uuid) -> Result<Option<PayrollRun>, StoreError> {
            Ok(None)
        }

        async fn latest(&self, _tenant_id: &str) -> Result<Option<PayrollRun>, StoreError> {
            Ok(None)
        }

        async fn save_transition(&self, _run: &PayrollRun, _expected: PayrollRunStatus) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_store_failure_after_acquire_leaves_key_retryable() {
        let state = Arc::new(AppState {
            runs: Arc::new(UnavailableRunStore),
            ..AppState::in_memory(Arc::new(InMemoryRuleStore::default()), &Config::default())
        });
        let app = build_router(state);

        for _ in 0..2 {
            let (status, body) = send(&app, "POST", RUNS_ENDPOINT, Some("tenant-a"), Some("k1"), Some(run_payload("1000000"))).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            let body = json_of(&body);
            assert_eq!(body["error"]["message"], "Storage failure");
            assert_eq!(body["error"]["details"], "storage backend error: database unavailable");
        }
    }
}
