// REST API - axum router and handlers
// JSON over HTTP with bearer-token auth. Every response uses the
// ApiResponse envelope; errors render through ApiError.

use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::analysis::{self, AnalysisKnobs};
use crate::auth::{self, CallerIdentity};
use crate::db::{self, AuditEntry};
use crate::entities::client::{self, ClientStatus};
use crate::entities::product::{self, Liquidity, ProductCategory, ProductStatus};
use crate::entities::recommendation;
use crate::entities::statement::{self, StatementTransaction};
use crate::entities::user::{self, Role};
use crate::error::{ApiError, ApiResult};
use crate::parser;
use crate::recommend;
use crate::report;
use crate::rules::CategoryMatcher;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub session_ttl_minutes: i64,
}

impl AppState {
    pub fn new(conn: Connection, session_ttl_minutes: i64) -> Self {
        AppState {
            db: Arc::new(Mutex::new(conn)),
            session_ttl_minutes,
        }
    }
}

/// API Response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

fn audit(
    conn: &Connection,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    detail: serde_json::Value,
    actor: &str,
) -> ApiResult<()> {
    let entry = AuditEntry::new(action, entity_type, entity_id, detail, actor);
    db::insert_audit(conn, &entry)?;
    Ok(())
}

// ============================================================================
// Request / query types
// ============================================================================

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    expires_at: DateTime<Utc>,
    username: String,
    role: Role,
}

#[derive(Deserialize)]
struct CreateClientRequest {
    name: String,
    contact_email: String,
    #[serde(default)]
    segment: String,
}

#[derive(Deserialize)]
struct UpdateClientRequest {
    name: Option<String>,
    contact_email: Option<String>,
    segment: Option<String>,
    status: Option<ClientStatus>,
}

#[derive(Deserialize)]
struct ListClientsQuery {
    status: Option<ClientStatus>,
}

#[derive(Deserialize)]
struct UploadStatementRequest {
    filename: String,
    content: String,
}

#[derive(Deserialize, Default)]
struct AnalyzeRequest {
    #[serde(default)]
    from: Option<NaiveDate>,
    #[serde(default)]
    to: Option<NaiveDate>,
}

#[derive(Deserialize)]
struct CreateProductRequest {
    name: String,
    category: ProductCategory,
    min_balance: f64,
    annual_yield_pct: f64,
    liquidity: Liquidity,
}

#[derive(Deserialize)]
struct UpdateProductRequest {
    name: Option<String>,
    category: Option<ProductCategory>,
    min_balance: Option<f64>,
    annual_yield_pct: Option<f64>,
    liquidity: Option<Liquidity>,
    status: Option<ProductStatus>,
}

#[derive(Deserialize)]
struct ListProductsQuery {
    status: Option<ProductStatus>,
}

#[derive(Deserialize, Default)]
struct GenerateReportRequest {
    #[serde(default)]
    analysis_id: Option<String>,
}

#[derive(Deserialize)]
struct ConfigUpdateRequest {
    key: String,
    value: String,
}

#[derive(Deserialize)]
struct CreateUserRequest {
    username: String,
    password: String,
    role: Role,
}

#[derive(Deserialize)]
struct AuditQuery {
    entity_type: Option<String>,
    entity_id: Option<String>,
    limit: Option<usize>,
}

// ============================================================================
// Health / auth handlers
// ============================================================================

async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

async fn login_handler(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    let (user, session) = auth::login(&conn, &req.username, &req.password, state.session_ttl_minutes)?;

    Ok(Json(ApiResponse::ok(LoginResponse {
        token: session.token,
        expires_at: session.expires_at,
        username: user.username,
        role: user.role,
    })))
}

async fn logout_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?;

    let conn = state.db.lock().unwrap();
    auth::delete_session(&conn, token)?;

    Ok(Json(ApiResponse::ok("Logged out")))
}

// ============================================================================
// Client handlers
// ============================================================================

async fn create_client_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(req): Json<CreateClientRequest>,
) -> ApiResult<impl IntoResponse> {
    auth::require_writer(&caller)?;
    let conn = state.db.lock().unwrap();

    let created = client::create_client(&conn, &req.name, &req.contact_email, &req.segment)?;
    audit(
        &conn,
        "client_created",
        "client",
        &created.id,
        serde_json::json!({"name": &created.name}),
        &caller.username,
    )?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(created))))
}

async fn list_clients_handler(
    State(state): State<AppState>,
    Query(query): Query<ListClientsQuery>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    let clients = client::list_clients(&conn, query.status)?;
    Ok(Json(ApiResponse::ok(clients)))
}

async fn get_client_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    Ok(Json(ApiResponse::ok(client::get_client(&conn, &id)?)))
}

async fn update_client_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
    Json(req): Json<UpdateClientRequest>,
) -> ApiResult<impl IntoResponse> {
    auth::require_writer(&caller)?;
    let conn = state.db.lock().unwrap();

    let updated = client::update_client(
        &conn,
        &id,
        req.name.as_deref(),
        req.contact_email.as_deref(),
        req.segment.as_deref(),
        req.status,
    )?;
    audit(
        &conn,
        "client_updated",
        "client",
        &updated.id,
        serde_json::json!({"status": updated.status}),
        &caller.username,
    )?;

    Ok(Json(ApiResponse::ok(updated)))
}

async fn delete_client_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    auth::require_writer(&caller)?;
    let conn = state.db.lock().unwrap();

    client::delete_client(&conn, &id)?;
    audit(
        &conn,
        "client_deleted",
        "client",
        &id,
        serde_json::json!({}),
        &caller.username,
    )?;

    Ok(Json(ApiResponse::ok("Deleted")))
}

// ============================================================================
// Statement handlers
// ============================================================================

async fn upload_statement_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(client_id): Path<String>,
    Json(req): Json<UploadStatementRequest>,
) -> ApiResult<impl IntoResponse> {
    auth::require_writer(&caller)?;
    let mut conn = state.db.lock().unwrap();

    // 404 before anything is written
    client::get_client(&conn, &client_id)?;

    let hash = statement::content_hash(&req.content);
    let matcher = CategoryMatcher::with_defaults();

    let (format, parse_result) = match parser::parse_statement(&req.filename, &req.content, &matcher)
    {
        Ok(parsed) => (parsed.format.code().to_string(), Ok(parsed.rows)),
        Err(e) => ("unknown".to_string(), Err(format!("{:#}", e))),
    };

    let file = statement::insert_statement_file(&conn, &client_id, &req.filename, &format, &hash)?;

    let file = match parse_result {
        Ok(rows) => {
            let records: Vec<StatementTransaction> = rows
                .into_iter()
                .map(|row| StatementTransaction {
                    id: uuid::Uuid::new_v4().to_string(),
                    statement_id: file.id.clone(),
                    client_id: client_id.clone(),
                    date: row.date,
                    description: row.description,
                    amount: row.amount,
                    direction: row.direction,
                    category: row.category,
                    balance_after: row.balance_after,
                })
                .collect();

            statement::insert_transactions(&mut conn, &records)?;
            statement::mark_parsed(&conn, &file.id, records.len() as i64)?;
            audit(
                &conn,
                "statement_ingested",
                "statement",
                &file.id,
                serde_json::json!({
                    "filename": req.filename,
                    "transactions": records.len(),
                }),
                &caller.username,
            )?;
            statement::get_statement(&conn, &file.id)?
        }
        Err(message) => {
            statement::mark_failed(&conn, &file.id, &message)?;
            tracing::warn!(filename = %req.filename, error = %message, "statement parse failed");
            statement::get_statement(&conn, &file.id)?
        }
    };

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(file))))
}

async fn list_statements_handler(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    client::get_client(&conn, &client_id)?;
    Ok(Json(ApiResponse::ok(statement::list_statements(&conn, &client_id)?)))
}

async fn get_statement_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    Ok(Json(ApiResponse::ok(statement::get_statement(&conn, &id)?)))
}

async fn get_statement_transactions_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    statement::get_statement(&conn, &id)?;
    Ok(Json(ApiResponse::ok(statement::transactions_by_statement(&conn, &id)?)))
}

// ============================================================================
// Analysis handlers
// ============================================================================

async fn run_analysis_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(client_id): Path<String>,
    Json(req): Json<AnalyzeRequest>,
) -> ApiResult<impl IntoResponse> {
    auth::require_writer(&caller)?;
    let conn = state.db.lock().unwrap();

    let knobs = AnalysisKnobs::from_config(&conn);
    let result = analysis::run_analysis(&conn, &client_id, req.from, req.to, &knobs)?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(result))))
}

async fn list_analyses_handler(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    client::get_client(&conn, &client_id)?;
    Ok(Json(ApiResponse::ok(analysis::list_by_client(&conn, &client_id)?)))
}

async fn get_analysis_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    Ok(Json(ApiResponse::ok(analysis::get_analysis(&conn, &id)?)))
}

// ============================================================================
// Product handlers
// ============================================================================

async fn create_product_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(req): Json<CreateProductRequest>,
) -> ApiResult<impl IntoResponse> {
    auth::require_admin(&caller)?;
    let conn = state.db.lock().unwrap();

    let created = product::create_product(
        &conn,
        &req.name,
        req.category,
        req.min_balance,
        req.annual_yield_pct,
        req.liquidity,
    )?;
    audit(
        &conn,
        "product_created",
        "product",
        &created.id,
        serde_json::json!({"name": &created.name}),
        &caller.username,
    )?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(created))))
}

async fn list_products_handler(
    State(state): State<AppState>,
    Query(query): Query<ListProductsQuery>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    Ok(Json(ApiResponse::ok(product::list_products(&conn, query.status)?)))
}

async fn get_product_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    Ok(Json(ApiResponse::ok(product::get_product(&conn, &id)?)))
}

async fn update_product_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
    Json(req): Json<UpdateProductRequest>,
) -> ApiResult<impl IntoResponse> {
    auth::require_admin(&caller)?;
    let conn = state.db.lock().unwrap();

    let updated = product::update_product(
        &conn,
        &id,
        req.name.as_deref(),
        req.category,
        req.min_balance,
        req.annual_yield_pct,
        req.liquidity,
        req.status,
    )?;
    audit(
        &conn,
        "product_updated",
        "product",
        &updated.id,
        serde_json::json!({"name": &updated.name, "status": updated.status}),
        &caller.username,
    )?;

    Ok(Json(ApiResponse::ok(updated)))
}

async fn delete_product_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    auth::require_admin(&caller)?;
    let conn = state.db.lock().unwrap();

    product::delete_product(&conn, &id)?;
    audit(
        &conn,
        "product_deleted",
        "product",
        &id,
        serde_json::json!({}),
        &caller.username,
    )?;

    Ok(Json(ApiResponse::ok("Deleted")))
}

// ============================================================================
// Recommendation handlers
// ============================================================================

async fn generate_recommendations_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(analysis_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    auth::require_writer(&caller)?;
    let conn = state.db.lock().unwrap();

    let analysis = analysis::get_analysis(&conn, &analysis_id)?;
    let recs = recommend::generate_recommendations(&conn, &analysis)?;
    audit(
        &conn,
        "recommendations_generated",
        "analysis",
        &analysis.id,
        serde_json::json!({"count": recs.len()}),
        &caller.username,
    )?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(recs))))
}

async fn list_recommendations_by_analysis_handler(
    State(state): State<AppState>,
    Path(analysis_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    analysis::get_analysis(&conn, &analysis_id)?;
    Ok(Json(ApiResponse::ok(recommendation::list_by_analysis(&conn, &analysis_id)?)))
}

async fn list_recommendations_by_client_handler(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    client::get_client(&conn, &client_id)?;
    Ok(Json(ApiResponse::ok(recommendation::list_by_client(&conn, &client_id)?)))
}

async fn get_recommendation_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    Ok(Json(ApiResponse::ok(recommendation::get_recommendation(&conn, &id)?)))
}

async fn decide_recommendation(
    state: &AppState,
    caller: &CallerIdentity,
    id: &str,
    approve: bool,
) -> ApiResult<recommendation::Recommendation> {
    auth::require_writer(caller)?;
    let conn = state.db.lock().unwrap();

    let decided = recommendation::decide(&conn, id, approve, &caller.username)?;
    audit(
        &conn,
        if approve {
            "recommendation_approved"
        } else {
            "recommendation_rejected"
        },
        "recommendation",
        &decided.id,
        serde_json::json!({"product_id": &decided.product_id}),
        &caller.username,
    )?;

    Ok(decided)
}

async fn approve_recommendation_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let decided = decide_recommendation(&state, &caller, &id, true).await?;
    Ok(Json(ApiResponse::ok(decided)))
}

async fn reject_recommendation_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let decided = decide_recommendation(&state, &caller, &id, false).await?;
    Ok(Json(ApiResponse::ok(decided)))
}

// ============================================================================
// Report handlers
// ============================================================================

async fn generate_report_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(client_id): Path<String>,
    Json(req): Json<GenerateReportRequest>,
) -> ApiResult<impl IntoResponse> {
    auth::require_writer(&caller)?;
    let conn = state.db.lock().unwrap();

    let generated = report::generate_report(&conn, &client_id, req.analysis_id.as_deref())?;
    audit(
        &conn,
        "report_generated",
        "report",
        &generated.id,
        serde_json::json!({"client_id": client_id}),
        &caller.username,
    )?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(generated))))
}

async fn list_reports_handler(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    client::get_client(&conn, &client_id)?;
    Ok(Json(ApiResponse::ok(report::list_by_client(&conn, &client_id)?)))
}

async fn get_report_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    Ok(Json(ApiResponse::ok(report::get_report(&conn, &id)?)))
}

// ============================================================================
// Admin handlers
// ============================================================================

async fn get_config_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> ApiResult<impl IntoResponse> {
    auth::require_admin(&caller)?;
    let conn = state.db.lock().unwrap();
    Ok(Json(ApiResponse::ok(db::list_config(&conn)?)))
}

async fn update_config_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(req): Json<ConfigUpdateRequest>,
) -> ApiResult<impl IntoResponse> {
    auth::require_admin(&caller)?;
    if req.key.trim().is_empty() {
        return Err(ApiError::bad_request("Config key must not be empty"));
    }

    let conn = state.db.lock().unwrap();
    db::set_config_value(&conn, &req.key, &req.value)?;
    audit(
        &conn,
        "config_updated",
        "system_config",
        &req.key,
        serde_json::json!({"value": req.value}),
        &caller.username,
    )?;

    Ok(Json(ApiResponse::ok(db::list_config(&conn)?)))
}

async fn list_audit_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<impl IntoResponse> {
    auth::require_admin(&caller)?;
    let conn = state.db.lock().unwrap();

    let entries = db::list_audit(
        &conn,
        query.entity_type.as_deref(),
        query.entity_id.as_deref(),
        query.limit.unwrap_or(100),
    )?;

    Ok(Json(ApiResponse::ok(entries)))
}

async fn create_user_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    auth::require_admin(&caller)?;
    let conn = state.db.lock().unwrap();

    let created = user::create_user(&conn, &req.username, &req.password, req.role)?;
    audit(
        &conn,
        "user_created",
        "user",
        &created.id,
        serde_json::json!({"username": &created.username, "role": created.role}),
        &caller.username,
    )?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(created))))
}

async fn list_users_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> ApiResult<impl IntoResponse> {
    auth::require_admin(&caller)?;
    let conn = state.db.lock().unwrap();
    Ok(Json(ApiResponse::ok(user::list_users(&conn)?)))
}

// ============================================================================
// Router
// ============================================================================

pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health_check))
        .route("/auth/login", post(login_handler))
        .with_state(state.clone());

    let protected = Router::new()
        .route("/auth/logout", post(logout_handler))
        .route(
            "/clients",
            get(list_clients_handler).post(create_client_handler),
        )
        .route(
            "/clients/:id",
            get(get_client_handler)
                .put(update_client_handler)
                .delete(delete_client_handler),
        )
        .route(
            "/clients/:id/statements",
            get(list_statements_handler).post(upload_statement_handler),
        )
        .route("/statements/:id", get(get_statement_handler))
        .route(
            "/statements/:id/transactions",
            get(get_statement_transactions_handler),
        )
        .route(
            "/clients/:id/analyses",
            get(list_analyses_handler).post(run_analysis_handler),
        )
        .route("/analyses/:id", get(get_analysis_handler))
        .route(
            "/analyses/:id/recommendations",
            get(list_recommendations_by_analysis_handler).post(generate_recommendations_handler),
        )
        .route(
            "/clients/:id/recommendations",
            get(list_recommendations_by_client_handler),
        )
        .route("/recommendations/:id", get(get_recommendation_handler))
        .route(
            "/recommendations/:id/approve",
            post(approve_recommendation_handler),
        )
        .route(
            "/recommendations/:id/reject",
            post(reject_recommendation_handler),
        )
        .route(
            "/clients/:id/reports",
            get(list_reports_handler).post(generate_report_handler),
        )
        .route("/reports/:id", get(get_report_handler))
        .route(
            "/products",
            get(list_products_handler).post(create_product_handler),
        )
        .route(
            "/products/:id",
            get(get_product_handler)
                .put(update_product_handler)
                .delete(delete_product_handler),
        )
        .route(
            "/admin/config",
            get(get_config_handler).put(update_config_handler),
        )
        .route("/admin/audit", get(list_audit_handler))
        .route(
            "/admin/users",
            get(list_users_handler).post(create_user_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .nest("/api", public.merge(protected))
        .layer(CorsLayer::permissive())
}
