use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{Local, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, info};

use crate::auth::hash_token;
use whey_core::models::{
    Dashboard, DailySummary, DailyTarget, IntakeFilter, IntakeRecord, NewIntake, NewProteinSource,
    ProteinSource, RangeReport, UpdateIntake, UpdateProteinSource, User, parse_date,
    parse_decimal, validate_weight,
};
use whey_core::{TrackerError, TrackerService};

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

#[derive(Clone)]
struct AppState {
    service: Arc<Mutex<TrackerService>>,
}

impl AppState {
    fn service(&self) -> MutexGuard<'_, TrackerService> {
        self.service.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// --- Request / Response types ---

/// A decimal given either as a JSON string (`"10.50"`) or a number (`10.5`).
#[derive(Deserialize)]
#[serde(untagged)]
enum Amount {
    Text(String),
    Number(serde_json::Number),
}

impl Amount {
    fn parse(&self, field: &str) -> Result<Decimal, TrackerError> {
        match self {
            Self::Text(s) => parse_decimal(field, s),
            Self::Number(n) => parse_decimal(field, &n.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct UpdateMeRequest {
    weight_kg: Option<Amount>,
    email: Option<String>,
}

#[derive(Deserialize)]
struct SourceQuery {
    q: Option<String>,
}

#[derive(Deserialize)]
struct CreateSourceRequest {
    name: String,
    protein_per_100g: Amount,
    category: String,
}

#[derive(Deserialize)]
struct UpdateSourceRequest {
    name: Option<String>,
    protein_per_100g: Option<Amount>,
    category: Option<String>,
}

#[derive(Deserialize)]
struct CreateIntakeRequest {
    source_id: i64,
    quantity_grams: Amount,
    intake_date: String,
}

#[derive(Deserialize)]
struct UpdateIntakeRequest {
    source_id: Option<i64>,
    quantity_grams: Option<Amount>,
    intake_date: Option<String>,
}

#[derive(Deserialize)]
struct CreateTargetRequest {
    target_date: String,
}

/// Date parameters shared by the list, generate and dashboard routes.
#[derive(Deserialize, Default)]
struct DateQuery {
    date: Option<String>,
    start: Option<String>,
    end: Option<String>,
}

impl DateQuery {
    fn opt(field: &str, value: Option<&String>) -> Result<Option<NaiveDate>, TrackerError> {
        value.map(|v| parse_date(field, v)).transpose()
    }

    fn required(field: &str, value: Option<&String>) -> Result<NaiveDate, TrackerError> {
        let value = value.ok_or_else(|| TrackerError::validation(field, "is required"))?;
        parse_date(field, value)
    }

    fn filter(&self) -> Result<IntakeFilter, TrackerError> {
        let filter = IntakeFilter {
            date: Self::opt("date", self.date.as_ref())?,
            start: Self::opt("start", self.start.as_ref())?,
            end: Self::opt("end", self.end.as_ref())?,
        };
        filter.validate()?;
        Ok(filter)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest {
        message: String,
        field: Option<String>,
    },
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, field) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            Self::BadRequest { message, field } => (StatusCode::BAD_REQUEST, message, field),
            Self::Internal(err) => {
                error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
        };
        (status, Json(ErrorResponse { error, field })).into_response()
    }
}

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::Validation { field, message } => Self::BadRequest {
                message: format!("{field}: {message}"),
                field: Some(field),
            },
            TrackerError::Precondition(message) => Self::BadRequest {
                message,
                field: None,
            },
            TrackerError::NotFound(message) => Self::NotFound(message),
            TrackerError::Storage(err) => Self::Internal(err),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

type ApiResult<T> = Result<T, ApiError>;

// --- Middleware ---

/// Resolve the bearer token to a user and attach it to the request.
async fn require_user(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let user = match token {
        Some(token) => state.service().user_for_token_hash(&hash_token(token)),
        None => Ok(None),
    };

    match user {
        Ok(Some(user)) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Ok(None) => (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Invalid or missing API token".to_string(),
                field: None,
            }),
        )
            .into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    debug!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis(),
        "request"
    );
    response
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers: profile ---

async fn get_me(Extension(user): Extension<User>) -> Json<User> {
    Json(user)
}

async fn update_me(
    State(state): State<AppState>,
    Extension(mut user): Extension<User>,
    Json(req): Json<UpdateMeRequest>,
) -> ApiResult<Json<User>> {
    let weight_kg = req
        .weight_kg
        .map(|a| a.parse("weight_kg").and_then(validate_weight))
        .transpose()?;
    if weight_kg.is_none() && req.email.is_none() {
        return Err(TrackerError::validation("body", "At least one field must be provided").into());
    }

    let service = state.service();
    if let Some(email) = req.email {
        user = service.set_email(&user, &email)?;
    }
    if let Some(weight_kg) = weight_kg {
        user = service.set_weight(&user, weight_kg)?;
    }
    Ok(Json(user))
}

// --- Handlers: protein sources ---

async fn list_sources(
    State(state): State<AppState>,
    Query(query): Query<SourceQuery>,
) -> ApiResult<Json<Vec<ProteinSource>>> {
    let search = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty());
    Ok(Json(state.service().list_sources(search)?))
}

async fn create_source(
    State(state): State<AppState>,
    Json(req): Json<CreateSourceRequest>,
) -> ApiResult<(StatusCode, Json<ProteinSource>)> {
    let source = NewProteinSource {
        name: req.name,
        protein_per_100g: req.protein_per_100g.parse("protein_per_100g")?,
        category: req.category,
    };
    let source = state.service().create_source(&source)?;
    Ok((StatusCode::CREATED, Json(source)))
}

async fn get_source(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ProteinSource>> {
    Ok(Json(state.service().get_source(id)?))
}

async fn update_source(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateSourceRequest>,
) -> ApiResult<Json<ProteinSource>> {
    let update = UpdateProteinSource {
        name: req.name,
        protein_per_100g: req
            .protein_per_100g
            .map(|a| a.parse("protein_per_100g"))
            .transpose()?,
        category: req.category,
    };
    if update.is_empty() {
        return Err(TrackerError::validation("body", "At least one field must be provided").into());
    }
    Ok(Json(state.service().update_source(id, &update)?))
}

async fn delete_source(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.service().delete_source(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Handlers: intakes ---

async fn list_intakes(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Json<Vec<IntakeRecord>>> {
    let filter = query.filter()?;
    Ok(Json(state.service().list_intakes(&user, &filter)?))
}

async fn create_intake(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<CreateIntakeRequest>,
) -> ApiResult<(StatusCode, Json<IntakeRecord>)> {
    let intake = NewIntake {
        source_id: req.source_id,
        quantity_grams: req.quantity_grams.parse("quantity_grams")?,
        intake_date: parse_date("intake_date", &req.intake_date)?,
    };
    let record = state.service().log_intake(&user, &intake)?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_intake(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> ApiResult<Json<IntakeRecord>> {
    Ok(Json(state.service().get_intake(&user, id)?))
}

async fn update_intake(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateIntakeRequest>,
) -> ApiResult<Json<IntakeRecord>> {
    let update = UpdateIntake {
        source_id: req.source_id,
        quantity_grams: req
            .quantity_grams
            .map(|a| a.parse("quantity_grams"))
            .transpose()?,
        intake_date: req
            .intake_date
            .map(|d| parse_date("intake_date", &d))
            .transpose()?,
    };
    if update.is_empty() {
        return Err(TrackerError::validation("body", "At least one field must be provided").into());
    }
    Ok(Json(state.service().update_intake(&user, id, &update)?))
}

async fn delete_intake(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.service().delete_intake(&user, id)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Handlers: targets ---

async fn list_targets(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Json<Vec<DailyTarget>>> {
    let start = DateQuery::opt("start", query.start.as_ref())?;
    let end = DateQuery::opt("end", query.end.as_ref())?;
    Ok(Json(state.service().list_targets(&user, start, end)?))
}

async fn create_target(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<CreateTargetRequest>,
) -> ApiResult<(StatusCode, Json<DailyTarget>)> {
    let date = parse_date("target_date", &req.target_date)?;
    let target = state.service().set_target(&user, date)?;
    Ok((StatusCode::CREATED, Json(target)))
}

async fn get_target(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(date): Path<String>,
) -> ApiResult<Json<DailyTarget>> {
    let date = parse_date("date", &date)?;
    Ok(Json(state.service().get_target(&user, date)?))
}

async fn delete_target(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(date): Path<String>,
) -> ApiResult<StatusCode> {
    let date = parse_date("date", &date)?;
    state.service().delete_target(&user, date)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Handlers: summaries and dashboard ---

async fn list_summaries(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Json<Vec<DailySummary>>> {
    let start = DateQuery::opt("start", query.start.as_ref())?;
    let end = DateQuery::opt("end", query.end.as_ref())?;
    Ok(Json(state.service().list_summaries(&user, start, end)?))
}

async fn generate_summary(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Json<DailySummary>> {
    let date = DateQuery::required("date", query.date.as_ref())?;
    Ok(Json(state.service().generate_summary(&user, date)?))
}

async fn generate_range(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Json<RangeReport>> {
    let start = DateQuery::required("start", query.start.as_ref())?;
    let end = DateQuery::required("end", query.end.as_ref())?;
    Ok(Json(state.service().generate_range(&user, start, end)?))
}

async fn dashboard(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Json<Dashboard>> {
    let date = DateQuery::opt("date", query.date.as_ref())?
        .unwrap_or_else(|| Local::now().date_naive());
    Ok(Json(state.service().dashboard(&user, date)?))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/me", get(get_me).put(update_me))
        .route("/api/sources", get(list_sources).post(create_source))
        .route(
            "/api/sources/{id}",
            get(get_source).put(update_source).delete(delete_source),
        )
        .route("/api/intakes", get(list_intakes).post(create_intake))
        .route(
            "/api/intakes/{id}",
            get(get_intake).put(update_intake).delete(delete_intake),
        )
        .route("/api/targets", get(list_targets).post(create_target))
        .route("/api/targets/{date}", get(get_target).delete(delete_target))
        .route("/api/summaries", get(list_summaries))
        .route("/api/summaries/generate", post(generate_summary))
        .route("/api/summaries/generate-range", post(generate_range))
        .route("/api/dashboard", get(dashboard))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_user))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(log_requests))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(service: TrackerService, port: u16, bind: &str) -> anyhow::Result<()> {
    let users = service.list_users()?;
    if users.is_empty() {
        eprintln!("Warning: no users exist yet. Create one with `whey user add <name>`.");
    }

    let state = AppState {
        service: Arc::new(Mutex::new(service)),
    };
    let app = build_router(state);

    if bind != "127.0.0.1" && bind != "localhost" {
        eprintln!("Warning: Listening on {bind}. Any device on your network can reach this API.");
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    info!(%bind, port, users = users.len(), "server listening");
    eprintln!("Listening on http://{bind}:{port}");
    eprintln!(
        "Authenticate with `Authorization: Bearer <token>` (issue one with `whey user token`)."
    );
    axum::serve(listener, app).await?;

    Ok(())
}
