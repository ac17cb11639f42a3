use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use axum::{
    Router,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use bytes::Bytes;
use chrono::NaiveDateTime;
use locksmith_hub::{
    ApiRecord, ApiSelector, BreakdownQuery, CallersQuery, CallsQuery, DateRange, HubStats,
    IssuedQuery, KeyTableQuery, LeaderboardEntry, LeaderboardQuery, RequestParams, StatsError,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const ECHO_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Clone)]
struct AppState {
    stats: HubStats,
    forward_auth: ForwardAuthConfig,
}

#[derive(Clone, Debug)]
pub struct ForwardAuthConfig {
    user_header: Option<HeaderName>,
    staff_users: Vec<String>,
    dev_staff_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessTier {
    Login,
    Staff,
}

impl ForwardAuthConfig {
    pub fn new(
        user_header: Option<HeaderName>,
        staff_users: Vec<String>,
        dev_staff_name: Option<String>,
    ) -> Self {
        let staff_users = staff_users
            .into_iter()
            .map(|user| user.trim().to_owned())
            .filter(|user| !user.is_empty())
            .collect();
        Self {
            user_header,
            staff_users,
            dev_staff_name,
        }
    }

    fn user_value<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        self.user_header
            .as_ref()
            .and_then(|name| headers.get(name))
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
    }

    fn is_staff(&self, user: &str) -> bool {
        self.staff_users.iter().any(|staff| staff == user)
    }

    fn authorize(&self, headers: &HeaderMap, tier: AccessTier) -> Result<(), ApiError> {
        if self.dev_staff_name.is_some() {
            return Ok(());
        }

        let Some(user) = self.user_value(headers) else {
            return Err(ApiError::Unauthorized);
        };

        match tier {
            AccessTier::Login => Ok(()),
            AccessTier::Staff if self.is_staff(user) => Ok(()),
            AccessTier::Staff => {
                warn!(user, "staff route refused");
                Err(ApiError::Forbidden)
            }
        }
    }
}

#[derive(Debug)]
enum ApiError {
    Unauthorized,
    Forbidden,
    Stats(StatsError),
}

impl From<StatsError> for ApiError {
    fn from(err: StatsError) -> Self {
        Self::Stats(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Login required.".to_owned()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "Staff access required.".to_owned()),
            ApiError::Stats(err) => match &err {
                StatsError::InvalidParameter { .. } | StatsError::MissingIdentifier => {
                    (StatusCode::BAD_REQUEST, err.to_string())
                }
                StatsError::ApiNotFound | StatsError::KeyNotFound => {
                    (StatusCode::NOT_FOUND, err.to_string())
                }
                StatsError::Database(source) => {
                    error!(error = %source, "stats query failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal error".to_owned(),
                    )
                }
            },
        };
        (status, message).into_response()
    }
}

type PathValues = Option<Path<HashMap<String, String>>>;

fn request_params(path: PathValues, query: Option<&str>, body: &[u8]) -> RequestParams {
    let params = RequestParams::new(query, body);
    match path {
        Some(Path(values)) => params.with_path(values),
        None => params,
    }
}

fn required_int(params: &RequestParams, name: &str) -> Result<i64, StatsError> {
    params
        .int(name)?
        .ok_or_else(|| StatsError::invalid(name, ""))
}

fn path_year(params: &RequestParams) -> Result<i32, StatsError> {
    let year = required_int(params, "year")?;
    i32::try_from(year).map_err(|_| StatsError::invalid("year", &year.to_string()))
}

fn path_month(params: &RequestParams) -> Result<u32, StatsError> {
    let month = required_int(params, "month")?;
    u32::try_from(month).map_err(|_| StatsError::invalid("month", &month.to_string()))
}

fn echo_date(stamp: Option<NaiveDateTime>) -> Option<String> {
    stamp.map(|stamp| stamp.format(ECHO_DATE_FORMAT).to_string())
}

#[derive(Debug, Default, Serialize)]
struct DateEcho {
    #[serde(skip_serializing_if = "Option::is_none")]
    begin_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_date: Option<String>,
}

impl From<DateRange> for DateEcho {
    fn from(range: DateRange) -> Self {
        Self {
            begin_date: echo_date(range.begin),
            end_date: echo_date(range.end),
        }
    }
}

async fn health_check() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct VersionView {
    backend: String,
}

async fn get_version() -> Json<VersionView> {
    let backend = if cfg!(debug_assertions) {
        format!("{}-dev", env!("CARGO_PKG_VERSION"))
    } else {
        env!("CARGO_PKG_VERSION").to_owned()
    };
    Json(VersionView { backend })
}

#[derive(Debug, Serialize)]
struct ApiView {
    id: i64,
    name: String,
    deprecated: bool,
}

impl From<ApiRecord> for ApiView {
    fn from(api: ApiRecord) -> Self {
        Self {
            id: api.id,
            deprecated: api.deprecated(),
            name: api.name,
        }
    }
}

async fn list_apis(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ApiView>>, ApiError> {
    state.forward_auth.authorize(&headers, AccessTier::Login)?;
    let apis = state.stats.list_apis().await?;
    Ok(Json(apis.into_iter().map(ApiView::from).collect()))
}

#[derive(Debug, Serialize)]
struct ApiCallsEntryView {
    api_id: i64,
    api_name: String,
    calls: i64,
}

#[derive(Debug, Serialize)]
struct CallsSummaryView {
    calls: i64,
    by_api: Vec<ApiCallsEntryView>,
    #[serde(flatten)]
    dates: DateEcho,
}

async fn api_calls(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Json<CallsSummaryView>, ApiError> {
    state.forward_auth.authorize(&headers, AccessTier::Login)?;
    let params = RequestParams::new(query.as_deref(), &[]);
    let query = CallsQuery::from_params(&params)?;

    let summary = state.stats.api_calls(&query).await?;
    Ok(Json(CallsSummaryView {
        calls: summary.calls,
        by_api: summary
            .by_api
            .into_iter()
            .map(|api| ApiCallsEntryView {
                api_id: api.api_id,
                api_name: api.api_name,
                calls: api.calls,
            })
            .collect(),
        dates: query.range.into(),
    }))
}

#[derive(Debug, Serialize)]
struct ApiCallsView {
    api_id: i64,
    api_name: String,
    calls: i64,
    #[serde(flatten)]
    dates: DateEcho,
}

async fn calls_to_api(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    path: PathValues,
    RawQuery(query): RawQuery,
) -> Result<Json<ApiCallsView>, ApiError> {
    state.forward_auth.authorize(&headers, AccessTier::Login)?;
    let params = request_params(path, query.as_deref(), &[]);
    let query = CallsQuery::from_params(&params)?;
    let api = state
        .stats
        .resolve_api(&ApiSelector::from_params(&params)?)
        .await?;

    let calls = state.stats.calls_to_api(&api, &query).await?;
    Ok(Json(ApiCallsView {
        api_id: api.id,
        api_name: api.name,
        calls,
        dates: query.range.into(),
    }))
}

#[derive(Debug, Serialize)]
struct YearCallsView {
    year: i32,
    calls: i64,
}

#[derive(Debug, Serialize)]
struct YearlyCallsView {
    api_id: i64,
    api_name: String,
    earliest_year: Option<i32>,
    latest_year: Option<i32>,
    calls: i64,
    yearly: Vec<YearCallsView>,
}

async fn calls_to_api_yearly(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    path: PathValues,
    RawQuery(query): RawQuery,
) -> Result<Json<YearlyCallsView>, ApiError> {
    state.forward_auth.authorize(&headers, AccessTier::Login)?;
    let params = request_params(path, query.as_deref(), &[]);
    let query = BreakdownQuery::from_params(&params);
    let api = state
        .stats
        .resolve_api(&ApiSelector::from_params(&params)?)
        .await?;

    let totals = state.stats.calls_to_api_yearly(&api, &query).await?;
    Ok(Json(YearlyCallsView {
        api_id: api.id,
        api_name: api.name,
        earliest_year: totals.span.map(|(earliest, _)| earliest),
        latest_year: totals.span.map(|(_, latest)| latest),
        calls: totals.total,
        yearly: totals
            .years
            .into_iter()
            .map(|year| YearCallsView {
                year: year.year,
                calls: year.total,
            })
            .collect(),
    }))
}

#[derive(Debug, Serialize)]
struct MonthCallsView {
    month: u32,
    calls: i64,
}

#[derive(Debug, Serialize)]
struct MonthlyCallsView {
    api_id: i64,
    api_name: String,
    year: i32,
    calls: i64,
    monthly: Vec<MonthCallsView>,
}

async fn calls_to_api_monthly(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    path: PathValues,
    RawQuery(query): RawQuery,
) -> Result<Json<MonthlyCallsView>, ApiError> {
    state.forward_auth.authorize(&headers, AccessTier::Login)?;
    let params = request_params(path, query.as_deref(), &[]);
    let year = path_year(&params)?;
    let query = BreakdownQuery::from_params(&params);
    let api = state
        .stats
        .resolve_api(&ApiSelector::from_params(&params)?)
        .await?;

    let totals = state.stats.calls_to_api_monthly(&api, year, &query).await?;
    Ok(Json(MonthlyCallsView {
        api_id: api.id,
        api_name: api.name,
        year: totals.year,
        calls: totals.total,
        monthly: totals
            .months
            .into_iter()
            .map(|month| MonthCallsView {
                month: month.month,
                calls: month.total,
            })
            .collect(),
    }))
}

#[derive(Debug, Serialize)]
struct ApiRefView {
    id: i64,
    name: String,
}

#[derive(Debug, Serialize)]
struct EndpointCallsView {
    endpoint: String,
    calls: i64,
}

#[derive(Debug, Serialize)]
struct ByEndpointView {
    api: ApiRefView,
    by_endpoint: Vec<EndpointCallsView>,
}

async fn calls_by_endpoint(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    path: PathValues,
    RawQuery(query): RawQuery,
) -> Result<Json<ByEndpointView>, ApiError> {
    state.forward_auth.authorize(&headers, AccessTier::Login)?;
    let params = request_params(path, query.as_deref(), &[]);
    let query = BreakdownQuery::from_params(&params);
    let api = state
        .stats
        .resolve_api(&ApiSelector::from_params(&params)?)
        .await?;

    let endpoints = state.stats.calls_by_endpoint(&api, &query).await?;
    Ok(Json(ByEndpointView {
        api: ApiRefView {
            id: api.id,
            name: api.name,
        },
        by_endpoint: endpoints
            .into_iter()
            .map(|entry| EndpointCallsView {
                endpoint: entry.endpoint,
                calls: entry.calls,
            })
            .collect(),
    }))
}

#[derive(Debug, Serialize)]
struct CallersView {
    callers: Vec<locksmith_hub::CallerRecord>,
}

async fn callers_of_api(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    path: PathValues,
    RawQuery(query): RawQuery,
) -> Result<Json<CallersView>, ApiError> {
    state.forward_auth.authorize(&headers, AccessTier::Staff)?;
    let params = request_params(path, query.as_deref(), &[]);
    let query = CallersQuery::from_params(&params)?;
    let api = state
        .stats
        .resolve_api(&ApiSelector::from_params(&params)?)
        .await?;

    let callers = state.stats.callers_of_api(&api, &query).await?;
    Ok(Json(CallersView { callers }))
}

/// One DataTables row: key, email, calls, latest call, issued on.
#[derive(Debug, Serialize)]
struct KeyRowView(String, String, i64, String, String);

#[derive(Debug, Serialize)]
struct KeyTableView {
    #[serde(rename = "iTotalRecords")]
    total_records: i64,
    #[serde(rename = "iTotalDisplayRecords")]
    display_records: i64,
    #[serde(rename = "sEcho")]
    echo: Option<i64>,
    #[serde(rename = "aaData")]
    rows: Vec<KeyRowView>,
}

async fn key_table(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Json<KeyTableView>, ApiError> {
    state.forward_auth.authorize(&headers, AccessTier::Staff)?;
    let params = RequestParams::new(query.as_deref(), &body);
    let query = KeyTableQuery::from_params(&params)?;

    let table = state.stats.key_table(&query).await?;
    Ok(Json(KeyTableView {
        total_records: table.total_records,
        display_records: table.display_records,
        echo: query.echo,
        rows: table
            .rows
            .into_iter()
            .map(|row| KeyRowView(row.key, row.email, row.calls, row.latest_call, row.issued_on))
            .collect(),
    }))
}

#[derive(Debug, Serialize)]
struct KeyMonthlyView {
    key: String,
    monthly: Vec<locksmith_hub::KeyMonthCalls>,
}

async fn key_calls_by_month(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Json<KeyMonthlyView>, ApiError> {
    state.forward_auth.authorize(&headers, AccessTier::Staff)?;
    let monthly = state.stats.key_calls_by_month(&key).await?;
    Ok(Json(KeyMonthlyView { key, monthly }))
}

#[derive(Debug, Serialize)]
struct IssuedView {
    issued: i64,
    #[serde(flatten)]
    dates: DateEcho,
}

async fn keys_issued(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Json<IssuedView>, ApiError> {
    state.forward_auth.authorize(&headers, AccessTier::Login)?;
    let params = RequestParams::new(query.as_deref(), &[]);
    let query = IssuedQuery::from_params(&params)?;

    let issued = state.stats.keys_issued(&query).await?;
    Ok(Json(IssuedView {
        issued,
        dates: query.range.into(),
    }))
}

#[derive(Debug, Serialize)]
struct YearIssuedView {
    year: i32,
    issued: i64,
}

#[derive(Debug, Serialize)]
struct YearlyIssuedView {
    earliest_year: Option<i32>,
    latest_year: Option<i32>,
    yearly: Vec<YearIssuedView>,
}

async fn keys_issued_yearly(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Json<YearlyIssuedView>, ApiError> {
    state.forward_auth.authorize(&headers, AccessTier::Login)?;
    let params = RequestParams::new(query.as_deref(), &[]);
    let query = IssuedQuery::from_params(&params)?;

    let totals = state.stats.keys_issued_yearly(&query).await?;
    Ok(Json(YearlyIssuedView {
        earliest_year: totals.span.map(|(earliest, _)| earliest),
        latest_year: totals.span.map(|(_, latest)| latest),
        yearly: totals
            .years
            .into_iter()
            .map(|year| YearIssuedView {
                year: year.year,
                issued: year.total,
            })
            .collect(),
    }))
}

#[derive(Debug, Serialize)]
struct MonthIssuedView {
    month: u32,
    issued: i64,
}

#[derive(Debug, Serialize)]
struct MonthlyIssuedView {
    year: i32,
    issued: i64,
    monthly: Vec<MonthIssuedView>,
}

async fn keys_issued_monthly(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    path: PathValues,
    RawQuery(query): RawQuery,
) -> Result<Json<MonthlyIssuedView>, ApiError> {
    state.forward_auth.authorize(&headers, AccessTier::Login)?;
    let params = request_params(path, query.as_deref(), &[]);
    let year = path_year(&params)?;
    let query = IssuedQuery::from_params(&params)?;

    let totals = state.stats.keys_issued_monthly(year, &query).await?;
    Ok(Json(MonthlyIssuedView {
        year: totals.year,
        issued: totals.total,
        monthly: totals
            .months
            .into_iter()
            .map(|month| MonthIssuedView {
                month: month.month,
                issued: month.total,
            })
            .collect(),
    }))
}

#[derive(Debug, Serialize)]
struct LeaderboardView {
    earliest_date: String,
    latest_date: String,
    by_key: Vec<LeaderboardEntry>,
}

async fn quarterly_leaderboard(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    path: PathValues,
    RawQuery(query): RawQuery,
) -> Result<Json<LeaderboardView>, ApiError> {
    state.forward_auth.authorize(&headers, AccessTier::Staff)?;
    let params = request_params(path, query.as_deref(), &[]);
    let year = path_year(&params)?;
    let month = path_month(&params)?;
    let query = LeaderboardQuery::from_params(&params)?;

    let selector = ApiSelector::from_params(&params)?;
    let api = if selector.is_empty() {
        None
    } else {
        Some(state.stats.resolve_api(&selector).await?)
    };

    let board = state
        .stats
        .quarterly_leaderboard(year, month, api.as_ref(), &query)
        .await?;
    Ok(Json(LeaderboardView {
        earliest_date: board.begin.to_string(),
        latest_date: board.end.to_string(),
        by_key: board.entries,
    }))
}

fn build_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/api/version", get(get_version))
        .route("/api/apis", get(list_apis))
        .route("/api/calls", get(api_calls))
        .route("/api/keys", get(key_table).post(key_table))
        .route("/api/keys/:key/calls/monthly", get(key_calls_by_month))
        .route("/api/issued", get(keys_issued))
        .route("/api/issued/yearly", get(keys_issued_yearly))
        .route("/api/issued/monthly/:year", get(keys_issued_monthly))
        .route("/api/leaderboard/:year/:month", get(quarterly_leaderboard));

    // API routes addressed by query string or by path.
    for prefix in ["/api/apis", "/api/apis/id/:api_id", "/api/apis/name/:api_name"] {
        router = router
            .route(&format!("{prefix}/calls"), get(calls_to_api))
            .route(&format!("{prefix}/calls/yearly"), get(calls_to_api_yearly))
            .route(
                &format!("{prefix}/calls/monthly/:year"),
                get(calls_to_api_monthly),
            )
            .route(&format!("{prefix}/calls/by_endpoint"), get(calls_by_endpoint))
            .route(&format!("{prefix}/callers"), get(callers_of_api));
    }
    for prefix in ["/api/apis/id/:api_id", "/api/apis/name/:api_name"] {
        router = router.route(
            &format!("{prefix}/leaderboard/:year/:month"),
            get(quarterly_leaderboard),
        );
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

pub async fn serve(
    addr: SocketAddr,
    stats: HubStats,
    forward_auth: ForwardAuthConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    if forward_auth.dev_staff_name.is_some() {
        warn!("dev staff override is set; every request is treated as staff");
    } else if forward_auth.user_header.is_none() {
        warn!("no forward-auth user header configured; all stats routes will answer 401");
    }

    let state = Arc::new(AppState {
        stats,
        forward_auth,
    });
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "stats server listening");
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header::CONTENT_TYPE};
    use locksmith_hub::InternalKeyPolicy;
    use sqlx::sqlite::SqlitePoolOptions;
    use tower::ServiceExt;

    const USER: &str = "alice";
    const STAFF: &str = "staffer";

    async fn app_with(forward_auth: ForwardAuthConfig) -> Router {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        let stats = HubStats::with_pool(pool.clone(), InternalKeyPolicy::new(["@operator.org"]))
            .await
            .expect("schema");

        for statement in [
            "INSERT INTO apis (id, name, push_enabled) VALUES (1, 'congress', 1)",
            "INSERT INTO keys (key, email, issued_on, status, is_internal) VALUES ('alpha', 'alice@example.com', '2022-03-01', 'A', 0)",
            "INSERT INTO keys (key, email, issued_on, status, is_internal) VALUES ('bravo', 'bob@example.com', '2023-01-10', 'A', 0)",
            "INSERT INTO keys (key, email, issued_on, status, is_internal) VALUES ('ops', 'ops@operator.org', '2023-01-11', 'A', 0)",
            "INSERT INTO reports (api_id, key, date, endpoint, calls) VALUES (1, 'alpha', '2022-11-15', 'bills', 150)",
            "INSERT INTO reports (api_id, key, date, endpoint, calls) VALUES (1, 'alpha', '2023-02-01', 'bills', 120)",
            "INSERT INTO reports (api_id, key, date, endpoint, calls) VALUES (1, 'bravo', '2023-03-05', 'votes', 300)",
            "INSERT INTO reports (api_id, key, date, endpoint, calls) VALUES (1, 'ops', '2023-03-06', 'votes', 9000)",
        ] {
            sqlx::query(statement).execute(&pool).await.unwrap();
        }

        build_router(Arc::new(AppState {
            stats,
            forward_auth,
        }))
    }

    async fn app() -> Router {
        app_with(ForwardAuthConfig::new(
            Some(HeaderName::from_static("remote-user")),
            vec![STAFF.to_owned()],
            None,
        ))
        .await
    }

    fn get_as(uri: &str, user: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(user) = user {
            builder = builder.header("Remote-User", user);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn send_json(app: &Router, request: Request<Body>) -> serde_json::Value {
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::OK, "body: {body}");
        serde_json::from_str(&body).unwrap()
    }

    #[tokio::test]
    async fn health_and_version_need_no_login() {
        let app = app().await;
        let (status, body) = send(&app, get_as("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");

        let version = send_json(&app, get_as("/api/version", None)).await;
        assert!(version["backend"].as_str().is_some());
    }

    #[tokio::test]
    async fn stats_routes_require_login_and_staff() {
        let app = app().await;
        let (status, _) = send(&app, get_as("/api/calls", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, get_as("/api/keys", Some(USER))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&app, get_as("/api/keys", Some(STAFF))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn dev_override_grants_staff() {
        let app = app_with(ForwardAuthConfig::new(None, Vec::new(), Some("dev".into()))).await;
        let (status, _) = send(&app, get_as("/api/apis/id/1/callers", None)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn calls_by_name_id_and_query_agree() {
        let app = app().await;
        for uri in [
            "/api/apis/name/congress/calls",
            "/api/apis/id/1/calls",
            "/api/apis/calls?api_name=congress",
        ] {
            let body = send_json(&app, get_as(uri, Some(USER))).await;
            assert_eq!(body["api_id"], 1, "{uri}");
            assert_eq!(body["calls"], 570, "{uri}");
            assert!(body.get("begin_date").is_none(), "{uri}");
        }
    }

    #[tokio::test]
    async fn calls_echo_supplied_dates() {
        let app = app().await;
        let body = send_json(
            &app,
            get_as(
                "/api/apis/id/1/calls?begin_date=2023-01-01&ignore_internal_keys=f",
                Some(USER),
            ),
        )
        .await;
        assert_eq!(body["calls"], 9420);
        assert_eq!(body["begin_date"], "2023-01-01T00:00:00");
        assert!(body.get("end_date").is_none());
    }

    #[tokio::test]
    async fn api_errors_are_plain_text() {
        let app = app().await;

        let (status, body) = send(&app, get_as("/api/apis/calls", Some(USER))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Must specify API id or name.");

        let (status, body) = send(&app, get_as("/api/apis/name/nope/calls", Some(USER))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "The requested API was not found.");

        let (status, body) =
            send(&app, get_as("/api/calls?begin_date=someday", Some(USER))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Unparsable begin_date value: someday");

        let (status, body) =
            send(&app, get_as("/api/apis/id/1/calls/monthly/twenty", Some(USER))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Unparsable year value: twenty");

        let (status, body) =
            send(&app, get_as("/api/keys/ghost/calls/monthly", Some(STAFF))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "The requested key was not found.");
    }

    #[tokio::test]
    async fn monthly_and_yearly_are_dense() {
        let app = app().await;
        let monthly = send_json(&app, get_as("/api/apis/id/1/calls/monthly/2023", Some(USER))).await;
        let months = monthly["monthly"].as_array().unwrap();
        assert_eq!(months.len(), 12);
        assert_eq!(monthly["calls"], 420);
        assert_eq!(months[1]["calls"], 120);
        assert_eq!(months[2]["calls"], 300);

        let yearly = send_json(&app, get_as("/api/apis/id/1/calls/yearly", Some(USER))).await;
        assert_eq!(yearly["earliest_year"], 2022);
        assert_eq!(yearly["latest_year"], 2023);
        assert_eq!(yearly["yearly"].as_array().unwrap().len(), 2);

        let issued = send_json(&app, get_as("/api/issued/monthly/2023", Some(USER))).await;
        assert_eq!(issued["issued"], 1);
        assert_eq!(issued["monthly"][0]["issued"], 1);
    }

    #[tokio::test]
    async fn key_table_accepts_form_posts() {
        let app = app().await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/keys")
            .header("Remote-User", STAFF)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("sEcho=7&iSortCol_0=2&sSortDir_0=desc"))
            .unwrap();
        let body = send_json(&app, request).await;

        assert_eq!(body["sEcho"], 7);
        assert_eq!(body["iTotalRecords"], 3);
        assert_eq!(body["iTotalDisplayRecords"], 2);
        assert_eq!(
            body["aaData"][0],
            serde_json::json!(["bravo", "bob@example.com", 300, "2023-03-05", "2023-01-10"])
        );
    }

    #[tokio::test]
    async fn key_monthly_fills_gaps() {
        let app = app().await;
        let body = send_json(&app, get_as("/api/keys/alpha/calls/monthly", Some(STAFF))).await;
        let months = body["monthly"].as_array().unwrap();
        assert_eq!(months.len(), 4);
        assert_eq!(months[0]["year"], 2022);
        assert_eq!(months[0]["month"], 11);
        assert_eq!(months[3]["calls"], 120);
    }

    #[tokio::test]
    async fn leaderboard_reports_rank_changes() {
        let app = app().await;
        let body = send_json(
            &app,
            get_as("/api/apis/name/congress/leaderboard/2023/1", Some(STAFF)),
        )
        .await;

        assert_eq!(body["earliest_date"], "2023-01-01");
        assert_eq!(body["latest_date"], "2023-03-31");
        let board = body["by_key"].as_array().unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0]["key"], "bravo");
        assert!(board[0]["rank_diff"].is_null());
        assert_eq!(board[1]["key"], "alpha");
        assert_eq!(board[1]["rank"], 2);
        assert_eq!(board[1]["rank_diff"], -1);

        let (status, _) = send(&app, get_as("/api/leaderboard/2023/13", Some(STAFF))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn leaderboard_for_unknown_api_is_not_found() {
        let app = app().await;
        for uri in [
            "/api/apis/name/nope/leaderboard/2023/1",
            "/api/apis/id/99/leaderboard/2023/1",
            "/api/leaderboard/2023/1?api_id=99",
        ] {
            let (status, body) = send(&app, get_as(uri, Some(STAFF))).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
            assert_eq!(body, "The requested API was not found.", "{uri}");
        }

        let body = send_json(&app, get_as("/api/leaderboard/2023/1", Some(STAFF))).await;
        assert_eq!(body["by_key"].as_array().unwrap().len(), 2);
    }
}
