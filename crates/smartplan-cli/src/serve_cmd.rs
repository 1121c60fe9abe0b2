use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Form, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use smartplan_core::PlanError;
use smartplan_core::gateway::ModelGateway;
use smartplan_core::plan::{self, DEFAULT_LIST_LIMIT, Timeline};
use smartplan_db::models::{ModelId, Plan, PlanSummary};

use crate::plan_cmds::fmt_days;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Shared, read-only state built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub gateway: Arc<dyn ModelGateway>,
    pub default_model: ModelId,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
    /// Model output behind a rejected plan, shown so the user can see what
    /// went wrong.
    raw_output: Option<String>,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
            raw_output: None,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
            raw_output: None,
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
            raw_output: None,
        }
    }
}

impl From<PlanError> for AppError {
    fn from(err: PlanError) -> Self {
        let status = match &err {
            PlanError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PlanError::MalformedPlan { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PlanError::UpstreamRejected { .. } => StatusCode::BAD_GATEWAY,
            PlanError::UpstreamUnavailable(_) | PlanError::StoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        if status.is_server_error() {
            tracing::warn!(error = %err, "request failed");
        }
        Self {
            status,
            message: err.to_string(),
            raw_output: err.raw_output().map(str::to_string),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = match self.raw_output {
            Some(raw) => serde_json::json!({ "error": self.message, "raw_output": raw }),
            None => serde_json::json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

/// [`AppError`] rendered as an HTML page, for the browser routes.
pub struct PageError(AppError);

impl From<AppError> for PageError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl From<PlanError> for PageError {
    fn from(err: PlanError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let AppError {
            status,
            message,
            raw_output,
        } = self.0;
        let raw = raw_output
            .map(|raw| {
                format!(
                    "<details open><summary>Raw model output</summary><pre>{}</pre></details>",
                    escape_html(&raw)
                )
            })
            .unwrap_or_default();
        let body = format!(
            "<h1>{code}</h1><p class=\"error\">{message}</p>{raw}<p><a href=\"/\">Back</a></p>",
            code = status.as_u16(),
            message = escape_html(&message),
        );
        (status, Html(page("Error", &body))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct GenerateForm {
    pub goal: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IndexQuery {
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Serialize)]
pub struct PlanDetailResponse<'a> {
    #[serde(flatten)]
    pub plan: &'a Plan,
    pub timeline: Timeline<'a>,
}

/// Blank means "use the server default".
fn resolve_model(requested: Option<&str>, default: ModelId) -> Result<ModelId, AppError> {
    match requested.map(str::trim).filter(|m| !m.is_empty()) {
        Some(name) => name
            .parse::<ModelId>()
            .map_err(|e| AppError::bad_request(e.to_string())),
        None => Ok(default),
    }
}

fn plan_detail(saved: &Plan) -> Result<Response, AppError> {
    let timeline = plan::timeline(&saved.tasks.0).map_err(|e| AppError::internal(e.into()))?;
    Ok(Json(PlanDetailResponse {
        plan: saved,
        timeline,
    })
    .into_response())
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/plans", post(create_plan_form))
        .route("/plans/{id}", get(plan_page))
        .route("/plans/{id}/delete", post(delete_plan_form))
        .route("/api/plans", get(list_plans).post(create_plan))
        .route("/api/plans/search", get(search_plans))
        .route("/api/plans/{id}", get(get_plan_detail).delete(delete_plan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(state: AppState, bind: &str, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("smartplan serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("smartplan serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install Ctrl+C handler: {e}");
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// HTML rendering
// ---------------------------------------------------------------------------

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\
<html><head><meta charset=\"utf-8\"><title>{title} - smartplan</title>\
<style>body{{font-family:sans-serif;max-width:60rem;margin:2rem auto}}\
table{{border-collapse:collapse}}td,th{{padding:.25rem .75rem;border-bottom:1px solid #ddd;text-align:left}}\
tr.critical td{{font-weight:bold}}.error{{color:#b00}}</style></head>\
<body>{body}</body></html>",
        title = escape_html(title),
    )
}

fn model_options(selected: ModelId) -> String {
    ModelId::ALL
        .iter()
        .map(|m| {
            let sel = if *m == selected { " selected" } else { "" };
            format!("<option value=\"{m}\"{sel}>{m}</option>")
        })
        .collect()
}

fn summary_rows(plans: &[PlanSummary]) -> String {
    if plans.is_empty() {
        return "<tr><td colspan=\"5\">No plans found.</td></tr>".to_string();
    }
    plans
        .iter()
        .map(|p| {
            format!(
                "<tr><td><a href=\"/plans/{id}\">{goal}</a></td><td>{model}</td><td>{count}</td>\
<td>{created}</td><td><form method=\"post\" action=\"/plans/{id}/delete\">\
<button type=\"submit\">Delete</button></form></td></tr>",
                id = p.id,
                goal = escape_html(&p.goal),
                model = p.model_used,
                count = p.task_count,
                created = p.created_at.format("%Y-%m-%d %H:%M"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_index(plans: &[PlanSummary], query: Option<&str>, default_model: ModelId) -> String {
    let heading = match query {
        Some(q) => format!("Plans matching &quot;{}&quot;", escape_html(q)),
        None => "Recent plans".to_string(),
    };
    let body = format!(
        "<h1>smartplan</h1>\
<form method=\"post\" action=\"/plans\">\
<p><label>Goal<br><textarea name=\"goal\" rows=\"3\" cols=\"70\" required></textarea></label></p>\
<p><label>Model <select name=\"model\">{options}</select></label> \
<button type=\"submit\">Generate plan</button></p></form>\
<form method=\"get\" action=\"/\"><input type=\"search\" name=\"q\" value=\"{q}\" placeholder=\"Search goals\">\
<button type=\"submit\">Search</button></form>\
<h2>{heading}</h2>\
<table><tr><th>Goal</th><th>Model</th><th>Tasks</th><th>Created</th><th></th></tr>{rows}</table>",
        options = model_options(default_model),
        q = escape_html(query.unwrap_or("")),
        rows = summary_rows(plans),
    );
    page("Plans", &body)
}

fn render_plan_page(saved: &Plan, timeline: &Timeline<'_>) -> String {
    let rows: String = timeline
        .tasks
        .iter()
        .map(|s| {
            let deps = if s.task.depends_on.is_empty() {
                "-".to_string()
            } else {
                escape_html(&s.task.depends_on.join(", "))
            };
            let description = s
                .task
                .description
                .as_deref()
                .map(|d| format!("<br><small>{}</small>", escape_html(d)))
                .unwrap_or_default();
            format!(
                "<tr{class}><td>{id}</td><td>{title}{description}</td><td>{days}</td>\
<td>{start}</td><td>{finish}</td><td>{deps}</td></tr>",
                class = if s.critical { " class=\"critical\"" } else { "" },
                id = escape_html(&s.task.id),
                title = escape_html(&s.task.title),
                days = fmt_days(s.task.duration_days),
                start = fmt_days(s.start_day),
                finish = fmt_days(s.finish_day),
            )
        })
        .collect();

    let body = format!(
        "<p><a href=\"/\">&larr; All plans</a></p>\
<h1>{goal}</h1>\
<p>Model: {model} &middot; Created {created} &middot; {count} tasks</p>\
<p>Critical path: <strong>{critical} days</strong> &middot; Sequential total: {sequential} days</p>\
<table><tr><th>ID</th><th>Task</th><th>Days</th><th>Start</th><th>Finish</th><th>Depends on</th></tr>{rows}</table>\
<p><small>Bold rows are on the critical path.</small></p>\
<form method=\"post\" action=\"/plans/{id}/delete\"><button type=\"submit\">Delete plan</button></form>",
        goal = escape_html(&saved.goal),
        model = saved.model_used,
        created = saved.created_at.format("%Y-%m-%d %H:%M UTC"),
        count = saved.tasks.0.len(),
        critical = fmt_days(timeline.critical_path_days),
        sequential = fmt_days(timeline.sequential_days),
        id = saved.id,
    );
    page(&saved.goal, &body)
}

// ---------------------------------------------------------------------------
// HTML handlers
// ---------------------------------------------------------------------------

async fn index(
    State(state): State<AppState>,
    Query(query): Query<IndexQuery>,
) -> Result<Html<String>, PageError> {
    let keyword = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty());
    let plans = match keyword {
        Some(q) => plan::search_plans(&state.pool, q).await?,
        None => plan::recent_plans(&state.pool, Some(DEFAULT_LIST_LIMIT)).await?,
    };
    Ok(Html(render_index(&plans, keyword, state.default_model)))
}

async fn create_plan_form(
    State(state): State<AppState>,
    Form(form): Form<GenerateForm>,
) -> Result<Redirect, PageError> {
    let model = resolve_model(form.model.as_deref(), state.default_model)?;
    let saved =
        plan::generate_and_save(&state.pool, state.gateway.as_ref(), &form.goal, model).await?;
    Ok(Redirect::to(&format!("/plans/{}", saved.id)))
}

async fn plan_page(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Html<String>, PageError> {
    let saved = plan::get_plan(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("plan {id} not found")))?;
    let timeline = plan::timeline(&saved.tasks.0).map_err(|e| AppError::internal(e.into()))?;
    Ok(Html(render_plan_page(&saved, &timeline)))
}

async fn delete_plan_form(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Redirect, PageError> {
    if !plan::delete_plan(&state.pool, id).await? {
        return Err(AppError::not_found(format!("plan {id} not found")).into());
    }
    Ok(Redirect::to("/"))
}

// ---------------------------------------------------------------------------
// JSON handlers
// ---------------------------------------------------------------------------

async fn create_plan(
    State(state): State<AppState>,
    payload: Result<Json<GenerateForm>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = payload.map_err(|e| AppError::bad_request(e.body_text()))?;
    let model = resolve_model(body.model.as_deref(), state.default_model)?;
    let saved =
        plan::generate_and_save(&state.pool, state.gateway.as_ref(), &body.goal, model).await?;

    let mut response = plan_detail(&saved)?;
    *response.status_mut() = StatusCode::CREATED;
    Ok(response)
}

async fn list_plans(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<PlanSummary>>, AppError> {
    Ok(Json(plan::recent_plans(&state.pool, query.limit).await?))
}

async fn search_plans(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<PlanSummary>>, AppError> {
    Ok(Json(plan::search_plans(&state.pool, &query.q).await?))
}

async fn get_plan_detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let saved = plan::get_plan(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("plan {id} not found")))?;
    plan_detail(&saved)
}

async fn delete_plan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if plan::delete_plan(&state.pool, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("plan {id} not found")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    use smartplan_core::gateway::{GatewayError, ModelGateway, ModelRequest};
    use smartplan_core::plan::{PlanDraft, save_plan};
    use smartplan_db::models::{ModelId, PlannedTask};
    use smartplan_db::queries::plans::count_plans;
    use smartplan_test_utils::{TestDb, create_test_db};

    use super::{AppState, build_router, escape_html};

    // -----------------------------------------------------------------------
    // Stub gateway
    // -----------------------------------------------------------------------

    enum Reply {
        Text(&'static str),
        Unavailable,
        Rejected(u16),
    }

    struct StubGateway(Reply);

    #[async_trait]
    impl ModelGateway for StubGateway {
        fn name(&self) -> &str {
            "stub"
        }

        async fn generate(&self, _request: &ModelRequest) -> Result<String, GatewayError> {
            match self.0 {
                Reply::Text(text) => Ok(text.to_string()),
                Reply::Unavailable => Err(GatewayError::Unavailable("timed out".to_string())),
                Reply::Rejected(status) => Err(GatewayError::Rejected {
                    status,
                    message: "API key not valid".to_string(),
                }),
            }
        }
    }

    const PODCAST_REPLY: &str = r#"[
      {"id":"t1","title":"Choose topic","duration_days":2,"depends_on":[]},
      {"id":"t2","title":"Record pilot","duration_days":3,"depends_on":["t1"]}
    ]"#;

    // -----------------------------------------------------------------------
    // HTTP helpers
    // -----------------------------------------------------------------------

    fn state(db: &TestDb, reply: Reply) -> AppState {
        AppState {
            pool: db.pool.clone(),
            gateway: Arc::new(StubGateway(reply)),
            default_model: ModelId::Gemini25Flash,
        }
    }

    async fn send(state: AppState, request: Request<Body>) -> axum::response::Response {
        build_router(state).oneshot(request).await.unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn post_form(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    fn location(response: &axum::response::Response) -> String {
        response
            .headers()
            .get(header::LOCATION)
            .expect("redirect should have a location")
            .to_str()
            .unwrap()
            .to_string()
    }

    async fn seed(db: &TestDb, goal: &str) -> uuid::Uuid {
        let draft = PlanDraft {
            goal: goal.to_string(),
            model: ModelId::Gemini25Pro,
            tasks: vec![PlannedTask {
                id: "t1".to_string(),
                title: "First step".to_string(),
                duration_days: 1.0,
                depends_on: Vec::new(),
                description: None,
            }],
        };
        save_plan(&db.pool, &draft).await.unwrap().id
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    #[test]
    fn escape_html_neutralizes_markup() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
    }

    // -----------------------------------------------------------------------
    // HTML routes
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn index_returns_form_and_recent_plans() {
        let db = create_test_db().await;
        seed(&db, "Launch a podcast").await;

        let resp = send(state(&db, Reply::Text(PODCAST_REPLY)), get("/")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.contains("text/html"));

        let html = body_text(resp).await;
        assert!(html.contains("<form method=\"post\" action=\"/plans\">"));
        for model in ModelId::ALL {
            assert!(html.contains(&format!("<option value=\"{model}\"")));
        }
        assert!(html.contains("<option value=\"gemini-2.5-flash\" selected>"));
        assert!(html.contains("Launch a podcast"));

        db.cleanup().await;
    }

    #[tokio::test]
    async fn index_escapes_user_text() {
        let db = create_test_db().await;
        seed(&db, "<script>alert(1)</script>").await;

        let resp = send(state(&db, Reply::Text(PODCAST_REPLY)), get("/")).await;
        let html = body_text(resp).await;
        assert!(!html.contains("<script>alert(1)</script>"));
        assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));

        db.cleanup().await;
    }

    #[tokio::test]
    async fn index_search_filters_plans() {
        let db = create_test_db().await;
        seed(&db, "Launch a podcast").await;
        seed(&db, "Plant a garden").await;

        let resp = send(state(&db, Reply::Text(PODCAST_REPLY)), get("/?q=GARDEN")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let html = body_text(resp).await;
        assert!(html.contains("Plant a garden"));
        assert!(!html.contains("Launch a podcast"));

        db.cleanup().await;
    }

    #[tokio::test]
    async fn form_submit_redirects_to_plan_page() {
        let db = create_test_db().await;
        let st = state(&db, Reply::Text(PODCAST_REPLY));

        let resp = send(
            st.clone(),
            post_form("/plans", "goal=Launch+a+podcast&model=gemini-2.5-pro"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let target = location(&resp);
        assert!(target.starts_with("/plans/"));

        let resp = send(st, get(&target)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let html = body_text(resp).await;
        assert!(html.contains("<h1>Launch a podcast</h1>"));
        assert!(html.contains("gemini-2.5-pro"));
        assert!(html.contains("Critical path: <strong>5 days</strong>"));
        let t1 = html.find("Choose topic").unwrap();
        let t2 = html.find("Record pilot").unwrap();
        assert!(t1 < t2);

        db.cleanup().await;
    }

    #[tokio::test]
    async fn form_submit_blank_goal_is_bad_request() {
        let db = create_test_db().await;

        let resp = send(
            state(&db, Reply::Text(PODCAST_REPLY)),
            post_form("/plans", "goal=+++&model="),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let html = body_text(resp).await;
        assert!(html.contains("goal cannot be empty"));
        assert_eq!(count_plans(&db.pool).await.unwrap(), 0);

        db.cleanup().await;
    }

    #[tokio::test]
    async fn form_delete_redirects_home() {
        let db = create_test_db().await;
        let id = seed(&db, "Launch a podcast").await;
        let st = state(&db, Reply::Text(PODCAST_REPLY));

        let path = format!("/plans/{id}/delete");
        let resp = send(
            st.clone(),
            Request::builder()
                .method("POST")
                .uri(path.as_str())
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/");

        let resp = send(st, get(&format!("/plans/{id}"))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        db.cleanup().await;
    }

    // -----------------------------------------------------------------------
    // JSON API
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn api_create_returns_plan_with_timeline() {
        let db = create_test_db().await;

        let resp = send(
            state(&db, Reply::Text(PODCAST_REPLY)),
            post_json("/api/plans", serde_json::json!({ "goal": "Launch a podcast" })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body_json(resp).await;
        assert_eq!(json["goal"], "Launch a podcast");
        assert_eq!(json["model_used"], "gemini-2.5-flash");
        assert_eq!(json["tasks"].as_array().unwrap().len(), 2);
        assert_eq!(json["timeline"]["critical_path_days"], 5.0);
        assert_eq!(json["timeline"]["tasks"][1]["start_day"], 2.0);
        assert_eq!(count_plans(&db.pool).await.unwrap(), 1);

        db.cleanup().await;
    }

    #[tokio::test]
    async fn api_create_unknown_model_is_bad_request() {
        let db = create_test_db().await;

        let resp = send(
            state(&db, Reply::Text(PODCAST_REPLY)),
            post_json(
                "/api/plans",
                serde_json::json!({ "goal": "Launch a podcast", "model": "gpt-4" }),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert!(json["error"].as_str().unwrap().contains("unsupported model"));

        db.cleanup().await;
    }

    #[tokio::test]
    async fn api_create_missing_goal_is_bad_request() {
        let db = create_test_db().await;

        let resp = send(
            state(&db, Reply::Text(PODCAST_REPLY)),
            post_json("/api/plans", serde_json::json!({ "model": "gemini-2.5-pro" })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp).await.get("error").is_some());

        db.cleanup().await;
    }

    #[tokio::test]
    async fn api_create_malformed_output_is_unprocessable() {
        let db = create_test_db().await;

        let resp = send(
            state(&db, Reply::Text(r#"[{"id":"t1","depends_on":["t1"]}]"#)),
            post_json("/api/plans", serde_json::json!({ "goal": "Launch a podcast" })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = body_json(resp).await;
        assert!(json["error"].as_str().unwrap().contains("unusable plan"));
        assert_eq!(json["raw_output"], r#"[{"id":"t1","depends_on":["t1"]}]"#);
        assert_eq!(count_plans(&db.pool).await.unwrap(), 0);

        db.cleanup().await;
    }

    #[tokio::test]
    async fn form_submit_malformed_output_shows_raw_text() {
        let db = create_test_db().await;

        let resp = send(
            state(&db, Reply::Text("Sorry, <b>no</b> plan today")),
            post_form("/plans", "goal=Launch+a+podcast"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let html = body_text(resp).await;
        assert!(html.contains("Raw model output"));
        assert!(html.contains("Sorry, &lt;b&gt;no&lt;/b&gt; plan today"));
        assert_eq!(count_plans(&db.pool).await.unwrap(), 0);

        db.cleanup().await;
    }

    #[tokio::test]
    async fn api_create_nul_goal_is_bad_request() {
        let db = create_test_db().await;

        let resp = send(
            state(&db, Reply::Text(PODCAST_REPLY)),
            post_json("/api/plans", serde_json::json!({ "goal": "Launch a\u{0}podcast" })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp).await.get("raw_output").is_none());
        assert_eq!(count_plans(&db.pool).await.unwrap(), 0);

        db.cleanup().await;
    }

    #[tokio::test]
    async fn api_create_nul_in_model_output_is_unprocessable() {
        let db = create_test_db().await;

        let resp = send(
            state(
                &db,
                Reply::Text(r#"[{"id":"t1","title":"Choose\u0000topic","duration_days":2}]"#),
            ),
            post_json("/api/plans", serde_json::json!({ "goal": "Launch a podcast" })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(count_plans(&db.pool).await.unwrap(), 0);

        db.cleanup().await;
    }

    #[tokio::test]
    async fn api_create_upstream_failures_map_to_gateway_statuses() {
        let db = create_test_db().await;
        let body = serde_json::json!({ "goal": "Launch a podcast" });

        let resp = send(
            state(&db, Reply::Rejected(401)),
            post_json("/api/plans", body.clone()),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let resp = send(state(&db, Reply::Unavailable), post_json("/api/plans", body)).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        assert_eq!(count_plans(&db.pool).await.unwrap(), 0);
        db.cleanup().await;
    }

    #[tokio::test]
    async fn api_list_honors_limit() {
        let db = create_test_db().await;
        seed(&db, "First goal").await;
        seed(&db, "Second goal").await;

        let resp = send(state(&db, Reply::Text(PODCAST_REPLY)), get("/api/plans?limit=1")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        let arr = json.as_array().unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["goal"], "Second goal");
        assert_eq!(arr[0]["task_count"], 1);

        db.cleanup().await;
    }

    #[tokio::test]
    async fn api_list_empty() {
        let db = create_test_db().await;

        let resp = send(state(&db, Reply::Text(PODCAST_REPLY)), get("/api/plans")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, serde_json::json!([]));

        db.cleanup().await;
    }

    #[tokio::test]
    async fn api_search_requires_keyword() {
        let db = create_test_db().await;
        seed(&db, "Launch a podcast").await;
        let st = state(&db, Reply::Text(PODCAST_REPLY));

        let resp = send(st.clone(), get("/api/plans/search?q=%20")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = send(st, get("/api/plans/search?q=podcast")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await.as_array().unwrap().len(), 1);

        db.cleanup().await;
    }

    #[tokio::test]
    async fn api_get_and_delete() {
        let db = create_test_db().await;
        let id = seed(&db, "Launch a podcast").await;
        let st = state(&db, Reply::Text(PODCAST_REPLY));

        let resp = send(st.clone(), get(&format!("/api/plans/{id}"))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["id"], id.to_string());
        assert_eq!(json["model_used"], "gemini-2.5-pro");

        let delete = || {
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/plans/{id}"))
                .body(Body::empty())
                .unwrap()
        };
        let resp = send(st.clone(), delete()).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let resp = send(st.clone(), delete()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = send(st, get(&format!("/api/plans/{id}"))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        db.cleanup().await;
    }

    #[tokio::test]
    async fn closed_store_is_service_unavailable() {
        let db = create_test_db().await;
        let st = state(&db, Reply::Text(PODCAST_REPLY));
        db.pool.close().await;

        let resp = send(st, get("/api/plans")).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        db.cleanup().await;
    }
}
