//! Dossier Server
//!
//! Axum boundary over the orchestration core: persona CRUD, the three
//! orchestrator operations, latest-report lookup, and an SSE feed of
//! run events. Plain structured requests and responses only - all
//! business logic lives in `dossier_core`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
    routing::{get, post},
    Router,
};
use clap::Parser;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use utoipa::{OpenApi, ToSchema};

use dossier_core::agents::ResearchRequest;
use dossier_core::error::CoreError;
use dossier_core::memory::{MemoryStore, SqliteMemoryStore};
use dossier_core::orchestrator::{
    ChatOrchestrator, CompareConfig, CompareOrchestrator, ResearchConfig, ResearchEvent,
    ResearchOrchestrator,
};
use dossier_core::providers::AlphaVantageFinance;
use dossier_core::report::SectionKind;
use dossier_core::state::{
    CompareSessionStore, DossierDb, Persona, PersonaDraft, PersonaManager, PersonaUpdate,
    ReportRepository, SqliteReportRepository,
};

/// Command line arguments
#[derive(Parser)]
#[command(name = "dossier", about = "Persona-aware account-plan research server")]
struct Args {
    /// Port to bind
    #[arg(long, default_value_t = 4000)]
    port: u16,
    /// SQLite database path
    #[arg(long, default_value = ".dossier/dossier.db")]
    db: String,
}

/// Application state
struct AppState {
    personas: PersonaManager,
    reports: Arc<dyn ReportRepository>,
    research: Arc<ResearchOrchestrator>,
    chat: ChatOrchestrator,
    compare: CompareOrchestrator,
    sessions: CompareSessionStore,
    event_tx: broadcast::Sender<ResearchEvent>,
}

type SharedState = Arc<AppState>;

// === API Types ===

#[derive(Serialize, ToSchema)]
struct ApiError {
    error: String,
}

#[derive(Deserialize, ToSchema)]
struct CreatePersonaRequest {
    user_id: String,
    name: String,
    role: Option<String>,
    company: Option<String>,
    region: Option<String>,
    goal: Option<String>,
    notes: Option<String>,
}

#[derive(Deserialize, ToSchema)]
struct UpdatePersonaRequest {
    name: Option<String>,
    role: Option<String>,
    company: Option<String>,
    region: Option<String>,
    goal: Option<String>,
    notes: Option<String>,
}

#[derive(Deserialize)]
struct UserScope {
    user_id: String,
}

#[derive(Deserialize, ToSchema)]
struct ResearchApiRequest {
    persona_id: String,
    company: String,
    website: Option<String>,
    region_hint: Option<String>,
    #[serde(default = "default_true")]
    save: bool,
}

#[derive(Deserialize, ToSchema)]
struct RefreshApiRequest {
    persona_id: String,
    company: String,
    /// Section labels: fundamentals, leadership, news, tech_services,
    /// strategy, visualization
    sections: Vec<String>,
}

#[derive(Deserialize, ToSchema)]
struct ChatApiRequest {
    persona_id: String,
    message: String,
}

#[derive(Serialize, ToSchema)]
struct ChatApiResponse {
    reply: String,
}

#[derive(Deserialize, ToSchema)]
struct CompareApiRequest {
    persona_id: String,
    company_a: String,
    company_b: String,
    #[serde(default = "default_true")]
    use_cached: bool,
}

#[derive(Deserialize)]
struct LatestReportQuery {
    persona_id: String,
    company: String,
}

#[derive(Deserialize)]
struct PersonaScope {
    persona_id: String,
}

fn default_true() -> bool {
    true
}

#[derive(OpenApi)]
#[openapi(
    paths(run_research, run_refresh, run_chat, run_compare),
    components(schemas(
        ApiError,
        CreatePersonaRequest,
        UpdatePersonaRequest,
        ResearchApiRequest,
        RefreshApiRequest,
        ChatApiRequest,
        ChatApiResponse,
        CompareApiRequest,
    ))
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let db = DossierDb::open_at(&args.db)?;
    let personas = PersonaManager::new(&db);
    let reports: Arc<dyn ReportRepository> = Arc::new(SqliteReportRepository::new(&db));
    let memory: Arc<dyn MemoryStore> = Arc::new(SqliteMemoryStore::new(&db));
    let finance = Arc::new(AlphaVantageFinance::new());

    let config = research_config_from_env();
    let agents = config.build_agents(finance);

    let (event_tx, _) = broadcast::channel(256);
    let (run_tx, mut run_rx) = mpsc::channel::<ResearchEvent>(64);
    let feed = event_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = run_rx.recv().await {
            let _ = feed.send(event);
        }
    });

    let research = Arc::new(
        ResearchOrchestrator::new(agents, Arc::clone(&reports), Arc::clone(&memory), config)
            .with_event_channel(run_tx),
    );
    let chat = ChatOrchestrator::new(
        Arc::clone(&research),
        Arc::clone(&reports),
        Arc::clone(&memory),
    );
    let compare = CompareOrchestrator::new(
        Arc::clone(&research),
        Arc::clone(&reports),
        CompareSessionStore::new(&db),
        CompareConfig::default(),
    );

    let state: SharedState = Arc::new(AppState {
        personas,
        reports,
        research,
        chat,
        compare,
        sessions: CompareSessionStore::new(&db),
        event_tx,
    });

    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/openapi.json", get(openapi))
        .route("/api/personas", post(create_persona).get(list_personas))
        .route(
            "/api/personas/:id",
            get(get_persona).post(update_persona).delete(delete_persona),
        )
        .route("/api/research", post(run_research))
        .route("/api/research/refresh", post(run_refresh))
        .route("/api/chat", post(run_chat))
        .route("/api/compare", post(run_compare).get(list_compare_sessions))
        .route("/api/reports/latest", get(latest_report))
        .route("/api/events", get(events))
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    tracing::info!("dossier server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn research_config_from_env() -> ResearchConfig {
    let mut config = ResearchConfig::default();
    if let Ok(model) = std::env::var("DOSSIER_MODEL") {
        config.global_model = Some(model);
    }
    if let Ok(secs) = std::env::var("DOSSIER_AGENT_DEADLINE_SECS") {
        if let Ok(secs) = secs.parse() {
            config.agent_deadline_secs = secs;
        }
    }
    config
}

// === Helpers ===

fn error_json(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            error: message.into(),
        }),
    )
}

fn core_error(err: CoreError) -> (StatusCode, Json<ApiError>) {
    let status = match &err {
        CoreError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        CoreError::VersionConflict { .. } => StatusCode::CONFLICT,
        CoreError::Cancelled => StatusCode::CONFLICT,
        CoreError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_json(status, err.to_string())
}

fn load_persona(
    state: &AppState,
    persona_id: &str,
) -> Result<Persona, (StatusCode, Json<ApiError>)> {
    match state.personas.get(persona_id) {
        Ok(Some(persona)) => Ok(persona),
        Ok(None) => Err(error_json(
            StatusCode::NOT_FOUND,
            format!("persona '{}' not found", persona_id),
        )),
        Err(e) => Err(error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

fn parse_sections(raw: &[String]) -> Result<BTreeSet<SectionKind>, String> {
    let mut out = BTreeSet::new();
    for label in raw {
        let kind = SectionKind::ALL
            .iter()
            .find(|k| k.label() == label.as_str())
            .copied()
            .ok_or_else(|| format!("unknown section '{}'", label))?;
        out.insert(kind);
    }
    Ok(out)
}

// === Handlers ===

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn create_persona(
    State(state): State<SharedState>,
    Json(body): Json<CreatePersonaRequest>,
) -> impl IntoResponse {
    let draft = PersonaDraft {
        name: body.name,
        role: body.role,
        company: body.company,
        region: body.region,
        goal: body.goal,
        notes: body.notes,
    };
    match state.personas.create(&body.user_id, draft) {
        Ok(persona) => (StatusCode::CREATED, Json(persona)).into_response(),
        Err(e) => error_json(StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

async fn list_personas(
    State(state): State<SharedState>,
    Query(scope): Query<UserScope>,
) -> impl IntoResponse {
    match state.personas.list(&scope.user_id) {
        Ok(personas) => Json(personas).into_response(),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn get_persona(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match load_persona(&state, &id) {
        Ok(persona) => Json(persona).into_response(),
        Err(resp) => resp.into_response(),
    }
}

async fn update_persona(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(body): Json<UpdatePersonaRequest>,
) -> impl IntoResponse {
    let update = PersonaUpdate {
        name: body.name,
        role: body.role,
        company: body.company,
        region: body.region,
        goal: body.goal,
        notes: body.notes,
    };
    match state.personas.update(&id, update) {
        Ok(persona) => Json(persona).into_response(),
        Err(e) => error_json(StatusCode::NOT_FOUND, e.to_string()).into_response(),
    }
}

async fn delete_persona(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.personas.delete(&id) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_json(
            StatusCode::NOT_FOUND,
            format!("persona '{}' not found", id),
        )
        .into_response(),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn build_request(
    company: &str,
    website: Option<String>,
    region_hint: Option<String>,
) -> Result<ResearchRequest, (StatusCode, Json<ApiError>)> {
    let mut request = ResearchRequest::new(company).map_err(core_error)?;
    if let Some(website) = website {
        request = request.with_website(website);
    }
    if let Some(hint) = region_hint {
        request = request.with_region_hint(hint);
    }
    Ok(request)
}

/// Run full research for a persona and company.
#[utoipa::path(
    post,
    path = "/api/research",
    request_body = ResearchApiRequest,
    responses(
        (status = 200, description = "Merged report, possibly with failed sections"),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 404, description = "Unknown persona", body = ApiError),
    )
)]
async fn run_research(
    State(state): State<SharedState>,
    Json(body): Json<ResearchApiRequest>,
) -> impl IntoResponse {
    let persona = match load_persona(&state, &body.persona_id) {
        Ok(p) => p,
        Err(resp) => return resp.into_response(),
    };
    let request = match build_request(&body.company, body.website, body.region_hint) {
        Ok(r) => r,
        Err(resp) => return resp.into_response(),
    };
    match state
        .research
        .run_full_research(&persona, &request, body.save)
        .await
    {
        Ok(report) => Json(report).into_response(),
        Err(e) => core_error(e).into_response(),
    }
}

/// Re-run a subset of sections for an existing account.
#[utoipa::path(
    post,
    path = "/api/research/refresh",
    request_body = RefreshApiRequest,
    responses(
        (status = 200, description = "Merged report"),
        (status = 400, description = "Invalid request", body = ApiError),
    )
)]
async fn run_refresh(
    State(state): State<SharedState>,
    Json(body): Json<RefreshApiRequest>,
) -> impl IntoResponse {
    let persona = match load_persona(&state, &body.persona_id) {
        Ok(p) => p,
        Err(resp) => return resp.into_response(),
    };
    let request = match build_request(&body.company, None, None) {
        Ok(r) => r,
        Err(resp) => return resp.into_response(),
    };
    let sections = match parse_sections(&body.sections) {
        Ok(s) => s,
        Err(msg) => return error_json(StatusCode::BAD_REQUEST, msg).into_response(),
    };
    match state
        .research
        .run_targeted_update(&persona, &request, &sections, true)
        .await
    {
        Ok(report) => Json(report).into_response(),
        Err(e) => core_error(e).into_response(),
    }
}

/// One chat turn for a persona.
#[utoipa::path(
    post,
    path = "/api/chat",
    request_body = ChatApiRequest,
    responses(
        (status = 200, description = "Reply text", body = ChatApiResponse),
        (status = 400, description = "Invalid request", body = ApiError),
    )
)]
async fn run_chat(
    State(state): State<SharedState>,
    Json(body): Json<ChatApiRequest>,
) -> impl IntoResponse {
    let persona = match load_persona(&state, &body.persona_id) {
        Ok(p) => p,
        Err(resp) => return resp.into_response(),
    };
    match state.chat.chat(&persona, &body.message).await {
        Ok(reply) => Json(ChatApiResponse { reply }).into_response(),
        Err(e) => core_error(e).into_response(),
    }
}

/// Compare two companies for a persona.
#[utoipa::path(
    post,
    path = "/api/compare",
    request_body = CompareApiRequest,
    responses(
        (status = 200, description = "Persisted compare session"),
        (status = 400, description = "Invalid request", body = ApiError),
    )
)]
async fn run_compare(
    State(state): State<SharedState>,
    Json(body): Json<CompareApiRequest>,
) -> impl IntoResponse {
    let persona = match load_persona(&state, &body.persona_id) {
        Ok(p) => p,
        Err(resp) => return resp.into_response(),
    };
    match state
        .compare
        .compare_companies(&persona, &body.company_a, &body.company_b, body.use_cached)
        .await
    {
        Ok(session) => Json(session).into_response(),
        Err(e) => core_error(e).into_response(),
    }
}

async fn list_compare_sessions(
    State(state): State<SharedState>,
    Query(scope): Query<PersonaScope>,
) -> impl IntoResponse {
    let persona = match load_persona(&state, &scope.persona_id) {
        Ok(p) => p,
        Err(resp) => return resp.into_response(),
    };
    match state.sessions.list_for_persona(&persona.user_id, &persona.id) {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn latest_report(
    State(state): State<SharedState>,
    Query(query): Query<LatestReportQuery>,
) -> impl IntoResponse {
    let persona = match load_persona(&state, &query.persona_id) {
        Ok(p) => p,
        Err(resp) => return resp.into_response(),
    };
    let request = match build_request(&query.company, None, None) {
        Ok(r) => r,
        Err(resp) => return resp.into_response(),
    };
    match state
        .reports
        .get_latest(&persona.user_id, &persona.id, &request.company_key)
    {
        Ok(Some(report)) => Json(report).into_response(),
        Ok(None) => error_json(
            StatusCode::NOT_FOUND,
            format!("no report for '{}'", request.company_name),
        )
        .into_response(),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// SSE feed of research run events.
async fn events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(|event| async move {
        match event {
            Ok(event) => serde_json::to_string(&event)
                .ok()
                .map(|data| Ok(Event::default().data(data))),
            Err(_) => None,
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
