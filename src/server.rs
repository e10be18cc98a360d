//! HTTP preview and settings surface: axum router and request handlers.
//!
//! The engine tasks (render loop, auto-start driver, shake loop) run on
//! their own tokio tasks; handlers only read shared state and send commands
//! over channels. Any UI can be built on top of this without per-theme code:
//! settings come back as a generic schema plus current values.
//!
//! ## Rust concepts
//! - `async fn` and `.await` for non-blocking I/O
//! - axum extractors: `State`, `Path`, `Json`
//! - `Arc` for sharing state across async tasks
//! - `tokio::sync::watch` receivers cloned per WebSocket client
//! - `tower-http` middleware for CORS and request tracing

use crate::auto_start::{AutoStartCommand, AutoStartState, DEFAULT_ENABLED};
use crate::brightness::{apply_to_frame, preview_alphas};
use crate::media_session::{MediaSessionObserver, TransportCommand, send_transport_off_runtime};
use crate::patterns::StateFrame;
use crate::render::{DisplayStatus, PublishedFrame, RenderCommand};
use crate::shake::{AccelSample, ShakeBehavior, ShakeSettings, Sensitivity, SkipDirection};
use crate::store::StateStore;
use crate::theme::settings::SettingValues;
use crate::theme::{ThemeRepository, ThemeSummary};
use crate::whitelist::{Whitelist, WhitelistEntry, is_blacklisted};
use axum::Router;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post, put};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

type ApiError = (StatusCode, String);

// ── App State ────────────────────────────────────────────────────────

/// Shared application state, passed to every handler via axum's `State` extractor.
///
/// Rust concept: CLONE for Arc
/// axum clones the state for each request handler, so everything inside is
/// an `Arc`, a channel sender, or a `watch` receiver. All of them are cheap
/// to clone and point at the same underlying data.
#[derive(Clone)]
pub struct AppState {
    pub themes: Arc<ThemeRepository>,
    /// Commands to the render loop
    pub render_tx: mpsc::Sender<RenderCommand>,
    /// Render loop status (render loop writes, handlers read)
    pub status: Arc<Mutex<DisplayStatus>>,
    /// Latest rendered frame
    pub frames: watch::Receiver<PublishedFrame>,
    pub whitelist: Arc<Mutex<Whitelist>>,
    /// Commands to the auto-start driver
    pub auto_start_tx: mpsc::Sender<AutoStartCommand>,
    pub auto_start_state: watch::Receiver<AutoStartState>,
    pub observer: Arc<Mutex<MediaSessionObserver>>,
    pub store: Arc<StateStore>,
    /// Shake settings, followed live by the shake loop
    pub shake_settings: Arc<watch::Sender<ShakeSettings>>,
    /// Accelerometer samples for the shake loop
    pub shake_tx: mpsc::Sender<AccelSample>,
}

// ── OpenAPI Documentation ────────────────────────────────────────────

#[derive(OpenApi)]
#[openapi(
    paths(
        get_status,
        get_themes,
        get_theme_settings,
        put_theme_settings,
        post_select_theme,
        get_theme_preview,
        get_frame,
        get_whitelist,
        put_whitelist_entry,
        post_auto_start,
        post_transport,
        post_display_state,
        get_shake,
        put_shake,
        post_accelerometer,
    ),
    components(schemas(
        StatusResponse,
        NowPlayingView,
        DisplayStatus,
        AutoStartState,
        ThemeSummary,
        ThemeSettingsResponse,
        SettingsPatch,
        FrameResponse,
        WhitelistEntry,
        WhitelistRequest,
        AutoStartRequest,
        TransportRequest,
        TransportCommand,
        DisplayStateRequest,
        StateFrame,
        ShakeSettings,
        ShakeBehavior,
        Sensitivity,
        SkipDirection,
        AccelSample,
    )),
    tags(
        (name = "display", description = "Rendered frames and display state"),
        (name = "themes", description = "Theme selection and settings"),
        (name = "media", description = "Media sessions, whitelist and auto-start"),
        (name = "gestures", description = "Shake gesture settings and sensor input"),
        (name = "system", description = "System status endpoints"),
    ),
    info(
        title = "Glyph Matrix API",
        version = env!("CARGO_PKG_VERSION"),
        description = "Preview and settings API for a 25x25 Glyph Matrix music visualizer"
    )
)]
pub struct ApiDoc;

// ── Request/Response types ───────────────────────────────────────────

/// The followed media session, without album art bytes.
#[derive(Serialize, utoipa::ToSchema)]
pub struct NowPlayingView {
    pub package_name: Option<String>,
    pub is_playing: bool,
    pub has_active_media: bool,
    #[schema(example = "Unknown")]
    pub title: String,
    pub artist: String,
    pub album: String,
    pub has_album_art: bool,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct StatusResponse {
    pub display: DisplayStatus,
    pub now_playing: NowPlayingView,
    pub auto_start: AutoStartState,
    pub auto_start_enabled: bool,
}

/// Setting id to value, e.g. `{"rotation": true, "rotation_speed_ms": 150}`
#[derive(Serialize, Deserialize, utoipa::ToSchema)]
#[serde(transparent)]
#[schema(value_type = Object)]
pub struct SettingsPatch(pub SettingValues);

#[derive(Serialize, utoipa::ToSchema)]
pub struct ThemeSettingsResponse {
    /// Ordered list of `{id, label, kind, default, constraints}` declarations
    #[schema(value_type = Object)]
    pub schema: crate::theme::settings::SettingsSchema,
    /// Current value of every declared setting
    #[schema(value_type = Object)]
    pub values: SettingValues,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct FrameResponse {
    pub theme_id: Option<String>,
    pub index: usize,
    pub state_frame: Option<StateFrame>,
    /// 625 row-major intensities (0-255), brightness applied
    pub pixels: Vec<u8>,
    /// Preview alpha per pixel (0.0-1.0)
    pub alphas: Vec<f32>,
}

impl FrameResponse {
    fn new(theme_id: Option<String>, index: usize, state_frame: Option<StateFrame>, pixels: &crate::geometry::PixelFrame) -> Self {
        Self {
            theme_id,
            index,
            state_frame,
            pixels: pixels.as_slice().to_vec(),
            alphas: preview_alphas(pixels),
        }
    }
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct WhitelistRequest {
    #[schema(example = true)]
    whitelisted: bool,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct AutoStartRequest {
    /// New value; omit to toggle
    #[serde(default)]
    #[schema(example = false)]
    enabled: Option<bool>,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct TransportRequest {
    command: TransportCommand,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct DisplayStateRequest {
    /// State frame to hold; omit or null to resume the theme cycle
    #[serde(default)]
    state: Option<StateFrame>,
}

// ── Router ───────────────────────────────────────────────────────────

/// Build the axum router with all API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(
            SwaggerUi::new("/docs")
                .url("/api-docs/openapi.json", ApiDoc::openapi())
                .config(utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"]).validator_url("none")),
        )
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/themes", get(get_themes))
        .route(
            "/api/v1/themes/{id}/settings",
            get(get_theme_settings).put(put_theme_settings),
        )
        .route("/api/v1/themes/{id}/select", post(post_select_theme))
        .route("/api/v1/themes/{id}/preview", get(get_theme_preview))
        .route("/api/v1/display/frame", get(get_frame))
        .route("/api/v1/display/stream", get(ws_frame_stream))
        .route("/api/v1/display/state", post(post_display_state))
        .route("/api/v1/whitelist", get(get_whitelist))
        .route("/api/v1/whitelist/{package}", put(put_whitelist_entry))
        .route("/api/v1/auto-start", post(post_auto_start))
        .route("/api/v1/transport", post(post_transport))
        .route("/api/v1/shake", get(get_shake).put(put_shake))
        .route("/api/v1/sensors/accelerometer", post(post_accelerometer))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn not_found(what: &str, id: &str) -> ApiError {
    (StatusCode::NOT_FOUND, format!("Unknown {what}: {id}"))
}

fn channel_gone(task: &str) -> ApiError {
    (StatusCode::SERVICE_UNAVAILABLE, format!("{task} is not running"))
}

// ── Handlers: status and themes ──────────────────────────────────────

/// GET /api/v1/status: render status, followed session and auto-start state
#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "system",
    responses(
        (status = 200, description = "Current engine status", body = StatusResponse)
    )
)]
async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let display = state
        .status
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone();
    let snapshot = state
        .observer
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .now_playing()
        .get();

    Json(StatusResponse {
        display,
        now_playing: NowPlayingView {
            package_name: snapshot.package_name.clone(),
            is_playing: snapshot.is_playing,
            has_active_media: snapshot.has_active_media,
            title: snapshot.title.clone(),
            artist: snapshot.artist.clone(),
            album: snapshot.album.clone(),
            has_album_art: snapshot.album_art.is_some(),
        },
        auto_start: state.auto_start_state.borrow().clone(),
        auto_start_enabled: state.store.auto_start_enabled().unwrap_or(DEFAULT_ENABLED),
    })
}

/// GET /api/v1/themes: installed themes in display order
#[utoipa::path(
    get,
    path = "/api/v1/themes",
    tag = "themes",
    responses(
        (status = 200, description = "Installed themes", body = Vec<ThemeSummary>)
    )
)]
async fn get_themes(State(state): State<AppState>) -> Json<Vec<ThemeSummary>> {
    Json(state.themes.summaries())
}

/// GET /api/v1/themes/{id}/settings: settings schema and current values
#[utoipa::path(
    get,
    path = "/api/v1/themes/{id}/settings",
    tag = "themes",
    params(("id" = String, Path, description = "Theme id", example = "album_art")),
    responses(
        (status = 200, description = "Schema and values", body = ThemeSettingsResponse),
        (status = 404, description = "Unknown theme, or theme has no settings")
    )
)]
async fn get_theme_settings(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ThemeSettingsResponse>, ApiError> {
    let theme = state.themes.get(&id).ok_or_else(|| not_found("theme", &id))?;
    let provider = theme
        .settings_provider()
        .ok_or_else(|| not_found("settings for theme", &id))?;

    Ok(Json(ThemeSettingsResponse {
        schema: provider.schema().clone(),
        values: provider.current().values().clone(),
    }))
}

/// PUT /api/v1/themes/{id}/settings: apply a partial settings update
///
/// Keys the schema doesn't declare are ignored; values are clamped or
/// replaced by defaults the same way persisted settings are.
#[utoipa::path(
    put,
    path = "/api/v1/themes/{id}/settings",
    tag = "themes",
    params(("id" = String, Path, description = "Theme id", example = "album_art")),
    request_body = SettingsPatch,
    responses(
        (status = 200, description = "Resolved values after the update", body = SettingsPatch),
        (status = 404, description = "Unknown theme, or theme has no settings")
    )
)]
async fn put_theme_settings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(SettingsPatch(values)): Json<SettingsPatch>,
) -> Result<Json<SettingsPatch>, ApiError> {
    if state.themes.get(&id).is_none() {
        return Err(not_found("theme", &id));
    }
    let resolved = state
        .themes
        .apply_settings(&id, &values)
        .ok_or_else(|| not_found("settings for theme", &id))?;
    Ok(Json(SettingsPatch(resolved.values().clone())))
}

/// POST /api/v1/themes/{id}/select: render this theme from the next tick
#[utoipa::path(
    post,
    path = "/api/v1/themes/{id}/select",
    tag = "themes",
    params(("id" = String, Path, description = "Theme id", example = "pulse")),
    responses(
        (status = 200, description = "Theme selected"),
        (status = 404, description = "Unknown theme")
    )
)]
async fn post_select_theme(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    if state.themes.select(&id) {
        Ok(StatusCode::OK)
    } else {
        Err(not_found("theme", &id))
    }
}

/// GET /api/v1/themes/{id}/preview: the theme's representative still frame
#[utoipa::path(
    get,
    path = "/api/v1/themes/{id}/preview",
    tag = "themes",
    params(("id" = String, Path, description = "Theme id", example = "ripple")),
    responses(
        (status = 200, description = "Preview frame", body = FrameResponse),
        (status = 404, description = "Unknown theme"),
        (status = 500, description = "Theme failed to render its preview frame")
    )
)]
async fn get_theme_preview(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FrameResponse>, ApiError> {
    let theme = state.themes.get(&id).ok_or_else(|| not_found("theme", &id))?;
    let index = theme.preview_frame_index();
    let frame = theme
        .generate_frame(index as i64)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let frame = apply_to_frame(&frame, theme.brightness());
    Ok(Json(FrameResponse::new(Some(id), index, None, &frame)))
}

// ── Handlers: display ────────────────────────────────────────────────

/// GET /api/v1/display/frame: the frame most recently rendered
#[utoipa::path(
    get,
    path = "/api/v1/display/frame",
    tag = "display",
    responses(
        (status = 200, description = "Latest frame with preview alphas", body = FrameResponse)
    )
)]
async fn get_frame(State(state): State<AppState>) -> Json<FrameResponse> {
    let frame = state.frames.borrow().clone();
    Json(FrameResponse::new(
        frame.theme_id,
        frame.index,
        frame.state_frame,
        &frame.pixels,
    ))
}

/// POST /api/v1/display/state: hold a state frame or resume cycling
#[utoipa::path(
    post,
    path = "/api/v1/display/state",
    tag = "display",
    request_body = DisplayStateRequest,
    responses(
        (status = 200, description = "Command queued"),
        (status = 503, description = "Render loop not running")
    )
)]
async fn post_display_state(
    State(state): State<AppState>,
    Json(req): Json<DisplayStateRequest>,
) -> Result<StatusCode, ApiError> {
    let command = match req.state {
        Some(frame) => RenderCommand::ShowState(frame),
        None => RenderCommand::Resume,
    };
    state
        .render_tx
        .send(command)
        .await
        .map_err(|_| channel_gone("Render loop"))?;
    Ok(StatusCode::OK)
}

// ── WebSocket streaming ─────────────────────────────────────────────

/// GET /api/v1/display/stream: WebSocket endpoint streaming rendered frames.
///
/// Every new frame is sent as one binary message of 625 bytes (row-major
/// intensities, brightness applied). Incoming messages other than Close are
/// ignored.
async fn ws_frame_stream(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream_socket(socket, state.frames))
}

async fn handle_stream_socket(mut socket: WebSocket, mut frames: watch::Receiver<PublishedFrame>) {
    tracing::info!("Frame stream client connected");
    let mut sent: u64 = 0;

    loop {
        tokio::select! {
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
                let pixels = Bytes::copy_from_slice(frames.borrow_and_update().pixels.as_slice());
                if socket.send(Message::Binary(pixels)).await.is_err() {
                    break;
                }
                sent += 1;
            }
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::warn!("WebSocket receive error: {}", e);
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::info!("Frame stream client disconnected ({} frames sent)", sent);
}

// ── Handlers: media ──────────────────────────────────────────────────

/// GET /api/v1/whitelist: known media apps and whether they auto-start
#[utoipa::path(
    get,
    path = "/api/v1/whitelist",
    tag = "media",
    responses(
        (status = 200, description = "Whitelist entries", body = Vec<WhitelistEntry>)
    )
)]
async fn get_whitelist(State(state): State<AppState>) -> Json<Vec<WhitelistEntry>> {
    let whitelist = state.whitelist.lock().unwrap_or_else(|e| e.into_inner());
    Json(whitelist.entries().to_vec())
}

/// PUT /api/v1/whitelist/{package}: allow or disallow an app to auto-start
#[utoipa::path(
    put,
    path = "/api/v1/whitelist/{package}",
    tag = "media",
    params(("package" = String, Path, description = "Package name", example = "com.spotify.music")),
    request_body = WhitelistRequest,
    responses(
        (status = 200, description = "Whitelist updated", body = Vec<WhitelistEntry>),
        (status = 400, description = "Package can never be whitelisted")
    )
)]
async fn put_whitelist_entry(
    State(state): State<AppState>,
    Path(package): Path<String>,
    Json(req): Json<WhitelistRequest>,
) -> Result<Json<Vec<WhitelistEntry>>, ApiError> {
    if req.whitelisted && is_blacklisted(&package) {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("{package} is not a media player"),
        ));
    }

    let (changed, packages, entries) = {
        let mut whitelist = state.whitelist.lock().unwrap_or_else(|e| e.into_inner());
        let changed = whitelist.set_whitelisted(&package, req.whitelisted);
        (changed, whitelist.packages(), whitelist.entries().to_vec())
    };

    if changed {
        tracing::info!(
            "{} {} the whitelist",
            package,
            if req.whitelisted { "added to" } else { "removed from" }
        );
        state.store.save_whitelist(packages);
        state
            .auto_start_tx
            .send(AutoStartCommand::WhitelistChanged)
            .await
            .map_err(|_| channel_gone("Auto-start"))?;
    }
    Ok(Json(entries))
}

/// POST /api/v1/auto-start: enable, disable or toggle auto-start
#[utoipa::path(
    post,
    path = "/api/v1/auto-start",
    tag = "media",
    request_body = AutoStartRequest,
    responses(
        (status = 200, description = "Command queued"),
        (status = 503, description = "Auto-start driver not running")
    )
)]
async fn post_auto_start(
    State(state): State<AppState>,
    Json(req): Json<AutoStartRequest>,
) -> Result<StatusCode, ApiError> {
    let command = match req.enabled {
        Some(enabled) => AutoStartCommand::SetEnabled(enabled),
        None => AutoStartCommand::Toggle,
    };
    state
        .auto_start_tx
        .send(command)
        .await
        .map_err(|_| channel_gone("Auto-start"))?;
    Ok(StatusCode::OK)
}

/// POST /api/v1/transport: play/pause or skip on the followed session
#[utoipa::path(
    post,
    path = "/api/v1/transport",
    tag = "media",
    request_body = TransportRequest,
    responses(
        (status = 200, description = "Command delivered"),
        (status = 409, description = "No session can take the command")
    )
)]
async fn post_transport(
    State(state): State<AppState>,
    Json(req): Json<TransportRequest>,
) -> Result<StatusCode, ApiError> {
    send_transport_off_runtime(&state.observer, req.command)
        .await
        .map_err(|e| (StatusCode::CONFLICT, e.to_string()))?;
    Ok(StatusCode::OK)
}

// ── Handlers: gestures ───────────────────────────────────────────────

/// GET /api/v1/shake: current shake gesture settings
#[utoipa::path(
    get,
    path = "/api/v1/shake",
    tag = "gestures",
    responses(
        (status = 200, description = "Shake settings", body = ShakeSettings)
    )
)]
async fn get_shake(State(state): State<AppState>) -> Json<ShakeSettings> {
    Json(state.shake_settings.borrow().clone())
}

/// PUT /api/v1/shake: replace shake gesture settings
#[utoipa::path(
    put,
    path = "/api/v1/shake",
    tag = "gestures",
    request_body = ShakeSettings,
    responses(
        (status = 200, description = "Settings applied", body = ShakeSettings)
    )
)]
async fn put_shake(State(state): State<AppState>, Json(settings): Json<ShakeSettings>) -> Json<ShakeSettings> {
    state.store.save_shake(settings.clone());
    state.shake_settings.send_replace(settings.clone());
    Json(settings)
}

/// POST /api/v1/sensors/accelerometer: feed raw accelerometer samples
#[utoipa::path(
    post,
    path = "/api/v1/sensors/accelerometer",
    tag = "gestures",
    request_body = Vec<AccelSample>,
    responses(
        (status = 202, description = "Samples queued"),
        (status = 503, description = "Shake detection not running")
    )
)]
async fn post_accelerometer(
    State(state): State<AppState>,
    Json(samples): Json<Vec<AccelSample>>,
) -> Result<StatusCode, ApiError> {
    for sample in samples {
        state
            .shake_tx
            .send(sample)
            .await
            .map_err(|_| channel_gone("Shake detection"))?;
    }
    Ok(StatusCode::ACCEPTED)
}
