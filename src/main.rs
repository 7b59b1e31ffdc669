// Cercanías station dashboard server with embedded frontend
// Proxies the GTFS API and keeps the dashboard page state server-side

use actix_cors::Cors;
use actix_web::http::StatusCode;
use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod dashboard;
mod schedule_view;
mod timer;
mod transit_api_models;

use config::Settings;
use dashboard::{fetch_refresh, Dashboard, DashboardView};
use schedule_view::Direction;
use timer::{Debouncer, RefreshTimer};
use transit_api_models::{HttpTransitApi, Result, TransitApi, TransitError};

// Embed static files at compile time
const INDEX_HTML: &str = include_str!("../static/index.html");
const DASHBOARD_JS: &str = include_str!("../static/dashboard.js");

const MIN_SEARCH_CHARS: usize = 2;

#[derive(Clone)]
struct AppState {
    dashboard: Arc<Mutex<Dashboard>>,
    api: Arc<dyn TransitApi>,
    settings: Arc<Settings>,
    search: Arc<Debouncer>,
    auto_refresh: Arc<RefreshTimer>,
}

impl AppState {
    fn new(api: Arc<dyn TransitApi>, settings: Settings) -> Self {
        AppState {
            dashboard: Arc::new(Mutex::new(Dashboard::new(settings.today(), settings.page_size))),
            api,
            search: Arc::new(Debouncer::new(settings.search_debounce)),
            auto_refresh: Arc::new(RefreshTimer::new()),
            settings: Arc::new(settings),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Dashboard>> {
        self.dashboard.lock()
            .map_err(|e| TransitError::StateError(format!("Failed to lock dashboard: {}", e)))
    }

    fn view(&self) -> Result<DashboardView> {
        Ok(self.lock()?.view())
    }

    /// Runs a blocking API call off the async workers.
    async fn call_api<T, F>(&self, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn TransitApi, &Settings) -> Result<T> + Send + 'static,
    {
        let api = self.api.clone();
        let settings = self.settings.clone();
        tokio::task::spawn_blocking(move || call(api.as_ref(), &settings))
            .await
            .map_err(|e| TransitError::StateError(format!("API task panicked: {}", e)))?
    }
}

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
    timestamp: i64,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now().timestamp(),
        }
    }

    fn error(message: String) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now().timestamp(),
        }
    }
}

fn status_for(err: &TransitError) -> StatusCode {
    match err {
        TransitError::NotFound(_) => StatusCode::NOT_FOUND,
        TransitError::InvalidDate(_) => StatusCode::BAD_REQUEST,
        TransitError::Superseded => StatusCode::CONFLICT,
        TransitError::NetworkError(_) | TransitError::ParseError(_) => StatusCode::BAD_GATEWAY,
        TransitError::StateError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(result: Result<T>) -> HttpResponse {
    match result {
        Ok(data) => HttpResponse::Ok().json(ApiResponse::success(data)),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                error!(error = %e, "request failed");
            } else {
                warn!(error = %e, "request rejected");
            }
            HttpResponse::build(status).json(ApiResponse::<()>::error(e.to_string()))
        }
    }
}

/// Fetches data for the selected stop and date, then applies it.
/// The dashboard lock is never held while the API is being called.
async fn refresh_dashboard(state: &AppState) -> Result<()> {
    let request = state.lock()?.refresh_request();
    let Some(request) = request else {
        return Ok(());
    };

    let outcome = state
        .call_api(move |api, settings| Ok(fetch_refresh(api, request, settings, settings.now())))
        .await?;

    let mut dashboard = state.lock()?;
    if dashboard.apply_refresh(outcome, Utc::now()) {
        info!(
            rows = dashboard.schedule().total_len(),
            routes = dashboard.schedule().routes().len(),
            "dashboard refreshed"
        );
    }
    Ok(())
}

// ============================================================================
// Frontend Routes
// ============================================================================

async fn serve_index() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}

async fn serve_js() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("application/javascript; charset=utf-8")
        .body(DASHBOARD_JS)
}

// ============================================================================
// API Endpoints
// ============================================================================

async fn get_view(state: web::Data<AppState>) -> HttpResponse {
    respond(state.view())
}

async fn get_stop_names(state: web::Data<AppState>) -> HttpResponse {
    let names = state
        .call_api(|api, settings| api.stop_names(settings.stop_names_limit))
        .await;
    if let Ok(names) = &names {
        info!("{} stations loaded", names.len());
    }
    respond(names)
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

async fn search_stops(state: web::Data<AppState>, query: web::Query<SearchQuery>) -> HttpResponse {
    let term = query.into_inner().q.trim().to_string();
    if term.chars().count() < MIN_SEARCH_CHARS {
        return respond(Ok(Vec::<transit_api_models::Stop>::new()));
    }

    if !state.search.settle().await {
        return respond::<()>(Err(TransitError::Superseded));
    }

    respond(
        state
            .call_api(move |api, settings| api.search_stops(&term, settings.search_limit))
            .await,
    )
}

async fn select_stop(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let stop_id = path.into_inner();

    let stop = match state.call_api(move |api, _| api.stop(&stop_id)).await {
        Ok(stop) => stop,
        Err(e) => return respond::<()>(Err(e)),
    };

    if let Err(e) = state.lock().map(|mut dashboard| dashboard.select_stop(stop)) {
        return respond::<()>(Err(e));
    }

    respond(refresh_dashboard(&state).await.and_then(|_| state.view()))
}

async fn clear_stop(state: web::Data<AppState>) -> HttpResponse {
    respond(state.lock().map(|mut dashboard| {
        dashboard.clear_stop();
        dashboard.view()
    }))
}

async fn set_date(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let today = state.settings.today();
    let changed = state.lock().and_then(|mut dashboard| dashboard.set_date(&path, today));
    if let Err(e) = changed {
        return respond::<()>(Err(e));
    }

    respond(refresh_dashboard(&state).await.and_then(|_| state.view()))
}

async fn refresh(state: web::Data<AppState>) -> HttpResponse {
    respond(refresh_dashboard(&state).await.and_then(|_| state.view()))
}

#[derive(Deserialize)]
struct FilterRequest {
    #[serde(default)]
    route: Option<String>,
}

async fn set_filter(state: web::Data<AppState>, body: web::Json<FilterRequest>) -> HttpResponse {
    let route = body.into_inner().route;
    respond(state.lock().map(|mut dashboard| {
        dashboard.set_route_filter(route);
        dashboard.view()
    }))
}

async fn change_page(state: web::Data<AppState>, path: web::Path<Direction>) -> HttpResponse {
    let direction = path.into_inner();
    respond(state.lock().map(|mut dashboard| {
        dashboard.change_page(direction);
        dashboard.view()
    }))
}

async fn toggle_auto_refresh(state: web::Data<AppState>) -> HttpResponse {
    let enabled = if state.auto_refresh.stop() {
        info!("Auto-refresh disabled");
        false
    } else {
        let task_state = state.get_ref().clone();
        state.auto_refresh.start(state.settings.auto_refresh_period, move || {
            let state = task_state.clone();
            async move {
                if let Err(e) = refresh_dashboard(&state).await {
                    warn!(error = %e, "Auto-refresh failed");
                }
            }
        });
        info!(period = ?state.settings.auto_refresh_period, "Auto-refresh enabled");
        true
    };

    respond(state.lock().map(|mut dashboard| {
        dashboard.set_auto_refresh(enabled);
        dashboard.view()
    }))
}

async fn get_route_stops(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let route_id = path.into_inner();
    respond(state.call_api(move |api, _| api.route_stops(&route_id)).await)
}

async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let (auto_refresh, current_stop) = state.lock()
        .map(|d| (d.auto_refresh(), d.current_stop().map(|s| s.stop_id.clone())))
        .unwrap_or((false, None));
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "current_stop": current_stop,
        "service": "Cercanías Dashboard",
        "version": env!("CARGO_PKG_VERSION"),
        "transit_api": state.settings.transit_api_url,
        "auto_refresh": auto_refresh && state.auto_refresh.is_running(),
        "timestamp": Utc::now().timestamp(),
        "embedded_frontend": true
    }))
}

// ============================================================================
// Server Setup
// ============================================================================

fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // Frontend routes
        .route("/", web::get().to(serve_index))
        .route("/dashboard.js", web::get().to(serve_js))
        // Health check
        .route("/health", web::get().to(health_check))
        // API routes
        .service(
            web::scope("/api/dashboard")
                .route("/view", web::get().to(get_view))
                .route("/stops", web::get().to(get_stop_names))
                .route("/search", web::get().to(search_stops))
                .route("/stop/{id}", web::post().to(select_stop))
                .route("/stop", web::delete().to(clear_stop))
                .route("/date/{date}", web::post().to(set_date))
                .route("/refresh", web::post().to(refresh))
                .route("/filter", web::post().to(set_filter))
                .route("/page/{direction}", web::post().to(change_page))
                .route("/auto-refresh", web::post().to(toggle_auto_refresh))
                .route("/routes/{id}/stops", web::get().to(get_route_stops)),
        );
}

async fn run_server(state: AppState) -> std::io::Result<()> {
    let bind_addr = state.settings.bind_addr.clone();

    info!("Cercanías dashboard listening on http://{}", bind_addr);
    info!("Transit API: {}", state.settings.transit_api_url);
    info!(
        "Routes: GET / | GET /health | /api/dashboard/{{view,stops,search,stop/:id,date/:date,refresh,filter,page/:dir,auto-refresh,routes/:id/stops}}"
    );

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(configure)
    })
        .bind(bind_addr.as_str())?
        .run()
        .await
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env();
    info!(version = env!("CARGO_PKG_VERSION"), "Starting Cercanías dashboard");

    // The blocking client must be built before the async runtime starts
    let api = match HttpTransitApi::new(&settings.transit_api_url, settings.api_timeout) {
        Ok(api) => api,
        Err(e) => {
            error!("Failed to initialize transit API client: {}", e);
            error!("Check TRANSIT_API_URL (currently {:?})", settings.transit_api_url);
            std::process::exit(1);
        }
    };
    info!("Using transit API at {}", api.base_url());

    let state = AppState::new(Arc::new(api), settings);

    actix_web::rt::System::new().block_on(run_server(state))
}
