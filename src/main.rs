use axum::{
    extract::ConnectInfo,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use axum_prometheus::PrometheusMetricLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use proximity_core::config::Config;
use proximity_core::state::AppState;
use proximity_core::{db, gateway, handlers};

/// Middleware that restricts access to the metrics endpoint to loopback connections only.
async fn require_loopback(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match connect_info {
        Some(ConnectInfo(addr)) if addr.ip().is_loopback() => next.run(req).await,
        Some(_) => StatusCode::NOT_FOUND.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Runs the chat TTL sweeper on a fixed cadence for the lifetime of the
/// process. A missed tick under load is not a correctness problem — the
/// next tick catches up.
fn spawn_chat_sweeper(state: AppState, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match state.chat.sweep_expired().await {
                Ok(deleted) if deleted > 0 => {
                    info!(deleted, "chat TTL sweep removed expired messages")
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = ?e, "chat TTL sweep failed"),
            }
        }
    });
}

#[tokio::main]
async fn main() {
    // Initialize tracing — JSON in production, human-readable in dev.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "proximity_core=info,tower_http=info,sqlx=warn".parse().unwrap());

    if std::env::var("APP_ENV").as_deref() == Ok("production") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Proximity core starting...");

    // Load configuration — fatal if DATABASE_URL is missing.
    let config = Config::from_env().expect("Failed to load configuration");
    info!("Configuration loaded");

    // Create database connection pool
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");

    // Auto-run pending migrations on startup.
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");
    info!("Database migrations applied");

    // Run health check
    db::health_check(&pool).await.expect("Database health check failed");
    info!("Database health check passed");

    // CORS: permissive in dev, origin-restricted in production.
    let cors = if config.is_dev {
        info!("CORS: permissive (dev mode)");
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        if origins.is_empty() {
            tracing::warn!(
                "CORS: no ALLOWED_ORIGINS configured — all cross-origin requests will be denied"
            );
        } else {
            info!("CORS: production mode, allowing origins: {:?}", config.allowed_origins);
        }
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
    };

    let addr = config.server_addr();

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .expect("Failed to build HTTP client");

    let app_state = AppState::new(pool, &config, http_client);

    // The geo index holds no durable state of its own; rebuild it from
    // provider_presence/seeker_search on every boot.
    app_state
        .presence
        .rebuild_index()
        .await
        .expect("Failed to rebuild geo index from presence store");
    info!("Geo index rebuilt from durable presence");

    spawn_chat_sweeper(app_state.clone(), Duration::from_secs(config.chat_sweep_interval_secs));

    // Prometheus metrics layer
    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    // ── Rate limiting ─────────────────────────────────────────────────────────
    // Global limit: 10 requests/second per IP, burst of 20.
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .finish()
            .expect("Invalid global governor configuration"),
    );

    // Stricter limit for OTP endpoints: 2 requests/second per IP, burst of 5.
    let auth_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(5)
            .finish()
            .expect("Invalid auth governor configuration"),
    );

    let auth_router = Router::new()
        .route("/api/1/authentication/send-otp", post(handlers::auth::send_otp))
        .route("/api/1/authentication/verify-otp", post(handlers::auth::verify_otp))
        .route_layer(GovernorLayer {
            config: auth_governor_conf,
        });

    // Build router
    let app = Router::new()
        // Health check + metrics
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(move || async move { metric_handle.render() })
                .route_layer(middleware::from_fn(require_loopback)),
        )
        // OTP authentication (stricter per-IP rate limit, nested via sub-router)
        .merge(auth_router)
        // Presence/discovery HTTP mirror of the location socket
        .route(
            "/api/1/location/provider/toggle-status",
            post(handlers::location::toggle_provider_status),
        )
        .route(
            "/api/1/location/seeker/search-toggle",
            post(handlers::location::seeker_search_toggle),
        )
        // Work order lifecycle
        .route("/api/1/profiles/assign-work", post(handlers::profiles::assign_work))
        .route("/api/1/profiles/work-orders", get(handlers::profiles::list_work_orders))
        .route("/api/1/profiles/fcm-token", post(handlers::auth::register_fcm_token))
        .route(
            "/api/1/profiles/provider/dashboard",
            get(handlers::profiles::provider_dashboard),
        )
        // Category catalog read contract
        .route("/api/1/work-categories/", get(handlers::categories::list_categories))
        // WebSocket gateway: presence/discovery and work-session channels
        .route("/ws/location/:role", get(gateway::location_ws))
        .route("/ws/work/:role", get(gateway::work_ws))
        // ── Global rate limit (10 req/s per IP, burst 20) ──────────────────
        .layer(GovernorLayer {
            config: governor_conf,
        })
        // ── Security response headers ──────────────────────────────────────
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        // ── Prometheus + CORS ──────────────────────────────────────────────
        .layer(prometheus_layer)
        .layer(cors)
        .with_state(app_state);

    // Start server
    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    // `into_make_service_with_connect_info` populates `ConnectInfo<SocketAddr>` in
    // request extensions, needed by:
    //  - GovernorLayer's PeerIpKeyExtractor (per-IP rate limiting)
    //  - require_loopback middleware on /metrics
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server failed to start");
}
