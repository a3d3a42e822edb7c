use crate::{
    api::handlers::{auth, health, root},
    license::{start_license_monitor, LicenseClient, LicenseGate, LicenseMonitorHandle},
    notify::{spawn_outbox_worker, LogNotifier, OutboxWorkerConfig},
    otp::OtpService,
    ratelimit::{NoopRateLimiter, PgRateLimiter, RateLimiter},
    session::{jwt::JwtSigner, SessionService},
    settings::Settings,
    token::TokenService,
    totp::TotpService,
    users::{PgUserDirectory, UserDirectory},
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::{get, options},
    Extension,
};
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::mpsc};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info, info_span, warn, Span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;
// Keep these internal to the crate while allowing CLI/server wiring to reference them.
pub(crate) mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use crate::{APP_USER_AGENT, GIT_COMMIT_HASH};
pub use openapi::openapi;

/// How often background maintenance (session sweep, OTP purge, counter
/// cleanup) runs.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Everything the server needs, assembled by the CLI dispatch.
#[derive(Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub dsn: String,
    /// Public base URL login links point at.
    pub base_url: String,
    pub totp_issuer: String,
    pub jwt_secret: String,
    /// Passphrase the TOTP secret-encryption key is derived from.
    pub secrets_key: String,
    /// Server-side pepper mixed into OTP and backup-code hashes.
    pub otp_pepper: String,
    pub license_server_url: Option<String>,
    pub license_key: Option<String>,
    pub license_device_id: String,
    pub license_ping_seconds: u64,
    pub license_grace_hours: i64,
    pub outbox: OutboxWorkerConfig,
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(config: ServerConfig) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&config.dsn)
        .await
        .context("Failed to connect to database")?;

    // Normalize the dynamic settings bag once, at the load boundary.
    let settings_value = auth::storage::load_settings_value(&pool)
        .await
        .unwrap_or_else(|err| {
            warn!("failed to load settings, using defaults: {err:#}");
            None
        });
    let settings = settings_value
        .as_ref()
        .map_or_else(Settings::default, Settings::from_value);

    let directory: Arc<dyn UserDirectory> = Arc::new(PgUserDirectory::new(pool.clone()));
    let encryption_key: Arc<[u8]> = Arc::from(derive_key(&config.secrets_key).as_slice());
    let otp_pepper: Arc<[u8]> = Arc::from(config.otp_pepper.as_bytes());

    let services = auth::AuthServices {
        tokens: TokenService::new(pool.clone(), directory.clone(), settings.clone()),
        otp: OtpService::new(pool.clone(), otp_pepper.clone(), settings.clone()),
        totp: TotpService::new(
            pool.clone(),
            encryption_key,
            otp_pepper,
            config.totp_issuer.clone(),
        ),
        sessions: SessionService::new(
            pool.clone(),
            JwtSigner::new(config.jwt_secret.as_bytes()),
            settings.clone(),
        ),
    };

    // The global disable flag short-circuits to the noop limiter.
    let pg_limiter = PgRateLimiter::new(
        pool.clone(),
        settings.rate_limit_max_attempts,
        settings.rate_limit_window_seconds,
    );
    let rate_limiter: Arc<dyn RateLimiter> = if settings.rate_limit_enabled {
        Arc::new(pg_limiter.clone())
    } else {
        Arc::new(NoopRateLimiter)
    };

    // License gate starts from the persisted cache; the monitor refreshes it.
    let cached_license = crate::license::state::LicenseStateRepo::load(&pool)
        .await
        .unwrap_or_else(|err| {
            warn!("failed to load cached license state: {err:#}");
            None
        });
    let gate = LicenseGate::new(cached_license).with_grace_hours(config.license_grace_hours);

    let license_client = match &config.license_server_url {
        Some(url) => {
            let parsed = Url::parse(url).with_context(|| format!("Invalid license URL: {url}"))?;
            Some(LicenseClient::new(parsed)?)
        }
        None => None,
    };

    let monitor = start_monitor(&config, &pool, &gate, license_client.as_ref());

    let auth_config =
        auth::AuthConfig::new(config.base_url.clone()).with_totp_issuer(config.totp_issuer);
    let mut auth_state = auth::AuthState::new(
        auth_config,
        settings.clone(),
        services,
        directory,
        rate_limiter,
        gate,
    )
    .with_admin_limiter(pg_limiter.clone());
    if let Some(client) = license_client {
        auth_state = auth_state.with_license_client(client);
    }
    let auth_state = Arc::new(auth_state);

    // Background workers: outbox delivery and periodic maintenance. Their
    // failures are logged and never reach request handling.
    spawn_outbox_worker(pool.clone(), Arc::new(LogNotifier), config.outbox);
    spawn_maintenance(auth_state.clone(), pg_limiter);

    let frontend_origin = frontend_origin(&config.base_url)?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    // Build the router from OpenAPI-wired routes, then extend it with
    // non-doc routes like `/` and preflight-only `OPTIONS /health`.
    let (router, _openapi) = router().split_for_parts();
    let app = router
        .route("/", get(root::root))
        .route("/health", options(health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state.clone()))
                .layer(Extension(pool.clone())),
        )
        .layer(Extension(pool));

    let listener = TcpListener::bind(format!("::0:{}", config.port)).await?;

    info!("Listening on [::]:{}", config.port);

    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(());
        }
    });

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            rx.recv().await;
            info!("Gracefully shutdown");
        })
        .await?;

    // The monitor is an owned handle, stopped explicitly at shutdown.
    if let Some(handle) = monitor {
        handle.stop().await;
    }

    Ok(())
}

/// Derive the 32-byte secret-encryption key from the configured passphrase.
fn derive_key(passphrase: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(passphrase.as_bytes());
    hasher.finalize().to_vec()
}

fn start_monitor(
    config: &ServerConfig,
    pool: &sqlx::PgPool,
    gate: &LicenseGate,
    client: Option<&LicenseClient>,
) -> Option<LicenseMonitorHandle> {
    let client = client?.clone();
    let Some(license_key) = config.license_key.clone() else {
        info!("no license key configured, running on the free tier");
        return None;
    };
    Some(start_license_monitor(
        pool.clone(),
        gate.clone(),
        client,
        license_key,
        config.license_device_id.clone(),
        Duration::from_secs(config.license_ping_seconds.max(60)),
    ))
}

/// Periodic expiry sweep, OTP purge, and rate-limit cleanup.
fn spawn_maintenance(
    auth_state: Arc<auth::AuthState>,
    limiter: PgRateLimiter,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(MAINTENANCE_INTERVAL).await;

            match auth_state.sessions().sweep_expired().await {
                Ok(0) => {}
                Ok(swept) => info!(swept, "expired sessions revoked"),
                Err(err) => error!("session sweep failed: {err:#}"),
            }
            match auth_state.otp().purge_expired().await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "expired one-time codes purged"),
                Err(err) => error!("otp purge failed: {err:#}"),
            }
            if let Err(err) = limiter.cleanup_expired().await {
                error!("rate limit cleanup failed: {err:#}");
            }
        }
    })
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(base_url).with_context(|| format!("Invalid base URL: {base_url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Base URL must include a valid host: {base_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_key_is_32_bytes_and_stable() {
        let key = derive_key("passphrase");
        assert_eq!(key.len(), 32);
        assert_eq!(key, derive_key("passphrase"));
        assert_ne!(key, derive_key("other"));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn frontend_origin_strips_path() {
        let origin = frontend_origin("https://app.sesamo.dev/some/path").unwrap();
        assert_eq!(origin, HeaderValue::from_static("https://app.sesamo.dev"));

        let origin = frontend_origin("http://localhost:3000/").unwrap();
        assert_eq!(origin, HeaderValue::from_static("http://localhost:3000"));

        assert!(frontend_origin("not a url").is_err());
    }
}
