//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the
//! appropriate action, such as starting the API server with its full
//! configuration state.

use crate::{
    api::ServerConfig,
    cli::actions::Action,
    cli::commands::{auth, license},
    notify::OutboxWorkerConfig,
};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;
    let license_opts = license::Options::parse(matches)?;

    let outbox = OutboxWorkerConfig::new()
        .with_poll_interval_seconds(auth_opts.outbox_poll_seconds)
        .with_batch_size(auth_opts.outbox_batch_size)
        .with_max_attempts(auth_opts.outbox_max_attempts)
        .with_backoff_base_seconds(auth_opts.outbox_backoff_base_seconds)
        .with_backoff_max_seconds(auth_opts.outbox_backoff_max_seconds);

    Ok(Action::Server(ServerConfig {
        port,
        dsn,
        base_url: auth_opts.base_url,
        totp_issuer: auth_opts.totp_issuer,
        jwt_secret: auth_opts.jwt_secret,
        secrets_key: auth_opts.secrets_key,
        otp_pepper: auth_opts.otp_pepper,
        license_server_url: license_opts.url,
        license_key: license_opts.key,
        license_device_id: license_opts.device_id,
        license_ping_seconds: license_opts.ping_seconds,
        license_grace_hours: license_opts.grace_hours,
        outbox,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_builds_server_action_from_env() {
        temp_env::with_vars(
            [
                ("SESAMO_DSN", Some("postgres://user@localhost:5432/sesamo")),
                ("SESAMO_JWT_SECRET", Some("jwt-secret")),
                ("SESAMO_SECRETS_KEY", Some("secrets-key")),
                ("SESAMO_OTP_PEPPER", Some("pepper")),
                ("SESAMO_LICENSE_URL", Some("https://licenses.sesamo.dev")),
                ("SESAMO_LICENSE_KEY", Some("key-123")),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["sesamo"]);
                let action = handler(&matches).expect("handler builds action");
                let Action::Server(config) = action;
                assert_eq!(config.port, 8080);
                assert_eq!(config.base_url, "https://app.sesamo.dev");
                assert_eq!(
                    config.license_server_url.as_deref(),
                    Some("https://licenses.sesamo.dev")
                );
                assert_eq!(config.license_key.as_deref(), Some("key-123"));
            },
        );
    }

    #[test]
    fn jwt_secret_required() {
        temp_env::with_vars(
            [
                ("SESAMO_DSN", Some("postgres://user@localhost:5432/sesamo")),
                ("SESAMO_JWT_SECRET", None::<&str>),
                ("SESAMO_SECRETS_KEY", Some("secrets-key")),
                ("SESAMO_OTP_PEPPER", Some("pepper")),
            ],
            || {
                let command = crate::cli::commands::new();
                assert!(command.try_get_matches_from(vec!["sesamo"]).is_err());
            },
        );
    }
}
