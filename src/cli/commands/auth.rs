//! Auth, secrets, and outbox CLI arguments.

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

pub fn with_args(command: Command) -> Command {
    let command = with_auth_args(command);
    with_outbox_args(command)
}

fn with_auth_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("base-url")
                .long("base-url")
                .help("Public base URL used for login links")
                .env("SESAMO_BASE_URL")
                .default_value("https://app.sesamo.dev"),
        )
        .arg(
            Arg::new("totp-issuer")
                .long("totp-issuer")
                .help("Issuer shown in authenticator apps")
                .env("SESAMO_TOTP_ISSUER")
                .default_value("sesamo"),
        )
        .arg(
            Arg::new("jwt-secret")
                .long("jwt-secret")
                .help("HS256 secret for session credentials")
                .env("SESAMO_JWT_SECRET")
                .required(true),
        )
        .arg(
            Arg::new("secrets-key")
                .long("secrets-key")
                .help("Passphrase the TOTP secret-encryption key is derived from")
                .env("SESAMO_SECRETS_KEY")
                .required(true),
        )
        .arg(
            Arg::new("otp-pepper")
                .long("otp-pepper")
                .help("Server-side pepper mixed into OTP and backup-code hashes")
                .env("SESAMO_OTP_PEPPER")
                .required(true),
        )
}

fn with_outbox_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("outbox-poll-seconds")
                .long("outbox-poll-seconds")
                .help("Notification outbox poll interval in seconds")
                .env("SESAMO_OUTBOX_POLL_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("outbox-batch-size")
                .long("outbox-batch-size")
                .help("Notification outbox batch size per poll")
                .env("SESAMO_OUTBOX_BATCH_SIZE")
                .default_value("10")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("outbox-max-attempts")
                .long("outbox-max-attempts")
                .help("Max attempts before marking a notification as failed")
                .env("SESAMO_OUTBOX_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("outbox-backoff-base-seconds")
                .long("outbox-backoff-base-seconds")
                .help("Base delay for notification retry backoff")
                .env("SESAMO_OUTBOX_BACKOFF_BASE_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("outbox-backoff-max-seconds")
                .long("outbox-backoff-max-seconds")
                .help("Max delay for notification retry backoff")
                .env("SESAMO_OUTBOX_BACKOFF_MAX_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}

/// Parsed auth/outbox options.
#[derive(Debug)]
pub struct Options {
    pub base_url: String,
    pub totp_issuer: String,
    pub jwt_secret: String,
    pub secrets_key: String,
    pub otp_pepper: String,
    pub outbox_poll_seconds: u64,
    pub outbox_batch_size: usize,
    pub outbox_max_attempts: u32,
    pub outbox_backoff_base_seconds: u64,
    pub outbox_backoff_max_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error when a required argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            base_url: matches
                .get_one::<String>("base-url")
                .cloned()
                .context("missing required argument: --base-url")?,
            totp_issuer: matches
                .get_one::<String>("totp-issuer")
                .cloned()
                .context("missing required argument: --totp-issuer")?,
            jwt_secret: matches
                .get_one::<String>("jwt-secret")
                .cloned()
                .context("missing required argument: --jwt-secret")?,
            secrets_key: matches
                .get_one::<String>("secrets-key")
                .cloned()
                .context("missing required argument: --secrets-key")?,
            otp_pepper: matches
                .get_one::<String>("otp-pepper")
                .cloned()
                .context("missing required argument: --otp-pepper")?,
            outbox_poll_seconds: matches
                .get_one::<u64>("outbox-poll-seconds")
                .copied()
                .unwrap_or(5),
            outbox_batch_size: matches
                .get_one::<usize>("outbox-batch-size")
                .copied()
                .unwrap_or(10),
            outbox_max_attempts: matches
                .get_one::<u32>("outbox-max-attempts")
                .copied()
                .unwrap_or(5),
            outbox_backoff_base_seconds: matches
                .get_one::<u64>("outbox-backoff-base-seconds")
                .copied()
                .unwrap_or(5),
            outbox_backoff_max_seconds: matches
                .get_one::<u64>("outbox-backoff-max-seconds")
                .copied()
                .unwrap_or(300),
        })
    }
}
