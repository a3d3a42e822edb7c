//! License server CLI arguments.

use anyhow::Result;
use clap::{Arg, ArgMatches, Command};

pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("license-url")
                .long("license-url")
                .help("License server base URL (absent: free tier only)")
                .env("SESAMO_LICENSE_URL"),
        )
        .arg(
            Arg::new("license-key")
                .long("license-key")
                .help("License key to validate against the license server")
                .env("SESAMO_LICENSE_KEY"),
        )
        .arg(
            Arg::new("license-device-id")
                .long("license-device-id")
                .help("Device identifier reported on validation pings")
                .env("SESAMO_LICENSE_DEVICE_ID")
                .default_value("unbound"),
        )
        .arg(
            Arg::new("license-ping-seconds")
                .long("license-ping-seconds")
                .help("Interval between validation pings")
                .env("SESAMO_LICENSE_PING_SECONDS")
                .default_value("21600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("license-grace-hours")
                .long("license-grace-hours")
                .help("How long a validated license stays trusted across outages")
                .env("SESAMO_LICENSE_GRACE_HOURS")
                .default_value("24")
                .value_parser(clap::value_parser!(i64)),
        )
}

/// Parsed license options.
#[derive(Debug)]
pub struct Options {
    pub url: Option<String>,
    pub key: Option<String>,
    pub device_id: String,
    pub ping_seconds: u64,
    pub grace_hours: i64,
}

impl Options {
    /// # Errors
    /// Currently infallible; kept fallible for parity with other option
    /// groups.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            url: matches.get_one::<String>("license-url").cloned(),
            key: matches.get_one::<String>("license-key").cloned(),
            device_id: matches
                .get_one::<String>("license-device-id")
                .cloned()
                .unwrap_or_else(|| "unbound".to_string()),
            ping_seconds: matches
                .get_one::<u64>("license-ping-seconds")
                .copied()
                .unwrap_or(21600),
            grace_hours: matches
                .get_one::<i64>("license-grace-hours")
                .copied()
                .unwrap_or(24),
        })
    }
}
