pub mod auth;
pub mod license;
pub mod logging;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("sesamo")
        .about("Magic link authentication and session security engine")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("SESAMO_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .env("SESAMO_DSN")
                .required(true),
        );

    let command = auth::with_args(command);
    let command = license::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required_env() -> Vec<(&'static str, Option<&'static str>)> {
        vec![
            ("SESAMO_DSN", Some("postgres://user@localhost:5432/sesamo")),
            ("SESAMO_JWT_SECRET", Some("jwt-secret")),
            ("SESAMO_SECRETS_KEY", Some("secrets-key")),
            ("SESAMO_OTP_PEPPER", Some("pepper")),
        ]
    }

    #[test]
    fn command_parses_with_env_args() {
        temp_env::with_vars(required_env(), || {
            let command = new();
            let matches = command
                .try_get_matches_from(vec!["sesamo"])
                .expect("env vars satisfy required args");
            assert_eq!(matches.get_one::<u16>("port").copied(), Some(8080));
            assert_eq!(
                matches.get_one::<String>("dsn").map(String::as_str),
                Some("postgres://user@localhost:5432/sesamo")
            );
        });
    }

    #[test]
    fn dsn_is_required() {
        temp_env::with_vars(
            vec![
                ("SESAMO_DSN", None::<&str>),
                ("SESAMO_JWT_SECRET", Some("jwt-secret")),
                ("SESAMO_SECRETS_KEY", Some("secrets-key")),
                ("SESAMO_OTP_PEPPER", Some("pepper")),
            ],
            || {
                let command = new();
                assert!(command.try_get_matches_from(vec!["sesamo"]).is_err());
            },
        );
    }
}
