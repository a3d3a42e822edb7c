use super::handlers::{admin, auth, health};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI spec.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` spec.
/// Routes added outside (like `/` and preflight `OPTIONS`) are intentionally
/// not documented.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut sesamo_tag = Tag::new("sesamo");
    sesamo_tag.description = Some("Magic link authentication API".to_string());

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Magic link issuance, login, and sessions".to_string());

    let mut otp_tag = Tag::new("otp");
    otp_tag.description = Some("One-time code second factor".to_string());

    let mut mfa_tag = Tag::new("mfa");
    mfa_tag.description = Some("TOTP verification flows".to_string());

    let mut totp_tag = Tag::new("totp");
    totp_tag.description = Some("Authenticator enrollment and backup codes".to_string());

    let mut admin_tag = Tag::new("admin");
    admin_tag.description = Some("Operator-only management surface".to_string());

    // `.routes()` only extends `paths`/`components`, so tags set on the base
    // OpenAPI document here survive route registration unchanged.
    let mut base = cargo_openapi();
    base.tags = Some(vec![
        sesamo_tag, auth_tag, otp_tag, mfa_tag, totp_tag, admin_tag,
    ]);

    // `routes!` reads #[utoipa::path] to bind HTTP method + path and add the
    // route to OpenAPI. Handlers sharing a path share one `routes!` call.
    let router = OpenApiRouter::with_openapi(base)
        .routes(routes!(health::health))
        .routes(routes!(auth::link::send_link))
        .routes(routes!(auth::login::login))
        .routes(routes!(auth::otp::otp_send))
        .routes(routes!(auth::otp::otp_verify))
        .routes(routes!(auth::otp::otp_resend))
        .routes(routes!(auth::mfa::verify_mfa_totp))
        .routes(routes!(auth::mfa::login_totp))
        .routes(routes!(auth::session::session))
        .routes(routes!(auth::session::logout))
        .routes(routes!(auth::account::totp_setup))
        .routes(routes!(auth::account::totp_confirm))
        .routes(routes!(auth::account::totp_disable))
        .routes(routes!(auth::account::totp_status))
        .routes(routes!(auth::account::totp_backup_codes))
        .routes(routes!(admin::tokens::list_tokens, admin::tokens::create_token))
        .routes(routes!(admin::tokens::block_token))
        .routes(routes!(admin::tokens::reactivate_token))
        .routes(routes!(admin::tokens::extend_token))
        .routes(routes!(admin::tokens::delete_token))
        .routes(routes!(admin::tokens::cleanup_tokens))
        .routes(routes!(admin::sessions::list_sessions))
        .routes(routes!(admin::sessions::revoke_session))
        .routes(routes!(admin::sessions::unrevoke_session))
        .routes(routes!(admin::sessions::revoke_credential))
        .routes(routes!(admin::sessions::cleanup_sessions))
        .routes(routes!(admin::bans::list_ip_bans, admin::bans::add_ip_ban))
        .routes(routes!(admin::bans::remove_ip_ban))
        .routes(routes!(admin::license::license_status))
        .routes(routes!(admin::license::license_create))
        .routes(routes!(admin::license::license_ping))
        .routes(routes!(admin::license::license_deactivate))
        .routes(routes!(admin::rate_limits::rate_limit_stats))
        .routes(routes!(admin::rate_limits::rate_limit_reset));

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    if let Some(start) = author.find('<') {
        let name = author[..start].trim();
        let email = author[start + 1..].trim_end_matches('>').trim();
        let name = if name.is_empty() { None } else { Some(name) };
        let email = if email.is_empty() { None } else { Some(email) };
        (name, email)
    } else {
        let name = author.trim();
        (if name.is_empty() { None } else { Some(name) }, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let spec = openapi();
        assert_eq!(spec.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));

        let contact = spec.info.contact;
        assert!(contact.is_some());
        if let Some(contact) = contact {
            assert_eq!(contact.name.as_deref(), Some("Team Sesamo"));
            assert_eq!(contact.email.as_deref(), Some("team@sesamo.dev"));
        }
    }

    #[test]
    fn parse_author_variants() {
        assert_eq!(
            parse_author("Team Sesamo <team@sesamo.dev>"),
            (Some("Team Sesamo"), Some("team@sesamo.dev"))
        );
        assert_eq!(parse_author("Solo Author"), (Some("Solo Author"), None));
        assert_eq!(parse_author("<only@email.dev>"), (None, Some("only@email.dev")));
        assert_eq!(parse_author("  "), (None, None));
    }

    #[test]
    fn api_router_registers_core_paths() {
        let spec = openapi();
        let paths = &spec.paths.paths;
        assert!(paths.contains_key("/v1/auth/send-link"));
        assert!(paths.contains_key("/v1/auth/login"));
        assert!(paths.contains_key("/v1/auth/otp/verify"));
        assert!(paths.contains_key("/v1/auth/login-totp"));
        assert!(paths.contains_key("/v1/admin/sessions/{id}/revoke"));
        assert!(paths.contains_key("/health"));
    }
}
