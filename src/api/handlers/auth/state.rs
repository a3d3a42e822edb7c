//! Auth state and configuration shared across handlers.

use std::sync::Arc;

use crate::{
    license::{client::LicenseClient, LicenseGate},
    notify::{DefaultRenderer, MessageKind, RenderedMessage, TemplateContext, TemplateRenderer},
    otp::OtpService,
    ratelimit::{PgRateLimiter, RateLimiter},
    session::SessionService,
    settings::Settings,
    token::TokenService,
    totp::TotpService,
    users::UserDirectory,
};

const DEFAULT_BASE_URL: &str = "https://app.sesamo.dev";
const DEFAULT_TOTP_ISSUER: &str = "sesamo";

/// Static deployment configuration (as opposed to the dynamic [`Settings`]
/// bag loaded from the store).
#[derive(Clone, Debug)]
pub struct AuthConfig {
    base_url: String,
    totp_issuer: String,
}

impl AuthConfig {
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            totp_issuer: DEFAULT_TOTP_ISSUER.to_string(),
        }
    }

    #[must_use]
    pub fn with_totp_issuer(mut self, issuer: String) -> Self {
        self.totp_issuer = issuer;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn totp_issuer(&self) -> &str {
        &self.totp_issuer
    }

    /// The magic-link URL embedded in outbound messages.
    #[must_use]
    pub fn login_url(&self, secret: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{base}/login?token={secret}")
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL.to_string())
    }
}

/// The domain services the login flow composes.
pub struct AuthServices {
    pub tokens: TokenService,
    pub otp: OtpService,
    pub totp: TotpService,
    pub sessions: SessionService,
}

/// Everything the auth handlers need, wired once at startup.
pub struct AuthState {
    config: AuthConfig,
    settings: Settings,
    services: AuthServices,
    directory: Arc<dyn UserDirectory>,
    rate_limiter: Arc<dyn RateLimiter>,
    gate: LicenseGate,
    /// Optional template-designer capability; absent means default renderer.
    renderer: Option<Arc<dyn TemplateRenderer>>,
    /// Present when the deployment has a license server configured.
    license_client: Option<LicenseClient>,
    /// The store-backed limiter, kept separately for admin stats/reset.
    admin_limiter: Option<PgRateLimiter>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        settings: Settings,
        services: AuthServices,
        directory: Arc<dyn UserDirectory>,
        rate_limiter: Arc<dyn RateLimiter>,
        gate: LicenseGate,
    ) -> Self {
        Self {
            config,
            settings,
            services,
            directory,
            rate_limiter,
            gate,
            renderer: None,
            license_client: None,
            admin_limiter: None,
        }
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    #[must_use]
    pub fn with_license_client(mut self, client: LicenseClient) -> Self {
        self.license_client = Some(client);
        self
    }

    #[must_use]
    pub fn with_admin_limiter(mut self, limiter: PgRateLimiter) -> Self {
        self.admin_limiter = Some(limiter);
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.services.tokens
    }

    #[must_use]
    pub fn otp(&self) -> &OtpService {
        &self.services.otp
    }

    #[must_use]
    pub fn totp(&self) -> &TotpService {
        &self.services.totp
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionService {
        &self.services.sessions
    }

    #[must_use]
    pub fn directory(&self) -> &dyn UserDirectory {
        self.directory.as_ref()
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    #[must_use]
    pub fn gate(&self) -> &LicenseGate {
        &self.gate
    }

    #[must_use]
    pub fn license_client(&self) -> Option<&LicenseClient> {
        self.license_client.as_ref()
    }

    #[must_use]
    pub fn admin_limiter(&self) -> Option<&PgRateLimiter> {
        self.admin_limiter.as_ref()
    }

    /// Render through the installed capability, falling back to the default
    /// renderer when none is present.
    #[must_use]
    pub fn render(&self, kind: MessageKind, context: &TemplateContext) -> RenderedMessage {
        match &self.renderer {
            Some(renderer) => renderer.render(kind, context),
            None => DefaultRenderer.render(kind, context),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_url_trims_trailing_slash() {
        let config = AuthConfig::new("https://app.example.com/".to_string());
        assert_eq!(
            config.login_url("s3cret"),
            "https://app.example.com/login?token=s3cret"
        );
    }

    #[test]
    fn config_defaults_and_overrides() {
        let config = AuthConfig::default();
        assert_eq!(config.base_url(), DEFAULT_BASE_URL);
        assert_eq!(config.totp_issuer(), DEFAULT_TOTP_ISSUER);

        let config = config.with_totp_issuer("acme".to_string());
        assert_eq!(config.totp_issuer(), "acme");
    }
}
