//! Message rendering and delivery seams.
//!
//! The engine never performs transport itself. Flows render a typed template
//! context into a message, enqueue it in the `notification_outbox` table
//! (inside the same transaction as the record that triggered it), and a
//! background worker hands rows to a [`Notifier`]. A custom
//! [`TemplateRenderer`] is an optional capability; when none is installed
//! the default renderer applies.

pub mod outbox;

pub use outbox::{enqueue, spawn_outbox_worker, OutboxWorkerConfig};

use anyhow::Result;
use tracing::info;

/// Delivery channel. The notifier decides what transport each maps to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Channel {
    Email,
    Sms,
    Whatsapp,
}

impl Channel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Whatsapp => "whatsapp",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "email" => Some(Self::Email),
            "sms" => Some(Self::Sms),
            "whatsapp" => Some(Self::Whatsapp),
            _ => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed placeholder set for outbound messages. No string-replace chains:
/// templates consume exactly these fields.
#[derive(Clone, Debug, Default)]
pub struct TemplateContext {
    /// The magic-link URL, when rendering a login link.
    pub url: Option<String>,
    /// The one-time code, when rendering an OTP message.
    pub code: Option<String>,
    /// Human-readable expiry, e.g. "15 minutes".
    pub expiry_text: String,
}

/// What kind of message is being rendered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageKind {
    LoginLink,
    OtpCode,
}

/// A message ready for delivery.
#[derive(Clone, Debug)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// Optional rendering capability. Deployments with a template designer
/// install their own; everyone else gets [`DefaultRenderer`].
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, kind: MessageKind, context: &TemplateContext) -> RenderedMessage;
}

/// Built-in plain-text templates.
#[derive(Clone, Debug)]
pub struct DefaultRenderer;

impl TemplateRenderer for DefaultRenderer {
    fn render(&self, kind: MessageKind, context: &TemplateContext) -> RenderedMessage {
        match kind {
            MessageKind::LoginLink => RenderedMessage {
                subject: "Your login link".to_string(),
                body: format!(
                    "Click the link below to sign in:\n\n{}\n\nThe link expires in {}.",
                    context.url.as_deref().unwrap_or_default(),
                    context.expiry_text
                ),
            },
            MessageKind::OtpCode => RenderedMessage {
                subject: "Your verification code".to_string(),
                body: format!(
                    "Your verification code is {}. It expires in {}.",
                    context.code.as_deref().unwrap_or_default(),
                    context.expiry_text
                ),
            },
        }
    }
}

/// Delivery abstraction consumed by the outbox worker.
pub trait Notifier: Send + Sync {
    /// Deliver a message or return an error to schedule a retry.
    fn deliver(&self, channel: Channel, destination: &str, message: &RenderedMessage)
        -> Result<()>;
}

/// Local dev notifier that logs instead of sending.
#[derive(Clone, Debug)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver(
        &self,
        channel: Channel,
        destination: &str,
        message: &RenderedMessage,
    ) -> Result<()> {
        info!(
            channel = %channel,
            destination = %destination,
            subject = %message.subject,
            "notification delivery stub"
        );
        Ok(())
    }
}

/// Human-readable expiry text for templates.
#[must_use]
pub fn expiry_text(seconds: i64) -> String {
    if seconds <= 0 {
        return "0 minutes".to_string();
    }
    if seconds < 60 {
        return format!("{seconds} seconds");
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        let unit = if minutes == 1 { "minute" } else { "minutes" };
        return format!("{minutes} {unit}");
    }
    let hours = minutes / 60;
    let unit = if hours == 1 { "hour" } else { "hours" };
    format!("{hours} {unit}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_parse_round_trips() {
        for channel in [Channel::Email, Channel::Sms, Channel::Whatsapp] {
            assert_eq!(Channel::parse(channel.as_str()), Some(channel));
        }
        assert_eq!(Channel::parse("carrier-pigeon"), None);
    }

    #[test]
    fn default_renderer_includes_placeholders() {
        let renderer = DefaultRenderer;
        let message = renderer.render(
            MessageKind::LoginLink,
            &TemplateContext {
                url: Some("https://app.example.com/login?token=abc".to_string()),
                code: None,
                expiry_text: "15 minutes".to_string(),
            },
        );
        assert!(message.body.contains("https://app.example.com/login?token=abc"));
        assert!(message.body.contains("15 minutes"));

        let message = renderer.render(
            MessageKind::OtpCode,
            &TemplateContext {
                url: None,
                code: Some("123456".to_string()),
                expiry_text: "5 minutes".to_string(),
            },
        );
        assert!(message.body.contains("123456"));
    }

    #[test]
    fn expiry_text_scales_units() {
        assert_eq!(expiry_text(30), "30 seconds");
        assert_eq!(expiry_text(60), "1 minute");
        assert_eq!(expiry_text(900), "15 minutes");
        assert_eq!(expiry_text(7200), "2 hours");
        assert_eq!(expiry_text(-5), "0 minutes");
    }

    #[test]
    fn log_notifier_always_succeeds() {
        let notifier = LogNotifier;
        let message = RenderedMessage {
            subject: "s".to_string(),
            body: "b".to_string(),
        };
        assert!(notifier
            .deliver(Channel::Email, "alice@example.com", &message)
            .is_ok());
    }
}
