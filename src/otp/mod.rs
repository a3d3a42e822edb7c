//! One-time code engine for the email/SMS second factor.

pub mod models;
pub mod repo;
pub mod service;

pub use models::{OtpCode, OtpType};
pub use service::OtpService;
