//! TOTP enrollment, verification, and backup codes.
//!
//! Secrets are encrypted at rest (ChaCha20-Poly1305, AAD bound to the owning
//! user and credential) and decrypted only inside verification. A credential
//! is created disabled and flips enabled on the first successful
//! verification after setup.

pub mod backup;
pub mod models;
pub mod repo;
pub mod service;

pub use models::{TotpCredential, TotpStatus};
pub use service::TotpService;
