//! Session registry: every issued bearer credential is recorded so it can be
//! individually revoked, swept on expiry, and checked at the authorization
//! boundary.

pub mod jwt;
pub mod models;
pub mod repo;
pub mod service;

pub use models::{Session, SessionSource};
pub use service::SessionService;
