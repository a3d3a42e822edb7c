use crate::api::{self, ServerConfig};
use anyhow::Result;

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to
/// start.
pub async fn execute(config: ServerConfig) -> Result<()> {
    api::new(config).await
}
