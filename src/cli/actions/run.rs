use super::{server, Action};
use anyhow::Result;

pub(super) async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Server(config) => server::execute(config).await,
    }
}
