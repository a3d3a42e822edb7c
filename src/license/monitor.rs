//! Background license monitor.
//!
//! The monitor is an explicitly owned task handle: the composition root
//! starts it, keeps the handle, and stops it at shutdown. There is no
//! ambient global. Ping failures are logged and degrade to the grace-period
//! policy; they never propagate into request handling.

use chrono::Utc;
use sqlx::PgPool;
use std::time::Duration;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::{info, warn};

use super::{
    client::LicenseClient,
    state::{LicenseState, LicenseStateRepo},
    tiers::LicenseTier,
    LicenseGate,
};

/// Handle to the running monitor. Dropping it without `stop()` leaves the
/// task running until the runtime shuts down; call `stop()` for an orderly
/// exit.
pub struct LicenseMonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LicenseMonitorHandle {
    /// Signal the monitor to stop and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Start the periodic ping loop. `interval` is how often the license is
/// re-validated; each successful ping refreshes the gate and the persisted
/// cache.
#[must_use]
pub fn start_license_monitor(
    pool: PgPool,
    gate: LicenseGate,
    client: LicenseClient,
    license_key: String,
    device_id: String,
    interval: Duration,
) -> LicenseMonitorHandle {
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        loop {
            match client.ping(&license_key, &device_id).await {
                Ok(remote) => {
                    let state = LicenseState {
                        license_key: license_key.clone(),
                        tier: LicenseTier::parse(&remote.tier),
                        expires_at: remote.expires_at,
                        device_id: device_id.clone(),
                        last_validated_at: Utc::now(),
                        active: remote.active,
                    };
                    if let Err(err) = LicenseStateRepo::save(&pool, &state).await {
                        warn!("failed to persist license state: {err:#}");
                    }
                    info!(tier = %state.tier, "license validated");
                    gate.update(Some(state));
                }
                Err(err) => {
                    // Keep the cached state; the gate's grace period decides
                    // how long it stays trustworthy.
                    warn!("license ping failed, staying on cached state: {err:#}");
                }
            }

            tokio::select! {
                () = sleep(interval) => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("license monitor stopped");
    });

    LicenseMonitorHandle { shutdown, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result as AnyResult;
    use sqlx::postgres::PgPoolOptions;
    use url::Url;

    #[tokio::test]
    async fn monitor_stops_on_request() -> AnyResult<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let gate = LicenseGate::new(None);
        // Unroutable endpoint: the first ping fails fast and the monitor
        // falls back to the cached (absent) state.
        let client = LicenseClient::new(Url::parse("http://127.0.0.1:9/")?)?;
        let handle = start_license_monitor(
            pool,
            gate.clone(),
            client,
            "key".to_string(),
            "device".to_string(),
            Duration::from_secs(3600),
        );
        handle.stop().await;
        assert_eq!(gate.effective_tier(), LicenseTier::Free);
        Ok(())
    }
}
