use std::sync::Arc;
use std::time::Duration;

use crate::error::CoreError;
use crate::state::Shared;
use crate::Shutdown;

/// Runs the Cleaner loop: every `cleaner_interval()`, evicts clients whose
/// `last-activity` is older than `config.cleanup_timeout` by calling
/// [`Shared::reset_filter`] on each (§4.4). Exits when `shutdown` fires.
pub async fn run(shared: Arc<Shared>, mut shutdown: Shutdown) -> Result<(), CoreError> {
    let mut tick = tokio::time::interval(shared.config.cleaner_interval());
    // The first tick fires immediately; skip it so we wait a full interval before
    // the first sweep.
    tick.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("cleaner stopping");
                break;
            }
            _ = tick.tick() => {
                sweep(&shared, shared.config.cleanup_timeout).await?;
            }
        }
    }
    Ok(())
}

async fn sweep(shared: &Shared, timeout: Duration) -> Result<(), CoreError> {
    let idle = shared.idle_clients(timeout).await;
    for client_id in idle {
        tracing::info!(client_id, "evicting idle client");
        shared.reset_filter(client_id).await?;
    }
    Ok(())
}
