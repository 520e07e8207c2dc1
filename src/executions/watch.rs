//! Status polling for a single execution.
//!
//! Polls until the execution reaches a terminal status, the shutdown future
//! resolves (Ctrl-C in the CLI), or polling keeps failing. Stopping a watch
//! never cancels the job itself.

use crate::api::ApiError;
use crate::executions::ExecutionStore;
use crate::model::{ExecutionRecord, ExecutionStatus, WatchEvent};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Floor applied to the poll interval; `tokio::time::interval` rejects zero.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
pub struct WatchParams {
    pub poll_interval: Duration,
    /// Consecutive failed polls tolerated before giving up.
    pub max_failures: u32,
}

/// Returns the final record, or `None` if the watch was interrupted.
pub async fn watch_execution(
    store: &mut ExecutionStore,
    id: &str,
    params: WatchParams,
    event_tx: UnboundedSender<WatchEvent>,
    shutdown: impl Future<Output = ()>,
) -> Result<Option<ExecutionRecord>, ApiError> {
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(params.poll_interval.max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_status: Option<ExecutionStatus> = store
        .current()
        .filter(|c| c.id == id)
        .map(|c| c.status);
    let mut failures = 0u32;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = event_tx.send(WatchEvent::Interrupted);
                return Ok(None);
            }
            _ = ticker.tick() => {
                match store.refresh_status(id).await {
                    Ok(fresh) => {
                        failures = 0;
                        if last_status != Some(fresh.status) {
                            let _ = event_tx.send(WatchEvent::StatusChanged {
                                id: id.to_string(),
                                from: last_status,
                                to: fresh.status,
                            });
                            last_status = Some(fresh.status);
                        }
                        if fresh.status.is_terminal() {
                            let _ = event_tx.send(WatchEvent::Finished {
                                execution: Box::new(fresh.clone()),
                            });
                            return Ok(Some(fresh));
                        }
                    }
                    // The gateway already dropped the token; polling again is pointless.
                    Err(e) if e.is_unauthorized() => return Err(e),
                    Err(e) => {
                        failures += 1;
                        let _ = event_tx.send(WatchEvent::PollFailed {
                            message: e.to_string(),
                            consecutive: failures,
                        });
                        if failures >= params.max_failures {
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}
