//! Link between the backend process supervisor and the engine.
//!
//! Whatever starts the backend process publishes its status on a
//! [`watch`] channel. Each time the backend becomes reachable the engine
//! skips its backoff wait and reconnects right away.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::engine::ProtocolEngine;

/// Lifecycle of the backend process as seen by its supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    #[default]
    Unknown,
    Starting,
    /// Accepting connections.
    Reachable,
    Exited,
}

/// Follow `status` and call [`ProtocolEngine::reconnect_now`] on every edge
/// into [`BackendStatus::Reachable`].
///
/// The task ends when the sender is dropped.
pub fn follow_backend(
    engine: ProtocolEngine,
    mut status: watch::Receiver<BackendStatus>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = *status.borrow_and_update();
        if last == BackendStatus::Reachable {
            engine.reconnect_now();
        }

        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            if current == last {
                continue;
            }
            tracing::debug!(?current, previous = ?last, "Backend status changed");
            if current == BackendStatus::Reachable {
                engine.reconnect_now();
            }
            last = current;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ConnectionState;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_task_ends_with_sender() {
        let engine = ProtocolEngine::builder().build().unwrap();
        let (tx, rx) = watch::channel(BackendStatus::Starting);
        let task = follow_backend(engine.clone(), rx);

        tx.send(BackendStatus::Exited).unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_reachable_edge_skips_backoff() {
        // Nothing listens on port 9; every attempt fails fast.
        let engine = ProtocolEngine::builder()
            .endpoint("ws://127.0.0.1:9/")
            .base_delay(Duration::from_secs(60))
            .max_delay(Duration::from_secs(60))
            .jitter_ratio(0.0)
            .build()
            .unwrap();
        let connecting = Arc::new(parking_lot::Mutex::new(0u32));
        let _sub = engine.on_state({
            let connecting = connecting.clone();
            move |state| {
                if *state == ConnectionState::Connecting {
                    *connecting.lock() += 1;
                }
            }
        });

        let (tx, rx) = watch::channel(BackendStatus::Starting);
        let _task = follow_backend(engine.clone(), rx);

        engine.connect();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*connecting.lock(), 1);
        assert_eq!(engine.reconnect_attempts(), 1);

        tx.send(BackendStatus::Reachable).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*connecting.lock(), 2);

        engine.shutdown();
    }
}
