//! Dedicated writer task for outbound frames.
//!
//! The write half of the socket is owned by one task that receives encoded
//! frames through an mpsc channel. Callers never lock the socket; they queue
//! text and move on. Frame order on the wire equals queue order.
//!
//! # Architecture
//!
//! ```text
//! send_request ────┐
//! send_notification┼─► mpsc::Sender<String> ─► Writer Task ─► WebSocket sink
//! send_stream ─────┘
//! ```
//!
//! Queued frames are fed to the sink in batches and flushed once per batch.
//! When every [`WriterHandle`] is dropped the task sends a close frame and
//! exits cleanly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::error::{Result, SessionError};

/// Default writer queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Maximum frames fed before a flush.
const MAX_BATCH_SIZE: usize = 64;

/// Handle for queueing frames to the writer task.
///
/// Cheap to clone, but the engine keeps exactly one so that dropping it ends
/// the session's writer.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<String>,
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    /// Queue a frame without waiting.
    ///
    /// Returns `QueueFull` when the queue is at capacity and
    /// `ConnectionClosed` when the writer task has exited.
    pub fn try_send(&self, text: String) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.try_send(text).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => SessionError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SessionError::ConnectionClosed,
            }
        })
    }

    /// Frames queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for queueing frames.
pub fn spawn_writer_task<S>(sink: S, capacity: usize) -> (WriterHandle, JoinHandle<Result<()>>)
where
    S: Sink<Message, Error = WsError> + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
    };
    let task = tokio::spawn(writer_loop(rx, sink, pending));

    (handle, task)
}

/// Main writer loop - receives frames and writes them to the sink.
async fn writer_loop<S>(
    mut rx: mpsc::Receiver<String>,
    mut sink: S,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(text) => text,
            None => {
                // Every handle dropped: the session is over.
                let _ = sink.close().await;
                return Ok(());
            }
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(text) => batch.push(text),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        for text in batch {
            sink.feed(Message::text(text)).await?;
        }
        sink.flush().await?;

        pending.fetch_sub(batch_size, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::sink;
    use std::time::Duration;

    /// Collect everything the writer sends into an mpsc receiver.
    fn capture_sink() -> (
        impl Sink<Message, Error = WsError> + Unpin + Send + 'static,
        mpsc::UnboundedReceiver<Message>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = sink::unfold(tx, |tx, msg: Message| async move {
            tx.send(msg).map_err(|_| WsError::ConnectionClosed)?;
            Ok::<_, WsError>(tx)
        });
        (Box::pin(sink), rx)
    }

    #[tokio::test]
    async fn test_frames_written_in_queue_order() {
        let (sink, mut out) = capture_sink();
        let (handle, _task) = spawn_writer_task(sink, 16);

        for i in 0..10 {
            handle.try_send(format!("{{\"n\":{i}}}")).unwrap();
        }

        for i in 0..10 {
            let msg = tokio::time::timeout(Duration::from_secs(1), out.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(msg, Message::text(format!("{{\"n\":{i}}}")));
        }
    }

    #[tokio::test]
    async fn test_pending_count_drains() {
        let (sink, mut out) = capture_sink();
        let (handle, _task) = spawn_writer_task(sink, 16);

        handle.try_send("{}".to_string()).unwrap();
        out.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_try_send_full_queue() {
        let (tx, _rx) = mpsc::channel::<String>(1);
        let handle = WriterHandle {
            tx,
            pending: Arc::new(AtomicUsize::new(0)),
        };

        handle.try_send("a".to_string()).unwrap();
        let result = handle.try_send("b".to_string());

        assert!(matches!(result, Err(SessionError::QueueFull)));
        assert_eq!(handle.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_try_send_after_writer_exit() {
        let (tx, rx) = mpsc::channel::<String>(4);
        drop(rx);
        let handle = WriterHandle {
            tx,
            pending: Arc::new(AtomicUsize::new(0)),
        };

        assert!(matches!(
            handle.try_send("a".to_string()),
            Err(SessionError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_handle_drop() {
        let (sink, _out) = capture_sink();
        let (handle, task) = spawn_writer_task(sink, 4);

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }
}
