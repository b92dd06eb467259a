//! Message port to a running worker.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::warn;

use super::network::Network;
use super::storage::CacheStore;
use super::worker::{MessageReply, OfflineWorker, WorkerMessage, WorkerState};

struct Envelope {
  message: WorkerMessage,
  reply: Option<oneshot::Sender<MessageReply>>,
}

/// Clonable handle for posting control messages to a worker. Messages are
/// processed one at a time, in the order they were posted.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<Envelope>,
  state: watch::Receiver<WorkerState>,
}

impl WorkerHandle {
  pub fn spawn<S, N>(worker: Arc<OfflineWorker<S, N>>) -> Self
  where
    S: CacheStore + 'static,
    N: Network + 'static,
  {
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
    let state = worker.subscribe_state();

    tokio::spawn(async move {
      while let Some(envelope) = rx.recv().await {
        let reply = match worker.handle_message(envelope.message).await {
          Ok(reply) => reply,
          Err(e) => {
            warn!(message = ?envelope.message, error = %e, "Worker message failed");
            Some(MessageReply { success: false })
          }
        };

        if let (Some(port), Some(reply)) = (envelope.reply, reply) {
          let _ = port.send(reply);
        }
      }
    });

    Self { tx, state }
  }

  /// Fire and forget.
  pub fn post_message(&self, message: WorkerMessage) -> Result<()> {
    self
      .tx
      .send(Envelope {
        message,
        reply: None,
      })
      .map_err(|_| eyre!("Worker is not running"))
  }

  /// Post a message and wait on its reply port. Messages that do not reply
  /// resolve to `None`.
  pub async fn request(&self, message: WorkerMessage) -> Result<Option<MessageReply>> {
    let (port, reply) = oneshot::channel();
    self
      .tx
      .send(Envelope {
        message,
        reply: Some(port),
      })
      .map_err(|_| eyre!("Worker is not running"))?;

    Ok(reply.await.ok())
  }

  pub fn state(&self) -> WorkerState {
    *self.state.borrow()
  }

  pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
    self.state.clone()
  }
}
