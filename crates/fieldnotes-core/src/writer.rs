//! Background snapshot writer.
//!
//! Mutations publish the latest full document into a watch channel. A single
//! task saves whatever is newest when it gets to run, so writes are
//! serialized and an older snapshot never lands after a newer one.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::Persistence;

pub(crate) struct SnapshotWriter {
    tx: watch::Sender<Option<String>>,
    task: JoinHandle<()>,
}

impl SnapshotWriter {
    /// Spawn the writer task. Must be called from within a tokio runtime.
    pub(crate) fn spawn(persistence: Arc<dyn Persistence>, key: String) -> Self {
        let (tx, mut rx) = watch::channel::<Option<String>>(None);

        let task = tokio::spawn(async move {
            // Keeps delivering the last unseen value after the sender closes.
            while rx.changed().await.is_ok() {
                let document = (*rx.borrow_and_update()).clone();
                let Some(document) = document else {
                    continue;
                };
                match persistence.save(&key, &document).await {
                    Ok(()) => debug!(key = %key, bytes = document.len(), "saved notes"),
                    Err(e) => warn!(key = %key, error = %e, "failed to save notes"),
                }
            }
        });

        Self { tx, task }
    }

    /// Hand a new document to the writer without waiting for it.
    pub(crate) fn publish(&self, document: String) {
        self.tx.send_replace(Some(document));
    }

    /// Stop accepting documents and wait until the last one is written.
    pub(crate) async fn close(self) {
        let Self { tx, task } = self;
        drop(tx);
        if let Err(e) = task.await {
            warn!(error = %e, "snapshot writer task failed");
        }
    }
}
