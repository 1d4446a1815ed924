//! Transfer manager (C6): handle-based asynchronous transfers with
//! monitor/end/cancel, uniform across backends (spec section 4.5).
//!
//! `end` is the sole handle-release operation and must be called on every
//! exit path — the primary correctness invariant for leak-free handle
//! accounting (spec section 4.5, and the open question in spec section 9
//! about `copyToLocal_globus` skipping `endTransfer` on some exit paths:
//! here `end` is mandatory and handles left un-ended are detectable via
//! `TransferManager::outstanding`).

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::DigsError;

pub type TransferHandle = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum TransferStatus {
    InProgress(u8),
    Done,
    Failed(String),
}

enum Outcome {
    Pending(JoinHandle<Result<(), DigsError>>),
    Finished(Result<(), DigsError>),
    Cancelled,
}

struct Entry {
    outcome: Outcome,
    start: Instant,
    timeout: Duration,
}

/// Tracks every transfer currently in flight or awaiting `end`.
#[derive(Default)]
pub struct TransferManager {
    next_id: AtomicU64,
    entries: Mutex<HashMap<TransferHandle, Entry>>,
}

impl TransferManager {
    pub fn new() -> Self {
        TransferManager::default()
    }

    /// Starts a transfer, returning a handle only once it is IN_PROGRESS
    /// (spec section 4.5 rule 1). `timeout` should be the node's
    /// `copyTimeout`/`ftpTimeout`/`jobTimeout` as appropriate to the call.
    pub async fn start<F>(&self, timeout: Duration, op: F) -> TransferHandle
    where
        F: Future<Output = Result<(), DigsError>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let join = tokio::spawn(op);
        let entry = Entry {
            outcome: Outcome::Pending(join),
            start: Instant::now(),
            timeout,
        };
        self.entries.lock().await.insert(id, entry);
        id
    }

    /// Cheap poll; may be called arbitrarily often (spec section 4.5 rule
    /// 2). Resolves the pending join handle without blocking if it has
    /// already completed, and transitions to FAILED once `timeout` has
    /// elapsed since `start` (spec section 4.5 rule 4).
    pub async fn monitor(&self, handle: TransferHandle) -> Result<TransferStatus, DigsError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(&handle)
            .ok_or_else(|| DigsError::not_found(format!("no such transfer handle {handle}")))?;

        if let Outcome::Pending(join) = &mut entry.outcome {
            if join.is_finished() {
                let join = match std::mem::replace(&mut entry.outcome, Outcome::Cancelled) {
                    Outcome::Pending(j) => j,
                    _ => unreachable!(),
                };
                let result = match join.await {
                    Ok(r) => r,
                    Err(e) => Err(DigsError::protocol(format!("transfer task panicked: {e}"))),
                };
                entry.outcome = Outcome::Finished(result);
            } else if entry.start.elapsed() >= entry.timeout {
                join.abort();
                entry.outcome = Outcome::Finished(Err(DigsError::transient(format!(
                    "transfer {handle} exceeded timeout of {:?}",
                    entry.timeout
                ))));
            }
        }

        Ok(match &entry.outcome {
            Outcome::Pending(_) => TransferStatus::InProgress(50),
            Outcome::Finished(Ok(())) => TransferStatus::Done,
            Outcome::Finished(Err(e)) => TransferStatus::Failed(e.message.clone()),
            Outcome::Cancelled => TransferStatus::Failed("cancelled".to_string()),
        })
    }

    /// Cooperative cancellation: drives the state to FAILED at the next
    /// `monitor` observation (spec section 4.5).
    pub async fn cancel(&self, handle: TransferHandle) -> Result<(), DigsError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(&handle)
            .ok_or_else(|| DigsError::not_found(format!("no such transfer handle {handle}")))?;
        if let Outcome::Pending(join) = &entry.outcome {
            join.abort();
        }
        entry.outcome = Outcome::Cancelled;
        Ok(())
    }

    /// Sole handle-release operation; must be called in every terminal
    /// path (spec section 4.5 rule 3).
    pub async fn end(&self, handle: TransferHandle) -> Result<(), DigsError> {
        self.entries
            .lock()
            .await
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(|| DigsError::not_found(format!("no such transfer handle {handle}")))
    }

    /// Number of handles started but not yet `end`ed — a leak detector for
    /// tests and diagnostics.
    pub async fn outstanding(&self) -> usize {
        self.entries.lock().await.len()
    }
}
