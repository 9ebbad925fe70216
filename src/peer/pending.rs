//! Pending-request table
//!
//! Maps outbound request IDs to suspended awaiters. The awaiters have
//! heterogeneous result types, so each entry holds a type-erased resumer
//! that decodes the dynamic value into the awaiter's concrete type before
//! resuming its single-shot slot.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::errors::Error;
use crate::protocol::jsonrpc::{from_result_value, RequestId};

type Resumer = Box<dyn FnOnce(Result<Value, Error>) + Send>;

/// Outstanding outbound requests keyed by ID.
///
/// An entry is removed the moment it is resumed, so a duplicate response
/// for the same ID simply finds nothing and is reported by the caller.
/// Awaiter-side cancellation does not remove entries; removal happens on
/// response arrival, send failure, or disconnect.
#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: HashMap<RequestId, Resumer>,
}

impl PendingRequests {
    /// Install an awaiter for `id`, typed to the expected result.
    pub fn insert<R>(&mut self, id: RequestId) -> oneshot::Receiver<Result<R, Error>>
    where
        R: DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            id,
            Box::new(move |outcome| {
                let decoded = outcome.and_then(from_result_value::<R>);
                // The receiver may have been cancelled; that is not an error.
                let _ = tx.send(decoded);
            }),
        );
        rx
    }

    /// Draw a random ID not currently in use.
    pub fn fresh_id(&self) -> RequestId {
        loop {
            let id = RequestId::random();
            if !self.entries.contains_key(&id) {
                return id;
            }
        }
    }

    /// Resume the awaiter for `id` with the decoded outcome. Returns false
    /// when no entry exists (unknown or already-resumed ID).
    pub fn resume(&mut self, id: &RequestId, outcome: Result<Value, Error>) -> bool {
        match self.entries.remove(id) {
            Some(resumer) => {
                resumer(outcome);
                true
            }
            None => false,
        }
    }

    /// Drop the entry for `id` without resuming it.
    pub fn remove(&mut self, id: &RequestId) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Resume every outstanding awaiter with `error`.
    pub fn drain(&mut self, error: &Error) {
        for (_, resumer) in self.entries.drain() {
            resumer(Err(error.clone()));
        }
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
