//! Response correlation
//!
//! Holds the one outstanding call and decides what each parsed response
//! means for it.

use std::cmp::Ordering;

use serde_json::Value;
use tokio::sync::oneshot;

use k4_protocol::{RequestId, Response, ResponseId};

use crate::error::CallError;

/// Delivers the outcome of one call
pub(crate) type Continuation = oneshot::Sender<Result<Value, CallError>>;

/// What a response id means relative to the pending id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Older than the pending call, or negative; dropped
    Stale,
    /// Newer than the pending call; the stream is out of sync
    Mismatch,
    /// Answers the pending call
    Matched,
}

impl Verdict {
    pub fn classify(pending: RequestId, got: ResponseId) -> Self {
        let Ok(got) = RequestId::try_from(got) else {
            return Self::Stale;
        };
        match got.cmp(&pending) {
            Ordering::Less => Self::Stale,
            Ordering::Greater => Self::Mismatch,
            Ordering::Equal => Self::Matched,
        }
    }
}

struct Pending {
    id: RequestId,
    continuation: Continuation,
}

/// Tracks the single in-flight call
#[derive(Default)]
pub(crate) struct Correlator {
    pending: Option<Pending>,
}

impl Correlator {
    pub fn pending_id(&self) -> Option<RequestId> {
        self.pending.as_ref().map(|p| p.id)
    }

    /// Record a newly accepted call. The caller has already checked that the
    /// slot is free.
    pub fn begin(&mut self, id: RequestId, continuation: Continuation) {
        debug_assert!(self.pending.is_none(), "call accepted while busy");
        self.pending = Some(Pending { id, continuation });
    }

    /// Drop the pending call without resolving it, if it is still `id`
    pub fn abandon(&mut self, id: RequestId) -> bool {
        if self.pending_id() == Some(id) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    /// Route a parsed response. Returns the verdict, or `None` if nothing
    /// was pending.
    pub fn on_response(&mut self, response: Response) -> Option<Verdict> {
        let pending_id = self.pending_id()?;
        let verdict = Verdict::classify(pending_id, response.id);

        match verdict {
            Verdict::Stale => {
                tracing::debug!(
                    pending = pending_id,
                    got = response.id,
                    "Discarding stale response"
                );
            }
            Verdict::Mismatch => {
                tracing::warn!(
                    expected = pending_id,
                    got = response.id,
                    "Response id ahead of pending call"
                );
                self.resolve(Err(CallError::IdMismatch {
                    expected: pending_id,
                    got: response.id,
                }));
            }
            Verdict::Matched => {
                let outcome = response.into_outcome().map_err(CallError::Application);
                self.resolve(outcome);
            }
        }

        Some(verdict)
    }

    /// Fail the pending call, if any. Returns whether a call was failed.
    pub fn fail(&mut self, err: CallError) -> bool {
        if self.pending.is_some() {
            self.resolve(Err(err));
            true
        } else {
            false
        }
    }

    fn resolve(&mut self, outcome: Result<Value, CallError>) {
        if let Some(pending) = self.pending.take() {
            if pending.continuation.send(outcome).is_err() {
                tracing::debug!(id = pending.id, "Caller stopped waiting for response");
            }
        }
    }
}
