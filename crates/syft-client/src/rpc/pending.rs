//! In-flight polls keyed by request id.
//!
//! At most one entry exists per request id. An entry leaves the map when its
//! poll settles or when it is cancelled, whichever happens first; a settling
//! poll only removes the entry it was created with, identified by generation.

use super::types::PollResult;
use crate::Result;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

pub(crate) type PollFuture = Shared<BoxFuture<'static, Result<PollResult>>>;

struct PendingPoll {
    future: PollFuture,
    token: CancellationToken,
    generation: u64,
}

#[derive(Default)]
struct Polls {
    next_generation: u64,
    entries: HashMap<String, PendingPoll>,
}

#[derive(Default)]
pub(crate) struct PendingPolls {
    polls: Mutex<Polls>,
}

impl PendingPolls {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Polls> {
        self.polls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Join the poll for `request_id`, or start one with `make`.
    ///
    /// `make` receives the poll's cancellation token and the generation to
    /// hand back to `settle`. Returns the shared future and whether it was
    /// created by this call.
    pub(crate) fn join_or_start<F>(&self, request_id: &str, make: F) -> (PollFuture, bool)
    where
        F: FnOnce(CancellationToken, u64) -> BoxFuture<'static, Result<PollResult>>,
    {
        let mut polls = self.lock();
        if let Some(existing) = polls.entries.get(request_id) {
            return (existing.future.clone(), false);
        }

        polls.next_generation += 1;
        let generation = polls.next_generation;
        let token = CancellationToken::new();
        let future = make(token.clone(), generation).shared();
        polls.entries.insert(
            request_id.to_string(),
            PendingPoll {
                future: future.clone(),
                token,
                generation,
            },
        );
        (future, true)
    }

    /// Remove the entry for `request_id` if it is still `generation`.
    pub(crate) fn settle(&self, request_id: &str, generation: u64) {
        let mut polls = self.lock();
        if polls
            .entries
            .get(request_id)
            .is_some_and(|poll| poll.generation == generation)
        {
            polls.entries.remove(request_id);
        }
    }

    /// Remove and cancel one poll.
    pub(crate) fn cancel(&self, request_id: &str) -> bool {
        let removed = self.lock().entries.remove(request_id);
        match removed {
            Some(poll) => {
                poll.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove and cancel every poll.
    pub(crate) fn cancel_all(&self) -> usize {
        let drained: Vec<PendingPoll> = self.lock().entries.drain().map(|(_, poll)| poll).collect();
        for poll in &drained {
            poll.token.cancel();
        }
        drained.len()
    }

    pub(crate) fn request_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(id: &str) -> BoxFuture<'static, Result<PollResult>> {
        let result = PollResult {
            status: 200,
            request_id: id.to_string(),
            response: None,
        };
        async move { Ok(result) }.boxed()
    }

    #[tokio::test]
    async fn test_join_returns_existing_future() {
        let polls = PendingPolls::new();
        let (first, created) = polls.join_or_start("r1", |_, _| ready("r1"));
        assert!(created);
        let (second, created) = polls.join_or_start("r1", |_, _| panic!("must not start twice"));
        assert!(!created);
        assert_eq!(polls.len(), 1);

        assert_eq!(first.await.unwrap(), second.await.unwrap());
    }

    #[test]
    fn test_settle_ignores_newer_entry() {
        let polls = PendingPolls::new();
        let mut old = None;
        polls.join_or_start("r1", |token, generation| {
            old = Some((token, generation));
            ready("r1")
        });
        let (old_token, old_generation) = old.unwrap();

        assert!(polls.cancel("r1"));
        assert!(old_token.is_cancelled());
        let mut newer = 0;
        polls.join_or_start("r1", |_, generation| {
            newer = generation;
            ready("r1")
        });
        assert_ne!(newer, old_generation);

        polls.settle("r1", old_generation);
        assert_eq!(polls.request_ids(), vec!["r1".to_string()]);
        polls.settle("r1", newer);
        assert!(polls.request_ids().is_empty());
    }

    #[test]
    fn test_cancel_all() {
        let polls = PendingPolls::new();
        polls.join_or_start("a", |_, _| ready("a"));
        polls.join_or_start("b", |_, _| ready("b"));
        assert_eq!(polls.cancel_all(), 2);
        assert_eq!(polls.len(), 0);
        assert!(!polls.cancel("a"));
    }
}
