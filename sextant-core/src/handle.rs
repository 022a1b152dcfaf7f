//! Pollable handles to parse outcomes that are produced concurrently.
//!
//! A [`ParseHandle`] is what a parser hands back from `parse`: it may already
//! hold its outcome, wait on a value sent from another thread, or join several
//! child handles. Consumers use [`ParseHandle::try_take`] for a zero-timeout
//! check and [`ParseHandle::wait`] to block until the outcome exists.

use std::panic::{catch_unwind, AssertUnwindSafe};

use thiserror::Error;
use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::types::ParseResult;

/// Errors surfaced when retrieving an outcome from a handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandleError {
    /// The producing side went away without sending an outcome.
    #[error("parse outcome was abandoned before completion")]
    Abandoned,

    /// The outcome was already retrieved from this handle.
    #[error("parse outcome was already taken")]
    Consumed,
}

/// Producing half of a channel-backed handle.
#[derive(Debug)]
pub struct ParseSender {
    tx: oneshot::Sender<ParseResult>,
}

impl ParseSender {
    /// Publish the outcome. A dropped handle is not an error for the producer.
    pub fn send(self, result: ParseResult) {
        let _ = self.tx.send(result);
    }
}

#[derive(Debug)]
enum State {
    Ready(ParseResult),
    Pending(oneshot::Receiver<ParseResult>),
    Joined(Vec<Child>),
    Taken,
}

#[derive(Debug)]
struct Child {
    handle: ParseHandle,
    outcome: Option<ParseResult>,
}

/// Handle to a parse outcome that may not exist yet.
#[derive(Debug)]
pub struct ParseHandle {
    state: State,
}

impl ParseHandle {
    /// A handle that already holds its outcome.
    pub fn ready(result: ParseResult) -> Self {
        Self {
            state: State::Ready(result),
        }
    }

    /// A handle fed by the returned sender.
    pub fn channel() -> (ParseSender, ParseHandle) {
        let (tx, rx) = oneshot::channel();
        (
            ParseSender { tx },
            Self {
                state: State::Pending(rx),
            },
        )
    }

    /// Run `job` on the global rayon pool and return a handle to its outcome.
    ///
    /// A panicking job drops its sender, so the handle reports
    /// [`HandleError::Abandoned`].
    pub fn spawn<F>(job: F) -> Self
    where
        F: FnOnce() -> ParseResult + Send + 'static,
    {
        let (sender, handle) = Self::channel();
        rayon::spawn(move || match catch_unwind(AssertUnwindSafe(job)) {
            Ok(result) => sender.send(result),
            Err(_) => tracing::error!("Parse job panicked; outcome abandoned"),
        });
        handle
    }

    /// A handle resolving once every child resolves, to the worst child outcome.
    ///
    /// A child that errors counts as [`ParseResult::Fail`]. Joining nothing
    /// yields an immediate `Success`.
    pub fn join(handles: Vec<ParseHandle>) -> Self {
        if handles.is_empty() {
            return Self::ready(ParseResult::Success);
        }
        let children = handles
            .into_iter()
            .map(|handle| Child {
                handle,
                outcome: None,
            })
            .collect();
        Self {
            state: State::Joined(children),
        }
    }

    /// Zero-timeout check: `Ok(None)` while the outcome is still pending.
    pub fn try_take(&mut self) -> Result<Option<ParseResult>, HandleError> {
        let outcome = match &mut self.state {
            State::Ready(result) => Ok(Some(*result)),
            State::Pending(rx) => match rx.try_recv() {
                Ok(result) => Ok(Some(result)),
                Err(TryRecvError::Empty) => Ok(None),
                Err(TryRecvError::Closed) => Err(HandleError::Abandoned),
            },
            State::Joined(children) => {
                for child in children.iter_mut().filter(|c| c.outcome.is_none()) {
                    child.outcome = match child.handle.try_take() {
                        Ok(outcome) => outcome,
                        Err(_) => Some(ParseResult::Fail),
                    };
                }
                if children.iter().all(|c| c.outcome.is_some()) {
                    Ok(Some(
                        children
                            .iter()
                            .filter_map(|c| c.outcome)
                            .fold(ParseResult::Success, ParseResult::worst),
                    ))
                } else {
                    Ok(None)
                }
            }
            State::Taken => Err(HandleError::Consumed),
        };

        if !matches!(outcome, Ok(None)) {
            self.state = State::Taken;
        }
        outcome
    }

    /// Block until the outcome exists.
    ///
    /// Must not be called from inside an async runtime.
    pub fn wait(self) -> Result<ParseResult, HandleError> {
        match self.state {
            State::Ready(result) => Ok(result),
            State::Pending(rx) => rx.blocking_recv().map_err(|_| HandleError::Abandoned),
            State::Joined(children) => Ok(children
                .into_iter()
                .map(|child| match child.outcome {
                    Some(outcome) => outcome,
                    None => child.handle.wait().unwrap_or(ParseResult::Fail),
                })
                .fold(ParseResult::Success, ParseResult::worst)),
            State::Taken => Err(HandleError::Consumed),
        }
    }
}
