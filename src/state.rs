//! Consumer lifecycle.
use std::{fmt, time::Duration};

use tokio::sync::watch;

use crate::error::{Error, Result};

/// ```text
/// Created -> Subscribing -> (Assigned <-> Revoking) -> Closing -> Closed
/// ```
///
/// Any state may move straight to `Closed` on a fatal error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConsumerState {
    Created,
    Subscribing,
    Assigned,
    Revoking,
    Closing,
    Closed,
}

impl ConsumerState {
    pub fn can_transition_to(self, next: ConsumerState) -> bool {
        use ConsumerState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Closing, _) => false,
            (_, Closing) => true,
            (Created, Subscribing) => true,
            // a rebalance may start before the first assignment completes
            (Subscribing, Subscribing | Revoking | Assigned) => true,
            (Assigned, Revoking) => true,
            (Revoking, Assigned) => true,
            _ => false,
        }
    }

    /// Closing or closed: no more fetching, committing or rebalancing.
    pub fn is_shutting_down(self) -> bool {
        matches!(self, ConsumerState::Closing | ConsumerState::Closed)
    }
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsumerState::Created => "CREATED",
            ConsumerState::Subscribing => "SUBSCRIBING",
            ConsumerState::Assigned => "ASSIGNED",
            ConsumerState::Revoking => "REVOKING",
            ConsumerState::Closing => "CLOSING",
            ConsumerState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Current state, observable by every task of a consumer.
#[derive(Debug)]
pub(crate) struct StateCell {
    sender: watch::Sender<ConsumerState>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            sender: watch::Sender::new(ConsumerState::Created),
        }
    }

    pub fn get(&self) -> ConsumerState {
        *self.sender.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConsumerState> {
        self.sender.subscribe()
    }

    /// Move to `next`, returning the previous state.
    pub fn transition(&self, next: ConsumerState) -> Result<ConsumerState> {
        let mut outcome = Err(Error::InvalidState(String::new()));
        self.sender.send_if_modified(|state| {
            let previous = *state;
            if !previous.can_transition_to(next) {
                outcome = Err(Error::InvalidState(format!(
                    "consumer cannot go from {} to {}",
                    previous, next
                )));
                return false;
            }
            *state = next;
            outcome = Ok(previous);
            previous != next
        });
        if let Ok(previous) = outcome {
            if previous != next {
                tracing::debug!("Consumer state {} -> {}", previous, next);
            }
        }
        outcome
    }

    /// Wait until the state satisfies `done`.
    pub async fn wait_until(
        &self,
        timeout: Duration,
        operation: &'static str,
        done: impl FnMut(&ConsumerState) -> bool,
    ) -> Result<ConsumerState> {
        let mut receiver = self.subscribe();
        let outcome = match tokio::time::timeout(timeout, receiver.wait_for(done)).await {
            Ok(Ok(state)) => Ok(*state),
            // the sender lives as long as self
            Ok(Err(_)) => Err(Error::ConsumerClosed),
            Err(_) => Err(Error::timeout(operation, timeout)),
        };
        outcome
    }
}
