use std::time::Duration;

use tracing::{debug, info};

use crate::context::Connection;

/// What the host should do with the event that was checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Continue,
    /// Temporary failure; the session stays open.
    TempFail,
    /// Temporary failure, then close the session.
    TempFailDisconnect,
    /// The connection closed while the response was tarpitted. Nothing
    /// should be sent.
    Dropped,
}

/// The engine's answer to one host event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub action: Action,
    pub message: Option<String>,
    /// Deferral the host should apply, e.g. before retrying a delivery.
    pub delay: Option<Duration>,
}

impl Verdict {
    pub fn proceed() -> Self {
        Self {
            action: Action::Continue,
            message: None,
            delay: None,
        }
    }

    pub fn temp_fail(message: impl Into<String>) -> Self {
        Self {
            action: Action::TempFail,
            message: Some(message.into()),
            delay: None,
        }
    }

    pub fn disconnect(message: impl Into<String>) -> Self {
        Self {
            action: Action::TempFailDisconnect,
            message: Some(message.into()),
            delay: None,
        }
    }

    pub fn dropped() -> Self {
        Self {
            action: Action::Dropped,
            message: None,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn is_continue(&self) -> bool {
        self.action == Action::Continue
    }
}

impl Default for Verdict {
    fn default() -> Self {
        Self::proceed()
    }
}

/// Turns a limit violation into a response, optionally after a tarpit delay.
#[derive(Debug, Clone, Copy, Default)]
pub struct Penalizer {
    tarpit: Option<Duration>,
}

impl Penalizer {
    pub fn new(tarpit: Option<Duration>) -> Self {
        Self { tarpit }
    }

    pub fn tarpit(&self) -> Option<Duration> {
        self.tarpit
    }

    /// Build the soft-failure response for a violation.
    ///
    /// With a tarpit configured the response is released only after the
    /// delay. The wait suspends this event alone and ends early with
    /// [`Action::Dropped`] if the connection is closed in the meantime.
    pub async fn penalize(&self, conn: &Connection, disconnect: bool, message: &str) -> Verdict {
        let verdict = if disconnect {
            Verdict::disconnect(message)
        } else {
            Verdict::temp_fail(message)
        };

        let Some(delay) = self.tarpit else {
            return verdict;
        };

        info!(conn = %conn.id(), delay_secs = delay.as_secs(), "tarpitting response");
        tokio::select! {
            biased;
            _ = conn.closed_token().cancelled() => {
                debug!(conn = %conn.id(), "connection closed during tarpit, dropping response");
                Verdict::dropped()
            }
            _ = tokio::time::sleep(delay) => verdict,
        }
    }
}
