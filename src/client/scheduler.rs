//! Cancellable one-shot timer with at most one live instance.
//!
//! Arming a [`ScheduledTask`] aborts whatever it had pending and hands out a
//! fresh [`Ticket`]. The timer's callback runs on another task, so by the
//! time its notification is processed the owner may already have re-armed
//! or cancelled; [`ScheduledTask::claim`] rejects such stale tickets.

use std::time::Duration;

use tokio::task::JoinHandle;

/// Identifies one arming of a [`ScheduledTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

/// A debounce timer: `arm` resets, `cancel` stops, `claim` consumes a fire.
#[derive(Debug, Default)]
pub struct ScheduledTask {
    generation: u64,
    armed: Option<Ticket>,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// Creates an idle task.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms (or re-arms) the timer. Any previously pending fire is aborted.
    ///
    /// `on_fire` runs once after `delay` with the returned ticket.
    pub fn arm<F>(&mut self, delay: Duration, on_fire: F) -> Ticket
    where
        F: FnOnce(Ticket) + Send + 'static,
    {
        self.cancel();
        self.generation = self.generation.wrapping_add(1);
        let ticket = Ticket(self.generation);
        self.armed = Some(ticket);
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(ticket);
        }));
        ticket
    }

    /// Stops the pending fire, if any. Returns `true` if one was pending.
    pub fn cancel(&mut self) -> bool {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.armed.take().is_some()
    }

    /// Returns `true` while a fire is pending.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Accepts a fire notification. Returns `false` for a ticket that was
    /// superseded by a later `arm` or `cancel`.
    pub fn claim(&mut self, ticket: Ticket) -> bool {
        if self.armed == Some(ticket) {
            self.armed = None;
            self.handle = None;
            true
        } else {
            false
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
