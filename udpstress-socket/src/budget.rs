use std::time::Duration;

/// The remaining time a client flow may keep resending and waiting. It only ever
/// shrinks; once exhausted, the next timeout closes the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitBudget {
    remaining: Duration,
}

impl WaitBudget {
    pub const fn new(initial: Duration) -> Self {
        Self { remaining: initial }
    }

    pub const fn remaining(&self) -> Duration {
        self.remaining
    }

    pub const fn is_exhausted(&self) -> bool {
        self.remaining.is_zero()
    }

    /// Returns the delay until the next wakeup and consumes it from the budget.
    ///
    /// A `candidate` resend delay shorter than the remaining budget is used as is.
    /// Otherwise the whole remaining budget becomes the final wakeup.
    pub fn schedule(&mut self, candidate: Duration) -> Duration {
        if candidate < self.remaining {
            self.remaining -= candidate;
            candidate
        } else {
            std::mem::take(&mut self.remaining)
        }
    }
}
