use crate::error::HarnessError;

/// Position in the plan: how many assertions have been consumed.
///
/// Only moves forward, one assertion per request, and never past the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    next: usize,
    total: usize,
    rejected: usize,
}

impl Cursor {
    /// A cursor over a plan of `total` assertions, positioned at the first.
    pub fn new(total: usize) -> Self {
        Self {
            next: 0,
            total,
            rejected: 0,
        }
    }

    /// Consume the next assertion and return its index.
    ///
    /// Fails once every assertion has been consumed. Each rejected request
    /// is counted, so `received` reports how many requests arrived in total.
    pub fn advance(&mut self) -> Result<usize, HarnessError> {
        if self.next >= self.total {
            self.rejected += 1;
            return Err(HarnessError::PlanExhausted {
                total: self.total,
                received: self.total + self.rejected,
            });
        }
        let index = self.next;
        self.next += 1;
        Ok(index)
    }

    pub fn consumed(&self) -> usize {
        self.next
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_exhausted(&self) -> bool {
        self.next == self.total
    }
}
