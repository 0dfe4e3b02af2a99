//! Turn budget for the analysis loop.

/// Counts consumed turns against a fixed maximum.
///
/// A turn is consumed by each executed tool round and by each rejected final
/// answer. The counter never exceeds `max_turns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnBudget {
    max_turns: u32,
    used: u32,
}

impl TurnBudget {
    pub fn new(max_turns: u32) -> Self {
        Self { max_turns, used: 0 }
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.max_turns
    }

    /// Consume one turn, returning the new count, or `None` when no turn is left.
    pub fn consume(&mut self) -> Option<u32> {
        if self.is_exhausted() {
            return None;
        }
        self.used += 1;
        Some(self.used)
    }
}
