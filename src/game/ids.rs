//! Monotonic id allocation for torpedoes and mines

/// Increment-and-return counter. Owned by the match world, never reset
/// mid-match, so an id is never handed out twice.
#[derive(Debug, Clone)]
pub struct IdCounter {
    next: u64,
}

impl IdCounter {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Allocate the next id
    #[inline]
    pub fn allocate(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Number of ids handed out so far
    pub fn issued(&self) -> u64 {
        self.next - 1
    }
}

impl Default for IdCounter {
    fn default() -> Self {
        Self::new()
    }
}
