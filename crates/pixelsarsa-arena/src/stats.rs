/// Per-episode statistics of a [`CatchGame`](crate::CatchGame).
///
/// # Example
///
/// ```
/// use pixelsarsa_arena::GameStats;
///
/// let mut stats = GameStats::new();
/// stats.record_catch();
/// stats.record_catch();
/// stats.record_miss();
///
/// assert_eq!(stats.score(), 1);
/// assert_eq!(stats.catches(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameStats {
    catches: usize,
    misses: usize,
}

impl GameStats {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            catches: 0,
            misses: 0,
        }
    }

    /// Catches minus misses.
    #[must_use]
    #[expect(clippy::cast_possible_wrap)]
    pub fn score(&self) -> i64 {
        self.catches as i64 - self.misses as i64
    }

    #[must_use]
    pub fn catches(&self) -> usize {
        self.catches
    }

    #[must_use]
    pub fn misses(&self) -> usize {
        self.misses
    }

    pub fn record_catch(&mut self) {
        self.catches += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }
}
