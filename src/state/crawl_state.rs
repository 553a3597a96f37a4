/// Lifecycle states of a crawl run
///
/// ```text
/// Idle -> Running -> Stopped
///            \-> Draining -> Stopped
/// ```
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlState {
    /// Constructed, seed not yet offered
    Idle,

    /// Dequeuing and fetching pages
    Running,

    /// An interrupt arrived; no further dequeues
    Draining,

    /// Terminal
    Stopped,
}

impl CrawlState {
    /// Returns true if moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: CrawlState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Running)
                | (Self::Running, Self::Draining)
                | (Self::Running, Self::Stopped)
                | (Self::Draining, Self::Stopped)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Returns true while the loop may still dequeue work
    pub fn accepts_work(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for CrawlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
