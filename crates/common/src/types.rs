use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Timestamp in Unix epoch milliseconds
///
/// All core operations take an explicit `now` so tick-driven state machines
/// stay deterministic under test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("System time before Unix epoch");
        Self(duration.as_millis() as u64)
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed since `earlier`, saturating at zero.
    pub fn millis_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl std::ops::Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, millis: u64) -> Timestamp {
        Timestamp(self.0 + millis)
    }
}

impl std::ops::AddAssign<u64> for Timestamp {
    fn add_assign(&mut self, millis: u64) {
        self.0 += millis;
    }
}

impl std::ops::Sub<u64> for Timestamp {
    type Output = Timestamp;

    fn sub(self, millis: u64) -> Timestamp {
        Timestamp(self.0 - millis)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
