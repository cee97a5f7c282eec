/// Timing constants for descriptor publishing and session upkeep
///
/// All values are in milliseconds to match [`crate::Timestamp`].
pub mod timing {
    /// How often a healthy intro set is re-published to the DHT
    pub const INTROSET_PUBLISH_INTERVAL: u64 = 30 * 60 * 1000;

    /// Minimum backoff between publish attempts after a failure or while
    /// the published set has expired introductions
    pub const INTROSET_PUBLISH_RETRY_INTERVAL: u64 = 60 * 1000;

    /// Maximum advertised lifetime of one introduction
    pub const INTRO_LIFETIME: u64 = 30 * 60 * 1000;

    /// Remaining intro lifetime below which an outbound session refreshes
    /// the remote's intro set
    pub const INTRO_REFRESH_THRESHOLD: u64 = 30 * 1000;

    /// Deadline for a hidden service address lookup
    pub const LOOKUP_TIMEOUT: u64 = 10 * 1000;

    /// Deadline for a router contact lookup
    pub const ROUTER_LOOKUP_TIMEOUT: u64 = 10 * 1000;

    /// Deadline for the first-frame handshake
    pub const HANDSHAKE_TIMEOUT: u64 = 10 * 1000;

    /// Lifetime of one established path before rotation
    pub const PATH_LIFETIME: u64 = 10 * 60 * 1000;

    /// How long a path build may stay in progress before timing out
    pub const PATH_BUILD_TIMEOUT: u64 = 30 * 1000;

    /// Re-query interval for a prefetched tag
    pub const TAG_REFRESH_INTERVAL: u64 = 10 * 1000;

    /// Idle window after which a fully-expired outbound session is dropped
    pub const SESSION_KEEP_ALIVE: u64 = 60 * 1000;
}

/// DHT fan-out parameters
pub mod dht {
    /// Replication factor for descriptor publishes
    pub const PUBLISH_RELAY_ORDER: u64 = 4;

    /// Recursion depth for descriptor lookups
    pub const LOOKUP_RELAY_ORDER: u64 = 5;
}

/// Path pool parameters
pub mod routing {
    /// Hops per path
    pub const DEFAULT_NUM_HOPS: usize = 4;

    /// Target pool size for an endpoint's own path set
    pub const DEFAULT_NUM_PATHS: usize = 2;

    /// Paths rebuilt when an outbound session shifts introduction
    pub const ALIGN_REBUILD_PATHS: usize = 2;
}

/// Session cache parameters
pub mod session {
    /// Upper bound on cached conversations; least-recently-used entries
    /// are evicted past this
    pub const MAX_SESSIONS: usize = 512;

    /// Per-conversation sliding window for replay rejection
    pub const REPLAY_WINDOW: u64 = 16;
}
