// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Annotation keys understood by the engine
pub mod annotations {
    /// When set to "true", events for the object are not reconciled
    pub const PAUSED: &str = "converge.geeko.me/paused";
}

/// Default finalizer token of the bundled binary
pub const DEFAULT_FINALIZER: &str = "converge.geeko.me/cleanup";

/// Well-known condition types and reasons
pub mod conditions {
    pub const READY: &str = "Ready";
    pub const RECONCILED: &str = "Reconciled";
}

/// Work queue retry policy defaults
pub mod backoff {
    /// First retry delay in milliseconds, doubled per consecutive failure
    pub const BASE_DELAY_MS: u64 = 5;
    /// Ceiling for the retry delay in seconds
    pub const MAX_DELAY_SECS: u64 = 300;
}

/// Optimistic concurrency retry defaults
pub mod conflict {
    pub const RETRIES: u32 = 5;
    pub const RETRY_DELAY_MS: u64 = 10;
}

/// Leader election defaults
pub mod lease {
    pub const DURATION_SECS: u64 = 15;
    pub const RENEW_DEADLINE_SECS: u64 = 10;
    pub const RENEW_INTERVAL_SECS: u64 = 5;
    pub const RETRY_PERIOD_SECS: u64 = 2;
    pub const DEFAULT_NAME: &str = "converge-leader";
}

/// Kind discovery polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for a kind
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}

/// Process lifecycle defaults
pub mod lifecycle {
    pub const SHUTDOWN_GRACE_SECS: u64 = 30;
    pub const CACHE_SYNC_TIMEOUT_SECS: u64 = 120;
    pub const WORKERS: usize = 1;
}
