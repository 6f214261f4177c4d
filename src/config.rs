//! Compile-time tunables for the server engine.
//!
//! Everything here is a hard constant: the protocol limits are part of the
//! wire contract, the rest are engine sizing knobs.

/// 1 KiB.
pub const KB: usize = 1 << 10;
/// 1 MiB.
pub const MB: usize = 1 << 20;

// ── Wire contract ─────────────────────────────────────────────────────────────

/// Largest accepted request or response body, in bytes (32 MiB).
/// A request frame declaring more than this closes the connection; a response
/// body growing past it is replaced by an ERR reply.
pub const MAX_MSG: usize = 32 * MB;

/// Largest accepted argument count in a single request.
pub const MAX_ARGS: u32 = 200_000;

// ── Network defaults ──────────────────────────────────────────────────────────

/// Default TCP listening port.
pub const DEFAULT_PORT: u16 = 1234;

/// Bytes read from a socket per readiness event (64 KiB scratch).
pub const READ_CHUNK: usize = 64 * KB;

/// Cumulative egress bytes tolerated for a peer that is not reading: one
/// maximal response plus framing slack. Beyond this the connection is marked
/// for close.
pub const EGRESS_CAP: usize = MAX_MSG + 4 * KB;

// ── Dictionary sizing ─────────────────────────────────────────────────────────

/// Bucket count of a freshly created dictionary table. Must be a power of two.
pub const DICT_INITIAL_BUCKETS: usize = 4;

/// Average chain length that triggers table growth.
pub const DICT_MAX_LOAD: usize = 8;

/// Upper bound on nodes migrated from the draining table per dictionary
/// operation. Bounds per-operation latency during a rehash.
pub const DICT_MIGRATE_QUANTUM: usize = 128;
