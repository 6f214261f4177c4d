//! bytekv — an in-memory key-value server over a length-prefixed binary
//! protocol, driven by a single-threaded `poll(2)` loop.
//!
//! One tick of the engine carries a request the whole way:
//!
//! ```text
//! socket → conn (ingress) → wire (parse) → cmd (execute) → wire (encode)
//!        → conn (egress) → socket
//! ```
//!
//! The store behind `cmd` is a progressive-rehash dictionary ([`dict`]) with
//! an ordered AVL index ([`avl`]) alongside for rank and range machinery.

pub mod avl;
pub mod buf;
pub mod cli;
pub mod client;
pub mod cmd;
pub mod config;
pub mod conn;
pub mod dict;
pub mod hash;
pub mod server;
pub mod verbose;
pub mod wire;

// ─────────────────────────────────────────────────────────────────────────────
// Primary entry points, re-exported for binaries and tests.
// ─────────────────────────────────────────────────────────────────────────────

/// Byte queue backing connection ingress/egress.
pub use buf::Buf;
/// The process dictionary and command executor.
pub use cmd::Store;
/// Ordered index with positional queries.
pub use avl::AvlTree;
/// Progressive-rehash dictionary.
pub use dict::HMap;
/// Listener + event loop.
pub use server::Server;
/// Decoded tagged response value.
pub use wire::Value;
