//! Crate-wide error type for the wire layer.
//!
//! The flow-control core (`connection_rdy`, `reader_rdy`) never returns
//! `Result` to its caller — per spec, invariant violations are asserted and
//! out-of-range RDY requests are silently recorded. `Error`/`Result` here are
//! only used at the actual I/O boundary: connecting, reading and writing NSQ
//! frames, and parsing the IDENTIFY handshake.

/// A boxed, type-erased error. Kept deliberately loose, matching the way a
/// small client crate that wraps a socket protocol reports faults: the only
/// thing callers do with it is log it or propagate it with `?`.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// A `Result` alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
