use thiserror::Error;

/// Errors surfaced by trie construction, freezing and (de)serialization.
///
/// Lookups never error: an out-of-range code point deterministically
/// resolves to the trie's error value instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A code point outside `0..=0x10FFFF` was passed to a mutating call.
    #[error("invalid code point {0:#x}")]
    InvalidCodePoint(u32),
    /// An inverted or out-of-bounds range was passed to `set_range`.
    #[error("invalid code point range {start:#x}..={end:#x}")]
    InvalidRange {
        /// First code point of the rejected range.
        start: u32,
        /// Last code point of the rejected range.
        end: u32,
    },
    /// Mutation was attempted on a builder that has already been compacted.
    #[error("builder is already compacted")]
    AlreadyFinalized,
    /// The table no longer fits the fixed 16-bit shifted addressing space.
    /// This is fatal: it indicates a pathological input table, not a
    /// recoverable condition.
    #[error("trie data is too large for the 16-bit index encoding")]
    CapacityExceeded,
    /// A serialized trie had an inconsistent header, failed to decompress,
    /// or would resolve lookups out of bounds.
    #[error("malformed serialized trie data: {0}")]
    MalformedSerializedData(&'static str),
}
