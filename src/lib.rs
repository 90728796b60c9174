#![deny(missing_docs, missing_debug_implementations)]
//! Grapheme cluster segmentation backed by compact serializable Unicode
//! property tries.
//!
//! The crate has two halves. The trie half maps every code point in
//! `0..=0x10FFFF` to a small integer value: [`CompactTrieBuilder`] assigns
//! values to points and ranges, then compacts the storage (deduplicating
//! and overlapping blocks) and freezes into the read-only [`CompactTrie`],
//! which also round-trips through an exact binary wire format. The
//! segmentation half reads two such tries (the grapheme cluster break
//! property table and the Extended_Pictographic table) through a
//! [`ClusterBreakClassifier`] and walks the UAX #29 rule table to split
//! text into user-perceived characters.
//!
//! Producing the serialized table blobs from the Unicode data files is an
//! offline concern and not part of this crate; any buffers conforming to
//! the wire format work. A typical host decodes the two blobs into a
//! classifier once at startup and shares it:
//!
//! ```text
//! let classifier = ClusterBreakClassifier::from_bytes(&type_blob, &ext_pict_blob)?;
//! let segmenter = GraphemeClusterSegmenter::new(&classifier);
//! let clusters = segmenter.segment(text);
//! ```
//!
//! Word and sentence boundaries, locale tailoring, and normalization are
//! out of scope; only default grapheme clusters (with the emoji ZWJ
//! extension) are implemented.

pub(crate) mod trie_layout;

pub(crate) mod error;

pub(crate) mod compact_trie;

pub(crate) mod trie_builder;

pub(crate) mod cluster_break;

pub(crate) mod segmenter;

pub use cluster_break::{ClusterBreak, ClusterBreakClassifier};

pub use compact_trie::CompactTrie;

pub use error::Error;

pub use segmenter::{GraphemeClusterSegmenter, Graphemes};

pub use trie_builder::CompactTrieBuilder;
