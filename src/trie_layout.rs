//! Layout constants shared by the frozen trie and its builder.
//!
//! The two-level trie packs an index-1 table (one entry per 2048 code
//! points), an index-2 table (one entry per 32 code points) and 32-value
//! data blocks into a single `u32` array. Index values are stored right-
//! shifted by [`INDEX_SHIFT`], which requires data blocks to be aligned to
//! [`DATA_GRANULARITY`]. The numeric values here define the wire format and
//! must not change.

/// Shift size for getting the index-1 table offset.
pub(crate) const SHIFT_1: usize = 6 + 5;

/// Shift size for getting the index-2 table offset.
pub(crate) const SHIFT_2: usize = 5;

/// Difference between the two shift sizes, for getting an index-1 offset
/// from an index-2 offset. `6=11-5`.
pub(crate) const SHIFT_1_2: usize = SHIFT_1 - SHIFT_2;

/// Number of index-1 entries for the BMP. `32=0x20`.
/// This part of the index-1 table is omitted from the frozen form.
pub(crate) const OMITTED_BMP_INDEX_1_LENGTH: usize = 0x10000 >> SHIFT_1;

/// Number of entries in an index-2 block. `64=0x40`.
pub(crate) const INDEX_2_BLOCK_LENGTH: usize = 1 << SHIFT_1_2;

/// Mask for getting the lower bits for the in-index-2-block offset.
pub(crate) const INDEX_2_MASK: usize = INDEX_2_BLOCK_LENGTH - 1;

/// Shift size applied to stored index values. Widens the addressable data
/// space of 16-bit index values at the cost of compactability.
pub(crate) const INDEX_SHIFT: usize = 2;

/// Number of entries in a data block. `32=0x20`.
pub(crate) const DATA_BLOCK_LENGTH: usize = 1 << SHIFT_2;

/// Mask for getting the lower bits for the in-data-block offset.
pub(crate) const DATA_MASK: usize = DATA_BLOCK_LENGTH - 1;

/// The part of the index-2 table for U+D800..U+DBFF stores values for lead
/// surrogate code *units*, not code *points*. Values for lead surrogate
/// code points are indexed through this separate section instead.
pub(crate) const LSCP_INDEX_2_OFFSET: usize = 0x10000 >> SHIFT_2;

/// Length of the lead-surrogate-code-point index-2 section. `32=0x20`.
pub(crate) const LSCP_INDEX_2_LENGTH: usize = 0x400 >> SHIFT_2;

/// Combined length of both BMP index-2 pieces. `2080=0x820`.
pub(crate) const INDEX_2_BMP_LENGTH: usize = LSCP_INDEX_2_OFFSET + LSCP_INDEX_2_LENGTH;

/// The 2-byte UTF-8 version of the index-2 table follows at `2080=0x820`,
/// one entry per lead byte `C0..DF` regardless of [`SHIFT_2`].
pub(crate) const UTF8_2B_INDEX_2_OFFSET: usize = INDEX_2_BMP_LENGTH;

/// Length of the 2-byte UTF-8 index-2 section. `32=0x20`.
pub(crate) const UTF8_2B_INDEX_2_LENGTH: usize = 0x800 >> 6;

/// The index-1 table for supplementary code points, at `2112=0x840`.
/// Variable length, for code points up to `high_start`. Omitted entirely,
/// along with the supplementary index-2 part that follows it, when the trie
/// holds only BMP data.
pub(crate) const INDEX_1_OFFSET: usize = UTF8_2B_INDEX_2_OFFSET + UTF8_2B_INDEX_2_LENGTH;

/// Maximum length of the supplementary index-1 table. `512=0x200`.
pub(crate) const MAX_INDEX_1_LENGTH: usize = 0x100000 >> SHIFT_1;

/// The alignment size of a data block, and the granularity of compaction.
pub(crate) const DATA_GRANULARITY: usize = 1 << INDEX_SHIFT;

/// Highest valid Unicode code point.
pub(crate) const MAX_CODE_POINT: u32 = 0x10FFFF;

// Builder-only constants below.

/// Number of code points per index-1 table entry. `2048=0x800`.
pub(crate) const CP_PER_INDEX_1_ENTRY: usize = 1 << SHIFT_1;

/// The BMP part of the build-time index-2 table is fixed and linear and
/// starts at offset 0.
pub(crate) const INDEX_2_OFFSET: usize = 0;

/// The illegal-UTF-8 data block follows the ASCII blocks, at `128=0x80`.
/// Used with linear access for single bytes 0..0xBF for simple error
/// handling. Length `64=0x40`, not [`DATA_BLOCK_LENGTH`].
pub(crate) const BAD_UTF8_DATA_OFFSET: usize = 0x80;

/// The start of non-linear-ASCII data blocks, at `192=0xC0`.
pub(crate) const DATA_START_OFFSET: usize = 0xC0;

/// The null data block. Length `64=0x40` even though data blocks are
/// shorter, to work with 6-bit trail bytes from 2-byte UTF-8.
pub(crate) const DATA_NULL_OFFSET: usize = DATA_START_OFFSET;

/// The start of allocated data blocks.
pub(crate) const NEW_DATA_START_OFFSET: usize = DATA_NULL_OFFSET + 0x40;

/// The start of data blocks for U+0800 and above. Below this, compaction
/// uses a block length of 64 for 2-byte UTF-8; from here on it uses
/// [`DATA_BLOCK_LENGTH`].
pub(crate) const DATA_0800_OFFSET: usize = NEW_DATA_START_OFFSET + 0x780;

/// Initial allocation of the build-time data array.
pub(crate) const INITIAL_DATA_LENGTH: usize = 1 << 14;

/// Grow about 8x when the initial allocation runs out.
pub(crate) const MEDIUM_DATA_LENGTH: usize = 1 << 17;

/// Maximum length of the runtime data array, limited by the 16-bit index
/// values left-shifted by [`INDEX_SHIFT`].
pub(crate) const MAX_DATA_LENGTH_RUNTIME: usize = 0xFFFF << INDEX_SHIFT;

/// Number of entries in the build-time index-1 table.
pub(crate) const INDEX_1_LENGTH: usize = 0x110000 >> SHIFT_1;

/// Maximum length of the build-time data array: one entry per code point,
/// plus the illegal-UTF-8 block and the null block, plus values for the
/// 0x400 lead surrogate code units.
pub(crate) const MAX_DATA_LENGTH_BUILDTIME: usize = 0x110000 + 0x40 + 0x40 + 0x400;

/// At build time, the index-2 table keeps a gap at least as long as the
/// maximum lengths of the 2-byte UTF-8 index-2 table and the supplementary
/// index-1 table, rounded up to [`INDEX_2_BLOCK_LENGTH`] for compaction.
pub(crate) const INDEX_GAP_OFFSET: usize = INDEX_2_BMP_LENGTH;

/// Length of the build-time index gap.
pub(crate) const INDEX_GAP_LENGTH: usize =
    (UTF8_2B_INDEX_2_LENGTH + MAX_INDEX_1_LENGTH + INDEX_2_MASK) & !INDEX_2_MASK;

/// Maximum length of the build-time index-2 array.
pub(crate) const MAX_INDEX_2_LENGTH: usize =
    (0x110000 >> SHIFT_2) + LSCP_INDEX_2_LENGTH + INDEX_GAP_LENGTH + INDEX_2_BLOCK_LENGTH;

/// The null index-2 block, following the gap in the index-2 table.
pub(crate) const INDEX_2_NULL_OFFSET: usize = INDEX_GAP_OFFSET + INDEX_GAP_LENGTH;

/// The start of allocated index-2 blocks.
pub(crate) const INDEX_2_START_OFFSET: usize = INDEX_2_NULL_OFFSET + INDEX_2_BLOCK_LENGTH;

/// Maximum length of the runtime index array, limited by its own 16-bit
/// index values.
pub(crate) const MAX_INDEX_LENGTH: usize = 0xFFFF;
