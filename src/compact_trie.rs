use crate::error::Error;
use crate::trie_layout::*;
use std::fmt;

/// A frozen code point trie: an O(1), read-only mapping from any code point
/// in `0..=0x10FFFF` to a `u32` value.
///
/// The backing array serves simultaneously as the index tables (first
/// region) and the value table (remaining region). A `CompactTrie` is
/// produced by [`CompactTrieBuilder::freeze`](crate::CompactTrieBuilder::freeze)
/// or reconstructed from the serialized wire format with [`Self::from_bytes`],
/// and is immutable and freely shareable between threads afterwards.
pub struct CompactTrie {
    data: Vec<u32>,
    high_start: u32,
    error_value: u32,
}

impl fmt::Debug for CompactTrie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompactTrie")
            .field("data_len", &self.data.len())
            .field("high_start", &self.high_start)
            .field("error_value", &self.error_value)
            .finish()
    }
}

impl CompactTrie {
    /// Builds a trie directly from freezer output. The builder guarantees
    /// the structural invariants, so no validation pass runs here.
    pub(crate) fn from_frozen(data: Vec<u32>, high_start: u32, error_value: u32) -> Self {
        CompactTrie {
            data,
            high_start,
            error_value,
        }
    }

    /// Builds a trie from an already-parsed table.
    ///
    /// The table is validated the same way as in [`Self::from_bytes`];
    /// tables that would resolve any lookup out of bounds are rejected.
    pub fn from_parts(data: Vec<u32>, high_start: u32, error_value: u32) -> Result<Self, Error> {
        let trie = CompactTrie {
            data,
            high_start,
            error_value,
        };
        trie.validate()?;
        Ok(trie)
    }

    /// Decodes a trie from the serialized wire format.
    ///
    /// The format is a 12-byte header (`high_start`, `error_value`,
    /// uncompressed byte length, each a little-endian `u32`) followed by the
    /// twice-DEFLATEd little-endian value table. Any header or length
    /// inconsistency, decompression failure, or out-of-bounds index yields
    /// [`Error::MalformedSerializedData`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < 12 {
            return Err(Error::MalformedSerializedData("header is truncated"));
        }
        let high_start = read_u32_le(bytes, 0);
        let error_value = read_u32_le(bytes, 4);
        let uncompressed_len = read_u32_le(bytes, 8) as usize;

        // The payload is deflated twice; undo both stages.
        let once = miniz_oxide::inflate::decompress_to_vec(&bytes[12..])
            .map_err(|_| Error::MalformedSerializedData("decompression failed"))?;
        let raw = miniz_oxide::inflate::decompress_to_vec(&once)
            .map_err(|_| Error::MalformedSerializedData("decompression failed"))?;

        if raw.len() != uncompressed_len {
            return Err(Error::MalformedSerializedData(
                "payload length disagrees with header",
            ));
        }
        if raw.len() % 4 != 0 {
            return Err(Error::MalformedSerializedData(
                "payload is not a whole number of 32-bit words",
            ));
        }

        let data = raw
            .chunks_exact(4)
            .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            .collect();
        let trie = CompactTrie {
            data,
            high_start,
            error_value,
        };
        trie.validate()?;
        log::debug!(
            "decoded compact trie: {} data words, high start {:#x}",
            trie.data.len(),
            trie.high_start
        );
        Ok(trie)
    }

    /// Returns the value for `code_point`, or the error value for code
    /// points above 0x10FFFF.
    pub fn get(&self, code_point: u32) -> u32 {
        if code_point > MAX_CODE_POINT {
            return self.error_value;
        }
        let cp = code_point as usize;

        if code_point < 0xD800 || (code_point > 0xDBFF && code_point <= 0xFFFF) {
            // Ordinary BMP code point, excluding lead surrogates.
            // The BMP uses a single-level lookup starting at offset 0.
            let index = ((self.data[cp >> SHIFT_2] as usize) << INDEX_SHIFT) + (cp & DATA_MASK);
            return self.data[index];
        }

        if code_point <= 0xFFFF {
            // Lead surrogate code point: the main BMP index holds the code
            // unit data, the separate LSCP section holds code point data.
            let i2 = LSCP_INDEX_2_OFFSET + ((cp - 0xD800) >> SHIFT_2);
            let index = ((self.data[i2] as usize) << INDEX_SHIFT) + (cp & DATA_MASK);
            return self.data[index];
        }

        if code_point < self.high_start {
            // Supplementary code point, two-level lookup.
            let i1 = (INDEX_1_OFFSET - OMITTED_BMP_INDEX_1_LENGTH) + (cp >> SHIFT_1);
            let i2 = self.data[i1] as usize + ((cp >> SHIFT_2) & INDEX_2_MASK);
            let index = ((self.data[i2] as usize) << INDEX_SHIFT) + (cp & DATA_MASK);
            return self.data[index];
        }

        // Everything at or above high_start shares the tail value stored at
        // the end of the data array.
        self.data[self.data.len() - DATA_GRANULARITY]
    }

    /// [`Self::get`] with bounds-checked indexing, for validating untrusted
    /// tables. `None` marks an index that escapes the array.
    fn checked_get(&self, code_point: u32) -> Option<u32> {
        if code_point > MAX_CODE_POINT {
            return Some(self.error_value);
        }
        let cp = code_point as usize;

        if code_point < 0xD800 || (code_point > 0xDBFF && code_point <= 0xFFFF) {
            let entry = *self.data.get(cp >> SHIFT_2)? as usize;
            return self.data.get((entry << INDEX_SHIFT) + (cp & DATA_MASK)).copied();
        }

        if code_point <= 0xFFFF {
            let entry = *self.data.get(LSCP_INDEX_2_OFFSET + ((cp - 0xD800) >> SHIFT_2))? as usize;
            return self.data.get((entry << INDEX_SHIFT) + (cp & DATA_MASK)).copied();
        }

        if code_point < self.high_start {
            let i1 = (INDEX_1_OFFSET - OMITTED_BMP_INDEX_1_LENGTH) + (cp >> SHIFT_1);
            let i2 = *self.data.get(i1)? as usize + ((cp >> SHIFT_2) & INDEX_2_MASK);
            let entry = *self.data.get(i2)? as usize;
            return self.data.get((entry << INDEX_SHIFT) + (cp & DATA_MASK)).copied();
        }

        self.data.get(self.data.len().checked_sub(DATA_GRANULARITY)?).copied()
    }

    /// Checks that every code point resolves in bounds, so that [`Self::get`]
    /// can index without checks afterwards.
    fn validate(&self) -> Result<(), Error> {
        if self.high_start > 0x110000 {
            return Err(Error::MalformedSerializedData("high start above 0x110000"));
        }
        if self.data.len() % DATA_GRANULARITY != 0 {
            return Err(Error::MalformedSerializedData(
                "data length is not granularity-aligned",
            ));
        }
        for cp in 0..=MAX_CODE_POINT {
            if self.checked_get(cp).is_none() {
                return Err(Error::MalformedSerializedData(
                    "lookup resolves out of bounds",
                ));
            }
        }
        Ok(())
    }

    /// The backing array: index tables followed by the value table.
    pub fn data(&self) -> &[u32] {
        &self.data
    }

    /// The lowest code point above which all code points share one value.
    pub fn high_start(&self) -> u32 {
        self.high_start
    }

    /// The value returned for out-of-range code points.
    pub fn error_value(&self) -> u32 {
        self.error_value
    }
}

#[inline]
fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::CompactTrie;
    use crate::error::Error;
    use crate::trie_builder::CompactTrieBuilder;

    fn sample_bytes() -> Vec<u8> {
        let mut builder = CompactTrieBuilder::new(1, 0xBAD);
        builder.set_range(0x41, 0x5A, 7, true).unwrap();
        builder.set(0x1F600, 9).unwrap();
        builder.to_serialized_bytes().unwrap()
    }

    #[test]
    fn test_decode_roundtrip() {
        let trie = CompactTrie::from_bytes(&sample_bytes()).unwrap();
        assert_eq!(7, trie.get(0x41));
        assert_eq!(7, trie.get(0x5A));
        assert_eq!(1, trie.get(0x5B));
        assert_eq!(9, trie.get(0x1F600));
        assert_eq!(1, trie.get(0x1F601));
        assert_eq!(0xBAD, trie.error_value());
    }

    #[test]
    fn test_out_of_range_lookup_returns_error_value() {
        let trie = CompactTrie::from_bytes(&sample_bytes()).unwrap();
        assert_eq!(0xBAD, trie.get(0x110000));
        assert_eq!(0xBAD, trie.get(u32::MAX));
    }

    #[test]
    fn test_truncated_header_is_rejected() {
        assert_eq!(
            Err(Error::MalformedSerializedData("header is truncated")),
            CompactTrie::from_bytes(&[0u8; 11]).map(|_| ())
        );
    }

    #[test]
    fn test_garbage_payload_is_rejected() {
        let mut bytes = sample_bytes();
        bytes.truncate(20);
        assert!(matches!(
            CompactTrie::from_bytes(&bytes),
            Err(Error::MalformedSerializedData(_))
        ));
    }

    #[test]
    fn test_tampered_length_is_rejected() {
        let mut bytes = sample_bytes();
        bytes[8] ^= 0xFF;
        assert!(matches!(
            CompactTrie::from_bytes(&bytes),
            Err(Error::MalformedSerializedData(_))
        ));
    }

    #[test]
    fn test_from_parts_rejects_bogus_tables() {
        assert!(matches!(
            CompactTrie::from_parts(vec![0xFFFF_FFFF; 32], 0x110000, 0),
            Err(Error::MalformedSerializedData(_))
        ));
    }
}
