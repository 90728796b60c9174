use crate::compact_trie::CompactTrie;
use crate::error::Error;
use bitflags::bitflags;

bitflags! {
    /// Grapheme cluster break property of a code point, per UAX #29.
    ///
    /// `Other` is the empty set. The flags are disjoint bits so that the
    /// value from the general property trie and the value from the
    /// Extended_Pictographic trie combine losslessly with bitwise OR. The
    /// numeric values are part of the serialized table format.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ClusterBreak: u32 {
        /// Carriage return (U+000D).
        const CR = 1 << 0;
        /// Line feed (U+000A).
        const LF = 1 << 1;
        /// Other control and separator characters.
        const CONTROL = 1 << 2;
        /// Combining and other cluster-extending characters.
        const EXTEND = 1 << 3;
        /// Zero width joiner (U+200D).
        const ZWJ = 1 << 4;
        /// Regional indicator symbols (flag emoji halves).
        const REGIONAL_INDICATOR = 1 << 5;
        /// Characters that attach to the following cluster.
        const PREPEND = 1 << 6;
        /// Spacing combining marks.
        const SPACING_MARK = 1 << 7;
        /// Hangul leading consonant (choseong) jamo.
        const L = 1 << 8;
        /// Hangul vowel (jungseong) jamo.
        const V = 1 << 9;
        /// Hangul trailing consonant (jongseong) jamo.
        const T = 1 << 10;
        /// Precomposed Hangul syllable of the form LV.
        const LV = 1 << 11;
        /// Precomposed Hangul syllable of the form LVT.
        const LVT = 1 << 12;
        /// Extended_Pictographic, from the emoji data table.
        const EXTENDED_PICTOGRAPHIC = 1 << 13;
    }
}

/// Classifies code points by combining the general cluster break property
/// trie with the Extended_Pictographic trie.
///
/// A classifier is an explicit context object: the host constructs it once
/// from the two serialized table blobs and then shares it freely. It is
/// immutable, `Send` and `Sync`. A host that wants process-wide loading can
/// park it in a `std::sync::OnceLock` to get load-exactly-once semantics
/// without any locking on the lookup path.
#[derive(Debug)]
pub struct ClusterBreakClassifier {
    type_trie: CompactTrie,
    ext_pict_trie: CompactTrie,
}

impl ClusterBreakClassifier {
    /// Decodes a classifier from two serialized tries: the general grapheme
    /// break property table and the Extended_Pictographic-only table.
    pub fn from_bytes(type_trie: &[u8], ext_pict_trie: &[u8]) -> Result<Self, Error> {
        let type_trie = CompactTrie::from_bytes(type_trie)?;
        let ext_pict_trie = CompactTrie::from_bytes(ext_pict_trie)?;
        log::debug!(
            "loaded cluster break tries: {} + {} data words",
            type_trie.data().len(),
            ext_pict_trie.data().len()
        );
        Ok(ClusterBreakClassifier {
            type_trie,
            ext_pict_trie,
        })
    }

    /// Builds a classifier from two already-decoded tries.
    pub fn from_tries(type_trie: CompactTrie, ext_pict_trie: CompactTrie) -> Self {
        ClusterBreakClassifier {
            type_trie,
            ext_pict_trie,
        }
    }

    /// Returns the combined cluster break properties of `code_point`: the
    /// OR of both trie lookups.
    pub fn get(&self, code_point: u32) -> ClusterBreak {
        ClusterBreak::from_bits_retain(
            self.type_trie.get(code_point) | self.ext_pict_trie.get(code_point),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{ClusterBreak, ClusterBreakClassifier};
    use crate::trie_builder::CompactTrieBuilder;

    #[test]
    fn test_flag_values_match_the_table_format() {
        assert_eq!(0, ClusterBreak::empty().bits());
        assert_eq!(1, ClusterBreak::CR.bits());
        assert_eq!(2, ClusterBreak::LF.bits());
        assert_eq!(4, ClusterBreak::CONTROL.bits());
        assert_eq!(8, ClusterBreak::EXTEND.bits());
        assert_eq!(16, ClusterBreak::ZWJ.bits());
        assert_eq!(32, ClusterBreak::REGIONAL_INDICATOR.bits());
        assert_eq!(64, ClusterBreak::PREPEND.bits());
        assert_eq!(128, ClusterBreak::SPACING_MARK.bits());
        assert_eq!(256, ClusterBreak::L.bits());
        assert_eq!(512, ClusterBreak::V.bits());
        assert_eq!(1024, ClusterBreak::T.bits());
        assert_eq!(2048, ClusterBreak::LV.bits());
        assert_eq!(4096, ClusterBreak::LVT.bits());
        assert_eq!(8192, ClusterBreak::EXTENDED_PICTOGRAPHIC.bits());
    }

    #[test]
    fn test_classifier_ors_both_tries() {
        let mut type_builder = CompactTrieBuilder::default();
        type_builder
            .set(0x1F9D1, ClusterBreak::EXTEND.bits())
            .unwrap();
        let mut ext_pict_builder = CompactTrieBuilder::default();
        ext_pict_builder
            .set(0x1F9D1, ClusterBreak::EXTENDED_PICTOGRAPHIC.bits())
            .unwrap();

        let classifier = ClusterBreakClassifier::from_bytes(
            &type_builder.to_serialized_bytes().unwrap(),
            &ext_pict_builder.to_serialized_bytes().unwrap(),
        )
        .unwrap();

        let mask = classifier.get(0x1F9D1);
        assert!(mask.intersects(ClusterBreak::EXTEND));
        assert!(mask.intersects(ClusterBreak::EXTENDED_PICTOGRAPHIC));
        assert_eq!(ClusterBreak::empty(), classifier.get(0x41));
    }
}
