use crate::compact_trie::CompactTrie;
use crate::error::Error;
use crate::trie_layout::*;
use miniz_oxide::deflate::{compress_to_vec, CompressionLevel};
use std::fmt;
use std::mem;

/// Incremental builder for a [`CompactTrie`].
///
/// A builder is created once per source table, populated with
/// [`set`](Self::set) / [`set_range`](Self::set_range) calls, and frozen
/// exactly once. Freezing runs compaction: the tail of the code point space
/// that shares one value is cut off at `high_start`, data blocks are
/// deduplicated and overlapped at 4-word granularity, and the same pass runs
/// one level up over index-2 blocks. After compaction the builder rejects
/// further mutation; reads and repeated freezes remain valid.
///
/// The ASCII range and the 2-byte UTF-8 range occupy protected linear
/// blocks that are always present, and lead surrogate code points resolve
/// through an index section separate from their code unit slots.
pub struct CompactTrieBuilder {
    data: Vec<u32>,
    data_length: usize,
    data_null_offset: i32,
    error_value: u32,
    first_free_block: i32,
    high_start: u32,
    index1: Vec<i32>,
    index2: Vec<i32>,
    index2_length: usize,
    index2_null_offset: i32,
    initial_value: u32,
    is_compacted: bool,
    /// Per-data-block reference counters while building: 0 = unused,
    /// positive = number of index-2 entries pointing at the block, negative
    /// = free-list link to the next released block. Taken and repurposed as
    /// the old-to-new offset remap during compaction.
    block_ref_counts: Vec<i32>,
}

impl fmt::Debug for CompactTrieBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompactTrieBuilder")
            .field("data_length", &self.data_length)
            .field("index2_length", &self.index2_length)
            .field("high_start", &self.high_start)
            .field("is_compacted", &self.is_compacted)
            .finish()
    }
}

impl Default for CompactTrieBuilder {
    fn default() -> Self {
        CompactTrieBuilder::new(0, 0)
    }
}

impl CompactTrieBuilder {
    /// Creates a builder in which every code point maps to `initial_value`
    /// and out-of-range lookups return `error_value`.
    pub fn new(initial_value: u32, error_value: u32) -> Self {
        let mut data = vec![0u32; INITIAL_DATA_LENGTH];
        for slot in data.iter_mut().take(0x80) {
            *slot = initial_value;
        }
        for slot in data.iter_mut().take(DATA_START_OFFSET).skip(0x80) {
            *slot = error_value;
        }
        for slot in data
            .iter_mut()
            .take(NEW_DATA_START_OFFSET)
            .skip(DATA_NULL_OFFSET)
        {
            *slot = initial_value;
        }

        let mut block_ref_counts = vec![0i32; MAX_DATA_LENGTH_BUILDTIME >> SHIFT_2];
        let mut index2 = vec![0i32; MAX_INDEX_2_LENGTH];

        // Index-2 entries and reference counts for the 4 ASCII data blocks.
        let mut i = 0;
        let mut j = 0;
        while j < 0x80 {
            index2[i] = j as i32;
            block_ref_counts[i] = 1;
            i += 1;
            j += DATA_BLOCK_LENGTH;
        }
        // Reference counts for the bad-UTF-8 data block.
        while j < DATA_START_OFFSET {
            block_ref_counts[i] = 0;
            i += 1;
            j += DATA_BLOCK_LENGTH;
        }
        // Reference count for the null data block: all index-2 entries
        // except the ASCII ones, plus one so compaction never drops the
        // block, plus the lead surrogate code point entries.
        block_ref_counts[i] =
            ((0x110000 >> SHIFT_2) - (0x80 >> SHIFT_2)) as i32 + 1 + LSCP_INDEX_2_LENGTH as i32;
        i += 1;
        j += DATA_BLOCK_LENGTH;
        while j < NEW_DATA_START_OFFSET {
            block_ref_counts[i] = 0;
            i += 1;
            j += DATA_BLOCK_LENGTH;
        }

        // The rest of the BMP index-2 block points at the null data block.
        for entry in index2
            .iter_mut()
            .take(INDEX_2_BMP_LENGTH)
            .skip(0x80 >> SHIFT_2)
        {
            *entry = DATA_NULL_OFFSET as i32;
        }
        // Fill the index gap with impossible values so that compaction does
        // not overlap other index-2 blocks with the gap.
        for entry in index2
            .iter_mut()
            .take(INDEX_GAP_OFFSET + INDEX_GAP_LENGTH)
            .skip(INDEX_GAP_OFFSET)
        {
            *entry = -1;
        }
        for entry in index2
            .iter_mut()
            .take(INDEX_2_NULL_OFFSET + INDEX_2_BLOCK_LENGTH)
            .skip(INDEX_2_NULL_OFFSET)
        {
            *entry = DATA_NULL_OFFSET as i32;
        }

        // Index-1 entries for the linear BMP index-2 region, then the null
        // index-2 block for everything else.
        let mut index1 = vec![0i32; INDEX_1_LENGTH];
        let mut j = 0i32;
        for entry in index1.iter_mut().take(OMITTED_BMP_INDEX_1_LENGTH) {
            *entry = j;
            j += INDEX_2_BLOCK_LENGTH as i32;
        }
        for entry in index1.iter_mut().skip(OMITTED_BMP_INDEX_1_LENGTH) {
            *entry = INDEX_2_NULL_OFFSET as i32;
        }

        let mut builder = CompactTrieBuilder {
            data,
            data_length: NEW_DATA_START_OFFSET,
            data_null_offset: DATA_NULL_OFFSET as i32,
            error_value,
            first_free_block: 0,
            high_start: 0x110000,
            index1,
            index2,
            index2_length: INDEX_2_START_OFFSET,
            index2_null_offset: INDEX_2_NULL_OFFSET as i32,
            initial_value,
            is_compacted: false,
            block_ref_counts,
        };

        // Preallocate and reset data for U+0080..U+07FF, for 2-byte UTF-8,
        // which compaction handles in 64-wide blocks even though data
        // blocks are narrower.
        let mut cp = 0x80u32;
        while cp < 0x800 {
            builder
                .set(cp, initial_value)
                .expect("2-byte UTF-8 preallocation stays within the initial capacity");
            cp += DATA_BLOCK_LENGTH as u32;
        }
        builder
    }

    /// Returns the value currently assigned to `code_point`, or the error
    /// value for code points above 0x10FFFF. Usable before and after
    /// freezing.
    pub fn get(&self, code_point: u32) -> u32 {
        self.lookup(code_point, true)
    }

    /// Like [`Self::get`], but reads a lead surrogate (U+D800..U+DBFF)
    /// through its code *unit* slot rather than its code *point* slot. For
    /// any other code point this is identical to `get`.
    pub fn get_from_lead_surrogate_code_unit(&self, code_point: u32) -> u32 {
        self.lookup(code_point, false)
    }

    fn lookup(&self, code_point: u32, from_lscp: bool) -> u32 {
        if code_point > MAX_CODE_POINT {
            return self.error_value;
        }
        let is_lead_surrogate = (0xD800..0xDC00).contains(&code_point);
        if code_point >= self.high_start && (!is_lead_surrogate || from_lscp) {
            return self.data[self.data_length - DATA_GRANULARITY];
        }
        let i2 = if is_lead_surrogate && from_lscp {
            (LSCP_INDEX_2_OFFSET - (0xD800 >> SHIFT_2)) + ((code_point >> SHIFT_2) as usize)
        } else {
            self.index1[(code_point >> SHIFT_1) as usize] as usize
                + ((code_point >> SHIFT_2) as usize & INDEX_2_MASK)
        };
        let block = self.index2[i2] as usize;
        self.data[block + (code_point as usize & DATA_MASK)]
    }

    /// Assigns `value` to a single code point.
    pub fn set(&mut self, code_point: u32, value: u32) -> Result<&mut Self, Error> {
        if code_point > MAX_CODE_POINT {
            return Err(Error::InvalidCodePoint(code_point));
        }
        if self.is_compacted {
            return Err(Error::AlreadyFinalized);
        }
        let block = self.get_data_block(code_point, true)?;
        self.data[block + (code_point as usize & DATA_MASK)] = value;
        Ok(self)
    }

    /// Assigns `value` to every code point in `start..=end`.
    ///
    /// With `overwrite` set, existing values are replaced unconditionally;
    /// otherwise only slots still holding the builder's initial value are
    /// written. Setting the initial value itself without `overwrite` is a
    /// no-op. Whole interior blocks share one lazily allocated repeat block
    /// per call, except inside the protected ASCII / 2-byte UTF-8 linear
    /// regions where values are written in place.
    pub fn set_range(
        &mut self,
        start: u32,
        end: u32,
        value: u32,
        overwrite: bool,
    ) -> Result<&mut Self, Error> {
        if start > MAX_CODE_POINT || end > MAX_CODE_POINT || start > end {
            return Err(Error::InvalidRange { start, end });
        }
        if self.is_compacted {
            return Err(Error::AlreadyFinalized);
        }
        if !overwrite && value == self.initial_value {
            return Ok(self); // nothing to do
        }

        let data_mask = DATA_MASK as u32;
        let block_len = DATA_BLOCK_LENGTH as u32;
        let mut start = start;
        let mut limit = end + 1;

        if start & data_mask != 0 {
            // Set a partial block at [start..following block boundary).
            let block = self.get_data_block(start, true)?;
            let next_start = (start + block_len) & !data_mask;
            if next_start <= limit {
                self.fill_block(
                    block,
                    (start & data_mask) as usize,
                    DATA_BLOCK_LENGTH,
                    value,
                    overwrite,
                );
                start = next_start;
            } else {
                self.fill_block(
                    block,
                    (start & data_mask) as usize,
                    (limit & data_mask) as usize,
                    value,
                    overwrite,
                );
                return Ok(self);
            }
        }

        // Number of positions in the last, partial block.
        let rest = (limit & data_mask) as usize;
        // Round down limit to a block boundary.
        limit &= !data_mask;

        // Iterate over whole blocks. Uniform blocks get redirected to one
        // shared repeat block, allocated lazily on first use.
        let mut repeat_block: i32 = if value == self.initial_value {
            self.data_null_offset
        } else {
            -1
        };

        while start < limit {
            let mut set_repeat_block = false;

            if value == self.initial_value && self.is_in_null_block(start, true) {
                start += block_len; // nothing to do
                continue;
            }

            let mut i2 = self.get_index2_block(start, true)?;
            i2 += (start >> SHIFT_2) as usize & INDEX_2_MASK;

            let block = self.index2[i2];
            if self.is_writable_block(block) {
                if overwrite && block >= DATA_0800_OFFSET as i32 {
                    // Replaceable with the repeat block: we overwrite all
                    // values and the block is not a protected (ASCII-linear
                    // or 2-byte UTF-8) block.
                    set_repeat_block = true;
                } else {
                    // Protected block: write the values in place.
                    self.fill_block(block as usize, 0, DATA_BLOCK_LENGTH, value, overwrite);
                }
            } else if self.data[block as usize] != value
                && (overwrite || block == self.data_null_offset)
            {
                // A non-writable block is uniform: it is the null block or
                // a repeat block from an earlier iteration, and the null
                // block is the only non-writable block holding the initial
                // value. Redirect it when the desired value differs and we
                // either overwrite or the block holds only initial values.
                set_repeat_block = true;
            }

            if set_repeat_block {
                if repeat_block >= 0 {
                    self.set_index2_entry(i2, repeat_block);
                } else {
                    let allocated = self.get_data_block(start, true)?;
                    self.write_block(allocated, value);
                    repeat_block = allocated as i32;
                }
            }

            start += block_len;
        }

        if rest > 0 {
            // Set a partial block at [last block boundary..limit).
            let block = self.get_data_block(start, true)?;
            self.fill_block(block, 0, rest, value, overwrite);
        }

        Ok(self)
    }

    /// Compacts (once) and emits the frozen runtime form.
    ///
    /// Freezing is repeatable; every call yields an identical trie. Fails
    /// with [`Error::CapacityExceeded`] if the compacted table no longer
    /// fits the 16-bit shifted index encoding.
    pub fn freeze(&mut self) -> Result<CompactTrie, Error> {
        if !self.is_compacted {
            self.compact()?;
        }

        let all_indexes_length = if self.high_start <= 0x10000 {
            INDEX_1_OFFSET
        } else {
            self.index2_length
        };
        let data_move = all_indexes_length;

        // Check that indexLength and dataLength fit their 16-bit encodings.
        if all_indexes_length > MAX_INDEX_LENGTH
            || data_move + self.data_null_offset as usize > 0xFFFF
            || data_move + DATA_0800_OFFSET > 0xFFFF
            || data_move + self.data_length > MAX_DATA_LENGTH_RUNTIME
        {
            return Err(Error::CapacityExceeded);
        }

        let mut data = Vec::with_capacity(all_indexes_length + self.data_length);

        // BMP index-2 values, right-shifted after adding the data offset.
        for i in 0..INDEX_2_BMP_LENGTH {
            data.push(((self.index2[i] + data_move as i32) >> INDEX_SHIFT) as u32);
        }

        // 2-byte UTF-8 index values, not right-shifted: C0..C1 point at the
        // bad-input block, C2..DF at their linear data blocks.
        for _ in 0..2 {
            data.push((data_move + BAD_UTF8_DATA_OFFSET) as u32);
        }
        for i in 2..UTF8_2B_INDEX_2_LENGTH {
            data.push((data_move as i32 + self.index2[i << (6 - SHIFT_2)]) as u32);
        }

        if self.high_start > 0x10000 {
            let index1_length = ((self.high_start - 0x10000) >> SHIFT_1) as usize;
            let index2_offset = INDEX_2_BMP_LENGTH + UTF8_2B_INDEX_2_LENGTH + index1_length;

            // Index-1 values for supplementary code points.
            for i in 0..index1_length {
                data.push((INDEX_2_OFFSET as i32 + self.index1[i + OMITTED_BMP_INDEX_1_LENGTH]) as u32);
            }
            // Index-2 values for supplementary code points, right-shifted
            // after adding the data offset.
            for i in 0..(self.index2_length - index2_offset) {
                data.push(((data_move as i32 + self.index2[index2_offset + i]) >> INDEX_SHIFT) as u32);
            }
        }

        data.extend_from_slice(&self.data[..self.data_length]);

        Ok(CompactTrie::from_frozen(
            data,
            self.high_start,
            self.error_value,
        ))
    }

    /// Freezes and serializes to the binary wire format: a 12-byte header
    /// (`high_start`, `error_value`, uncompressed byte length, little-endian
    /// `u32` each) followed by the twice-DEFLATEd little-endian value table.
    pub fn to_serialized_bytes(&mut self) -> Result<Vec<u8>, Error> {
        let trie = self.freeze()?;

        let mut raw = Vec::with_capacity(trie.data().len() * 4);
        for &word in trie.data() {
            raw.extend_from_slice(&word.to_le_bytes());
        }
        let deflated = compress_to_vec(&raw, CompressionLevel::DefaultLevel as u8);
        let deflated = compress_to_vec(&deflated, CompressionLevel::DefaultLevel as u8);

        let mut out = Vec::with_capacity(12 + deflated.len());
        out.extend_from_slice(&trie.high_start().to_le_bytes());
        out.extend_from_slice(&trie.error_value().to_le_bytes());
        out.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        out.extend_from_slice(&deflated);
        Ok(out)
    }

    // Block management ----------------------------------------------------

    fn is_writable_block(&self, block: i32) -> bool {
        block != self.data_null_offset && self.block_ref_counts[block as usize >> SHIFT_2] == 1
    }

    fn is_in_null_block(&self, c: u32, for_lscp: bool) -> bool {
        let i2 = if c & 0xFFFF_FC00 == 0xD800 && for_lscp {
            (LSCP_INDEX_2_OFFSET - (0xD800 >> SHIFT_2)) + ((c >> SHIFT_2) as usize)
        } else {
            self.index1[(c >> SHIFT_1) as usize] as usize + ((c >> SHIFT_2) as usize & INDEX_2_MASK)
        };
        self.index2[i2] == self.data_null_offset
    }

    fn get_index2_block(&mut self, c: u32, for_lscp: bool) -> Result<usize, Error> {
        if (0xD800..0xDC00).contains(&c) && for_lscp {
            return Ok(LSCP_INDEX_2_OFFSET);
        }
        let i1 = (c >> SHIFT_1) as usize;
        let mut i2 = self.index1[i1];
        if i2 == self.index2_null_offset {
            i2 = self.alloc_index2_block()?;
            self.index1[i1] = i2;
        }
        Ok(i2 as usize)
    }

    /// Resolves the writable data block backing `c`, allocating a private
    /// copy when the current block is shared.
    fn get_data_block(&mut self, c: u32, for_lscp: bool) -> Result<usize, Error> {
        let mut i2 = self.get_index2_block(c, for_lscp)?;
        i2 += (c >> SHIFT_2) as usize & INDEX_2_MASK;

        let old_block = self.index2[i2];
        if self.is_writable_block(old_block) {
            return Ok(old_block as usize);
        }

        let new_block = self.alloc_data_block(old_block as usize)?;
        self.set_index2_entry(i2, new_block as i32);
        Ok(new_block)
    }

    fn alloc_data_block(&mut self, copy_block: usize) -> Result<usize, Error> {
        let new_block;
        if self.first_free_block != 0 {
            // Reuse the first block of the free list.
            new_block = self.first_free_block as usize;
            self.first_free_block = -self.block_ref_counts[new_block >> SHIFT_2];
        } else {
            // Take a new block from the high end, growing the array on the
            // fixed schedule when it runs out.
            new_block = self.data_length;
            let new_top = new_block + DATA_BLOCK_LENGTH;
            if new_top > self.data.len() {
                let capacity = if self.data.len() < MEDIUM_DATA_LENGTH {
                    MEDIUM_DATA_LENGTH
                } else if self.data.len() < MAX_DATA_LENGTH_BUILDTIME {
                    MAX_DATA_LENGTH_BUILDTIME
                } else {
                    // The build-time maximum covers every possible write;
                    // running past it means the bookkeeping is broken.
                    return Err(Error::CapacityExceeded);
                };
                self.data.resize(capacity, 0);
            }
            self.data_length = new_top;
        }

        self.data
            .copy_within(copy_block..copy_block + DATA_BLOCK_LENGTH, new_block);
        self.block_ref_counts[new_block >> SHIFT_2] = 0;
        Ok(new_block)
    }

    fn release_data_block(&mut self, block: i32) {
        // Thread the block onto the front of the free list.
        self.block_ref_counts[block as usize >> SHIFT_2] = -self.first_free_block;
        self.first_free_block = block;
    }

    fn set_index2_entry(&mut self, i2: usize, block: i32) {
        // Increment first, in case block == old_block.
        self.block_ref_counts[block as usize >> SHIFT_2] += 1;
        let old_block = self.index2[i2];
        self.block_ref_counts[old_block as usize >> SHIFT_2] -= 1;
        if self.block_ref_counts[old_block as usize >> SHIFT_2] == 0 {
            self.release_data_block(old_block);
        }
        self.index2[i2] = block;
    }

    fn alloc_index2_block(&mut self) -> Result<i32, Error> {
        let new_block = self.index2_length;
        let new_top = new_block + INDEX_2_BLOCK_LENGTH;
        if new_top > self.index2.len() {
            // The build-time maximum covers every possible allocation.
            return Err(Error::CapacityExceeded);
        }
        self.index2_length = new_top;
        let null_offset = self.index2_null_offset as usize;
        self.index2
            .copy_within(null_offset..null_offset + INDEX_2_BLOCK_LENGTH, new_block);
        Ok(new_block as i32)
    }

    fn fill_block(&mut self, block: usize, start: usize, limit: usize, value: u32, overwrite: bool) {
        if overwrite {
            for slot in &mut self.data[block + start..block + limit] {
                *slot = value;
            }
        } else {
            let initial_value = self.initial_value;
            for slot in &mut self.data[block + start..block + limit] {
                if *slot == initial_value {
                    *slot = value;
                }
            }
        }
    }

    fn write_block(&mut self, block: usize, value: u32) {
        for slot in &mut self.data[block..block + DATA_BLOCK_LENGTH] {
            *slot = value;
        }
    }

    // Compaction ----------------------------------------------------------

    fn compact(&mut self) -> Result<(), Error> {
        // Find high_start and round it up to an index-1 granule.
        let mut high_value = self.get(MAX_CODE_POINT);
        let granule = CP_PER_INDEX_1_ENTRY as u32;
        let mut high_start = self.find_high_start(high_value);
        high_start = (high_start + (granule - 1)) & !(granule - 1);
        if high_start == 0x110000 {
            high_value = self.error_value;
        }

        // Set high_start only after the reads above; lookups at or above it
        // resolve to the tail value from here on.
        self.high_start = high_start;
        if self.high_start < 0x110000 {
            // Blank out [high_start..0x10FFFF] to release its data blocks.
            let supp_high_start = if self.high_start <= 0x10000 {
                0x10000
            } else {
                self.high_start
            };
            self.set_range(supp_high_start, MAX_CODE_POINT, self.initial_value, true)?;
        }

        let uncompacted_length = self.data_length;

        // Hand the reference-count buffer over to the compaction passes,
        // which turn it into the old-to-new offset map block by block.
        let mut map = mem::take(&mut self.block_ref_counts);
        self.compact_data(&mut map);
        if self.high_start > 0x10000 {
            self.compact_index2(&mut map);
        }
        self.block_ref_counts = map;

        // Store the tail value and round the data length up to granularity.
        // Must happen after compact_data, which assumes the length is a
        // multiple of the data block length.
        if self.data.len() < self.data_length + DATA_GRANULARITY {
            self.data.resize(self.data_length + DATA_GRANULARITY, 0);
        }
        self.data[self.data_length] = high_value;
        self.data_length += 1;
        while self.data_length & (DATA_GRANULARITY - 1) != 0 {
            self.data[self.data_length] = self.initial_value;
            self.data_length += 1;
        }

        self.is_compacted = true;
        log::debug!(
            "compacted trie data {} -> {} words, high start {:#x}",
            uncompacted_length,
            self.data_length,
            self.high_start
        );
        Ok(())
    }

    /// Finds the lowest code point above which everything up to U+10FFFF
    /// holds `high_value`, by walking the index structure backwards.
    fn find_high_start(&self, high_value: u32) -> u32 {
        let index2_null_offset = self.index2_null_offset;
        let null_block = self.data_null_offset;

        // Previous-range markers; the null blocks count as matching when
        // the high value is the initial value.
        let (mut prev_i2_block, mut prev_block) = if high_value == self.initial_value {
            (index2_null_offset, null_block)
        } else {
            (-1, -1)
        };

        let mut i1 = INDEX_1_LENGTH;
        let mut c = 0x110000u32;
        while c > 0 {
            i1 -= 1;
            let i2_block = self.index1[i1];
            if i2_block == prev_i2_block {
                // Same as the previous index-2 block, filled with high_value.
                c -= CP_PER_INDEX_1_ENTRY as u32;
                continue;
            }
            prev_i2_block = i2_block;
            if i2_block == index2_null_offset {
                if high_value != self.initial_value {
                    return c;
                }
                c -= CP_PER_INDEX_1_ENTRY as u32;
            } else {
                let mut i2 = INDEX_2_BLOCK_LENGTH;
                while i2 > 0 {
                    i2 -= 1;
                    let block = self.index2[i2_block as usize + i2];
                    if block == prev_block {
                        c -= DATA_BLOCK_LENGTH as u32;
                        continue;
                    }
                    prev_block = block;
                    if block == null_block {
                        if high_value != self.initial_value {
                            return c;
                        }
                        c -= DATA_BLOCK_LENGTH as u32;
                    } else {
                        let mut j = DATA_BLOCK_LENGTH;
                        while j > 0 {
                            j -= 1;
                            if self.data[block as usize + j] != high_value {
                                return c;
                            }
                            c -= 1;
                        }
                    }
                }
            }
        }
        0
    }

    fn find_same_data_block(
        &self,
        data_length: usize,
        other_block: usize,
        block_length: usize,
    ) -> Option<usize> {
        // Ensure that we do not even partially get past data_length.
        let limit = data_length.checked_sub(block_length)?;
        let mut block = 0;
        while block <= limit {
            if self.data[block..block + block_length]
                == self.data[other_block..other_block + block_length]
            {
                return Some(block);
            }
            block += DATA_GRANULARITY;
        }
        None
    }

    fn find_same_index2_block(&self, index2_length: usize, other_block: usize) -> Option<usize> {
        // Ensure that we do not even partially get past index2_length.
        let limit = index2_length.checked_sub(INDEX_2_BLOCK_LENGTH)?;
        for block in 0..=limit {
            if self.index2[block..block + INDEX_2_BLOCK_LENGTH]
                == self.index2[other_block..other_block + INDEX_2_BLOCK_LENGTH]
            {
                return Some(block);
            }
        }
        None
    }

    /// Deduplicates and overlaps data blocks. `map` arrives holding the
    /// per-block reference counts and leaves holding each block's new
    /// offset; the index-2 table is rewritten through it at the end.
    fn compact_data(&mut self, map: &mut [i32]) {
        // The linear ASCII data keeps its place.
        let mut new_start = DATA_START_OFFSET;
        let mut start = 0;
        let mut i = 0;
        while start < new_start {
            map[i] = start as i32;
            i += 1;
            start += DATA_BLOCK_LENGTH;
        }

        // Start with a block length of 64 for 2-byte UTF-8, then switch to
        // the regular data block length.
        let mut block_length = 64;
        let mut block_count = block_length >> SHIFT_2;
        start = new_start;
        while start < self.data_length {
            // start: first entry of the current block. new_start: where the
            // block is to be moved, right after the compacted output so far.
            if start == DATA_0800_OFFSET {
                block_length = DATA_BLOCK_LENGTH;
                block_count = 1;
            }

            // Skip blocks that are not referenced; their map slots still
            // hold the reference count (or a free-list link) at this point.
            if map[start >> SHIFT_2] <= 0 {
                start += block_length;
                continue; // leave new_start with the previous block
            }

            // Look for an identical block in the compacted output.
            if let Some(found) = self.find_same_data_block(new_start, start, block_length) {
                let mut moved_start = found;
                let mut map_index = start >> SHIFT_2;
                for _ in 0..block_count {
                    map[map_index] = moved_start as i32;
                    map_index += 1;
                    moved_start += DATA_BLOCK_LENGTH;
                }
                start += block_length;
                continue; // leave new_start with the previous block
            }

            // Look for the maximum overlap (modulo granularity) between the
            // end of the previous, adjacent block and the start of this one.
            let mut overlap = block_length - DATA_GRANULARITY;
            while overlap > 0
                && self.data[new_start - overlap..new_start] != self.data[start..start + overlap]
            {
                overlap -= DATA_GRANULARITY;
            }

            if overlap > 0 || new_start < start {
                // Some overlap, or just move the whole block down.
                let mut moved_start = new_start - overlap;
                let mut map_index = start >> SHIFT_2;
                for _ in 0..block_count {
                    map[map_index] = moved_start as i32;
                    map_index += 1;
                    moved_start += DATA_BLOCK_LENGTH;
                }
                start += overlap;
                for _ in 0..(block_length - overlap) {
                    self.data[new_start] = self.data[start];
                    new_start += 1;
                    start += 1;
                }
            } else {
                // No overlap and the block is already in place.
                let mut map_index = start >> SHIFT_2;
                for _ in 0..block_count {
                    map[map_index] = start as i32;
                    map_index += 1;
                    start += DATA_BLOCK_LENGTH;
                }
                new_start = start;
            }
        }

        // Rewrite the index-2 table through the map, skipping the gap.
        let mut i = 0;
        while i < self.index2_length {
            if i == INDEX_GAP_OFFSET {
                i += INDEX_GAP_LENGTH;
            }
            self.index2[i] = map[self.index2[i] as usize >> SHIFT_2];
            i += 1;
        }
        self.data_null_offset = map[self.data_null_offset as usize >> SHIFT_2];

        // Ensure data length alignment.
        while new_start & (DATA_GRANULARITY - 1) != 0 {
            self.data[new_start] = self.initial_value;
            new_start += 1;
        }
        self.data_length = new_start;
    }

    /// The same dedupe/overlap pass one level up, over index-2 blocks.
    fn compact_index2(&mut self, map: &mut [i32]) {
        // The linear BMP index-2 blocks keep their place.
        let mut new_start = INDEX_2_BMP_LENGTH;
        let mut start = 0;
        let mut i = 0;
        while start < new_start {
            map[i] = start as i32;
            i += 1;
            start += INDEX_2_BLOCK_LENGTH;
        }

        // Leave room for the 2-byte UTF-8 table and the index-1 table that
        // freezing will interleave ahead of the supplementary index-2 part.
        new_start += UTF8_2B_INDEX_2_LENGTH + ((self.high_start as usize - 0x10000) >> SHIFT_1);
        start = INDEX_2_NULL_OFFSET;
        while start < self.index2_length {
            if let Some(found) = self.find_same_index2_block(new_start, start) {
                map[start >> SHIFT_1_2] = found as i32;
                start += INDEX_2_BLOCK_LENGTH;
                continue; // leave new_start with the previous block
            }

            // Look for the maximum overlap with the previous, adjacent block.
            let mut overlap = INDEX_2_BLOCK_LENGTH - 1;
            while overlap > 0
                && self.index2[new_start - overlap..new_start]
                    != self.index2[start..start + overlap]
            {
                overlap -= 1;
            }

            if overlap > 0 || new_start < start {
                map[start >> SHIFT_1_2] = (new_start - overlap) as i32;
                start += overlap;
                for _ in 0..(INDEX_2_BLOCK_LENGTH - overlap) {
                    self.index2[new_start] = self.index2[start];
                    new_start += 1;
                    start += 1;
                }
            } else {
                map[start >> SHIFT_1_2] = start as i32;
                start += INDEX_2_BLOCK_LENGTH;
                new_start = start;
            }
        }

        // Rewrite the index-1 table through the map.
        for entry in self.index1.iter_mut() {
            *entry = map[*entry as usize >> SHIFT_1_2];
        }
        self.index2_null_offset = map[self.index2_null_offset as usize >> SHIFT_1_2];

        // Pad so the data that follows stays granularity- and 2-aligned;
        // the filler value is impossible for real index data.
        if self.index2.len() < new_start + DATA_GRANULARITY {
            self.index2.resize(new_start + DATA_GRANULARITY, 0);
        }
        while new_start & ((DATA_GRANULARITY - 1) | 1) != 0 {
            self.index2[new_start] = (0xFFFF << INDEX_SHIFT) as i32;
            new_start += 1;
        }
        self.index2_length = new_start;
    }
}

#[cfg(test)]
mod tests {
    use super::CompactTrieBuilder;
    use crate::compact_trie::CompactTrie;
    use crate::error::Error;

    #[test]
    fn test_fresh_builder_is_uniform() {
        let builder = CompactTrieBuilder::new(42, 7);
        for cp in [0u32, 0x41, 0x7F, 0x80, 0x7FF, 0x800, 0xD800, 0xFFFF, 0x10000, 0x10FFFF] {
            assert_eq!(42, builder.get(cp));
        }
        assert_eq!(7, builder.get(0x110000));
        assert_eq!(7, builder.get(u32::MAX));
    }

    #[test]
    fn test_set_then_get() {
        let mut builder = CompactTrieBuilder::new(0, 0xDEAD);
        for (cp, value) in [
            (0u32, 100),
            (0x41, 101),
            (0x7F, 102),
            (0x80, 103),
            (0x7FF, 104),
            (0x800, 105),
            (0xFFFF, 106),
            (0x10000, 107),
            (0x10FFFF, 108),
        ] {
            builder.set(cp, value).unwrap();
        }
        assert_eq!(101, builder.get(0x41));
        assert_eq!(104, builder.get(0x7FF));
        assert_eq!(108, builder.get(0x10FFFF));
        assert_eq!(0, builder.get(0x42));
    }

    #[test]
    fn test_invalid_inputs() {
        let mut builder = CompactTrieBuilder::default();
        assert_eq!(
            Err(Error::InvalidCodePoint(0x110000)),
            builder.set(0x110000, 1).map(|_| ())
        );
        assert_eq!(
            Err(Error::InvalidRange { start: 5, end: 2 }),
            builder.set_range(5, 2, 1, true).map(|_| ())
        );
        assert_eq!(
            Err(Error::InvalidRange {
                start: 0,
                end: 0x110000
            }),
            builder.set_range(0, 0x110000, 1, true).map(|_| ())
        );
    }

    #[test]
    fn test_mutation_after_freeze_fails() {
        let mut builder = CompactTrieBuilder::default();
        builder.set(0x41, 1).unwrap();
        builder.freeze().unwrap();
        assert_eq!(Err(Error::AlreadyFinalized), builder.set(0x42, 2).map(|_| ()));
        assert_eq!(
            Err(Error::AlreadyFinalized),
            builder.set_range(0, 10, 2, true).map(|_| ())
        );
        // The read path stays valid after freezing.
        assert_eq!(1, builder.get(0x41));
    }

    #[test]
    fn test_set_range_without_overwrite_preserves_existing() {
        let mut builder = CompactTrieBuilder::new(0, 0);
        builder.set(0x120, 5).unwrap();
        builder.set_range(0x100, 0x1FF, 9, false).unwrap();
        assert_eq!(5, builder.get(0x120));
        assert_eq!(9, builder.get(0x121));
        assert_eq!(9, builder.get(0x100));
        assert_eq!(0, builder.get(0x200));
    }

    #[test]
    fn test_set_range_back_to_initial_without_overwrite_is_noop() {
        let mut builder = CompactTrieBuilder::new(0, 0);
        builder.set_range(0x2000, 0x2FFF, 3, true).unwrap();
        builder.set_range(0x2000, 0x2FFF, 0, false).unwrap();
        assert_eq!(3, builder.get(0x2800));
    }

    #[test]
    fn test_set_range_partial_blocks() {
        let mut builder = CompactTrieBuilder::new(0, 0);
        // Head, interior and tail blocks all in one range.
        builder.set_range(0x105, 0x1FA, 4, true).unwrap();
        assert_eq!(0, builder.get(0x104));
        assert_eq!(4, builder.get(0x105));
        assert_eq!(4, builder.get(0x180));
        assert_eq!(4, builder.get(0x1FA));
        assert_eq!(0, builder.get(0x1FB));
        // A range inside a single block.
        builder.set_range(0x3204, 0x3208, 6, true).unwrap();
        assert_eq!(0, builder.get(0x3203));
        assert_eq!(6, builder.get(0x3206));
        assert_eq!(0, builder.get(0x3209));
    }

    #[test]
    fn test_lead_surrogate_code_point_has_its_own_slot() {
        let mut builder = CompactTrieBuilder::new(0, 0);
        builder.set(0xD801, 3).unwrap();
        assert_eq!(3, builder.get(0xD801));
        // The code unit slot is independent of the code point slot.
        assert_eq!(0, builder.get_from_lead_surrogate_code_unit(0xD801));

        let trie = builder.freeze().unwrap();
        assert_eq!(3, trie.get(0xD801));
    }

    #[test]
    fn test_freeze_matches_model_over_full_space() {
        let ranges: &[(u32, u32, u32)] = &[
            (0x0, 0x7F, 1),
            (0x300, 0x36F, 2),
            (0x700, 0x9FF, 3),
            (0xD7F0, 0xDFFF, 4),
            (0xFF00, 0x101FF, 5),
            (0x20000, 0x2FFFD, 6),
            (0xE0000, 0xE01EF, 7),
            (0x2FF80, 0x3013F, 8),
        ];
        let mut builder = CompactTrieBuilder::new(9, 0xEEEE);
        let mut model = vec![9u32; 0x110000];
        for &(start, end, value) in ranges {
            builder.set_range(start, end, value, true).unwrap();
            for slot in &mut model[start as usize..=end as usize] {
                *slot = value;
            }
        }
        let trie = builder.freeze().unwrap();
        for cp in 0..0x110000u32 {
            assert_eq!(
                model[cp as usize],
                trie.get(cp),
                "mismatch at U+{cp:04X}"
            );
        }
        assert_eq!(0xEEEE, trie.get(0x110000));
    }

    #[test]
    fn test_serialized_roundtrip_matches_frozen_trie() {
        let mut builder = CompactTrieBuilder::new(0, 0xFFFF);
        builder.set_range(0x41, 0x5A, 11, true).unwrap();
        builder.set_range(0x1F300, 0x1F5FF, 12, true).unwrap();
        builder.set(0x10FFFF, 13).unwrap();
        let frozen = builder.freeze().unwrap();
        let bytes = builder.to_serialized_bytes().unwrap();
        let decoded = CompactTrie::from_bytes(&bytes).unwrap();
        assert_eq!(frozen.high_start(), decoded.high_start());
        assert_eq!(frozen.error_value(), decoded.error_value());
        for cp in 0..0x110000u32 {
            assert_eq!(frozen.get(cp), decoded.get(cp), "mismatch at U+{cp:04X}");
        }
    }

    #[test]
    fn test_freeze_twice_yields_identical_bytes() {
        let mut builder = CompactTrieBuilder::new(0, 0);
        builder.set_range(0x600, 0x605, 21, true).unwrap();
        builder.set_range(0x1F1E6, 0x1F1FF, 22, true).unwrap();
        let first = builder.to_serialized_bytes().unwrap();
        let second = builder.to_serialized_bytes().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_bmp_only_table_freezes_without_index1() {
        let mut builder = CompactTrieBuilder::new(0, 0);
        builder.set_range(0x41, 0x5A, 1, true).unwrap();
        let trie = builder.freeze().unwrap();
        assert!(trie.high_start() <= 0x10000);
        assert_eq!(1, trie.get(0x41));
        assert_eq!(0, trie.get(0x61));
        assert_eq!(0, trie.get(0x12345));
    }

    #[test]
    fn test_last_write_wins() {
        let mut builder = CompactTrieBuilder::new(0, 0);
        builder.set_range(0x1000, 0x1FFF, 1, true).unwrap();
        builder.set_range(0x1800, 0x27FF, 2, true).unwrap();
        builder.set(0x1803, 3).unwrap();
        let trie = builder.freeze().unwrap();
        assert_eq!(1, trie.get(0x17FF));
        assert_eq!(2, trie.get(0x1800));
        assert_eq!(3, trie.get(0x1803));
        assert_eq!(2, trie.get(0x27FF));
        assert_eq!(0, trie.get(0x2800));
    }
}

#[cfg(test)]
mod proptests {
    use super::CompactTrieBuilder;
    use crate::compact_trie::CompactTrie;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_ranges_roundtrip_through_freeze_and_wire(
            raw_ranges in prop::collection::vec(
                (0u32..=0x10FFFF, 0u32..=0x10FFFF, 1u32..0x4000),
                1..10,
            )
        ) {
            let mut builder = CompactTrieBuilder::new(0, u32::MAX);
            let mut ranges = Vec::new();
            for &(a, b, value) in &raw_ranges {
                let (start, end) = if a <= b { (a, b) } else { (b, a) };
                builder.set_range(start, end, value, true).unwrap();
                ranges.push((start, end, value));
            }
            // Last write wins.
            let expected = |cp: u32| {
                ranges
                    .iter()
                    .rev()
                    .find(|&&(start, end, _)| start <= cp && cp <= end)
                    .map(|&(_, _, value)| value)
                    .unwrap_or(0)
            };

            let mut probes = vec![
                0u32, 0x7F, 0x80, 0x7FF, 0x800, 0xD7FF, 0xD800, 0xDBFF, 0xDC00,
                0xFFFF, 0x10000, 0x10FFFF,
            ];
            for &(start, end, _) in &ranges {
                probes.push(start.saturating_sub(1));
                probes.push(start);
                probes.push(end);
                probes.push((end + 1).min(0x10FFFF));
            }

            let trie = builder.freeze().unwrap();
            for &cp in &probes {
                prop_assert_eq!(expected(cp), trie.get(cp));
            }

            let bytes = builder.to_serialized_bytes().unwrap();
            let decoded = CompactTrie::from_bytes(&bytes).unwrap();
            for &cp in &probes {
                prop_assert_eq!(expected(cp), decoded.get(cp));
            }
        }
    }
}
