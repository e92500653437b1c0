// Copyright 2025 The dcSCTP Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The block encoding shared by SACK and CANCELLED chunks.
//!
//! Each block starts with a flags byte that selects the flow and whether the block holds ranges
//! or single TSNs, followed by the block length (including this three byte header):
//!
//! ```txt
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Block Flags  |         Block Length          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  Range Begin / Single TSN                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  Range End (ranges only)                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! /                              ...                              /
//! ```
//!
//! For every flow, the ranges block is written before the singles block.

use crate::packet::ChunkParseError;
use crate::packet::ensure;
use crate::packet::read_u16_be;
use crate::packet::read_u32_be;
use crate::packet::write_u16_be;
use crate::packet::write_u32_be;
use crate::types::Tsn;

pub(crate) const BLOCK_HEADER_SIZE: usize = 3;
pub(crate) const RANGE_SIZE: usize = 8;
pub(crate) const SINGLE_SIZE: usize = 4;

pub(crate) const BLOCK_TYPE_RANGE: u8 = 0x10;
pub(crate) const BLOCK_TYPE_SINGLE: u8 = 0x20;
const BLOCK_FLOW_MASK: u8 = 0x0F;

fn block_size(count: usize, entry_size: usize) -> usize {
    if count == 0 { 0 } else { BLOCK_HEADER_SIZE + count * entry_size }
}

/// The TSNs reported for one flow: inclusive ranges of at least two TSNs, and single TSNs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TsnBlocks {
    pub ranges: Vec<(Tsn, Tsn)>,
    pub singles: Vec<Tsn>,
}

impl TsnBlocks {
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty() && self.singles.is_empty()
    }

    /// Number of bytes that [`Self::write_to`] will write. Empty blocks are omitted.
    pub fn serialized_size(&self) -> usize {
        block_size(self.ranges.len(), RANGE_SIZE) + block_size(self.singles.len(), SINGLE_SIZE)
    }

    /// Writes the ranges block, then the singles block, tagged with `flow_flag`. Returns the
    /// number of bytes written.
    pub(crate) fn write_to(&self, flow_flag: u8, output: &mut [u8]) -> usize {
        let mut offset = 0;
        if !self.ranges.is_empty() {
            let len = block_size(self.ranges.len(), RANGE_SIZE);
            output[offset] = flow_flag | BLOCK_TYPE_RANGE;
            write_u16_be!(&mut output[offset + 1..], len);
            let entries = &mut output[offset + BLOCK_HEADER_SIZE..offset + len];
            for (&(begin, end), out) in self.ranges.iter().zip(entries.chunks_exact_mut(RANGE_SIZE))
            {
                write_u32_be!(&mut out[0..4], begin.0);
                write_u32_be!(&mut out[4..8], end.0);
            }
            offset += len;
        }
        if !self.singles.is_empty() {
            let len = block_size(self.singles.len(), SINGLE_SIZE);
            output[offset] = flow_flag | BLOCK_TYPE_SINGLE;
            write_u16_be!(&mut output[offset + 1..], len);
            let entries = &mut output[offset + BLOCK_HEADER_SIZE..offset + len];
            for (tsn, out) in self.singles.iter().zip(entries.chunks_exact_mut(SINGLE_SIZE)) {
                write_u32_be!(out, tsn.0);
            }
            offset += len;
        }
        offset
    }
}

/// Parses a sequence of blocks. Returns, in wire order, the flow flag of every block together
/// with its content.
pub(crate) fn read_blocks(mut data: &[u8]) -> Result<Vec<(u8, TsnBlocks)>, ChunkParseError> {
    let mut blocks = Vec::new();
    while !data.is_empty() {
        ensure!(data.len() >= BLOCK_HEADER_SIZE, ChunkParseError::InvalidLength);
        let flags = data[0];
        let len = read_u16_be!(&data[1..3]) as usize;
        ensure!(len >= BLOCK_HEADER_SIZE && len <= data.len(), ChunkParseError::InvalidLength);
        let entries = &data[BLOCK_HEADER_SIZE..len];

        let mut block = TsnBlocks::default();
        match flags & !BLOCK_FLOW_MASK {
            BLOCK_TYPE_RANGE => {
                ensure!(entries.len() % RANGE_SIZE == 0, ChunkParseError::InvalidLength);
                block.ranges = entries
                    .chunks_exact(RANGE_SIZE)
                    .map(|c| (Tsn(read_u32_be!(&c[0..4])), Tsn(read_u32_be!(&c[4..8]))))
                    .collect();
            }
            BLOCK_TYPE_SINGLE => {
                ensure!(entries.len() % SINGLE_SIZE == 0, ChunkParseError::InvalidLength);
                block.singles =
                    entries.chunks_exact(SINGLE_SIZE).map(|c| Tsn(read_u32_be!(c))).collect();
            }
            _ => return Err(ChunkParseError::InvalidValue),
        }
        blocks.push((flags & BLOCK_FLOW_MASK, block));
        data = &data[len..];
    }
    Ok(blocks)
}

/// Merges `other` into `into`, keeping the ranges-then-singles grouping.
pub(crate) fn merge_into(into: &mut TsnBlocks, other: TsnBlocks) {
    into.ranges.extend(other.ranges);
    into.singles.extend(other.singles);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_blocks_are_omitted() {
        let blocks = TsnBlocks::default();
        assert_eq!(blocks.serialized_size(), 0);
        assert_eq!(blocks.write_to(0x01, &mut []), 0);
    }

    #[test]
    fn writes_ranges_then_singles() {
        let blocks = TsnBlocks { ranges: vec![(Tsn(12), Tsn(14))], singles: vec![Tsn(16)] };
        let mut out = vec![0; blocks.serialized_size()];
        assert_eq!(blocks.write_to(0x02, &mut out), 18);
        assert_eq!(
            out,
            &[
                0x12, 0x00, 0x0b, 0x00, 0x00, 0x00, 0x0c, 0x00, 0x00, 0x00, 0x0e, 0x22, 0x00, 0x07,
                0x00, 0x00, 0x00, 0x10
            ]
        );

        let read = read_blocks(&out).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0].0, 0x02);
        assert_eq!(read[0].1.ranges, vec![(Tsn(12), Tsn(14))]);
        assert_eq!(read[1].1.singles, vec![Tsn(16)]);
    }

    #[test]
    fn block_length_past_end_is_rejected() {
        assert_eq!(
            read_blocks(&[0x21, 0x00, 0x08, 0x00, 0x00, 0x00, 0x01]).unwrap_err(),
            ChunkParseError::InvalidLength
        );
    }

    #[test]
    fn partial_range_entry_is_rejected() {
        assert_eq!(
            read_blocks(&[0x11, 0x00, 0x07, 0x00, 0x00, 0x00, 0x01]).unwrap_err(),
            ChunkParseError::InvalidLength
        );
    }

    #[test]
    fn unknown_block_type_is_rejected() {
        assert_eq!(
            read_blocks(&[0x31, 0x00, 0x03]).unwrap_err(),
            ChunkParseError::InvalidValue
        );
    }
}
