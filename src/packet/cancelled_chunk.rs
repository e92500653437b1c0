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

use crate::packet::ChunkParseError;
use crate::packet::SerializableTlv;
use crate::packet::chunk::RawChunk;
use crate::packet::chunk::write_chunk_header;
use crate::packet::ensure;
use crate::packet::tsn_blocks::TsnBlocks;
use crate::packet::tsn_blocks::merge_into;
use crate::packet::tsn_blocks::read_blocks;
use crate::types::Flow;
use std::fmt;

pub(crate) const CHUNK_TYPE: u16 = 0x1003;

const FLOW_RELIABLE_SEQUENCED: u8 = 0x01;
const FLOW_RELIABLE_UNSEQUENCED: u8 = 0x02;
const FLOW_UNRELIABLE_SEQUENCED: u8 = 0x04;

/// Cancelled Packets (CANCELLED) chunk
///
/// Piggybacked on outgoing packets. Tells the peer which TSNs the sender has given up on, so
/// that the receiver stops waiting for them.
///
/// ```txt
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Type = 0x1003         |            Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                         TSN Blocks                            /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CancelledChunk {
    pub reliable_sequenced: TsnBlocks,
    pub reliable_unsequenced: TsnBlocks,
    pub unreliable_sequenced: TsnBlocks,
}

impl CancelledChunk {
    pub fn blocks(&self, flow: Flow) -> Option<&TsnBlocks> {
        match flow {
            Flow::ReliableSequenced => Some(&self.reliable_sequenced),
            Flow::ReliableUnsequenced => Some(&self.reliable_unsequenced),
            Flow::UnreliableSequenced => Some(&self.unreliable_sequenced),
            Flow::Control | Flow::UnreliableUnsequenced => None,
        }
    }

    pub(crate) fn blocks_mut(&mut self, flow: Flow) -> Option<&mut TsnBlocks> {
        match flow {
            Flow::ReliableSequenced => Some(&mut self.reliable_sequenced),
            Flow::ReliableUnsequenced => Some(&mut self.reliable_unsequenced),
            Flow::UnreliableSequenced => Some(&mut self.unreliable_sequenced),
            Flow::Control | Flow::UnreliableUnsequenced => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.flows().iter().all(|(_, b)| b.is_empty())
    }

    fn flows(&self) -> [(u8, &TsnBlocks); 3] {
        [
            (FLOW_RELIABLE_SEQUENCED, &self.reliable_sequenced),
            (FLOW_RELIABLE_UNSEQUENCED, &self.reliable_unsequenced),
            (FLOW_UNRELIABLE_SEQUENCED, &self.unreliable_sequenced),
        ]
    }
}

impl TryFrom<RawChunk<'_>> for CancelledChunk {
    type Error = ChunkParseError;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, ChunkParseError> {
        ensure!(raw.typ == CHUNK_TYPE, ChunkParseError::InvalidType);

        let mut chunk = CancelledChunk::default();
        for (flow_flag, blocks) in read_blocks(raw.value)? {
            let into = match flow_flag {
                FLOW_RELIABLE_SEQUENCED => &mut chunk.reliable_sequenced,
                FLOW_RELIABLE_UNSEQUENCED => &mut chunk.reliable_unsequenced,
                FLOW_UNRELIABLE_SEQUENCED => &mut chunk.unreliable_sequenced,
                _ => return Err(ChunkParseError::InvalidValue),
            };
            merge_into(into, blocks);
        }
        Ok(chunk)
    }
}

impl SerializableTlv for CancelledChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        let value = write_chunk_header(CHUNK_TYPE, self.value_size(), output);
        let mut offset = 0;
        for (flow_flag, blocks) in self.flows() {
            offset += blocks.write_to(flow_flag, &mut value[offset..]);
        }
    }

    fn value_size(&self) -> usize {
        self.flows().iter().map(|(_, b)| b.serialized_size()).sum()
    }
}

impl fmt::Display for CancelledChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CANCELLED")?;
        for (flow, blocks) in [
            (Flow::ReliableSequenced, &self.reliable_sequenced),
            (Flow::ReliableUnsequenced, &self.reliable_unsequenced),
            (Flow::UnreliableSequenced, &self.unreliable_sequenced),
        ] {
            if !blocks.is_empty() {
                write!(f, ", {}={:?}/{:?}", flow, blocks.ranges, blocks.singles)?;
            }
        }
        Ok(())
    }
}
