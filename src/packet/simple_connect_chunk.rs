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
use crate::packet::init_chunk::INIT_PARAMS_SIZE;
use crate::packet::init_chunk::InitParams;
use crate::packet::read_u16_be;
use crate::packet::write_u16_be;
use std::fmt;

/// Simple Connect chunk
///
/// Opens a connection with a two-way handshake. The value is the same as for an INIT chunk.
#[derive(Debug, PartialEq)]
pub struct SimpleConnectChunk {
    pub params: InitParams,
}

impl SimpleConnectChunk {
    pub(crate) const CHUNK_TYPE: u16 = 0x4011;
}

impl TryFrom<RawChunk<'_>> for SimpleConnectChunk {
    type Error = ChunkParseError;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, ChunkParseError> {
        ensure!(raw.typ == Self::CHUNK_TYPE, ChunkParseError::InvalidType);
        ensure!(raw.value.len() == INIT_PARAMS_SIZE, ChunkParseError::InvalidLength);
        Ok(Self { params: InitParams::read_from(raw.value)? })
    }
}

impl SerializableTlv for SimpleConnectChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        let value = write_chunk_header(Self::CHUNK_TYPE, self.value_size(), output);
        self.params.write_to(value);
    }

    fn value_size(&self) -> usize {
        INIT_PARAMS_SIZE
    }
}

impl fmt::Display for SimpleConnectChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIMPLE-CONNECT, validation={}", self.params.validation)
    }
}

/// Simple Connect Acknowledgement chunk
///
/// ```txt
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Type = 0x4012         |         Chunk Length          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                  Init Params (24 bytes)                       /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |             Port              |                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+                               +
/// \                         State Cookie                          \
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, PartialEq)]
pub struct SimpleConnectAckChunk {
    pub params: InitParams,
    pub port: u16,
    pub state_cookie: Vec<u8>,
}

impl SimpleConnectAckChunk {
    pub(crate) const CHUNK_TYPE: u16 = 0x4012;
}

impl TryFrom<RawChunk<'_>> for SimpleConnectAckChunk {
    type Error = ChunkParseError;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, ChunkParseError> {
        ensure!(raw.typ == Self::CHUNK_TYPE, ChunkParseError::InvalidType);
        ensure!(raw.value.len() >= INIT_PARAMS_SIZE + 2, ChunkParseError::InvalidLength);
        Ok(Self {
            params: InitParams::read_from(raw.value)?,
            port: read_u16_be!(&raw.value[INIT_PARAMS_SIZE..]),
            state_cookie: raw.value[INIT_PARAMS_SIZE + 2..].to_vec(),
        })
    }
}

impl SerializableTlv for SimpleConnectAckChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        let value = write_chunk_header(Self::CHUNK_TYPE, self.value_size(), output);
        self.params.write_to(value);
        write_u16_be!(&mut value[INIT_PARAMS_SIZE..], self.port);
        value[INIT_PARAMS_SIZE + 2..].copy_from_slice(&self.state_cookie);
    }

    fn value_size(&self) -> usize {
        INIT_PARAMS_SIZE + 2 + self.state_cookie.len()
    }
}

impl fmt::Display for SimpleConnectAckChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIMPLE-CONNECT-ACK, validation={}, port={}", self.params.validation, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tsn;

    #[test]
    fn serialize_and_deserialize() {
        let chunk = SimpleConnectAckChunk {
            params: InitParams {
                validation: 99,
                control_tsn: Tsn(10),
                rel_seq_tsn: Tsn(20),
                unrel_seq_tsn: Tsn(30),
                rel_unseq_id: Tsn(40),
                unrel_unseq_id: Tsn(50),
            },
            port: 4000,
            state_cookie: vec![1, 2, 3],
        };

        let mut serialized = vec![0; chunk.serialized_size()];
        chunk.serialize_to(&mut serialized);
        assert_eq!(&serialized[28..30], &[0x0f, 0xa0]);

        let deserialized =
            SimpleConnectAckChunk::try_from(RawChunk::from_bytes(&serialized).unwrap().0).unwrap();
        assert_eq!(deserialized, chunk);
    }

    #[test]
    fn simple_connect_must_have_exact_length() {
        const BYTES: &[u8] = &[0x40, 0x11, 0x00, 0x08, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(
            SimpleConnectChunk::try_from(RawChunk::from_bytes(BYTES).unwrap().0).unwrap_err(),
            ChunkParseError::InvalidLength
        );
    }
}
