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
use crate::packet::read_u32_be;
use crate::packet::write_u32_be;
use std::fmt;

pub(crate) const CHUNK_TYPE: u16 = 0x4003;

/// Size of the state cookie issued by the responder, see `connection::state_cookie`.
pub(crate) const STATE_COOKIE_SIZE: usize = 68;

/// State Cookie (COOKIE-ECHO) chunk
///
/// Echoes the state cookie from INIT-ACK. When keys are exchanged during the handshake, the
/// initiator's public key follows the cookie; otherwise the key length is zero.
///
/// ```txt
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Type = 0x4003         |            Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                      Cookie (68 bytes)                        /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          Key Length                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                          Public Key                           /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct CookieEchoChunk {
    pub cookie: Vec<u8>,
    pub public_key: Vec<u8>,
}

impl TryFrom<RawChunk<'_>> for CookieEchoChunk {
    type Error = ChunkParseError;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, ChunkParseError> {
        ensure!(raw.typ == CHUNK_TYPE, ChunkParseError::InvalidType);
        ensure!(raw.value.len() >= STATE_COOKIE_SIZE + 4, ChunkParseError::InvalidLength);

        let key_len = read_u32_be!(&raw.value[STATE_COOKIE_SIZE..]) as usize;
        let key = &raw.value[STATE_COOKIE_SIZE + 4..];
        ensure!(key.len() == key_len, ChunkParseError::InvalidLength);

        Ok(Self { cookie: raw.value[..STATE_COOKIE_SIZE].to_vec(), public_key: key.to_vec() })
    }
}

impl SerializableTlv for CookieEchoChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        debug_assert_eq!(self.cookie.len(), STATE_COOKIE_SIZE);
        let value = write_chunk_header(CHUNK_TYPE, self.value_size(), output);
        value[..STATE_COOKIE_SIZE].copy_from_slice(&self.cookie);
        write_u32_be!(&mut value[STATE_COOKIE_SIZE..], self.public_key.len());
        value[STATE_COOKIE_SIZE + 4..].copy_from_slice(&self.public_key);
    }

    fn value_size(&self) -> usize {
        STATE_COOKIE_SIZE + 4 + self.public_key.len()
    }
}

impl fmt::Display for CookieEchoChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "COOKIE-ECHO, public_key={} bytes", self.public_key.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_and_deserialize() {
        let chunk = CookieEchoChunk { cookie: vec![5; STATE_COOKIE_SIZE], public_key: vec![1, 2] };

        let mut serialized = vec![0; chunk.serialized_size()];
        chunk.serialize_to(&mut serialized);
        assert_eq!(serialized.len(), 4 + 68 + 4 + 2);

        let deserialized =
            CookieEchoChunk::try_from(RawChunk::from_bytes(&serialized).unwrap().0).unwrap();
        assert_eq!(deserialized, chunk);
    }

    #[test]
    fn without_key() {
        let chunk = CookieEchoChunk { cookie: vec![5; STATE_COOKIE_SIZE], public_key: vec![] };

        let mut serialized = vec![0; chunk.serialized_size()];
        chunk.serialize_to(&mut serialized);

        let deserialized =
            CookieEchoChunk::try_from(RawChunk::from_bytes(&serialized).unwrap().0).unwrap();
        assert!(deserialized.public_key.is_empty());
    }

    #[test]
    fn key_length_mismatch_is_rejected() {
        let chunk = CookieEchoChunk { cookie: vec![5; STATE_COOKIE_SIZE], public_key: vec![1, 2] };
        let mut serialized = vec![0; chunk.serialized_size()];
        chunk.serialize_to(&mut serialized);
        write_u32_be!(&mut serialized[4 + STATE_COOKIE_SIZE..], 3);

        assert_eq!(
            CookieEchoChunk::try_from(RawChunk::from_bytes(&serialized).unwrap().0).unwrap_err(),
            ChunkParseError::InvalidLength
        );
    }

    #[test]
    fn short_cookie_is_rejected() {
        const BYTES: &[u8] = &[0x40, 0x03, 0x00, 0x08, 0x12, 0x34, 0x56, 0x78];
        assert_eq!(
            CookieEchoChunk::try_from(RawChunk::from_bytes(BYTES).unwrap().0).unwrap_err(),
            ChunkParseError::InvalidLength
        );
    }
}
