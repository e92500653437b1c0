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
use crate::packet::read_u16_be;
use crate::packet::read_u32_be;
use crate::packet::write_u16_be;
use crate::packet::write_u32_be;
use std::fmt;

pub(crate) const CHUNK_TYPE: u16 = 0x4004;

/// Cookie Acknowledgement (COOKIE-ACK) chunk
///
/// Completes the handshake. Carries the responder's port and, if the initiator sent a public
/// key in COOKIE-ECHO, the session secret encrypted with that key.
///
/// ```txt
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Type = 0x4004         |            Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |             Port              |    Encrypted Secret Length    :
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// :  (optional, continued)        |                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+                               +
/// /                  Encrypted Secret (optional)                  /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, PartialEq)]
pub struct CookieAckChunk {
    pub port: u16,
    pub encrypted_secret: Option<Vec<u8>>,
}

impl TryFrom<RawChunk<'_>> for CookieAckChunk {
    type Error = ChunkParseError;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, ChunkParseError> {
        ensure!(raw.typ == CHUNK_TYPE, ChunkParseError::InvalidType);
        ensure!(raw.value.len() == 2 || raw.value.len() >= 6, ChunkParseError::InvalidLength);

        let port = read_u16_be!(&raw.value[0..2]);
        if raw.value.len() == 2 {
            return Ok(Self { port, encrypted_secret: None });
        }
        let len = read_u32_be!(&raw.value[2..6]) as usize;
        ensure!(raw.value.len() == 6 + len, ChunkParseError::InvalidLength);
        Ok(Self { port, encrypted_secret: Some(raw.value[6..].to_vec()) })
    }
}

impl SerializableTlv for CookieAckChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        let value = write_chunk_header(CHUNK_TYPE, self.value_size(), output);
        write_u16_be!(&mut value[0..2], self.port);
        if let Some(secret) = &self.encrypted_secret {
            write_u32_be!(&mut value[2..6], secret.len());
            value[6..].copy_from_slice(secret);
        }
    }

    fn value_size(&self) -> usize {
        2 + self.encrypted_secret.as_ref().map_or(0, |s| 4 + s.len())
    }
}

impl fmt::Display for CookieAckChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "COOKIE-ACK, port={}", self.port)
    }
}
