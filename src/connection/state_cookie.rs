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

use crate::api::MocketTime;
use crate::packet::init_chunk::InitParams;
use crate::packet::read_u16_be;
use crate::packet::read_u32_be;
use crate::packet::read_u64_be;
use crate::packet::write_u16_be;
use crate::packet::write_u32_be;
use crate::packet::write_u64_be;
use crate::types::Tsn;
use sha2::Digest;
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

pub const COOKIE_SIZE: usize = 68;
const MAC_OFFSET: usize = 64;
const MAC_SIZE: usize = 4;

#[derive(Debug, Error, PartialEq)]
pub enum CookieError {
    #[error("Invalid state cookie size")]
    InvalidSize,

    #[error("State cookie MAC mismatch")]
    InvalidMac,

    #[error("State cookie has expired")]
    Expired,
}

/// Everything the responder needs to create the connection when the initiator echoes the
/// cookie back, so that it doesn't have to keep any state between INIT and COOKIE-ECHO.
///
/// ```txt
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      Creation Time (ms)                       |
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         Lifespan (ms)                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Validation A         |          Validation Z         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /     Initial TSN A and Z of each of the five sequence spaces   /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |             Port A            |             Port Z            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                              MAC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Side A is the initiator and side Z the responder. Each field above is 32 bits wide, except
/// the creation time (64 bits) and the ports (16 bits).
#[derive(Clone, Debug, PartialEq)]
pub struct StateCookie {
    pub creation_ms: u64,
    pub lifespan_ms: u32,
    pub initiator: InitParams,
    pub responder: InitParams,
    pub initiator_port: u16,
    pub responder_port: u16,
}

fn mac(secret: &[u8], body: &[u8]) -> [u8; MAC_SIZE] {
    let digest = Sha256::new().chain_update(secret).chain_update(body).finalize();
    let mut out = [0; MAC_SIZE];
    out.copy_from_slice(&digest[..MAC_SIZE]);
    out
}

impl StateCookie {
    pub fn new(
        now: MocketTime,
        lifespan: Duration,
        initiator: InitParams,
        responder: InitParams,
        initiator_port: u16,
        responder_port: u16,
    ) -> Self {
        Self {
            creation_ms: now.as_millis() as u64,
            lifespan_ms: lifespan.as_millis().min(u32::MAX as u128) as u32,
            initiator,
            responder,
            initiator_port,
            responder_port,
        }
    }

    /// Parses a cookie that was created by [`Self::serialize`] with the same `secret`, and that
    /// hasn't outlived its lifespan at `now`.
    pub fn verify(data: &[u8], secret: &[u8], now: MocketTime) -> Result<Self, CookieError> {
        if data.len() != COOKIE_SIZE {
            return Err(CookieError::InvalidSize);
        }
        if mac(secret, &data[..MAC_OFFSET]) != data[MAC_OFFSET..] {
            return Err(CookieError::InvalidMac);
        }

        let creation_ms = read_u64_be!(&data[0..8]);
        let lifespan_ms = read_u32_be!(&data[8..12]);
        let now_ms = now.as_millis() as u64;
        if now_ms < creation_ms || now_ms - creation_ms > lifespan_ms as u64 {
            return Err(CookieError::Expired);
        }

        let tsn = |offset: usize| Tsn(read_u32_be!(&data[offset..offset + 4]));
        let side = |validation_offset: usize, side_offset: usize| InitParams {
            validation: read_u32_be!(&data[validation_offset..validation_offset + 4]),
            control_tsn: tsn(20 + side_offset),
            rel_seq_tsn: tsn(28 + side_offset),
            unrel_seq_tsn: tsn(36 + side_offset),
            rel_unseq_id: tsn(44 + side_offset),
            unrel_unseq_id: tsn(52 + side_offset),
        };
        Ok(Self {
            creation_ms,
            lifespan_ms,
            initiator: side(12, 0),
            responder: side(16, 4),
            initiator_port: read_u16_be!(&data[60..62]),
            responder_port: read_u16_be!(&data[62..64]),
        })
    }

    pub fn serialize(&self, secret: &[u8]) -> Vec<u8> {
        let mut data = vec![0; COOKIE_SIZE];
        write_u64_be!(&mut data[0..8], self.creation_ms);
        write_u32_be!(&mut data[8..12], self.lifespan_ms);
        write_u32_be!(&mut data[12..16], self.initiator.validation);
        write_u32_be!(&mut data[16..20], self.responder.validation);
        for (offset, side) in [(0, &self.initiator), (4, &self.responder)] {
            write_u32_be!(&mut data[20 + offset..24 + offset], side.control_tsn.0);
            write_u32_be!(&mut data[28 + offset..32 + offset], side.rel_seq_tsn.0);
            write_u32_be!(&mut data[36 + offset..40 + offset], side.unrel_seq_tsn.0);
            write_u32_be!(&mut data[44 + offset..48 + offset], side.rel_unseq_id.0);
            write_u32_be!(&mut data[52 + offset..56 + offset], side.unrel_unseq_id.0);
        }
        write_u16_be!(&mut data[60..62], self.initiator_port);
        write_u16_be!(&mut data[62..64], self.responder_port);
        let mac = mac(secret, &data[..MAC_OFFSET]);
        data[MAC_OFFSET..].copy_from_slice(&mac);
        data
    }
}
