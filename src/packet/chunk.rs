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

use crate::packet::AsSerializableTlv;
use crate::packet::ChunkParseError;
use crate::packet::SerializableTlv;
use crate::packet::TLV_HEADER_SIZE;
use crate::packet::cancelled_chunk;
use crate::packet::cancelled_chunk::CancelledChunk;
use crate::packet::cookie_ack_chunk;
use crate::packet::cookie_ack_chunk::CookieAckChunk;
use crate::packet::cookie_echo_chunk;
use crate::packet::cookie_echo_chunk::CookieEchoChunk;
use crate::packet::data_chunk;
use crate::packet::data_chunk::DataChunk;
use crate::packet::ensure;
use crate::packet::header_only_chunks::AbortChunk;
use crate::packet::header_only_chunks::ReEstablishAckChunk;
use crate::packet::header_only_chunks::ResumeAckChunk;
use crate::packet::header_only_chunks::ShutdownAckChunk;
use crate::packet::header_only_chunks::ShutdownChunk;
use crate::packet::header_only_chunks::ShutdownCompleteChunk;
use crate::packet::header_only_chunks::SimpleSuspendAckChunk;
use crate::packet::header_only_chunks::SimpleSuspendChunk;
use crate::packet::init_chunk::InitAckChunk;
use crate::packet::init_chunk::InitChunk;
use crate::packet::opaque_chunks::ReEstablishChunk;
use crate::packet::opaque_chunks::ResumeChunk;
use crate::packet::opaque_chunks::SuspendAckChunk;
use crate::packet::opaque_chunks::SuspendChunk;
use crate::packet::read_u16_be;
use crate::packet::sack_chunk;
use crate::packet::sack_chunk::SackChunk;
use crate::packet::simple_connect_chunk::SimpleConnectAckChunk;
use crate::packet::simple_connect_chunk::SimpleConnectChunk;
use crate::packet::timestamp_chunks::HeartbeatChunk;
use crate::packet::timestamp_chunks::TimestampAckChunk;
use crate::packet::timestamp_chunks::TimestampChunk;
use crate::packet::unknown_chunk::UnknownChunk;
use crate::packet::write_u16_be;
use std::fmt;

/// The high bits of a chunk type select its class.
pub(crate) const CHUNK_CLASS_MASK: u16 = 0xF000;
pub(crate) const CHUNK_CLASS_STATE_CHANGE: u16 = 0x4000;

/// Intermediate representation of a chunk for which the type hasn't been fully discriminated.
///
/// ```txt
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Chunk Type           |         Chunk Length          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// \                                                               \
/// /                          Chunk Value                          /
/// \                                                               \
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The length includes the four header bytes. Chunks are not padded.
#[derive(Debug)]
pub(crate) struct RawChunk<'a> {
    pub(crate) typ: u16,
    pub(crate) value: &'a [u8],
}

impl<'a> RawChunk<'a> {
    /// Reads a chunk from `bytes` and returns a raw representation of the chunk and the remaining
    /// data that was not consumed when reading this chunk.
    pub(crate) fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), ChunkParseError> {
        ensure!(bytes.len() >= TLV_HEADER_SIZE, ChunkParseError::InvalidLength);

        let length = read_u16_be!(&bytes[2..4]) as usize;
        ensure!(length >= TLV_HEADER_SIZE && length <= bytes.len(), ChunkParseError::InvalidLength);

        Ok((
            Self { typ: read_u16_be!(&bytes[0..2]), value: &bytes[TLV_HEADER_SIZE..length] },
            &bytes[length..],
        ))
    }
}

/// Writes a chunk header with the provided arguments and returns the remaining part of the chunk
/// (its value) that may be filled in by the caller with additional data.
#[inline]
pub fn write_chunk_header(typ: u16, value_size: usize, output: &mut [u8]) -> &mut [u8] {
    let serialized_size = TLV_HEADER_SIZE + value_size;
    assert!(output.len() >= serialized_size && serialized_size <= u16::MAX as usize);
    write_u16_be!(&mut output[0..2], typ);
    write_u16_be!(&mut output[2..4], serialized_size as u16);
    &mut output[TLV_HEADER_SIZE..serialized_size]
}

/// Enumerating all supported (and unknown) chunks.
#[derive(Debug)]
pub enum Chunk {
    Sack(SackChunk),
    Heartbeat(HeartbeatChunk),
    Cancelled(CancelledChunk),
    Timestamp(TimestampChunk),
    TimestampAck(TimestampAckChunk),
    Data(DataChunk),
    Init(InitChunk),
    InitAck(InitAckChunk),
    CookieEcho(CookieEchoChunk),
    CookieAck(CookieAckChunk),
    Shutdown(ShutdownChunk),
    ShutdownAck(ShutdownAckChunk),
    ShutdownComplete(ShutdownCompleteChunk),
    Abort(AbortChunk),
    Suspend(SuspendChunk),
    SuspendAck(SuspendAckChunk),
    Resume(ResumeChunk),
    ResumeAck(ResumeAckChunk),
    ReEstablish(ReEstablishChunk),
    ReEstablishAck(ReEstablishAckChunk),
    SimpleSuspend(SimpleSuspendChunk),
    SimpleSuspendAck(SimpleSuspendAckChunk),
    SimpleConnect(SimpleConnectChunk),
    SimpleConnectAck(SimpleConnectAckChunk),
    Unknown(UnknownChunk),
}

impl Chunk {
    /// Piggyback chunks carry acknowledgement and timing information that is regenerated for
    /// every transmission. They are always placed after all other chunks in a packet.
    pub fn is_piggyback(&self) -> bool {
        matches!(
            self,
            Chunk::Sack(_) | Chunk::Cancelled(_) | Chunk::Timestamp(_) | Chunk::TimestampAck(_)
        )
    }

    pub fn is_state_change(&self) -> bool {
        match self {
            Chunk::Unknown(c) => c.typ & CHUNK_CLASS_MASK == CHUNK_CLASS_STATE_CHANGE,
            Chunk::Sack(_)
            | Chunk::Heartbeat(_)
            | Chunk::Cancelled(_)
            | Chunk::Timestamp(_)
            | Chunk::TimestampAck(_)
            | Chunk::Data(_) => false,
            _ => true,
        }
    }
}

impl TryFrom<RawChunk<'_>> for Chunk {
    type Error = ChunkParseError;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, ChunkParseError> {
        match raw.typ {
            sack_chunk::CHUNK_TYPE | sack_chunk::REC_BAND_EST_CHUNK_TYPE => {
                SackChunk::try_from(raw).map(Chunk::Sack)
            }
            HeartbeatChunk::CHUNK_TYPE => HeartbeatChunk::try_from(raw).map(Chunk::Heartbeat),
            cancelled_chunk::CHUNK_TYPE => CancelledChunk::try_from(raw).map(Chunk::Cancelled),
            TimestampChunk::CHUNK_TYPE => TimestampChunk::try_from(raw).map(Chunk::Timestamp),
            TimestampAckChunk::CHUNK_TYPE => {
                TimestampAckChunk::try_from(raw).map(Chunk::TimestampAck)
            }
            data_chunk::CHUNK_TYPE => DataChunk::try_from(raw).map(Chunk::Data),
            InitChunk::CHUNK_TYPE => InitChunk::try_from(raw).map(Chunk::Init),
            InitAckChunk::CHUNK_TYPE => InitAckChunk::try_from(raw).map(Chunk::InitAck),
            cookie_echo_chunk::CHUNK_TYPE => CookieEchoChunk::try_from(raw).map(Chunk::CookieEcho),
            cookie_ack_chunk::CHUNK_TYPE => CookieAckChunk::try_from(raw).map(Chunk::CookieAck),
            ShutdownChunk::CHUNK_TYPE => ShutdownChunk::try_from(raw).map(Chunk::Shutdown),
            ShutdownAckChunk::CHUNK_TYPE => {
                ShutdownAckChunk::try_from(raw).map(Chunk::ShutdownAck)
            }
            ShutdownCompleteChunk::CHUNK_TYPE => {
                ShutdownCompleteChunk::try_from(raw).map(Chunk::ShutdownComplete)
            }
            AbortChunk::CHUNK_TYPE => AbortChunk::try_from(raw).map(Chunk::Abort),
            SuspendChunk::CHUNK_TYPE => SuspendChunk::try_from(raw).map(Chunk::Suspend),
            SuspendAckChunk::CHUNK_TYPE => SuspendAckChunk::try_from(raw).map(Chunk::SuspendAck),
            ResumeChunk::CHUNK_TYPE => ResumeChunk::try_from(raw).map(Chunk::Resume),
            ResumeAckChunk::CHUNK_TYPE => ResumeAckChunk::try_from(raw).map(Chunk::ResumeAck),
            ReEstablishChunk::CHUNK_TYPE => {
                ReEstablishChunk::try_from(raw).map(Chunk::ReEstablish)
            }
            ReEstablishAckChunk::CHUNK_TYPE => {
                ReEstablishAckChunk::try_from(raw).map(Chunk::ReEstablishAck)
            }
            SimpleSuspendChunk::CHUNK_TYPE => {
                SimpleSuspendChunk::try_from(raw).map(Chunk::SimpleSuspend)
            }
            SimpleSuspendAckChunk::CHUNK_TYPE => {
                SimpleSuspendAckChunk::try_from(raw).map(Chunk::SimpleSuspendAck)
            }
            SimpleConnectChunk::CHUNK_TYPE => {
                SimpleConnectChunk::try_from(raw).map(Chunk::SimpleConnect)
            }
            SimpleConnectAckChunk::CHUNK_TYPE => {
                SimpleConnectAckChunk::try_from(raw).map(Chunk::SimpleConnectAck)
            }
            _ => UnknownChunk::try_from(raw).map(Chunk::Unknown),
        }
    }
}

impl AsSerializableTlv for Chunk {
    fn as_serializable(&self) -> &dyn SerializableTlv {
        match self {
            Chunk::Sack(s) => s,
            Chunk::Heartbeat(s) => s,
            Chunk::Cancelled(s) => s,
            Chunk::Timestamp(s) => s,
            Chunk::TimestampAck(s) => s,
            Chunk::Data(s) => s,
            Chunk::Init(s) => s,
            Chunk::InitAck(s) => s,
            Chunk::CookieEcho(s) => s,
            Chunk::CookieAck(s) => s,
            Chunk::Shutdown(s) => s,
            Chunk::ShutdownAck(s) => s,
            Chunk::ShutdownComplete(s) => s,
            Chunk::Abort(s) => s,
            Chunk::Suspend(s) => s,
            Chunk::SuspendAck(s) => s,
            Chunk::Resume(s) => s,
            Chunk::ResumeAck(s) => s,
            Chunk::ReEstablish(s) => s,
            Chunk::ReEstablishAck(s) => s,
            Chunk::SimpleSuspend(s) => s,
            Chunk::SimpleSuspendAck(s) => s,
            Chunk::SimpleConnect(s) => s,
            Chunk::SimpleConnectAck(s) => s,
            Chunk::Unknown(s) => s,
        }
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chunk::Sack(c) => c.fmt(f),
            Chunk::Heartbeat(c) => c.fmt(f),
            Chunk::Cancelled(c) => c.fmt(f),
            Chunk::Timestamp(c) => c.fmt(f),
            Chunk::TimestampAck(c) => c.fmt(f),
            Chunk::Data(c) => c.fmt(f),
            Chunk::Init(c) => c.fmt(f),
            Chunk::InitAck(c) => c.fmt(f),
            Chunk::CookieEcho(c) => c.fmt(f),
            Chunk::CookieAck(c) => c.fmt(f),
            Chunk::Shutdown(c) => c.fmt(f),
            Chunk::ShutdownAck(c) => c.fmt(f),
            Chunk::ShutdownComplete(c) => c.fmt(f),
            Chunk::Abort(c) => c.fmt(f),
            Chunk::Suspend(c) => c.fmt(f),
            Chunk::SuspendAck(c) => c.fmt(f),
            Chunk::Resume(c) => c.fmt(f),
            Chunk::ResumeAck(c) => c.fmt(f),
            Chunk::ReEstablish(c) => c.fmt(f),
            Chunk::ReEstablishAck(c) => c.fmt(f),
            Chunk::SimpleSuspend(c) => c.fmt(f),
            Chunk::SimpleSuspendAck(c) => c.fmt(f),
            Chunk::SimpleConnect(c) => c.fmt(f),
            Chunk::SimpleConnectAck(c) => c.fmt(f),
            Chunk::Unknown(c) => c.fmt(f),
        }
    }
}
