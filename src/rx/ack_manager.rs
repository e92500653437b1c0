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
use crate::api::freeze::DefrostError;
use crate::api::freeze::Defroster;
use crate::api::freeze::Freezer;
use crate::packet::BuildError;
use crate::packet::chunk::Chunk;
use crate::packet::ensure;
use crate::packet::mocket_packet::PacketBuilder;
use crate::packet::sack_chunk::BandwidthSample;
use crate::packet::sack_chunk::FlowAck;
use crate::packet::sack_chunk::SackChunk;
use crate::packet::tsn_blocks::TsnBlocks;
use crate::rx::range_handler::SackRangeHandler;
use crate::types::Flow;
use crate::types::Tsn;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

struct AckState {
    control: SackRangeHandler,
    reliable_sequenced: SackRangeHandler,
    reliable_unsequenced: SackRangeHandler,

    /// When a packet was last recorded.
    last_update: Option<MocketTime>,

    /// Set when a packet has been recorded after the last SACK.
    pending: bool,

    /// Set when a duplicate has been received, which must be answered without delay.
    immediate: bool,

    /// Bytes received since the last SACK, reported when bandwidth estimation is enabled.
    bytes_received: u32,
}

impl AckState {
    fn handler_mut(&mut self, flow: Flow) -> Option<&mut SackRangeHandler> {
        match flow {
            Flow::Control => Some(&mut self.control),
            Flow::ReliableSequenced => Some(&mut self.reliable_sequenced),
            Flow::ReliableUnsequenced => Some(&mut self.reliable_unsequenced),
            Flow::UnreliableSequenced | Flow::UnreliableUnsequenced => None,
        }
    }
}

/// Keeps track of which packets of the reliable flows have been received, and generates the
/// SACK chunks that acknowledge them.
///
/// The manager is shared between the receive path, which records packets, and the transmit
/// path, which piggybacks SACKs on outgoing packets. All state is behind a single lock.
pub struct AckManager {
    bandwidth_estimation: bool,
    state: Mutex<AckState>,
}

impl AckManager {
    pub fn new(bandwidth_estimation: bool) -> Self {
        Self {
            bandwidth_estimation,
            state: Mutex::new(AckState {
                control: SackRangeHandler::default(),
                reliable_sequenced: SackRangeHandler::default(),
                reliable_unsequenced: SackRangeHandler::default(),
                last_update: None,
                pending: false,
                immediate: false,
                bytes_received: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AckState> {
        // A panic while holding the lock can't leave the range handlers half-updated, so a
        // poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seeds the cumulative acks with the peer's initial TSNs, as announced in the handshake.
    pub fn init(&self, control: Tsn, reliable_sequenced: Tsn, reliable_unsequenced: Tsn) {
        let mut state = self.lock();
        state.control.set_cumulative_tsn(control - 1);
        state.reliable_sequenced.set_cumulative_tsn(reliable_sequenced - 1);
        state.reliable_unsequenced.set_cumulative_tsn(reliable_unsequenced - 1);
    }

    /// Records the arrival of a packet of `size` bytes with sequence number `tsn` on `flow`.
    ///
    /// Returns `false` if the packet had been received before, in which case the next SACK
    /// will be sent immediately. Unreliable flows are never acknowledged, and always return
    /// `true`.
    pub fn received_packet(&self, now: MocketTime, flow: Flow, tsn: Tsn, size: usize) -> bool {
        let mut state = self.lock();
        state.bytes_received = state.bytes_received.saturating_add(size as u32);
        let Some(handler) = state.handler_mut(flow) else {
            return true;
        };
        let added = handler.add_tsn(tsn);
        if !added {
            state.immediate = true;
        }
        state.last_update = Some(now);
        state.pending = true;
        added
    }

    /// Requests that the next SACK is sent without delay.
    pub fn request_immediate_ack(&self) {
        let mut state = self.lock();
        if state.pending {
            state.immediate = true;
        }
    }

    /// Whether a packet has been recorded after `time`.
    pub fn has_new_info_since(&self, time: MocketTime) -> bool {
        self.lock().last_update.is_some_and(|t| t > time)
    }

    /// Returns true if there is acknowledgement information that hasn't been sent yet.
    pub fn has_pending_ack(&self) -> bool {
        self.lock().pending
    }

    /// Returns when a SACK must be sent at the latest, if there is anything to acknowledge.
    pub fn next_ack_deadline(&self, sack_delay: Duration) -> Option<MocketTime> {
        let state = self.lock();
        if !state.pending {
            return None;
        }
        let update = state.last_update?;
        if state.immediate { Some(update) } else { Some(update + sack_delay) }
    }

    pub fn cumulative_tsn(&self, flow: Flow) -> Option<Tsn> {
        let mut state = self.lock();
        state.handler_mut(flow).map(|h| h.cumulative_tsn())
    }

    /// Appends a SACK chunk to `builder`.
    ///
    /// The cumulative acks always fit if the chunk fits at all. The blocks of each flow are
    /// included only if all of them fit in the remaining space.
    pub fn append_to(
        &self,
        now: MocketTime,
        builder: &mut PacketBuilder,
    ) -> Result<(), BuildError> {
        let mut state = self.lock();
        let min_size = SackChunk::min_serialized_size(self.bandwidth_estimation);
        ensure!(min_size <= builder.bytes_remaining(), BuildError::InsufficientSpace);

        let mut remaining = builder.bytes_remaining() - min_size;
        let mut flow_ack = |handler: &SackRangeHandler| {
            let mut ack = FlowAck::new(handler.cumulative_tsn());
            let blocks = handler.blocks();
            if blocks.serialized_size() <= remaining {
                remaining -= blocks.serialized_size();
                ack.blocks = blocks;
            } else {
                ack.blocks = TsnBlocks::default();
            }
            ack
        };
        let control = flow_ack(&state.control);
        let reliable_sequenced = flow_ack(&state.reliable_sequenced);
        let reliable_unsequenced = flow_ack(&state.reliable_unsequenced);

        let bandwidth_sample = self.bandwidth_estimation.then(|| BandwidthSample {
            bytes_received: state.bytes_received,
            timestamp: now.as_millis(),
        });

        builder.add(&Chunk::Sack(SackChunk {
            control,
            reliable_sequenced,
            reliable_unsequenced,
            bandwidth_sample,
        }))?;

        state.pending = false;
        state.immediate = false;
        state.bytes_received = 0;
        Ok(())
    }

    pub fn freeze(&self, freezer: &mut dyn Freezer) {
        let state = self.lock();
        state.control.freeze(freezer);
        state.reliable_sequenced.freeze(freezer);
        state.reliable_unsequenced.freeze(freezer);
    }

    pub fn defrost(
        bandwidth_estimation: bool,
        defroster: &mut dyn Defroster,
    ) -> Result<Self, DefrostError> {
        let manager = Self::new(bandwidth_estimation);
        {
            let mut state = manager.lock();
            state.control = SackRangeHandler::defrost(defroster)?;
            state.reliable_sequenced = SackRangeHandler::defrost(defroster)?;
            state.reliable_unsequenced = SackRangeHandler::defrost(defroster)?;
        }
        Ok(manager)
    }
}
