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
use crate::packet::SerializableTlv;
use crate::packet::BuildError;
use crate::packet::cancelled_chunk::CancelledChunk;
use crate::packet::chunk::Chunk;
use crate::packet::ensure;
use crate::packet::mocket_packet::PacketBuilder;
use crate::packet::sack_chunk::SackChunk;
use crate::rx::range_handler::CancelledRangeHandler;
use crate::types::Flow;
use crate::types::Tsn;
use std::sync::Mutex;
use std::sync::MutexGuard;

#[derive(Default)]
struct CancelledState {
    reliable_sequenced: CancelledRangeHandler,
    reliable_unsequenced: CancelledRangeHandler,
    unreliable_sequenced: CancelledRangeHandler,
    last_update: Option<MocketTime>,
}

impl CancelledState {
    fn handler_mut(&mut self, flow: Flow) -> Option<&mut CancelledRangeHandler> {
        match flow {
            Flow::ReliableSequenced => Some(&mut self.reliable_sequenced),
            Flow::ReliableUnsequenced => Some(&mut self.reliable_unsequenced),
            Flow::UnreliableSequenced => Some(&mut self.unreliable_sequenced),
            Flow::Control | Flow::UnreliableUnsequenced => None,
        }
    }

    fn is_empty(&self) -> bool {
        self.reliable_sequenced.is_empty()
            && self.reliable_unsequenced.is_empty()
            && self.unreliable_sequenced.is_empty()
    }
}

/// Remembers the packets that this side has given up on, and announces them to the peer in
/// CANCELLED chunks until the peer's cumulative acks have moved past them.
///
/// Cancellations of the unreliable sequenced flow are never acknowledged, so they are
/// announced only once.
#[derive(Default)]
pub struct CancelledTsnManager {
    state: Mutex<CancelledState>,
}

/// Adds cancelled TSNs of a single flow while holding the manager's lock. Created by
/// [`CancelledTsnManager::start`].
pub struct CancelledBatch<'a> {
    flow: Flow,
    now: MocketTime,
    state: MutexGuard<'a, CancelledState>,
}

impl CancelledBatch<'_> {
    pub fn add(&mut self, tsn: Tsn) {
        let now = self.now;
        if let Some(handler) = self.state.handler_mut(self.flow) {
            if handler.add_tsn(tsn) {
                self.state.last_update = Some(now);
            }
        }
    }

    /// Releases the lock. Dropping the batch has the same effect.
    pub fn end(self) {}
}

impl CancelledTsnManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CancelledState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn start(&self, flow: Flow, now: MocketTime) -> CancelledBatch<'_> {
        debug_assert!(flow != Flow::Control && flow != Flow::UnreliableUnsequenced);
        CancelledBatch { flow, now, state: self.lock() }
    }

    pub fn add_cancelled_packet(&self, now: MocketTime, flow: Flow, tsn: Tsn) {
        self.start(flow, now).add(tsn);
    }

    pub fn delete_tsns_up_to(&self, flow: Flow, tsn: Tsn) {
        if let Some(handler) = self.lock().handler_mut(flow) {
            handler.delete_tsns_up_to(tsn);
        }
    }

    /// Forgets the cancelled TSNs that the peer has acknowledged cumulatively.
    pub fn process_sack(&self, sack: &SackChunk) {
        let mut state = self.lock();
        state.reliable_sequenced.delete_tsns_up_to(sack.reliable_sequenced.cumulative_tsn);
        state.reliable_unsequenced.delete_tsns_up_to(sack.reliable_unsequenced.cumulative_tsn);
    }

    pub fn have_information(&self) -> bool {
        !self.lock().is_empty()
    }

    /// When a TSN was last added.
    pub fn last_update(&self) -> Option<MocketTime> {
        self.lock().last_update
    }

    /// Appends a CANCELLED chunk to `builder`. The TSNs of a flow are included only if all of
    /// them fit.
    pub fn append_to(&self, builder: &mut PacketBuilder) -> Result<(), BuildError> {
        let mut state = self.lock();
        let mut chunk = CancelledChunk::default();
        let header_size = chunk.serialized_size();
        ensure!(header_size <= builder.bytes_remaining(), BuildError::InsufficientSpace);

        let mut remaining = builder.bytes_remaining() - header_size;
        for flow in [Flow::ReliableSequenced, Flow::ReliableUnsequenced, Flow::UnreliableSequenced]
        {
            let Some(handler) = state.handler_mut(flow) else { continue };
            let blocks = handler.blocks();
            if blocks.serialized_size() <= remaining {
                remaining -= blocks.serialized_size();
                if let Some(into) = chunk.blocks_mut(flow) {
                    *into = blocks;
                }
            }
        }
        ensure!(!chunk.is_empty(), BuildError::InsufficientSpace);
        builder.add(&Chunk::Cancelled(chunk.clone()))?;

        if !chunk.unreliable_sequenced.is_empty() {
            state.unreliable_sequenced.reset();
        }
        Ok(())
    }

    pub fn freeze(&self, freezer: &mut dyn Freezer) {
        let state = self.lock();
        state.reliable_sequenced.freeze(freezer);
        state.reliable_unsequenced.freeze(freezer);
        state.unreliable_sequenced.freeze(freezer);
    }

    pub fn defrost(defroster: &mut dyn Defroster) -> Result<Self, DefrostError> {
        let reliable_sequenced = CancelledRangeHandler::defrost(defroster)?;
        let reliable_unsequenced = CancelledRangeHandler::defrost(defroster)?;
        let unreliable_sequenced = CancelledRangeHandler::defrost(defroster)?;
        Ok(Self {
            state: Mutex::new(CancelledState {
                reliable_sequenced,
                reliable_unsequenced,
                unreliable_sequenced,
                last_update: None,
            }),
        })
    }
}
