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

use crate::api::Message;
use crate::types::Flow;
use std::collections::VecDeque;

/// Messages accepted by `send` that haven't been put in a packet yet, in the order they were
/// sent. The queue is bounded by the total payload size.
pub struct PendingQueue {
    max_size_bytes: usize,
    queued_bytes: usize,
    messages: VecDeque<Message>,
}

impl PendingQueue {
    pub fn new(max_size_bytes: usize) -> Self {
        Self { max_size_bytes, queued_bytes: 0, messages: VecDeque::new() }
    }

    /// Enqueues `message`. Returns `false` if it doesn't fit. A message is always accepted by
    /// an empty queue.
    pub fn push(&mut self, message: Message) -> bool {
        let size = message.payload.len();
        if !self.messages.is_empty() && self.queued_bytes + size > self.max_size_bytes {
            return false;
        }
        self.queued_bytes += size;
        self.messages.push_back(message);
        true
    }

    pub fn peek(&self) -> Option<&Message> {
        self.messages.front()
    }

    pub fn pop(&mut self) -> Option<Message> {
        let message = self.messages.pop_front()?;
        self.queued_bytes -= message.payload.len();
        Some(message)
    }

    /// Removes all messages of `flow` with `tag`, and returns how many were removed.
    pub fn cancel(&mut self, flow: Flow, tag: u16) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| m.flow != flow || m.tag != tag);
        self.queued_bytes = self.messages.iter().map(|m| m.payload.len()).sum();
        before - self.messages.len()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.queued_bytes = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }
}
