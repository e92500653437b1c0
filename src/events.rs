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

use crate::EventSink;
use crate::api::MocketEvent;
use std::collections::VecDeque;

/// The queue of events that the application drains with `poll_event`.
pub struct Events {
    events: VecDeque<MocketEvent>,
}

impl Events {
    pub fn new() -> Self {
        Self { events: VecDeque::new() }
    }
}

impl EventSink for Events {
    fn add(&mut self, event: MocketEvent) {
        self.events.push_back(event);
    }

    fn next_event(&mut self) -> Option<MocketEvent> {
        self.events.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ErrorKind;
    use crate::testing::event_helpers::expect_no_event;
    use crate::testing::event_helpers::expect_on_connected;
    use crate::testing::event_helpers::expect_on_error;
    use crate::testing::event_helpers::expect_on_suspended;

    #[test]
    fn events_are_returned_in_order() {
        let mut events = Events::new();
        events.add(MocketEvent::OnConnected());
        events.add(MocketEvent::OnSuspended());
        events.add(MocketEvent::OnError(ErrorKind::ParseFailed, "bad packet".into()));

        expect_on_connected!(events.next_event());
        expect_on_suspended!(events.next_event());
        assert_eq!(expect_on_error!(events.next_event()), ErrorKind::ParseFailed);
        expect_no_event!(events.next_event());
    }
}
