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

use crate::api::MocketEvent;

#[macro_export]
macro_rules! expect_event_0 {
    ($event:expr, $event_type:ident) => {
        match $event {
            None => panic!("No event emitted"),
            Some(e) => match (e) {
                $crate::api::MocketEvent::$event_type() => {}
                _ => panic!("Expected {}, got {:?}", stringify!($event_type), e),
            },
        }
    };
}

#[macro_export]
macro_rules! expect_event_1 {
    ($event:expr, $event_type:ident) => {
        match $event {
            None => panic!("No event emitted"),
            Some(e) => match (e) {
                $crate::api::MocketEvent::$event_type(d) => d,
                _ => panic!("Expected {}, got {:?}", stringify!($event_type), e),
            },
        }
    };
}

#[macro_export]
macro_rules! expect_event_kind {
    ($event:expr, $event_type:ident) => {
        match $event {
            None => panic!("No event emitted"),
            Some(e) => match (e) {
                $crate::api::MocketEvent::$event_type(kind, _) => kind,
                _ => panic!("Expected {}, got {:?}", stringify!($event_type), e),
            },
        }
    };
}

/// Returns the destination and the bytes of a `SendPacket` event.
macro_rules! expect_sent_packet {
    ($event:expr) => {
        match $event {
            None => panic!("No event emitted"),
            Some(e) => match (e) {
                $crate::api::MocketEvent::SendPacket(to, data) => (to, data),
                _ => panic!("Expected SendPacket, got {:?}", e),
            },
        }
    };
}

macro_rules! expect_on_connected {
    ($event:expr) => {
        crate::expect_event_0!($event, OnConnected)
    };
}

macro_rules! expect_on_suspended {
    ($event:expr) => {
        crate::expect_event_0!($event, OnSuspended)
    };
}

macro_rules! expect_on_resumed {
    ($event:expr) => {
        crate::expect_event_0!($event, OnResumed)
    };
}

macro_rules! expect_on_closed {
    ($event:expr) => {
        crate::expect_event_0!($event, OnClosed)
    };
}

macro_rules! expect_on_peer_unreachable {
    ($event:expr) => {
        crate::expect_event_1!($event, OnPeerUnreachable)
    };
}

macro_rules! expect_on_peer_reachable {
    ($event:expr) => {
        crate::expect_event_1!($event, OnPeerReachable)
    };
}

macro_rules! expect_on_error {
    ($event:expr) => {
        crate::expect_event_kind!($event, OnError)
    };
}

macro_rules! expect_on_aborted {
    ($event:expr) => {
        crate::expect_event_kind!($event, OnAborted)
    };
}

macro_rules! expect_on_connection_failed {
    ($event:expr) => {
        crate::expect_event_kind!($event, OnConnectionFailed)
    };
}

macro_rules! expect_no_event {
    ($event:expr) => {
        match $event {
            None => {}
            Some(e) => panic!("Expected no event, got {:?}", e),
        }
    };
}

pub fn is_send_packet(e: &MocketEvent) -> bool {
    matches!(e, MocketEvent::SendPacket(..))
}

pub(crate) use expect_no_event;
pub(crate) use expect_on_aborted;
pub(crate) use expect_on_closed;
pub(crate) use expect_on_connected;
pub(crate) use expect_on_connection_failed;
pub(crate) use expect_on_error;
#[allow(unused_imports)]
pub(crate) use expect_on_peer_reachable;
pub(crate) use expect_on_peer_unreachable;
pub(crate) use expect_on_resumed;
pub(crate) use expect_on_suspended;
pub(crate) use expect_sent_packet;
