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

pub(crate) mod crypto;
pub(crate) mod event_helpers;

use crate::api::MocketEvent;
use crate::api::Options;
use crate::connection::context::Context;
use crate::events::Events;
use crate::testing::crypto::MockCrypto;
use std::cell::RefCell;
use std::rc::Rc;

/// A context that isn't part of any connection, for testing the connection's building blocks.
pub(crate) fn context_for_test(options: Options) -> Context {
    let events = Rc::new(RefCell::new(Events::new()));
    Context::new("test", &options, events, Box::new(MockCrypto::new()))
}

/// Removes all events emitted through `ctx`.
pub(crate) fn take_events(ctx: &Context) -> Vec<MocketEvent> {
    std::iter::from_fn(|| ctx.events.borrow_mut().next_event()).collect()
}
