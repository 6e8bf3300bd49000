// Copyright (C) 2021  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! Inbound cancellation bookkeeping: one scope per received call, holding
//! the token-id → cancellation-source mapping the argument decoder
//! populates. Token lookup is get-or-create in both directions, so a
//! CancellationRequest racing the argument decode still lands on the same
//! source.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

/// Per-call mapping of token ids to cancellation sources
#[derive(Clone, Default)]
pub(crate) struct CallScope {
    tokens: Arc<Mutex<HashMap<i32, CancellationToken>>>,
}

impl CallScope {
    /// Returns the source for `token_id`, creating it when absent
    pub fn token(&self, token_id: i32) -> CancellationToken {
        self.tokens
            .lock()
            .expect("BUG: call scope mutex poisoned")
            .entry(token_id)
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    /// Fires the source for `token_id`
    pub fn cancel(&self, token_id: i32) {
        self.token(token_id).cancel();
    }
}

/// All inbound cancellation scopes of a host, keyed by the call's `seq`
pub(crate) struct CancellationBridge {
    scopes: Mutex<HashMap<u32, CallScope>>,
}

impl CancellationBridge {
    pub fn new() -> Self {
        Self {
            scopes: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u32, CallScope>> {
        self.scopes
            .lock()
            .expect("BUG: cancellation bridge mutex poisoned")
    }

    /// Opens the scope for an inbound call identified by `seq`.
    ///
    /// The receive loop opens the scope before handing the call to its
    /// handler task, so for any `seq` the scope exists by the time a later
    /// frame can reference it.
    pub fn open(&self, seq: u32) -> CallScope {
        let scope = CallScope::default();
        self.lock().insert(seq, scope.clone());
        scope
    }

    /// Fires the token `token_id` of call `corr`. Returns false when the
    /// call is no longer known, ie. it already completed and its scope was
    /// closed; such late requests are dropped.
    pub fn signal(&self, corr: u32, token_id: i32) -> bool {
        let scope = self.lock().get(&corr).cloned();
        match scope {
            Some(scope) => {
                scope.cancel(token_id);
                true
            }
            None => false,
        }
    }

    /// Discards the scope of a finished call
    pub fn close(&self, seq: u32) {
        self.lock().remove(&seq);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scope_token_is_get_or_create() {
        let scope = CallScope::default();
        let first = scope.token(0);
        let second = scope.token(0);
        // Both handles observe the same source
        first.cancel();
        assert!(second.is_cancelled());
    }

    #[test]
    fn signal_before_decode_lands() {
        let bridge = CancellationBridge::new();
        let scope = bridge.open(7);

        // The cancel request is processed before the decoder asked for the
        // token; the token must already be cancelled when it does
        assert!(bridge.signal(7, 0));
        assert!(scope.token(0).is_cancelled());
    }

    #[test]
    fn late_cancellation_is_dropped() {
        let bridge = CancellationBridge::new();
        let _scope = bridge.open(7);
        bridge.close(7);
        assert!(!bridge.signal(7, 0));
        assert_eq!(bridge.len(), 0);
    }

    #[test]
    fn unknown_corr_is_dropped() {
        let bridge = CancellationBridge::new();
        assert!(!bridge.signal(99, 0));
    }

    #[test]
    fn scopes_are_isolated_per_call() {
        let bridge = CancellationBridge::new();
        let first = bridge.open(1);
        let second = bridge.open(2);

        bridge.signal(1, 0);
        assert!(first.token(0).is_cancelled());
        assert!(!second.token(0).is_cancelled());
    }
}
