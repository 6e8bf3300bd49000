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

//! Outbound request correlation: maps wire sequence numbers to response
//! slots. The table is a lock-free concurrent map; insertion retries on id
//! collision instead of overwriting (the allocator wraps around).

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use rp_remoting::messages::WireException;
use rp_remoting::Value;
use rp_wire::MessageId;

/// Terminal outcome of one outbound request
#[derive(Debug)]
pub(crate) enum CallReply {
    Value(Value),
    Exception(WireException),
    /// The host was torn down while the call was in flight
    Disposed,
}

struct Slot {
    reply_tx: oneshot::Sender<CallReply>,
    /// Cancelled when the slot completes; tears down the cancel watchers of
    /// the call
    done: CancellationToken,
}

/// The caller's end of a correlation slot
pub(crate) struct PendingCall {
    pub seq: u32,
    pub reply: oneshot::Receiver<CallReply>,
    pub done: CancellationToken,
}

pub(crate) struct CallCorrelator {
    slots: DashMap<u32, Slot>,
    seq: MessageId,
}

impl CallCorrelator {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            seq: MessageId::new(),
        }
    }

    /// Allocates a wire sequence number without installing a slot; used for
    /// messages that expect no reply
    pub fn next_seq(&self) -> u32 {
        self.seq.next()
    }

    /// Installs a fresh correlation slot. A sequence number still occupied
    /// by an in-flight call after counter wrap-around is skipped, never
    /// overwritten.
    pub fn register(&self) -> PendingCall {
        loop {
            let seq = self.seq.next();
            match self.slots.entry(seq) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(entry) => {
                    let (reply_tx, reply) = oneshot::channel();
                    let done = CancellationToken::new();
                    entry.insert(Slot {
                        reply_tx,
                        done: done.clone(),
                    });
                    return PendingCall { seq, reply, done };
                }
            }
        }
    }

    /// Delivers the reply for `corr`. Returns false when no slot matches
    /// (late or unsolicited reply).
    pub fn complete(&self, corr: u32, reply: CallReply) -> bool {
        match self.slots.remove(&corr) {
            Some((_, slot)) => {
                slot.done.cancel();
                // The caller may have given up; a dropped receiver is fine
                let _ = slot.reply_tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Discards a slot whose request never made it to the wire
    pub fn abandon(&self, seq: u32) {
        if let Some((_, slot)) = self.slots.remove(&seq) {
            slot.done.cancel();
        }
    }

    /// Completes every pending slot with a "host disposed" outcome
    pub fn fail_all_disposed(&self) {
        let pending: Vec<u32> = self.slots.iter().map(|entry| *entry.key()).collect();
        for seq in pending {
            self.complete(seq, CallReply::Disposed);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn register_and_complete() {
        let correlator = CallCorrelator::new();
        let pending = correlator.register();
        assert_eq!(correlator.len(), 1);

        assert!(correlator.complete(pending.seq, CallReply::Value(Value::Int32(1))));
        assert_eq!(correlator.len(), 0);
        assert!(pending.done.is_cancelled());

        match pending.reply.await {
            Ok(CallReply::Value(Value::Int32(1))) => {}
            other => panic!("BUG: unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn exactly_one_completion_per_seq() {
        let correlator = CallCorrelator::new();
        let pending = correlator.register();

        assert!(correlator.complete(pending.seq, CallReply::Value(Value::Null)));
        // The second reply for the same seq finds no slot
        assert!(!correlator.complete(pending.seq, CallReply::Value(Value::Null)));
    }

    #[test]
    fn unmatched_corr_is_reported() {
        let correlator = CallCorrelator::new();
        assert!(!correlator.complete(42, CallReply::Disposed));
    }

    #[tokio::test]
    async fn fail_all_delivers_disposed() {
        let correlator = CallCorrelator::new();
        let first = correlator.register();
        let second = correlator.register();

        correlator.fail_all_disposed();
        assert_eq!(correlator.len(), 0);

        for pending in vec![first, second] {
            match pending.reply.await {
                Ok(CallReply::Disposed) => {}
                other => panic!("BUG: unexpected reply: {:?}", other),
            }
        }
    }

    #[test]
    fn abandon_discards_slot() {
        let correlator = CallCorrelator::new();
        let pending = correlator.register();
        correlator.abandon(pending.seq);
        assert_eq!(correlator.len(), 0);
        assert!(pending.done.is_cancelled());
    }
}
