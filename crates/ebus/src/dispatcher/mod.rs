//! L5: owns the `next`/`poll`/`finished` queues, the answer map, and the
//! message catalog, gating what the protocol thread sends next (§4.5).
//!
//! Per the concurrency model (§5), a single protocol-thread task drains
//! these queues between telegrams; any number of client tasks submit
//! requests and await completion through the `oneshot` channel baked
//! into each [`crate::protocol::BusRequest`] — the "condition variable or
//! equivalent completion primitive" the spec calls for.

mod answer;
mod poll;

pub use answer::AnswerMap;
pub use poll::PollQueue;

use crate::error::{Error, Result};
use crate::message::MessageMap;
use crate::protocol::{BusRequest, RequestOutcome};
use crate::symbol::{MasterSymbols, SlaveSymbols, Symbol};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

/// Default spacing between two dequeues of the same poll entry's
/// rotation, absent a configured override (§4.5).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// A request synthesized by the poll scheduler, paired with the catalog
/// key it polls so the result can be folded back into the cache.
struct PendingPoll {
    key: u64,
}

/// Owns the three queues, the answer map, and the catalog.
pub struct Dispatcher {
    own_address: Symbol,
    next: VecDeque<BusRequest>,
    poll: PollQueue,
    poll_interval: Duration,
    pending_polls: VecDeque<PendingPoll>,
    finished_count: u64,
    answers: AnswerMap,
    catalog: Mutex<MessageMap>,
}

impl Dispatcher {
    pub fn new(own_address: Symbol, catalog: MessageMap) -> Self {
        Self {
            own_address,
            next: VecDeque::new(),
            poll: PollQueue::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            pending_polls: VecDeque::new(),
            finished_count: 0,
            answers: AnswerMap::new(),
            catalog: Mutex::new(catalog),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Minimum spacing the run loop should leave between two poll
    /// dequeues when nothing else is pending.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Register every catalogued pollable message with the poll
    /// scheduler; call once after loading.
    pub async fn seed_poll_queue(&mut self) {
        let catalog = self.catalog.lock().await;
        let keys: Vec<(u64, u32)> = catalog
            .pollable()
            .map(|m| {
                let priority = match m.def().direction {
                    crate::message::Direction::Read { poll_priority } => poll_priority as u32,
                    _ => 1,
                };
                (m.def().key(), priority)
            })
            .collect();
        drop(catalog);
        for (key, priority) in keys {
            self.poll.register(key, priority);
        }
    }

    /// Submit a client-originated request to the tail of the `next`
    /// queue.
    pub fn submit(&mut self, request: BusRequest) {
        self.next.push_back(request);
    }

    /// Build and submit an active request for `(circuit, name)`,
    /// returning the receiver half the caller awaits for the outcome.
    pub async fn submit_by_name(
        &mut self,
        circuit: &str,
        name: &str,
        is_write: bool,
        values: &[(String, crate::message::Value)],
    ) -> Result<oneshot::Receiver<RequestOutcome>> {
        let catalog = self.catalog.lock().await;
        let message = catalog
            .by_name(circuit, name, is_write)
            .ok_or_else(|| Error::NotFound(format!("{circuit}.{name}")))?;
        let master = message.def().prepare_master(self.own_address, values)?;
        drop(catalog);
        let (tx, rx) = oneshot::channel();
        self.submit(BusRequest::active(master, tx));
        Ok(rx)
    }

    /// Pop the request the protocol thread should send next: the head of
    /// `next` if present, else a request synthesized from the next due
    /// poll entry.
    pub async fn next_to_send(&mut self) -> Option<BusRequest> {
        if let Some(request) = self.next.pop_front() {
            return Some(request);
        }
        let key = self.poll.pop_due()?;
        let catalog = self.catalog.lock().await;
        let message = catalog.by_key(key)?;
        let master = message.def().prepare_master(self.own_address, &[]).ok()?;
        drop(catalog);
        self.pending_polls.push_back(PendingPoll { key });
        Some(BusRequest::poll(master))
    }

    /// Record a completed telegram's outcome into the catalog cache
    /// (§4.5, `storeLastData`), matching by wire bytes for passively
    /// observed telegrams or by the pending poll queue for poll-
    /// generated ones.
    pub async fn store_outcome(&mut self, master: MasterSymbols, slave: Option<SlaveSymbols>) -> Result<()> {
        let mut catalog = self.catalog.lock().await;
        if let Some(message) = catalog.by_wire_mut(&master) {
            message.store_last_data(master, slave)?;
        }
        self.finished_count += 1;
        Ok(())
    }

    /// Access the answer map for registration or lookup.
    pub fn answers(&self) -> &AnswerMap {
        &self.answers
    }

    /// Mutable access to register a new answer template.
    pub fn answers_mut(&mut self) -> &mut AnswerMap {
        &mut self.answers
    }

    /// Total number of telegrams folded into the cache so far.
    pub fn finished_count(&self) -> u64 {
        self.finished_count
    }

    /// Number of client-submitted requests still waiting to be sent.
    pub fn pending_next(&self) -> usize {
        self.next.len()
    }

    /// Direct access to the catalog, e.g. for a client's `read` lookup.
    pub fn catalog(&self) -> &Mutex<MessageMap> {
        &self.catalog
    }

    /// Pop the oldest in-flight poll's catalog key, for the run loop to
    /// correlate against a [`crate::protocol::TelegramEvent::RequestFinished`]
    /// once the poll-generated request completes.
    pub fn take_pending_poll(&mut self) -> Option<u64> {
        self.pending_polls.pop_front().map(|p| p.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Codec, Direction, FieldDef, Message, MessageDef, SingleMessage};
    use crate::symbol::SYN;

    fn sample_map() -> MessageMap {
        let mut map = MessageMap::new();
        map.insert(Message::Single(SingleMessage::new(MessageDef {
            circuit: "heating".into(),
            name: "Status".into(),
            comment: String::new(),
            level: String::new(),
            direction: Direction::Read { poll_priority: 1 },
            src: SYN,
            dst: 0x50,
            pb: 0xb5,
            sb: 0x09,
            id: vec![],
            fields: vec![FieldDef::new("temp", 0, 0, Codec::D1b)],
        })))
        .unwrap();
        map
    }

    #[tokio::test]
    async fn next_queue_takes_priority_over_poll() {
        let mut dispatcher = Dispatcher::new(0x03, sample_map());
        dispatcher.seed_poll_queue().await;

        let rx = dispatcher
            .submit_by_name("heating", "Status", false, &[])
            .await
            .unwrap();
        let request = dispatcher.next_to_send().await.unwrap();
        assert_eq!(request.master().destination(), 0x50);
        drop(rx);
    }

    #[tokio::test]
    async fn poll_queue_is_used_once_next_is_empty() {
        let mut dispatcher = Dispatcher::new(0x03, sample_map());
        dispatcher.seed_poll_queue().await;
        let request = dispatcher.next_to_send().await;
        assert!(request.is_some());
    }

    #[tokio::test]
    async fn store_outcome_updates_catalog_cache() {
        let mut dispatcher = Dispatcher::new(0x03, sample_map());
        let mut master = MasterSymbols::new();
        master.extend(&[0x03, 0x50, 0xb5, 0x09, 0x01, 0x14]);
        master.push(master.calc_crc());
        dispatcher.store_outcome(master, None).await.unwrap();
        assert_eq!(dispatcher.finished_count(), 1);
    }
}
