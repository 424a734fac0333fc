//! L4: the message catalog. A [`Message`] names a telegram shape (source
//! class, destination, PB/SB, id bytes, field layout) and caches the last
//! exchange observed for it; a [`MessageMap`] resolves lookups by name or
//! by wire bytes and enforces the condition DAG at load time.

pub mod catalog;
pub mod codec;
pub mod condition;
mod field;
pub mod key;

pub use catalog::MessageMap;
pub use codec::{Codec, Value};
pub use condition::{Comparison, Condition, ConditionGraph, ConditionResolver, SimpleCondition};
pub use field::FieldDef;
pub use key::SourceClass;

use crate::error::{Error, Result};
use crate::symbol::{self, MasterSymbols, SlaveSymbols, Symbol, SYN};
use std::time::Instant;

/// Part of a poll/write/passive declaration (§6, the `type` column's
/// prefix): how a message is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `r[0-9]`: actively read, with the given poll priority (0 = never
    /// polled, only read on demand).
    Read { poll_priority: u8 },
    /// `w`: actively written.
    Write,
    /// `u`/`uw`: passively observed only.
    Passive,
}

/// Access level a client must hold to see this message.
pub type Level = String;

/// Declared shape shared by [`Message`] and each part of a
/// [`ChainedMessage`]: circuit/name identity, wire identity (src/dst/PB/
/// SB/id), and field layout.
#[derive(Debug, Clone)]
pub struct MessageDef {
    pub circuit: String,
    pub name: String,
    pub comment: String,
    pub level: Level,
    pub direction: Direction,
    /// `SYN` means "any master may send this" for passive messages.
    pub src: Symbol,
    /// `SYN` means the concrete destination is not yet known; see
    /// [`Message::derive`].
    pub dst: Symbol,
    pub pb: Symbol,
    pub sb: Symbol,
    pub id: Vec<Symbol>,
    pub fields: Vec<FieldDef>,
}

impl MessageDef {
    fn is_write(&self) -> bool {
        matches!(self.direction, Direction::Write)
    }

    fn is_passive(&self) -> bool {
        matches!(self.direction, Direction::Passive)
    }

    fn source_class(&self) -> SourceClass {
        SourceClass::of_master(self.src, self.is_write(), self.is_passive())
    }

    /// The identity key for this definition's full id length.
    pub fn key(&self) -> u64 {
        key::make_key(self.id.len(), self.source_class(), self.dst, self.pb, self.sb, &self.id)
    }

    /// Build the master part of a telegram for sending this message:
    /// `own_address ZZ PB SB NN D1..DN CRC`.
    pub fn prepare_master(&self, own_address: Symbol, values: &[(String, Value)]) -> Result<MasterSymbols> {
        let mut data = self.id.clone();
        for field in &self.fields {
            if let Some((_, value)) = values.iter().find(|(name, _)| name == &field.name) {
                field.encode_into(*value, &mut data)?;
            }
        }
        let mut master = MasterSymbols::new();
        master.push(own_address);
        master.push(self.dst);
        master.push(self.pb);
        master.push(self.sb);
        master.push(0); // placeholder NN, fixed by adjust_header
        master.extend(&data);
        master.adjust_header()?;
        master.push(master.calc_crc());
        Ok(master)
    }

    /// Decode every field from a completed exchange's data bytes
    /// (id-prefixed `master` data and, for MS telegrams, `slave` data).
    fn decode_fields(&self, master_data: &[u8], slave_data: &[u8]) -> Vec<(String, Result<Option<Value>>)> {
        self.fields
            .iter()
            .map(|field| {
                // Fields are positioned after the declared id bytes in
                // the master part; a field with no corresponding byte
                // range in either part is treated as part of whichever
                // is long enough to hold it.
                let in_master = field.position + field.codec.width() <= master_data.len().saturating_sub(self.id.len());
                let value = if in_master {
                    let data = &master_data[self.id.len()..];
                    field.decode(data)
                } else {
                    field.decode(slave_data)
                };
                (field.name.clone(), value)
            })
            .collect()
    }
}

/// A message whose wire exchange fits in a single telegram.
#[derive(Debug, Clone)]
pub struct SingleMessage {
    pub def: MessageDef,
    pub condition: Option<Condition>,
    last_master: MasterSymbols,
    last_slave: SlaveSymbols,
    #[allow(dead_code)]
    last_update_time: Option<Instant>,
    last_change_time: Option<Instant>,
}

impl SingleMessage {
    pub fn new(def: MessageDef) -> Self {
        Self {
            def,
            condition: None,
            last_master: MasterSymbols::new(),
            last_slave: SlaveSymbols::new(),
            last_update_time: None,
            last_change_time: None,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// One telegram's worth of a [`ChainedMessage`]: its own id suffix and
/// data length, stored independently until every part has arrived.
#[derive(Debug, Clone)]
pub struct MessagePart {
    pub id_suffix: Vec<Symbol>,
    pub data_len: usize,
}

/// A logical message assembled from several telegrams sharing a circuit/
/// name but distinct id suffixes (§4.4, "Chained messages").
#[derive(Debug, Clone)]
pub struct ChainedMessage {
    pub def: MessageDef,
    pub condition: Option<Condition>,
    pub parts: Vec<MessagePart>,
    received_master: Vec<Option<(MasterSymbols, Instant)>>,
    received_slave: Vec<Option<(SlaveSymbols, Instant)>>,
    last_master: MasterSymbols,
    last_slave: SlaveSymbols,
    last_change_time: Option<Instant>,
}

/// Window within which every part of a chained message must have arrived
/// for the combined strings to be assembled (§4.4).
pub const CHAIN_FRESHNESS_WINDOW_SECS_PER_PART: u64 = 15;

impl ChainedMessage {
    pub fn new(def: MessageDef, parts: Vec<MessagePart>) -> Self {
        let n = parts.len();
        Self {
            def,
            condition: None,
            parts,
            received_master: vec![None; n],
            received_slave: vec![None; n],
            last_master: MasterSymbols::new(),
            last_slave: SlaveSymbols::new(),
            last_change_time: None,
        }
    }

    fn freshness_window(&self) -> std::time::Duration {
        std::time::Duration::from_secs(CHAIN_FRESHNESS_WINDOW_SECS_PER_PART * self.parts.len().max(1) as u64)
    }

    /// Record one part's master (and optional slave) data, assembling the
    /// combined strings once every part is present and fresh.
    pub fn store_part(&mut self, part_index: usize, master: MasterSymbols, slave: Option<SlaveSymbols>) -> Result<bool> {
        if part_index >= self.parts.len() {
            return Err(Error::OutOfRange(format!("part index {part_index} out of range")));
        }
        let now = Instant::now();
        self.received_master[part_index] = Some((master, now));
        if let Some(slave) = slave {
            self.received_slave[part_index] = Some((slave, now));
        }
        self.drop_stale_parts(now);
        self.try_assemble(now)
    }

    fn drop_stale_parts(&mut self, now: Instant) {
        let window = self.freshness_window();
        for slot in self.received_master.iter_mut() {
            if let Some((_, at)) = slot {
                if now.duration_since(*at) > window {
                    *slot = None;
                }
            }
        }
        for slot in self.received_slave.iter_mut() {
            if let Some((_, at)) = slot {
                if now.duration_since(*at) > window {
                    *slot = None;
                }
            }
        }
    }

    fn try_assemble(&mut self, now: Instant) -> Result<bool> {
        if self.received_master.iter().any(Option::is_none) {
            return Ok(false);
        }
        let mut combined_master = MasterSymbols::new();
        let mut combined_slave = SlaveSymbols::new();
        let expects_slave = self.received_slave.iter().any(Option::is_some);
        for i in 0..self.parts.len() {
            let (master, _) = self.received_master[i].as_ref().expect("checked above");
            for j in 0..master.data_len().unwrap_or(0) {
                combined_master.push(master.data_at(j));
            }
            if expects_slave {
                let Some((slave, _)) = self.received_slave[i].as_ref() else {
                    return Ok(false);
                };
                for j in 0..slave.data_len().unwrap_or(0) {
                    combined_slave.push(slave.data_at(j));
                }
            }
        }
        self.last_master = combined_master;
        self.last_slave = combined_slave;
        self.last_change_time = Some(now);
        Ok(true)
    }
}

/// `Message/ChainedMessage` as a tagged union (§9).
#[derive(Debug, Clone)]
pub enum Message {
    Single(SingleMessage),
    Chained(ChainedMessage),
}

impl Message {
    pub fn def(&self) -> &MessageDef {
        match self {
            Message::Single(m) => &m.def,
            Message::Chained(m) => &m.def,
        }
    }

    fn condition(&self) -> Option<&Condition> {
        match self {
            Message::Single(m) => m.condition.as_ref(),
            Message::Chained(m) => m.condition.as_ref(),
        }
    }

    pub fn last_change_time(&self) -> Option<Instant> {
        match self {
            Message::Single(m) => m.last_change_time,
            Message::Chained(m) => m.last_change_time,
        }
    }

    /// Whether this message currently resolves: its condition (if any)
    /// holds against `resolver`.
    pub fn is_available(&self, resolver: &dyn ConditionResolver) -> bool {
        match self.condition() {
            Some(condition) => condition.evaluate(resolver),
            None => true,
        }
    }

    /// Decode every declared field against the last stored exchange.
    pub fn decode_last(&self) -> Vec<(String, Result<Option<Value>>)> {
        match self {
            Message::Single(m) => m.def.decode_fields(m.last_master.as_bytes(), m.last_slave.as_bytes()),
            Message::Chained(m) => m.def.decode_fields(m.last_master.as_bytes(), m.last_slave.as_bytes()),
        }
    }

    /// Record a just-completed single-telegram exchange (§4.5,
    /// `storeLastData`).
    pub fn store_last_data(&mut self, master: MasterSymbols, slave: Option<SlaveSymbols>) -> Result<()> {
        match self {
            Message::Single(m) => {
                let changed = m.last_master.compare_to(&master) != symbol::CompareResult::Equal;
                m.last_master = master;
                if let Some(slave) = slave {
                    m.last_slave = slave;
                }
                m.last_update_time = Some(Instant::now());
                if changed {
                    m.last_change_time = m.last_update_time;
                }
                Ok(())
            }
            Message::Chained(_) => Err(Error::invalid_field(
                "message",
                "chained messages are stored per-part via store_part",
            )),
        }
    }

    /// Clone this message with a concrete destination, for derivation
    /// from a `dst = SYN` template (§4.4, "Derivation").
    pub fn derive(&self, dst: Symbol) -> Message {
        match self {
            Message::Single(m) => {
                let mut def = m.def.clone();
                def.dst = dst;
                Message::Single(SingleMessage {
                    def,
                    condition: m.condition.clone(),
                    last_master: MasterSymbols::new(),
                    last_slave: SlaveSymbols::new(),
                    last_update_time: None,
                    last_change_time: None,
                })
            }
            Message::Chained(m) => {
                let mut def = m.def.clone();
                def.dst = dst;
                ChainedMessage::new(def, m.parts.clone()).with_condition_of(m)
            }
        }
    }
}

impl ChainedMessage {
    fn with_condition_of(mut self, other: &ChainedMessage) -> Message {
        self.condition = other.condition.clone();
        Message::Chained(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_def() -> MessageDef {
        MessageDef {
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
        }
    }

    #[test]
    fn derive_clones_with_a_concrete_destination() {
        let mut def = sample_def();
        def.dst = SYN;
        let message = Message::Single(SingleMessage::new(def));
        let derived = message.derive(0x51);
        assert_eq!(derived.def().dst, 0x51);
        assert_eq!(message.def().dst, SYN);
    }

    #[test]
    fn store_last_data_bumps_change_time_only_on_change() {
        let mut message = Message::Single(SingleMessage::new(sample_def()));
        let mut master = MasterSymbols::new();
        master.extend(&[0x03, 0x50, 0xb5, 0x09, 0x01, 0x14]);
        master.push(master.calc_crc());
        message.store_last_data(master.clone(), None).unwrap();
        let first_change = message.last_change_time();
        assert!(first_change.is_some());

        message.store_last_data(master, None).unwrap();
        assert_eq!(message.last_change_time(), first_change);
    }

    #[test]
    fn prepare_master_builds_a_valid_header() {
        let def = sample_def();
        let master = def.prepare_master(0x03, &[("temp".into(), Value::Number(20.0))]).unwrap();
        assert_eq!(master.source(), 0x03);
        assert_eq!(master.destination(), 0x50);
        assert_eq!(master.primary_command(), 0xb5);
        assert_eq!(master.secondary_command(), 0x09);
        assert!(master.is_complete());
    }

    #[test]
    fn chained_message_assembles_once_all_parts_arrive() {
        let def = MessageDef {
            fields: vec![],
            ..sample_def()
        };
        let parts = vec![
            MessagePart { id_suffix: vec![0x00], data_len: 1 },
            MessagePart { id_suffix: vec![0x01], data_len: 1 },
        ];
        let mut chained = ChainedMessage::new(def, parts);

        let mut part0 = MasterSymbols::new();
        part0.extend(&[0x03, 0x50, 0xb5, 0x09, 0x01, 0xaa]);
        part0.push(part0.calc_crc());
        assert!(!chained.store_part(0, part0, None).unwrap());

        let mut part1 = MasterSymbols::new();
        part1.extend(&[0x03, 0x50, 0xb5, 0x09, 0x01, 0xbb]);
        part1.push(part1.calc_crc());
        assert!(chained.store_part(1, part1, None).unwrap());
        assert!(chained.last_change_time.is_some());
    }
}
