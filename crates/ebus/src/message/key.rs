//! The 64-bit identity key (§4.4) used to find a catalogued message from
//! either its declared identity or an observed telegram's wire bytes.

use crate::symbol::{self, MasterSymbols, Symbol, SYN};

/// Distinguishes how a message definition was declared to react to
/// traffic, folded into the top bits of the identity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceClass {
    /// Passive, answerable by a specific master only (`1..=25`, the
    /// master's 1-based ordinal, per [`symbol::master_number`]).
    PassiveSpecific(u8),
    /// Passive, any master may send it.
    PassiveAny,
    /// Active read, or a read targeted at another master.
    ActiveRead,
    /// Active write, or a write targeted at another master.
    ActiveWrite,
}

impl SourceClass {
    fn code(self) -> u8 {
        match self {
            SourceClass::PassiveAny => 0,
            SourceClass::PassiveSpecific(n) => n,
            SourceClass::ActiveRead => 0x1e,
            SourceClass::ActiveWrite => 0x1f,
        }
    }

    /// The class implied by `src`, honoring active messages which ignore
    /// the actual sender.
    pub fn of_master(src: Symbol, is_write: bool, is_passive: bool) -> Self {
        if !is_passive {
            return if is_write {
                SourceClass::ActiveWrite
            } else {
                SourceClass::ActiveRead
            };
        }
        if src == SYN {
            SourceClass::PassiveAny
        } else {
            SourceClass::PassiveSpecific(symbol::master_number(src))
        }
    }
}

/// XOR-fold `id` (beyond PB/SB) into a 32-bit tail, matching upstream's
/// iterative key-shortening lookup: folding is associative, so a key
/// built from a longer id and one built from its prefix only differ in
/// the `id_length` field, letting lookup retry with a shorter prefix.
fn fold_id_tail(id: &[Symbol]) -> u32 {
    let mut folded = 0u32;
    for &b in id {
        folded = (folded << 8) ^ (b as u32);
    }
    folded
}

/// Build the 64-bit identity key: `(id_length: 3 bits, source_class: 5
/// bits, dst_address: 8 bits, PB: 8 bits, SB: 8 bits, folded id tail: 32
/// bits)`.
pub fn make_key(id_length: usize, class: SourceClass, dst: Symbol, pb: Symbol, sb: Symbol, id_tail: &[Symbol]) -> u64 {
    let id_length = (id_length as u64) & 0x7;
    let class = (class.code() as u64) & 0x1f;
    let folded = fold_id_tail(id_tail) as u64;
    (id_length << 61) | (class << 56) | ((dst as u64) << 48) | ((pb as u64) << 40) | ((sb as u64) << 32) | folded
}

/// Number of id bytes encoded into the top 3 bits of `key`.
pub fn key_id_length(key: u64) -> usize {
    (key >> 61) as usize
}

/// Build every key that a received master telegram could match, from the
/// full id length down to zero, honoring the configured class first and
/// falling back to [`SourceClass::PassiveAny`].
pub fn lookup_keys(master: &MasterSymbols, max_id_length: usize) -> Vec<u64> {
    let dst = master.destination();
    let pb = master.primary_command();
    let sb = master.secondary_command();
    let total_id: Vec<Symbol> = (0..max_id_length.min(master.data_len().unwrap_or(0)))
        .map(|i| master.data_at(i))
        .collect();

    let mut keys = Vec::new();
    for len in (0..=total_id.len()).rev() {
        let id = &total_id[..len];
        for class in [
            SourceClass::PassiveSpecific(symbol::master_number(master.source())),
            SourceClass::PassiveAny,
            SourceClass::ActiveRead,
            SourceClass::ActiveWrite,
        ] {
            keys.push(make_key(len, class, dst, pb, sb, id));
        }
    }
    keys
}
