//! The answer map (§4.5, "Answering mode"): a write-once registry of
//! `(src|ANY, dst, pb, sb, id_prefix) -> answer bytes` consulted when L3
//! observes an incoming telegram addressed to the daemon's own slave
//! address.

use crate::symbol::{MasterSymbols, Symbol, SYN};

/// One registered answer: matches any master telegram whose header and
/// id prefix line up, regardless of trailing id bytes or data.
struct AnswerTemplate {
    /// `SYN` matches any source.
    src: Symbol,
    dst: Symbol,
    pb: Symbol,
    sb: Symbol,
    id_prefix: Vec<Symbol>,
    answer: Vec<u8>,
}

impl AnswerTemplate {
    fn matches(&self, master: &MasterSymbols) -> bool {
        if self.src != SYN && self.src != master.source() {
            return false;
        }
        if self.dst != master.destination() || self.pb != master.primary_command() || self.sb != master.secondary_command() {
            return false;
        }
        let declared = master.data_len().unwrap_or(0);
        if declared < self.id_prefix.len() {
            return false;
        }
        (0..self.id_prefix.len()).all(|i| master.data_at(i) == self.id_prefix[i])
    }
}

/// Write-once-per-key answer registry; reads happen from the protocol
/// thread, writes from client tasks (§5).
#[derive(Default)]
pub struct AnswerMap {
    templates: Vec<AnswerTemplate>,
}

impl AnswerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slave answer for telegrams matching `src/dst/pb/sb/
    /// id_prefix`. `src == SYN` matches any sender.
    pub fn register(&mut self, src: Symbol, dst: Symbol, pb: Symbol, sb: Symbol, id_prefix: Vec<Symbol>, answer: Vec<u8>) {
        self.templates.push(AnswerTemplate {
            src,
            dst,
            pb,
            sb,
            id_prefix,
            answer,
        });
    }

    /// The answer bytes for `master`, if any template matches.
    pub fn answer_for(&self, master: &MasterSymbols) -> Option<&[u8]> {
        self.templates
            .iter()
            .find(|t| t.matches(master))
            .map(|t| t.answer.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master_with(dst: Symbol, pb: Symbol, sb: Symbol, id: &[u8]) -> MasterSymbols {
        let mut m = MasterSymbols::new();
        m.push(0x03);
        m.push(dst);
        m.push(pb);
        m.push(sb);
        m.push(id.len() as u8);
        m.extend(id);
        m.push(m.calc_crc());
        m
    }

    #[test]
    fn matches_on_header_and_id_prefix() {
        let mut map = AnswerMap::new();
        map.register(SYN, 0x50, 0xb5, 0x09, vec![0x01], vec![0xaa]);
        let telegram = master_with(0x50, 0xb5, 0x09, &[0x01, 0x02]);
        assert_eq!(map.answer_for(&telegram), Some([0xaa].as_slice()));
    }

    #[test]
    fn mismatched_source_is_rejected_when_src_is_specific() {
        let mut map = AnswerMap::new();
        map.register(0x10, 0x50, 0xb5, 0x09, vec![], vec![0xaa]);
        let telegram = master_with(0x50, 0xb5, 0x09, &[]);
        assert_eq!(map.answer_for(&telegram), None);
    }
}
