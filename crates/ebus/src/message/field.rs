//! A single named field within a message's data bytes.

use super::codec::{Codec, Value};
use crate::error::Result;

/// One column group of a CSV message row: `name, part, position, type,
/// divisor, unit, comment` (§6).
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    /// Which chained part this field lives in (0 for non-chained
    /// messages).
    pub part: usize,
    /// Byte offset within that part's data bytes.
    pub position: usize,
    pub codec: Codec,
    pub divisor: f64,
    pub unit: String,
    pub comment: String,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, part: usize, position: usize, codec: Codec) -> Self {
        Self {
            name: name.into(),
            part,
            position,
            codec,
            divisor: 1.0,
            unit: String::new(),
            comment: String::new(),
        }
    }

    pub fn with_divisor(mut self, divisor: f64) -> Self {
        self.divisor = divisor;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Decode this field from `data`, the full data-byte slice of the
    /// part it belongs to.
    pub fn decode(&self, data: &[u8]) -> Result<Option<Value>> {
        let end = self.position + self.codec.width();
        let slice = data.get(self.position..end).ok_or_else(|| {
            crate::error::Error::invalid_field(
                &self.name,
                format!("data too short: need bytes {}..{end}, have {}", self.position, data.len()),
            )
        })?;
        self.codec.decode(slice, self.divisor)
    }

    /// Encode `value` and splice it into `data` at this field's position,
    /// growing `data` as needed.
    pub fn encode_into(&self, value: Value, data: &mut Vec<u8>) -> Result<()> {
        let bytes = self.codec.encode(value, self.divisor)?;
        let end = self.position + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[self.position..end].copy_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_reads_from_its_declared_position() {
        let field = FieldDef::new("temp", 0, 2, Codec::D1b);
        let data = [0x00, 0x00, 0x14];
        assert_eq!(field.decode(&data).unwrap(), Some(Value::Number(20.0)));
    }

    #[test]
    fn encode_into_grows_the_buffer() {
        let field = FieldDef::new("temp", 0, 2, Codec::D1b);
        let mut data = Vec::new();
        field.encode_into(Value::Number(20.0), &mut data).unwrap();
        assert_eq!(data, vec![0x00, 0x00, 0x14]);
    }

    #[test]
    fn decode_reports_short_data() {
        let field = FieldDef::new("temp", 0, 5, Codec::D1b);
        assert!(field.decode(&[0x00]).is_err());
    }
}
