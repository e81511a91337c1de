//! MMDB data section encoding.
//!
//! Covers the value types needed for country records and database metadata.
//! Maps are `BTreeMap`s so encoded key order is stable.

use std::collections::BTreeMap;

// Control byte type numbers
const TYPE_STRING: u8 = 2;
const TYPE_UINT16: u8 = 5;
const TYPE_UINT32: u8 = 6;
const TYPE_MAP: u8 = 7;
const TYPE_UINT64: u8 = 9;
const TYPE_ARRAY: u8 = 11;

/// A value in the data section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataValue {
    String(String),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Map(BTreeMap<String, DataValue>),
    Array(Vec<DataValue>),
}

impl From<&str> for DataValue {
    fn from(s: &str) -> Self {
        DataValue::String(s.to_string())
    }
}

/// Appends encoded values to a buffer.
#[derive(Debug, Default)]
pub struct DataEncoder {
    buffer: Vec<u8>,
}

impl DataEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a value and return its offset within the section.
    pub fn encode(&mut self, value: &DataValue) -> u32 {
        let offset = self.buffer.len() as u32;
        self.write_value(value);
        offset
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    fn write_value(&mut self, value: &DataValue) {
        match value {
            DataValue::String(s) => {
                self.write_control(TYPE_STRING, s.len());
                self.buffer.extend_from_slice(s.as_bytes());
            }
            DataValue::Uint16(v) => self.write_uint(TYPE_UINT16, *v as u64),
            DataValue::Uint32(v) => self.write_uint(TYPE_UINT32, *v as u64),
            DataValue::Uint64(v) => self.write_uint(TYPE_UINT64, *v),
            DataValue::Map(map) => {
                self.write_control(TYPE_MAP, map.len());
                for (key, value) in map {
                    self.write_control(TYPE_STRING, key.len());
                    self.buffer.extend_from_slice(key.as_bytes());
                    self.write_value(value);
                }
            }
            DataValue::Array(items) => {
                self.write_control(TYPE_ARRAY, items.len());
                for item in items {
                    self.write_value(item);
                }
            }
        }
    }

    /// Unsigned integers use the fewest big-endian bytes; zero has size 0.
    fn write_uint(&mut self, type_num: u8, value: u64) {
        let bytes = value.to_be_bytes();
        let skip = (value.leading_zeros() / 8) as usize;
        self.write_control(type_num, bytes.len() - skip);
        self.buffer.extend_from_slice(&bytes[skip..]);
    }

    /// Control byte, extended type byte (types > 7), then size extension bytes.
    fn write_control(&mut self, type_num: u8, size: usize) {
        let (size_bits, extra): (u8, Vec<u8>) = if size < 29 {
            (size as u8, Vec::new())
        } else if size < 285 {
            (29, vec![(size - 29) as u8])
        } else if size < 65_821 {
            (30, ((size - 285) as u16).to_be_bytes().to_vec())
        } else {
            (31, ((size - 65_821) as u32).to_be_bytes()[1..].to_vec())
        };

        if type_num <= 7 {
            self.buffer.push(type_num << 5 | size_bits);
        } else {
            self.buffer.push(size_bits);
            self.buffer.push(type_num - 7);
        }
        self.buffer.extend_from_slice(&extra);
    }
}
