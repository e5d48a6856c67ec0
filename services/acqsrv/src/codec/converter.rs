//! Typed value converters
//!
//! A [`TypeConverter`] turns raw register bytes into a [`TagValue`] and back
//! for one value type under one byte order. Converters hold no data, so a
//! device keeps one per value type in a [`ConverterCache`].

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::byte_order::{bytes_to_registers, registers_to_bytes, ByteOrder};
use crate::error::{AcqError, Result};

/// Declared value type of a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[serde(alias = "boolean")]
    Bool,
    Int16,
    #[serde(alias = "word")]
    UInt16,
    Int32,
    #[serde(alias = "dword")]
    UInt32,
    #[serde(alias = "float")]
    Float32,
    #[serde(alias = "double")]
    Float64,
}

impl ValueType {
    /// Width in bytes when stored in registers
    pub fn byte_width(&self) -> usize {
        match self {
            Self::Bool | Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Number of 16-bit registers occupied
    pub fn register_count(&self) -> u16 {
        (self.byte_width() / 2) as u16
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Representable integer range, `None` for bool and floats
    fn int_range(&self) -> Option<(i64, i64)> {
        match self {
            Self::Int16 => Some((i16::MIN as i64, i16::MAX as i64)),
            Self::UInt16 => Some((0, u16::MAX as i64)),
            Self::Int32 => Some((i32::MIN as i64, i32::MAX as i64)),
            Self::UInt32 => Some((0, u32::MAX as i64)),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int16 => "int16",
            Self::UInt16 => "uint16",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        };
        f.write_str(name)
    }
}

/// A decoded tag value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl TagValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            TagValue::Bool(b) => f64::from(u8::from(b)),
            TagValue::Int(i) => i as f64,
            TagValue::Float(f) => f,
        }
    }

    pub fn as_bool(&self) -> bool {
        match *self {
            TagValue::Bool(b) => b,
            TagValue::Int(i) => i != 0,
            TagValue::Float(f) => f != 0.0,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Bool(b) => write!(f, "{}", b),
            TagValue::Int(i) => write!(f, "{}", i),
            TagValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Codec for one (value type, byte order) pair
#[derive(Debug, Clone)]
pub struct TypeConverter {
    value_type: ValueType,
    byte_order: ByteOrder,
    permutation: Vec<usize>,
}

impl TypeConverter {
    pub fn new(value_type: ValueType, byte_order: ByteOrder) -> Self {
        Self {
            value_type,
            byte_order,
            permutation: byte_order.permutation(value_type.byte_width()),
        }
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Decode raw bytes; extra trailing bytes are ignored
    pub fn decode(&self, raw: &[u8]) -> Result<TagValue> {
        let width = self.value_type.byte_width();
        if raw.len() < width {
            return Err(AcqError::decode(format!(
                "Not enough bytes for {}: need {}, got {}",
                self.value_type,
                width,
                raw.len()
            )));
        }

        let mut logical = [0u8; 8];
        for (i, &pos) in self.permutation.iter().enumerate() {
            logical[i] = raw[pos];
        }

        let value = match self.value_type {
            ValueType::Bool => TagValue::Bool(logical[0] != 0 || logical[1] != 0),
            ValueType::Int16 => TagValue::Int(i16::from_be_bytes([logical[0], logical[1]]) as i64),
            ValueType::UInt16 => {
                TagValue::Int(u16::from_be_bytes([logical[0], logical[1]]) as i64)
            },
            ValueType::Int32 => TagValue::Int(i32::from_be_bytes([
                logical[0], logical[1], logical[2], logical[3],
            ]) as i64),
            ValueType::UInt32 => TagValue::Int(u32::from_be_bytes([
                logical[0], logical[1], logical[2], logical[3],
            ]) as i64),
            ValueType::Float32 => TagValue::Float(f32::from_be_bytes([
                logical[0], logical[1], logical[2], logical[3],
            ]) as f64),
            ValueType::Float64 => TagValue::Float(f64::from_be_bytes(logical)),
        };
        Ok(value)
    }

    /// Decode from registers as returned by a session
    pub fn decode_registers(&self, registers: &[u16]) -> Result<TagValue> {
        self.decode(&registers_to_bytes(registers))
    }

    /// Encode a value into raw bytes
    ///
    /// Floats written to integer types are rounded; values outside the
    /// type's range are rejected.
    pub fn encode(&self, value: &TagValue) -> Result<Vec<u8>> {
        let logical: Vec<u8> = match self.value_type {
            ValueType::Bool => {
                let word: u16 = if value.as_bool() { 1 } else { 0 };
                word.to_be_bytes().to_vec()
            },
            ValueType::Int16 => (self.integer(value)? as i16).to_be_bytes().to_vec(),
            ValueType::UInt16 => (self.integer(value)? as u16).to_be_bytes().to_vec(),
            ValueType::Int32 => (self.integer(value)? as i32).to_be_bytes().to_vec(),
            ValueType::UInt32 => (self.integer(value)? as u32).to_be_bytes().to_vec(),
            ValueType::Float32 => {
                let v = value.as_f64();
                if v.is_finite() && v.abs() > f32::MAX as f64 {
                    return Err(AcqError::encode(format!("{} out of range for float32", v)));
                }
                (v as f32).to_be_bytes().to_vec()
            },
            ValueType::Float64 => value.as_f64().to_be_bytes().to_vec(),
        };

        let mut raw = vec![0u8; logical.len()];
        for (i, &pos) in self.permutation.iter().enumerate() {
            raw[pos] = logical[i];
        }
        Ok(raw)
    }

    /// Encode into registers ready for a write request
    pub fn encode_registers(&self, value: &TagValue) -> Result<Vec<u16>> {
        Ok(bytes_to_registers(&self.encode(value)?))
    }

    fn integer(&self, value: &TagValue) -> Result<i64> {
        let (min, max) = self
            .value_type
            .int_range()
            .ok_or_else(|| AcqError::internal(format!("{} is not an integer type", self.value_type)))?;

        let v = match *value {
            TagValue::Bool(b) => i64::from(b),
            TagValue::Int(i) => i,
            TagValue::Float(f) => {
                if !f.is_finite() {
                    return Err(AcqError::encode(format!(
                        "{} cannot be written to {}",
                        f, self.value_type
                    )));
                }
                let rounded = f.round();
                if rounded < min as f64 || rounded > max as f64 {
                    return Err(AcqError::encode(format!(
                        "{} out of range for {}",
                        f, self.value_type
                    )));
                }
                rounded as i64
            },
        };

        if v < min || v > max {
            return Err(AcqError::encode(format!(
                "{} out of range for {}",
                v, self.value_type
            )));
        }
        Ok(v)
    }
}

/// Per-device converter cache keyed by value type
///
/// All entries share the device byte order; changing it drops them.
#[derive(Debug, Default)]
pub struct ConverterCache {
    byte_order: ByteOrder,
    converters: AHashMap<ValueType, Arc<TypeConverter>>,
}

impl ConverterCache {
    pub fn new(byte_order: ByteOrder) -> Self {
        Self {
            byte_order,
            converters: AHashMap::new(),
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Switch byte order, invalidating cached converters when it differs
    pub fn set_byte_order(&mut self, byte_order: ByteOrder) {
        if self.byte_order != byte_order {
            self.byte_order = byte_order;
            self.converters.clear();
        }
    }

    pub fn get(&mut self, value_type: ValueType) -> Arc<TypeConverter> {
        let order = self.byte_order;
        self.converters
            .entry(value_type)
            .or_insert_with(|| Arc::new(TypeConverter::new(value_type, order)))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    const ORDERS: [ByteOrder; 4] = [
        ByteOrder::ABCD,
        ByteOrder::CDAB,
        ByteOrder::BADC,
        ByteOrder::DCBA,
    ];

    #[test]
    fn test_decode_uint32_each_order() {
        // 0x12345678 as laid out by each order
        let cases = [
            (ByteOrder::ABCD, [0x1234, 0x5678]),
            (ByteOrder::CDAB, [0x5678, 0x1234]),
            (ByteOrder::BADC, [0x3412, 0x7856]),
            (ByteOrder::DCBA, [0x7856, 0x3412]),
        ];
        for (order, regs) in cases {
            let conv = TypeConverter::new(ValueType::UInt32, order);
            assert_eq!(
                conv.decode_registers(&regs).unwrap(),
                TagValue::Int(0x1234_5678),
                "{}",
                order
            );
        }
    }

    #[test]
    fn test_decode_uint32_irregular_order() {
        // Raw bytes hold logical bytes A, C, B, D
        let order = "ACBD".parse::<ByteOrder>().unwrap();
        let conv = TypeConverter::new(ValueType::UInt32, order);
        assert_eq!(
            conv.decode_registers(&[0x1256, 0x3478]).unwrap(),
            TagValue::Int(0x1234_5678)
        );
    }

    #[test]
    fn test_decode_float32_standard() {
        // 123.456f32 = 0x42F6E979
        let conv = TypeConverter::new(ValueType::Float32, ByteOrder::ABCD);
        let value = conv.decode_registers(&[0x42F6, 0xE979]).unwrap();
        match value {
            TagValue::Float(v) => assert!((v - 123.456).abs() < 1e-4),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_signed_int16() {
        let conv = TypeConverter::new(ValueType::Int16, ByteOrder::ABCD);
        assert_eq!(conv.decode_registers(&[0xFFFF]).unwrap(), TagValue::Int(-1));
        let conv = TypeConverter::new(ValueType::UInt16, ByteOrder::ABCD);
        assert_eq!(conv.decode_registers(&[0xFFFF]).unwrap(), TagValue::Int(65535));
    }

    #[test]
    fn test_decode_short_buffer_is_error() {
        let conv = TypeConverter::new(ValueType::Float64, ByteOrder::CDAB);
        let err = conv.decode(&[0, 1, 2, 3]).unwrap_err();
        assert!(matches!(err, AcqError::DecodeError(_)));
        assert!(err.to_string().contains("need 8, got 4"));
    }

    #[test]
    fn test_round_trip_all_orders() {
        let samples = [
            (ValueType::Bool, TagValue::Bool(true)),
            (ValueType::Int16, TagValue::Int(-12345)),
            (ValueType::UInt16, TagValue::Int(54321)),
            (ValueType::Int32, TagValue::Int(-2_000_000_000)),
            (ValueType::UInt32, TagValue::Int(4_000_000_000)),
            (ValueType::Float32, TagValue::Float(-1.5)),
            (ValueType::Float64, TagValue::Float(std::f64::consts::PI)),
        ];
        let irregular = [[0, 2, 1, 3], [3, 0, 1, 2], [1, 3, 2, 0]]
            .map(|map| ByteOrder::from_index_map(map).unwrap());
        for order in ORDERS.into_iter().chain(irregular) {
            for (vt, value) in samples {
                let conv = TypeConverter::new(vt, order);
                let raw = conv.encode(&value).unwrap();
                assert_eq!(raw.len(), vt.byte_width());
                assert_eq!(conv.decode(&raw).unwrap(), value, "{} {}", vt, order);
            }
        }
    }

    #[test]
    fn test_encode_float_into_integer_rounds() {
        let conv = TypeConverter::new(ValueType::Int16, ByteOrder::ABCD);
        assert_eq!(conv.encode_registers(&TagValue::Float(41.6)).unwrap(), vec![42]);
    }

    #[test]
    fn test_encode_out_of_range() {
        let conv = TypeConverter::new(ValueType::UInt16, ByteOrder::ABCD);
        assert!(matches!(
            conv.encode(&TagValue::Int(70_000)),
            Err(AcqError::EncodeError(_))
        ));
        assert!(conv.encode(&TagValue::Int(-1)).is_err());
        assert!(conv.encode(&TagValue::Float(f64::NAN)).is_err());
    }

    #[test]
    fn test_cache_reuses_and_invalidates() {
        let mut cache = ConverterCache::new(ByteOrder::ABCD);
        let a = cache.get(ValueType::Float32);
        let b = cache.get(ValueType::Float32);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);

        cache.set_byte_order(ByteOrder::ABCD);
        assert_eq!(cache.len(), 1);

        cache.set_byte_order(ByteOrder::CDAB);
        assert!(cache.is_empty());
        assert_eq!(cache.get(ValueType::Float32).byte_order(), ByteOrder::CDAB);
    }

    #[test]
    fn test_value_type_serde_names() {
        let vt: ValueType = serde_yaml::from_str("float").unwrap();
        assert_eq!(vt, ValueType::Float32);
        let vt: ValueType = serde_yaml::from_str("uint32").unwrap();
        assert_eq!(vt, ValueType::UInt32);
        assert_eq!(ValueType::Float64.register_count(), 4);
    }

    #[test]
    fn test_tag_value_untagged() {
        let v: TagValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, TagValue::Bool(true));
        let v: TagValue = serde_json::from_str("12").unwrap();
        assert_eq!(v, TagValue::Int(12));
        let v: TagValue = serde_json::from_str("1.25").unwrap();
        assert_eq!(v, TagValue::Float(1.25));
    }
}
