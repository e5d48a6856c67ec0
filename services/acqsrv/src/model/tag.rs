//! Tag definition and runtime state

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::group::GroupId;
use crate::codec::{ConverterCache, ScaleLaw, TagValue, ValueType};
use crate::error::{AcqError, Result};

/// Size of every addressable region
pub const REGION_ADDRESS_SPACE: u32 = 65536;

/// Addressable fieldbus space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    #[serde(alias = "coil")]
    Coils,
    #[serde(alias = "discrete_input")]
    DiscreteInputs,
    #[serde(alias = "input_register")]
    InputRegisters,
    #[serde(alias = "holding_register")]
    HoldingRegisters,
}

impl Region {
    /// Read order within one poll cycle
    pub const POLL_ORDER: [Region; 4] = [
        Region::Coils,
        Region::DiscreteInputs,
        Region::InputRegisters,
        Region::HoldingRegisters,
    ];

    /// Single-bit region
    pub fn is_bit(&self) -> bool {
        matches!(self, Region::Coils | Region::DiscreteInputs)
    }

    /// Region accepts writes
    pub fn is_writable(&self) -> bool {
        matches!(self, Region::Coils | Region::HoldingRegisters)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Region::Coils => "coils",
            Region::DiscreteInputs => "discrete_inputs",
            Region::InputRegisters => "input_registers",
            Region::HoldingRegisters => "holding_registers",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    #[default]
    #[serde(alias = "r")]
    ReadOnly,
    #[serde(alias = "w")]
    WriteOnly,
    #[serde(alias = "rw")]
    ReadWrite,
}

impl Access {
    pub fn readable(&self) -> bool {
        !matches!(self, Access::WriteOnly)
    }

    pub fn writable(&self) -> bool {
        !matches!(self, Access::ReadOnly)
    }
}

/// Reliability of a tag's current value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Quality {
    Good,
    /// Last read failed
    Bad,
    /// Device unreachable
    BadCommFailure,
}

/// Stable arena index of a tag within its table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagId(pub(crate) usize);

impl TagId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Mutable part of a tag, always read and written as a whole
#[derive(Debug, Clone)]
pub struct TagState {
    pub value: Option<TagValue>,
    pub quality: Quality,
    /// Last read attempt; `None` forces the tag due
    pub last_attempt: Option<Instant>,
    pub last_good: Option<Instant>,
    pub updated_at: Option<DateTime<Utc>>,
    pub good_at: Option<DateTime<Utc>>,
}

impl Default for TagState {
    fn default() -> Self {
        Self {
            value: None,
            quality: Quality::Bad,
            last_attempt: None,
            last_good: None,
            updated_at: None,
            good_at: None,
        }
    }
}

/// Consistent copy of a tag's value, quality and timestamps
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagSnapshot {
    pub name: String,
    pub value: Option<TagValue>,
    pub quality: Quality,
    pub updated_at: Option<DateTime<Utc>>,
    pub good_at: Option<DateTime<Utc>>,
}

/// Static description of a tag for consumers
#[derive(Debug, Clone, Serialize)]
pub struct TagInfo {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub units: Option<String>,
    pub format: Option<String>,
    pub region: Region,
    pub address: u16,
    pub length: u16,
    pub value_type: ValueType,
    pub bit: Option<u8>,
    pub access: Access,
    pub groups: Vec<String>,
    pub period_ms: u64,
}

/// Human-facing tag attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMeta {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

/// Everything needed to add a tag to a table
#[derive(Debug, Clone)]
pub struct TagDef {
    pub name: String,
    pub meta: TagMeta,
    pub region: Region,
    pub address: u16,
    /// Registers or bits; derived from the value type when `None`
    pub length: Option<u16>,
    pub value_type: ValueType,
    pub bit: Option<u8>,
    pub access: Access,
    pub scale: Option<Arc<dyn ScaleLaw>>,
    pub groups: Vec<String>,
}

impl TagDef {
    pub fn new(name: impl Into<String>, region: Region, address: u16, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            meta: TagMeta::default(),
            region,
            address,
            length: None,
            value_type,
            bit: None,
            access: Access::ReadOnly,
            scale: None,
            groups: Vec::new(),
        }
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_bit(mut self, bit: u8) -> Self {
        self.bit = Some(bit);
        self
    }

    pub fn with_scale(mut self, scale: Arc<dyn ScaleLaw>) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_meta(mut self, meta: TagMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Check region/type/width/address invariants and resolve the length
    pub fn validate(&self) -> Result<u16> {
        let err = |msg: String| AcqError::config(format!("Tag '{}': {}", self.name, msg));

        if self.name.trim().is_empty() {
            return Err(AcqError::config("Tag name must not be empty"));
        }

        let length = if self.region.is_bit() {
            if self.value_type != ValueType::Bool {
                return Err(err(format!(
                    "{} holds single bits, value type {} not allowed",
                    self.region, self.value_type
                )));
            }
            if self.bit.is_some() {
                return Err(err("bit index only applies to register regions".into()));
            }
            let length = self.length.unwrap_or(1);
            if length != 1 {
                return Err(err(format!("bit tags have length 1, got {}", length)));
            }
            length
        } else {
            let expected = self.value_type.register_count();
            let length = self.length.unwrap_or(expected);
            if length != expected {
                return Err(err(format!(
                    "{} occupies {} register(s), configured length {}",
                    self.value_type, expected, length
                )));
            }
            if let Some(bit) = self.bit {
                if self.value_type != ValueType::Bool {
                    return Err(err("bit index requires value type bool".into()));
                }
                if bit > 15 {
                    return Err(err(format!("bit index {} outside 0..=15", bit)));
                }
                if self.access.writable() {
                    return Err(err("bit-addressed register tags are read-only".into()));
                }
            }
            length
        };

        if self.address as u32 + length as u32 > REGION_ADDRESS_SPACE {
            return Err(err(format!(
                "address {} + length {} exceeds the {} address space",
                self.address, length, self.region
            )));
        }

        if self.access.writable() && !self.region.is_writable() {
            return Err(err(format!("{} is read-only", self.region)));
        }

        if self.scale.is_some() && self.value_type == ValueType::Bool {
            return Err(err("scale does not apply to bool tags".into()));
        }

        Ok(length)
    }
}

/// A tag inside a table: immutable definition plus locked runtime state
#[derive(Debug)]
pub struct Tag {
    pub(crate) id: TagId,
    pub(crate) name: String,
    pub(crate) meta: TagMeta,
    pub(crate) region: Region,
    pub(crate) address: u16,
    pub(crate) length: u16,
    pub(crate) value_type: ValueType,
    pub(crate) bit: Option<u8>,
    pub(crate) access: Access,
    pub(crate) scale: Option<Arc<dyn ScaleLaw>>,
    pub(crate) groups: Vec<GroupId>,
    /// Minimum period over the tag's groups, device default without groups
    pub(crate) period: Duration,
    state: RwLock<TagState>,
}

impl Tag {
    pub(crate) fn new(id: TagId, def: TagDef, length: u16, groups: Vec<GroupId>, period: Duration) -> Self {
        Self {
            id,
            name: def.name,
            meta: def.meta,
            region: def.region,
            address: def.address,
            length,
            value_type: def.value_type,
            bit: def.bit,
            access: def.access,
            scale: def.scale,
            groups,
            period,
            state: RwLock::new(TagState::default()),
        }
    }

    pub fn id(&self) -> TagId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta(&self) -> &TagMeta {
        &self.meta
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn groups(&self) -> &[GroupId] {
        &self.groups
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Copy of the whole runtime state under one lock
    pub fn state(&self) -> TagState {
        self.state.read().clone()
    }

    pub fn quality(&self) -> Quality {
        self.state.read().quality
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.state.read().last_attempt
    }

    pub fn snapshot(&self) -> TagSnapshot {
        let state = self.state.read();
        TagSnapshot {
            name: self.name.clone(),
            value: state.value,
            quality: state.quality,
            updated_at: state.updated_at,
            good_at: state.good_at,
        }
    }

    /// Decode this tag's registers (exactly the tag's slice of a window)
    pub fn decode_registers(&self, cache: &mut ConverterCache, registers: &[u16]) -> Result<TagValue> {
        if registers.len() < self.length as usize {
            return Err(AcqError::decode(format!(
                "Not enough registers for '{}': need {}, got {}",
                self.name,
                self.length,
                registers.len()
            )));
        }

        if let Some(bit) = self.bit {
            let word = cache.get(ValueType::UInt16).decode_registers(registers)?;
            let word = match word {
                TagValue::Int(w) => w,
                other => other.as_f64() as i64,
            };
            return Ok(TagValue::Bool((word >> bit) & 1 == 1));
        }

        let raw = cache.get(self.value_type).decode_registers(registers)?;
        Ok(self.to_engineering(raw))
    }

    /// Decode a single bit from a bit window slice
    pub fn decode_bits(&self, bits: &[bool]) -> Result<TagValue> {
        bits.first().map(|&b| TagValue::Bool(b)).ok_or_else(|| {
            AcqError::decode(format!("Not enough bits for '{}': need 1, got 0", self.name))
        })
    }

    /// Encode a consumer value into registers
    pub fn encode_registers(&self, cache: &mut ConverterCache, value: &TagValue) -> Result<Vec<u16>> {
        let raw = match &self.scale {
            Some(scale) => TagValue::Float(scale.to_raw(value.as_f64())),
            None => *value,
        };
        cache.get(self.value_type).encode_registers(&raw)
    }

    fn to_engineering(&self, raw: TagValue) -> TagValue {
        match (&self.scale, raw) {
            (Some(scale), TagValue::Int(_) | TagValue::Float(_)) => {
                TagValue::Float(scale.to_engineering(raw.as_f64()))
            },
            _ => raw,
        }
    }

    pub(crate) fn apply_good(&self, value: TagValue, now: Instant) {
        let wall = Utc::now();
        let mut state = self.state.write();
        state.value = Some(value);
        state.quality = Quality::Good;
        state.last_attempt = Some(now);
        state.last_good = Some(now);
        state.updated_at = Some(wall);
        state.good_at = Some(wall);
    }

    /// Record a failed attempt; the last good value is kept
    pub(crate) fn apply_failure(&self, quality: Quality, now: Instant) {
        let mut state = self.state.write();
        state.quality = quality;
        state.last_attempt = Some(now);
        state.updated_at = Some(Utc::now());
    }

    /// Forget the last attempt so the next pass reads the tag
    pub(crate) fn invalidate(&self) {
        self.state.write().last_attempt = None;
    }
}
