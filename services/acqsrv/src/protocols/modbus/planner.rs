//! Request packer
//!
//! Turns the tags that need service in one region into contiguous,
//! size-bounded windows. Items are sorted by start address and the current
//! window is extended while the resulting span stays within the limit (and
//! the gap within `max_gap`, when set).

use serde::{Deserialize, Serialize};

use super::constants::{MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_BITS, MAX_WRITE_REGISTERS};
use crate::error::{AcqError, Result};
use crate::model::Region;

/// Address range of one item to pack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanItem<K> {
    pub start: u16,
    pub length: u16,
    pub key: K,
}

impl<K> PlanItem<K> {
    pub fn new(start: u16, length: u16, key: K) -> Self {
        Self { start, length, key }
    }

    fn end(&self) -> u32 {
        self.start as u32 + self.length as u32
    }
}

/// A contiguous address range fetched or written in one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window<K> {
    pub start: u16,
    pub length: u16,
    pub members: Vec<K>,
}

impl<K> Window<K> {
    pub fn end(&self) -> u32 {
        self.start as u32 + self.length as u32
    }
}

/// Pack `items` into windows no wider than `max_span`
///
/// `max_gap = None` bridges any gap that still fits the span; `Some(0)`
/// only merges adjacent or overlapping items.
pub fn plan_windows<K: Copy>(
    items: &[PlanItem<K>],
    max_span: u16,
    max_gap: Option<u16>,
) -> Result<Vec<Window<K>>> {
    if max_span == 0 {
        return Err(AcqError::planner("Maximum span must be positive"));
    }
    for item in items {
        if item.length == 0 {
            return Err(AcqError::planner(format!(
                "Zero-length item at address {}",
                item.start
            )));
        }
        if item.length > max_span {
            return Err(AcqError::planner(format!(
                "Item at address {} spans {} > maximum {} per request",
                item.start, item.length, max_span
            )));
        }
    }

    let mut sorted: Vec<&PlanItem<K>> = items.iter().collect();
    sorted.sort_by_key(|i| (i.start, i.length));

    let mut windows = Vec::new();
    let mut iter = sorted.into_iter();
    let Some(first) = iter.next() else {
        return Ok(windows);
    };

    let mut start = first.start as u32;
    let mut end = first.end();
    let mut members = vec![first.key];

    for item in iter {
        let new_end = end.max(item.end());
        let gap = (item.start as u32).saturating_sub(end);
        let fits = new_end - start <= max_span as u32;
        let gap_ok = max_gap.is_none_or(|g| gap <= g as u32);

        if fits && gap_ok {
            end = new_end;
            members.push(item.key);
        } else {
            windows.push(Window {
                start: start as u16,
                length: (end - start) as u16,
                members: std::mem::take(&mut members),
            });
            start = item.start as u32;
            end = item.end();
            members.push(item.key);
        }
    }

    windows.push(Window {
        start: start as u16,
        length: (end - start) as u16,
        members,
    });
    Ok(windows)
}

/// Per-request ceilings and gap tolerance for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestLimits {
    pub max_read_registers: u16,
    pub max_read_bits: u16,
    pub max_write_registers: u16,
    pub max_write_bits: u16,
    /// Largest unused gap bridged inside a read window
    pub max_gap: Option<u16>,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_read_registers: MAX_READ_REGISTERS,
            max_read_bits: MAX_READ_BITS,
            max_write_registers: MAX_WRITE_REGISTERS,
            max_write_bits: MAX_WRITE_BITS,
            max_gap: None,
        }
    }
}

impl RequestLimits {
    pub fn read_span(&self, region: Region) -> u16 {
        if region.is_bit() {
            self.max_read_bits
        } else {
            self.max_read_registers
        }
    }

    pub fn write_span(&self, region: Region) -> u16 {
        if region.is_bit() {
            self.max_write_bits
        } else {
            self.max_write_registers
        }
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("max_read_registers", self.max_read_registers, MAX_READ_REGISTERS),
            ("max_read_bits", self.max_read_bits, MAX_READ_BITS),
            ("max_write_registers", self.max_write_registers, MAX_WRITE_REGISTERS),
            ("max_write_bits", self.max_write_bits, MAX_WRITE_BITS),
        ];
        for (field, value, ceiling) in checks {
            if value == 0 || value > ceiling {
                return Err(AcqError::config(format!(
                    "limits.{} = {} outside 1..={}",
                    field, value, ceiling
                )));
            }
        }
        Ok(())
    }
}
