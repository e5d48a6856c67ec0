//! Polling groups

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::tag::TagId;
use crate::error::{AcqError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub(crate) usize);

impl GroupId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Group definition as handed to the table builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDef {
    pub name: String,
    #[serde(rename = "period_ms", with = "duration_ms")]
    pub period: Duration,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Group stays active only while consumers read it within this window
    #[serde(default, rename = "keep_alive_ms", with = "opt_duration_ms")]
    pub keep_alive: Option<Duration>,
}

fn default_active() -> bool {
    true
}

impl GroupDef {
    pub fn new(name: impl Into<String>, period: Duration) -> Self {
        Self {
            name: name.into(),
            period,
            active: true,
            keep_alive: None,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AcqError::config("Group name must not be empty"));
        }
        if self.period.is_zero() {
            return Err(AcqError::config(format!(
                "Group '{}': period must be positive",
                self.name
            )));
        }
        if matches!(self.keep_alive, Some(ka) if ka.is_zero()) {
            return Err(AcqError::config(format!(
                "Group '{}': keep_alive must be positive",
                self.name
            )));
        }
        Ok(())
    }
}

/// Named polling cadence
#[derive(Debug)]
pub struct Group {
    pub(crate) id: GroupId,
    pub(crate) name: String,
    pub(crate) period: Duration,
    pub(crate) keep_alive: Option<Duration>,
    pub(crate) tags: Vec<TagId>,
    enabled: AtomicBool,
    last_access: Mutex<Option<Instant>>,
}

impl Group {
    pub(crate) fn new(id: GroupId, def: GroupDef) -> Self {
        Self {
            id,
            name: def.name,
            period: def.period,
            keep_alive: def.keep_alive,
            tags: Vec::new(),
            enabled: AtomicBool::new(def.active),
            last_access: Mutex::new(None),
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn tags(&self) -> &[TagId] {
        &self.tags
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Record a consumer read of this group
    pub fn touch(&self, now: Instant) {
        *self.last_access.lock() = Some(now);
    }

    pub fn last_access(&self) -> Option<Instant> {
        *self.last_access.lock()
    }

    /// Enabled, and for keep-alive groups read by a consumer recently enough
    pub fn is_active(&self, now: Instant) -> bool {
        if !self.is_enabled() {
            return false;
        }
        match self.keep_alive {
            None => true,
            Some(window) => self
                .last_access()
                .is_some_and(|at| now.saturating_duration_since(at) <= window),
        }
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

pub(crate) mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_disable() {
        let group = Group::new(GroupId(0), GroupDef::new("fast", Duration::from_millis(500)));
        let now = Instant::now();
        assert!(group.is_active(now));
        group.set_enabled(false);
        assert!(!group.is_active(now));
    }

    #[test]
    fn test_keep_alive_window() {
        let def = GroupDef::new("hmi", Duration::from_secs(1)).with_keep_alive(Duration::from_secs(30));
        let group = Group::new(GroupId(0), def);
        let now = Instant::now();
        assert!(!group.is_active(now), "never read by a consumer");

        group.touch(now);
        assert!(group.is_active(now + Duration::from_secs(30)));
        assert!(!group.is_active(now + Duration::from_secs(31)));
    }

    #[test]
    fn test_group_def_yaml() {
        let def: GroupDef = serde_yaml::from_str("name: slow\nperiod_ms: 5000\n").unwrap();
        assert_eq!(def.period, Duration::from_secs(5));
        assert!(def.active);
        assert!(def.keep_alive.is_none());

        let def: GroupDef =
            serde_yaml::from_str("name: hmi\nperiod_ms: 200\nactive: false\nkeep_alive_ms: 10000\n")
                .unwrap();
        assert!(!def.active);
        assert_eq!(def.keep_alive, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_validate_rejects_zero_period() {
        assert!(GroupDef::new("g", Duration::ZERO).validate().is_err());
        assert!(GroupDef::new("", Duration::from_secs(1)).validate().is_err());
    }
}
