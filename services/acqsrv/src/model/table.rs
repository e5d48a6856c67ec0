//! Tag/group arena with name lookup
//!
//! Tags and groups live in vectors indexed by [`TagId`]/[`GroupId`]; the
//! structure itself is immutable once built. Only per-tag state and group
//! activation change at runtime, each behind its own lock.

use ahash::AHashMap;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

use super::group::{Group, GroupDef, GroupId};
use super::tag::{Tag, TagDef, TagId, TagInfo, TagSnapshot};
use crate::error::{AcqError, Result};

#[derive(Debug, Default)]
pub struct TagTable {
    tags: Vec<Tag>,
    groups: Vec<Group>,
    tag_index: AHashMap<String, TagId>,
    group_index: AHashMap<String, GroupId>,
}

impl TagTable {
    pub fn builder(default_period: Duration) -> TagTableBuilder {
        TagTableBuilder::new(default_period)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn tags(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter()
    }

    pub fn tag(&self, id: TagId) -> &Tag {
        &self.tags[id.0]
    }

    pub fn group(&self, id: GroupId) -> &Group {
        &self.groups[id.0]
    }

    pub fn tag_id(&self, name: &str) -> Option<TagId> {
        self.tag_index.get(name).copied()
    }

    pub fn tag_by_name(&self, name: &str) -> Option<&Tag> {
        self.tag_id(name).map(|id| self.tag(id))
    }

    pub fn group_by_name(&self, name: &str) -> Option<&Group> {
        self.group_index.get(name).map(|&id| self.group(id))
    }

    /// A tag is active iff at least one of its groups is active
    pub fn is_tag_active(&self, tag: &Tag, now: Instant) -> bool {
        tag.groups.iter().any(|&g| self.group(g).is_active(now))
    }

    /// Per-name snapshots, `None` for unknown names, input order kept
    pub fn tag_values<S: AsRef<str>>(&self, names: &[S]) -> Vec<Option<TagSnapshot>> {
        names
            .iter()
            .map(|n| self.tag_by_name(n.as_ref()).map(Tag::snapshot))
            .collect()
    }

    /// Snapshots of a group's tags; marks the group as read by a consumer
    pub fn group_values(&self, group: &str, now: Instant) -> Result<Vec<TagSnapshot>> {
        let group = self
            .group_by_name(group)
            .ok_or_else(|| AcqError::group_not_found(group))?;
        group.touch(now);
        Ok(group.tags.iter().map(|&id| self.tag(id).snapshot()).collect())
    }

    pub fn all_values(&self) -> Vec<TagSnapshot> {
        self.tags.iter().map(Tag::snapshot).collect()
    }

    pub fn tag_info(&self, name: &str) -> Option<TagInfo> {
        let tag = self.tag_by_name(name)?;
        Some(TagInfo {
            name: tag.name.clone(),
            display_name: tag.meta.display_name.clone(),
            description: tag.meta.description.clone(),
            units: tag.meta.units.clone(),
            format: tag.meta.format.clone(),
            region: tag.region,
            address: tag.address,
            length: tag.length,
            value_type: tag.value_type,
            bit: tag.bit,
            access: tag.access,
            groups: self.group_names(tag),
            period_ms: tag.period.as_millis() as u64,
        })
    }

    /// Tag name to the names of the groups it belongs to
    pub fn tags_groups(&self) -> BTreeMap<String, Vec<String>> {
        self.tags
            .iter()
            .map(|t| (t.name.clone(), self.group_names(t)))
            .collect()
    }

    pub fn set_group_active(&self, group: &str, active: bool) -> Result<()> {
        let group = self
            .group_by_name(group)
            .ok_or_else(|| AcqError::group_not_found(group))?;
        group.set_enabled(active);
        Ok(())
    }

    fn group_names(&self, tag: &Tag) -> Vec<String> {
        tag.groups
            .iter()
            .map(|&g| self.group(g).name.clone())
            .collect()
    }
}

/// Validating builder; groups must be added before the tags that use them
#[derive(Debug)]
pub struct TagTableBuilder {
    default_period: Duration,
    table: TagTable,
}

impl TagTableBuilder {
    pub fn new(default_period: Duration) -> Self {
        Self {
            default_period,
            table: TagTable::default(),
        }
    }

    pub fn group(mut self, def: GroupDef) -> Result<Self> {
        def.validate()?;
        if self.table.group_index.contains_key(&def.name) {
            return Err(AcqError::config(format!("Duplicate group '{}'", def.name)));
        }
        let id = GroupId(self.table.groups.len());
        self.table.group_index.insert(def.name.clone(), id);
        self.table.groups.push(Group::new(id, def));
        Ok(self)
    }

    pub fn tag(mut self, def: TagDef) -> Result<Self> {
        let length = def.validate()?;
        if self.table.tag_index.contains_key(&def.name) {
            return Err(AcqError::config(format!("Duplicate tag '{}'", def.name)));
        }

        let mut groups = Vec::with_capacity(def.groups.len());
        for name in &def.groups {
            let gid = *self.table.group_index.get(name).ok_or_else(|| {
                AcqError::config(format!("Tag '{}': unknown group '{}'", def.name, name))
            })?;
            if !groups.contains(&gid) {
                groups.push(gid);
            }
        }

        let period = groups
            .iter()
            .map(|&g| self.table.groups[g.0].period)
            .min()
            .unwrap_or(self.default_period);

        let id = TagId(self.table.tags.len());
        for &g in &groups {
            self.table.groups[g.0].tags.push(id);
        }
        self.table.tag_index.insert(def.name.clone(), id);
        self.table.tags.push(Tag::new(id, def, length, groups, period));
        Ok(self)
    }

    pub fn build(self) -> TagTable {
        self.table
    }
}
