//! Due-tag selection and sleep computation
//!
//! A pass looks at every tag once: tags whose next read falls within the
//! look-ahead horizon are selected together, and the earliest next-due time
//! over all tags becomes the loop's next deadline.

use std::time::Duration;
use tokio::time::Instant;

use crate::model::{Quality, Tag, TagId, TagTable};

/// Device-level polling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePolicy {
    /// Retry delay after a communication failure; also the cadence of non-good tags
    pub bad_comm_wait: Duration,
    /// Keep refreshing tags that belong to no active group
    pub update_inactive: bool,
    pub inactive_period: Duration,
    /// Tags due within this window of `now` join the current pass
    pub horizon: Duration,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            bad_comm_wait: Duration::from_secs(10),
            update_inactive: true,
            inactive_period: Duration::from_secs(20),
            horizon: Duration::from_secs(1),
        }
    }
}

/// Result of one scheduling pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuePass {
    pub due: Vec<TagId>,
    pub next_due: Instant,
}

/// Period until the tag's next read, or `None` when it is not scheduled
///
/// `assume_good` schedules as if the pending read succeeds.
fn effective_period(
    table: &TagTable,
    tag: &Tag,
    policy: &SchedulePolicy,
    now: Instant,
    assume_good: bool,
) -> Option<Duration> {
    if !tag.access().readable() {
        return None;
    }
    if table.is_tag_active(tag, now) {
        if assume_good || tag.quality() == Quality::Good {
            Some(tag.period())
        } else {
            Some(policy.bad_comm_wait)
        }
    } else if policy.update_inactive {
        Some(policy.inactive_period)
    } else {
        None
    }
}

/// Select the tags to read now and the next time anything becomes due
///
/// Selected tags count as due again one nominal period from `now`; the
/// caller refines this with [`next_deadline`] once results are applied.
pub fn select_due(table: &TagTable, policy: &SchedulePolicy, now: Instant, force: bool) -> DuePass {
    let horizon_end = now + policy.horizon;
    let mut next_due = now + policy.bad_comm_wait;
    let mut due = Vec::new();

    for tag in table.tags() {
        let Some(period) = effective_period(table, tag, policy, now, false) else {
            if force && tag.access().readable() {
                due.push(tag.id());
                next_due = next_due.min(now + tag.period());
            }
            continue;
        };

        match tag.last_attempt() {
            Some(last) if last + period > horizon_end && !force => {
                next_due = next_due.min(last + period);
            },
            _ => {
                due.push(tag.id());
                let expected = effective_period(table, tag, policy, now, true).unwrap_or(period);
                next_due = next_due.min(now + expected);
            },
        }
    }

    DuePass { due, next_due }
}

/// Earliest time any scheduled tag becomes due, from the tags' current state
pub fn next_deadline(table: &TagTable, policy: &SchedulePolicy, now: Instant) -> Instant {
    table
        .tags()
        .filter_map(|tag| {
            let period = effective_period(table, tag, policy, now, false)?;
            Some(tag.last_attempt().map_or(now, |last| last + period))
        })
        .fold(now + policy.bad_comm_wait, Instant::min)
}

/// Clamp and halve the time until the next deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepPolicy {
    pub floor: Duration,
    /// Waits longer than this are halved so changes are noticed sooner
    pub halve_above: Duration,
    pub ceiling: Duration,
}

impl Default for SleepPolicy {
    fn default() -> Self {
        Self {
            floor: Duration::from_millis(1),
            halve_above: Duration::from_secs(5),
            ceiling: Duration::from_secs(10),
        }
    }
}

impl SleepPolicy {
    pub fn wait(&self, next_due: Instant, now: Instant) -> Duration {
        let mut wait = next_due.saturating_duration_since(now).max(self.floor);
        if wait > self.halve_above {
            wait /= 2;
        }
        wait.min(self.ceiling)
    }
}
