//! Timed effects on creatures (poison, burning, regeneration, haste).
//!
//! A periodic condition applies `delta` to one property every `period_ms`,
//! `periods` times, then expires. A boost shifts the property's value and
//! ceiling by `delta` for its whole duration and is undone when it ends, however
//! it ends. The pending period event's handle is stored with the condition so
//! re-applying or despawning can cancel it.

use std::collections::BTreeMap;

use crate::entity::{Properties, Property, Stat};
use crate::events::EventHandle;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConditionKind {
    Poison,
    Burning,
    Regeneration,
    Haste,
}

impl ConditionKind {
    /// Bit in the condition icon mask sent to clients.
    #[must_use]
    pub fn icon_bit(self) -> u32 {
        match self {
            Self::Poison => 1 << 0,
            Self::Burning => 1 << 1,
            Self::Regeneration => 1 << 2,
            Self::Haste => 1 << 3,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Poison => "condition.poison",
            Self::Burning => "condition.burning",
            Self::Regeneration => "condition.regeneration",
            Self::Haste => "condition.haste",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConditionMode {
    /// `delta` is added every period.
    Periodic,
    /// `delta` shifts value and ceiling until the condition ends.
    Boost,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ConditionSpec {
    pub kind: ConditionKind,
    pub mode: ConditionMode,
    pub property: Property,
    /// Clamped by the property's range.
    pub delta: i64,
    pub period_ms: u64,
    pub periods: u32,
}

impl ConditionSpec {
    #[must_use]
    pub fn poison(damage_per_period: i64, period_ms: u64, periods: u32) -> Self {
        Self {
            kind: ConditionKind::Poison,
            mode: ConditionMode::Periodic,
            property: Property::Health,
            delta: -damage_per_period,
            period_ms,
            periods,
        }
    }

    #[must_use]
    pub fn regeneration(heal_per_period: i64, period_ms: u64, periods: u32) -> Self {
        Self {
            kind: ConditionKind::Regeneration,
            mode: ConditionMode::Periodic,
            property: Property::Health,
            delta: heal_per_period,
            period_ms,
            periods,
        }
    }

    #[must_use]
    pub fn burning(damage_per_period: i64, period_ms: u64, periods: u32) -> Self {
        Self {
            kind: ConditionKind::Burning,
            mode: ConditionMode::Periodic,
            property: Property::Health,
            delta: -damage_per_period,
            period_ms,
            periods,
        }
    }

    /// Raise speed by `bonus` for `duration_ms`.
    #[must_use]
    pub fn haste(bonus: u32, duration_ms: u64) -> Self {
        Self {
            kind: ConditionKind::Haste,
            mode: ConditionMode::Boost,
            property: Property::Speed,
            delta: i64::from(bonus),
            period_ms: duration_ms,
            periods: 1,
        }
    }
}

fn shifted(v: u32, delta: i64) -> u32 {
    u32::try_from((i64::from(v) + delta).max(0)).unwrap_or(u32::MAX)
}

/// Apply a boost to `props`, returning the stat it replaced.
pub(crate) fn boost(spec: &ConditionSpec, props: &mut Properties) -> Stat {
    let p = spec.property;
    let base = props.stat(p);
    props.set_max(p, shifted(base.max, spec.delta));
    props.set(p, shifted(base.value, spec.delta));
    base
}

#[derive(Copy, Clone, Debug)]
pub struct ActiveCondition {
    pub spec: ConditionSpec,
    pub remaining: u32,
    pub handle: EventHandle,
    /// The boosted property's stat before the boost.
    pub base: Option<Stat>,
}

impl ActiveCondition {
    /// Undo a boost. Returns the property touched, if any.
    pub fn revert(&self, props: &mut Properties) -> Option<Property> {
        let base = self.base?;
        let p = self.spec.property;
        let current = props.get(p);
        props.set_max(p, base.max);
        props.set(p, shifted(current, -self.spec.delta));
        Some(p)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConditionSet {
    active: BTreeMap<ConditionKind, ActiveCondition>,
}

impl ConditionSet {
    /// Insert or replace; returns the replaced condition so its handle can be
    /// cancelled.
    pub fn insert(&mut self, cond: ActiveCondition) -> Option<ActiveCondition> {
        self.active.insert(cond.spec.kind, cond)
    }

    pub fn remove(&mut self, kind: ConditionKind) -> Option<ActiveCondition> {
        self.active.remove(&kind)
    }

    #[must_use]
    pub fn get(&self, kind: ConditionKind) -> Option<&ActiveCondition> {
        self.active.get(&kind)
    }

    pub fn get_mut(&mut self, kind: ConditionKind) -> Option<&mut ActiveCondition> {
        self.active.get_mut(&kind)
    }

    #[must_use]
    pub fn contains(&self, kind: ConditionKind) -> bool {
        self.active.contains_key(&kind)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Remove everything, undoing boosts on `props`. Returns the removed
    /// conditions so their handles can be cancelled.
    pub fn clear(&mut self, props: &mut Properties) -> Vec<ActiveCondition> {
        let cleared: Vec<ActiveCondition> =
            std::mem::take(&mut self.active).into_values().collect();
        for c in &cleared {
            c.revert(props);
        }
        cleared
    }

    pub fn handles(&self) -> impl Iterator<Item = EventHandle> + '_ {
        self.active.values().map(|c| c.handle)
    }

    #[must_use]
    pub fn icons(&self) -> u32 {
        self.active.keys().fold(0, |m, k| m | k.icon_bit())
    }
}
