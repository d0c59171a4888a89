//! Creatures: the live entities of the world.
//!
//! Creatures are owned by the [`registry::EntityRegistry`] and referenced
//! everywhere else by [`EntityId`]. Position is written only by `World` so the
//! spatial bookkeeping stays in step with it.

pub mod behavior;
pub mod registry;

use net_core::WireError;

use crate::conditions::ConditionSet;
use crate::events::EventHandle;
use crate::ids::{ConnectionId, EntityId};
use crate::position::{Direction, Position};

pub use behavior::{Behavior, MonsterBrain, NpcBrain, NpcPause, PlayerBrain, Think};
pub use registry::EntityRegistry;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CreatureKind {
    Player,
    Monster,
    Npc,
}

impl CreatureKind {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Player => 0,
            Self::Monster => 1,
            Self::Npc => 2,
        }
    }

    pub fn from_u8(v: u8) -> Result<Self, WireError> {
        match v {
            0 => Ok(Self::Player),
            1 => Ok(Self::Monster),
            2 => Ok(Self::Npc),
            other => Err(WireError::InvalidValue {
                field: "creature kind",
                value: u32::from(other),
            }),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Property {
    Health,
    Mana,
    Speed,
    Attack,
    Defense,
}

impl Property {
    pub const ALL: [Property; 5] = [
        Self::Health,
        Self::Mana,
        Self::Speed,
        Self::Attack,
        Self::Defense,
    ];

    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Health => 0,
            Self::Mana => 1,
            Self::Speed => 2,
            Self::Attack => 3,
            Self::Defense => 4,
        }
    }

    pub fn from_u8(v: u8) -> Result<Self, WireError> {
        Self::ALL
            .get(usize::from(v))
            .copied()
            .ok_or(WireError::InvalidValue {
                field: "property",
                value: u32::from(v),
            })
    }

    fn index(self) -> usize {
        usize::from(self.as_u8())
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Stat {
    pub value: u32,
    pub max: u32,
}

/// Property bag. Each value is clamped to `[0, max]` independently.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Properties {
    stats: [Stat; 5],
}

impl Properties {
    /// Every property starts full.
    #[must_use]
    pub fn new(health: u32, mana: u32, speed: u32, attack: u32, defense: u32) -> Self {
        let full = |v| Stat { value: v, max: v };
        Self {
            stats: [full(health), full(mana), full(speed), full(attack), full(defense)],
        }
    }

    #[must_use]
    pub fn get(&self, p: Property) -> u32 {
        self.stats[p.index()].value
    }

    #[must_use]
    pub fn max(&self, p: Property) -> u32 {
        self.stats[p.index()].max
    }

    #[must_use]
    pub fn stat(&self, p: Property) -> Stat {
        self.stats[p.index()]
    }

    /// Set a value, clamped to the property's max. Returns the stored value.
    pub fn set(&mut self, p: Property, value: u32) -> u32 {
        let s = &mut self.stats[p.index()];
        s.value = value.min(s.max);
        s.value
    }

    /// Add a signed delta with clamping. Returns the stored value.
    pub fn adjust(&mut self, p: Property, delta: i64) -> u32 {
        let s = &mut self.stats[p.index()];
        let v = (i64::from(s.value) + delta).clamp(0, i64::from(s.max));
        // Clamped into [0, max], and max is a u32.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            s.value = v as u32;
        }
        s.value
    }

    /// Change the ceiling; the current value is pulled down if it now exceeds it.
    pub fn set_max(&mut self, p: Property, max: u32) {
        let s = &mut self.stats[p.index()];
        s.max = max;
        s.value = s.value.min(max);
    }

    pub fn restore(&mut self, p: Property) {
        let s = &mut self.stats[p.index()];
        s.value = s.max;
    }
}

#[derive(Debug)]
pub struct Creature {
    /// Assigned by the registry on `register`.
    pub id: EntityId,
    pub name: String,
    pub kind: CreatureKind,
    pub direction: Direction,
    pub props: Properties,
    pub conditions: ConditionSet,
    /// Where monsters return to and respawn at.
    pub home: Option<Position>,
    pub(crate) position: Option<Position>,
    /// `None` while the behavior is detached for its own think.
    pub(crate) behavior: Option<Behavior>,
    pub(crate) connection: Option<ConnectionId>,
    /// Other pending events owned by this creature (e.g. NPC wake-ups).
    pub(crate) timers: Vec<EventHandle>,
}

impl Creature {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: CreatureKind, props: Properties) -> Self {
        Self {
            id: EntityId(0),
            name: name.into(),
            kind,
            direction: Direction::default(),
            props,
            conditions: ConditionSet::default(),
            home: None,
            position: None,
            behavior: None,
            connection: None,
            timers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = Some(behavior);
        self
    }

    #[must_use]
    pub fn with_home(mut self, home: Position) -> Self {
        self.home = Some(home);
        self
    }

    #[must_use]
    pub fn position(&self) -> Option<Position> {
        self.position
    }

    #[must_use]
    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    #[must_use]
    pub fn behavior(&self) -> Option<&Behavior> {
        self.behavior.as_ref()
    }

    pub fn behavior_mut(&mut self) -> Option<&mut Behavior> {
        self.behavior.as_mut()
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.props.get(Property::Health) > 0
    }

    /// Health as a 0..=100 percentage, as shown to other players.
    #[must_use]
    pub fn health_percent(&self) -> u8 {
        let s = self.props.stat(Property::Health);
        if s.max == 0 {
            return 0;
        }
        let pct = u64::from(s.value) * 100 / u64::from(s.max);
        u8::try_from(pct).unwrap_or(100)
    }
}

/// Milliseconds between steps for a creature of the given speed.
#[must_use]
pub fn step_delay_ms(speed: u32) -> u64 {
    (100_000 / u64::from(speed.max(1))).clamp(50, 2_000)
}
