//! Per-kind creature behavior advanced once per tick.
//!
//! The dispatcher detaches a creature's behavior before calling `think`, so a
//! behavior holds `&mut self` and `&mut World` at once without aliasing the
//! creature it belongs to.

use std::collections::VecDeque;

use anyhow::Result;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{Property, step_delay_ms};
use crate::ids::EntityId;
use crate::position::Direction;
use crate::protocol::{Command, ServerMessage};
use crate::world::{MoveError, World};

/// Commands a player may have queued before new ones are dropped.
pub const MAX_QUEUED_COMMANDS: usize = 32;

pub trait Think {
    fn think(&mut self, me: EntityId, world: &mut World) -> Result<()>;
}

#[derive(Debug)]
pub enum Behavior {
    Player(PlayerBrain),
    Monster(MonsterBrain),
    Npc(NpcBrain),
}

impl Behavior {
    pub fn player_mut(&mut self) -> Option<&mut PlayerBrain> {
        match self {
            Self::Player(p) => Some(p),
            _ => None,
        }
    }
}

impl Think for Behavior {
    fn think(&mut self, me: EntityId, world: &mut World) -> Result<()> {
        match self {
            Self::Player(b) => b.think(me, world),
            Self::Monster(b) => b.think(me, world),
            Self::Npc(b) => b.think(me, world),
        }
    }
}

/// Blocked or edge-of-world steps are ordinary outcomes, not faults.
fn tolerate_blocked(r: Result<(), MoveError>) -> Result<()> {
    match r {
        Ok(()) | Err(MoveError::Blocked(_) | MoveError::OutOfBounds(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Drives a connected player from the commands its session sent.
#[derive(Debug, Default)]
pub struct PlayerBrain {
    queue: VecDeque<Command>,
    next_step_ms: u64,
}

impl PlayerBrain {
    /// Queue a command; `false` if the queue is full and it was dropped.
    pub fn push(&mut self, cmd: Command) -> bool {
        if self.queue.len() >= MAX_QUEUED_COMMANDS {
            return false;
        }
        self.queue.push_back(cmd);
        true
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

impl Think for PlayerBrain {
    fn think(&mut self, me: EntityId, world: &mut World) -> Result<()> {
        let now = world.now_ms();
        while let Some(cmd) = self.queue.pop_front() {
            match cmd {
                Command::Walk(dir) => {
                    if now < self.next_step_ms {
                        self.queue.push_front(Command::Walk(dir));
                        break;
                    }
                    let moved = world.step_creature(me, dir).map(|_| ());
                    if moved.is_ok() {
                        let speed = world
                            .creature(me)
                            .map_or(0, |c| c.props.get(Property::Speed));
                        self.next_step_ms = now + step_delay_ms(speed);
                    }
                    tolerate_blocked(moved)?;
                }
                Command::Turn(dir) => world.turn(me, dir)?,
                Command::Say(text) => world.say(me, &text)?,
                Command::Ping => world.send_to_entity(me, &ServerMessage::Pong),
                Command::Logout => {
                    world.logout(me);
                    self.queue.clear();
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Wanders around its home at a pace set by its speed.
#[derive(Debug)]
pub struct MonsterBrain {
    pub wander_radius: u16,
    next_move_ms: u64,
    rng: ChaCha8Rng,
}

impl MonsterBrain {
    #[must_use]
    pub fn new(seed: u64, wander_radius: u16) -> Self {
        Self {
            wander_radius,
            next_move_ms: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Think for MonsterBrain {
    fn think(&mut self, me: EntityId, world: &mut World) -> Result<()> {
        let now = world.now_ms();
        if now < self.next_move_ms {
            return Ok(());
        }
        let Some(c) = world.creature(me) else {
            return Ok(());
        };
        let Some(pos) = c.position() else {
            return Ok(());
        };
        let home = c.home.unwrap_or(pos);
        let delay = step_delay_ms(c.props.get(Property::Speed));
        self.next_move_ms = now + delay + self.rng.random_range(0..=delay);
        let dir = Direction::ALL[self.rng.random_range(0..Direction::ALL.len())];
        if let Some(to) = pos.step(dir)
            && to
                .distance_on_floor(home)
                .is_some_and(|d| d <= self.wander_radius)
        {
            tolerate_blocked(world.step_creature(me, dir).map(|_| ()))?;
        }
        Ok(())
    }
}

/// Pause after every `every_lines` lines for `duration_ms`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NpcPause {
    pub every_lines: u32,
    pub duration_ms: u64,
}

/// Cycles through dialogue lines; may go dormant between rounds.
#[derive(Debug)]
pub struct NpcBrain {
    lines: Vec<String>,
    interval_ms: u64,
    pause: Option<NpcPause>,
    next_line_ms: u64,
    cursor: usize,
    said: u32,
}

impl NpcBrain {
    #[must_use]
    pub fn new(lines: Vec<String>, interval_ms: u64) -> Self {
        Self {
            lines,
            interval_ms,
            pause: None,
            next_line_ms: 0,
            cursor: 0,
            said: 0,
        }
    }

    #[must_use]
    pub fn with_pause(mut self, pause: NpcPause) -> Self {
        self.pause = Some(pause);
        self
    }

    #[must_use]
    pub fn lines_said(&self) -> u32 {
        self.said
    }
}

impl Think for NpcBrain {
    fn think(&mut self, me: EntityId, world: &mut World) -> Result<()> {
        let now = world.now_ms();
        if self.lines.is_empty() || now < self.next_line_ms {
            return Ok(());
        }
        let line = &self.lines[self.cursor];
        world.say(me, line)?;
        self.cursor = (self.cursor + 1) % self.lines.len();
        self.said += 1;
        self.next_line_ms = now + self.interval_ms;
        if let Some(p) = self.pause
            && p.every_lines > 0
            && self.said % p.every_lines == 0
        {
            world.pause_entity(me, p.duration_ms);
        }
        Ok(())
    }
}
