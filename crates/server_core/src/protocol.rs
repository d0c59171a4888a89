//! Game messages on top of the `net_core` envelope.
//!
//! Outbound: [`ServerMessage`], one variant per state-change the simulation
//! reports. Inbound: [`Command`], parsed through the opcode-keyed
//! [`CommandParsers`] table.
//!
//! Wire layout
//! - Every message is a frame: `[opcode u8][len u16 LE][payload]`, integers
//!   little-endian, text as `[len u16 LE][utf-8]`.
//! - Client to server: frames back to back on the stream, no extra framing.
//! - Server to client: each step's frames for one connection go out as a
//!   single batch `[flags u8][body]`. The flags byte is always present; bit 0
//!   set means `body` is LZ4 with its decompressed size prepended, otherwise
//!   `body` is the frames as-is (see `net_core::batch`).
//! - Over TCP each batch is preceded by its byte length as u32 LE.

use std::collections::HashMap;

use net_core::WireError;
use net_core::codec::{PacketReader, PacketWriter};
use net_core::frame::{self, Frame, OwnedFrame};

use crate::entity::{CreatureKind, Property};
use crate::ids::EntityId;
use crate::position::{Direction, Position};
use crate::spatial::Item;

pub mod opcodes {
    // Client -> server
    pub const LOGOUT: u8 = 0x14;
    pub const PING: u8 = 0x1e;
    pub const WALK: u8 = 0x64;
    pub const TURN: u8 = 0x6f;
    pub const SAY: u8 = 0x96;

    // Server -> client
    pub const LOGIN_ACK: u8 = 0x0a;
    pub const PONG: u8 = 0x1e;
    pub const TILE_UPDATE: u8 = 0x69;
    pub const CREATURE_APPEAR: u8 = 0x6a;
    pub const CREATURE_TURN: u8 = 0x6b;
    pub const CREATURE_DISAPPEAR: u8 = 0x6c;
    pub const CREATURE_MOVE: u8 = 0x6d;
    pub const PROPERTY_UPDATE: u8 = 0x8c;
    pub const CONDITION_ICONS: u8 = 0xa2;
    pub const CREATURE_SAY: u8 = 0xaa;
}

/// Longest chat line accepted from a client, in bytes.
pub const MAX_SAY_LEN: usize = 255;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerMessage {
    LoginAck {
        id: EntityId,
        pos: Position,
        tick_ms: u16,
    },
    Pong,
    CreatureAppear {
        id: EntityId,
        kind: CreatureKind,
        name: String,
        pos: Position,
        dir: Direction,
        health_pct: u8,
    },
    CreatureDisappear {
        id: EntityId,
    },
    CreatureMove {
        id: EntityId,
        from: Position,
        to: Position,
        dir: Direction,
    },
    CreatureTurn {
        id: EntityId,
        dir: Direction,
    },
    CreatureSay {
        id: EntityId,
        name: String,
        text: String,
    },
    PropertyUpdate {
        id: EntityId,
        property: Property,
        value: u32,
        max: u32,
    },
    ConditionIcons {
        id: EntityId,
        icons: u32,
    },
    TileUpdate {
        pos: Position,
        items: Vec<Item>,
    },
}

impl ServerMessage {
    #[must_use]
    pub fn opcode(&self) -> u8 {
        use opcodes as op;
        match self {
            Self::LoginAck { .. } => op::LOGIN_ACK,
            Self::Pong => op::PONG,
            Self::CreatureAppear { .. } => op::CREATURE_APPEAR,
            Self::CreatureDisappear { .. } => op::CREATURE_DISAPPEAR,
            Self::CreatureMove { .. } => op::CREATURE_MOVE,
            Self::CreatureTurn { .. } => op::CREATURE_TURN,
            Self::CreatureSay { .. } => op::CREATURE_SAY,
            Self::PropertyUpdate { .. } => op::PROPERTY_UPDATE,
            Self::ConditionIcons { .. } => op::CONDITION_ICONS,
            Self::TileUpdate { .. } => op::TILE_UPDATE,
        }
    }

    /// Payload bytes (without the envelope).
    pub fn encode(&self, w: &mut PacketWriter) {
        match self {
            Self::LoginAck { id, pos, tick_ms } => {
                w.put_u32(id.0).put(pos).put_u16(*tick_ms);
            }
            Self::Pong => {}
            Self::CreatureAppear {
                id,
                kind,
                name,
                pos,
                dir,
                health_pct,
            } => {
                w.put_u32(id.0)
                    .put_u8(kind.as_u8())
                    .put_str(name)
                    .put(pos)
                    .put(dir)
                    .put_u8(*health_pct);
            }
            Self::CreatureDisappear { id } => {
                w.put_u32(id.0);
            }
            Self::CreatureMove { id, from, to, dir } => {
                w.put_u32(id.0).put(from).put(to).put(dir);
            }
            Self::CreatureTurn { id, dir } => {
                w.put_u32(id.0).put(dir);
            }
            Self::CreatureSay { id, name, text } => {
                w.put_u32(id.0).put_str(name).put_str(text);
            }
            Self::PropertyUpdate {
                id,
                property,
                value,
                max,
            } => {
                w.put_u32(id.0)
                    .put_u8(property.as_u8())
                    .put_u32(*value)
                    .put_u32(*max);
            }
            Self::ConditionIcons { id, icons } => {
                w.put_u32(id.0).put_u32(*icons);
            }
            Self::TileUpdate { pos, items } => {
                w.put(pos);
                // A tile never stacks anywhere near u16::MAX items.
                #[allow(clippy::cast_possible_truncation)]
                w.put_u16(items.len().min(usize::from(u16::MAX)) as u16);
                for item in items.iter().take(usize::from(u16::MAX)) {
                    w.put(item);
                }
            }
        }
    }

    /// Append this message as one framed envelope.
    pub fn write_frame(&self, out: &mut Vec<u8>) -> Result<(), WireError> {
        let mut w = PacketWriter::new();
        self.encode(&mut w);
        frame::write_msg(out, self.opcode(), w.as_bytes())
    }

    /// Client-side decode; the server only ever encodes these.
    pub fn decode(frame: Frame<'_>) -> Result<Self, WireError> {
        use opcodes as op;
        let mut r = PacketReader::new(frame.payload);
        let id = |r: &mut PacketReader<'_>| r.get_u32().map(EntityId);
        let msg = match frame.opcode {
            op::LOGIN_ACK => Self::LoginAck {
                id: id(&mut r)?,
                pos: r.get()?,
                tick_ms: r.get_u16()?,
            },
            op::PONG => Self::Pong,
            op::CREATURE_APPEAR => Self::CreatureAppear {
                id: id(&mut r)?,
                kind: CreatureKind::from_u8(r.get_u8()?)?,
                name: r.get_str()?.to_string(),
                pos: r.get()?,
                dir: r.get()?,
                health_pct: r.get_u8()?,
            },
            op::CREATURE_DISAPPEAR => Self::CreatureDisappear { id: id(&mut r)? },
            op::CREATURE_MOVE => Self::CreatureMove {
                id: id(&mut r)?,
                from: r.get()?,
                to: r.get()?,
                dir: r.get()?,
            },
            op::CREATURE_TURN => Self::CreatureTurn {
                id: id(&mut r)?,
                dir: r.get()?,
            },
            op::CREATURE_SAY => Self::CreatureSay {
                id: id(&mut r)?,
                name: r.get_str()?.to_string(),
                text: r.get_str()?.to_string(),
            },
            op::PROPERTY_UPDATE => Self::PropertyUpdate {
                id: id(&mut r)?,
                property: Property::from_u8(r.get_u8()?)?,
                value: r.get_u32()?,
                max: r.get_u32()?,
            },
            op::CONDITION_ICONS => Self::ConditionIcons {
                id: id(&mut r)?,
                icons: r.get_u32()?,
            },
            op::TILE_UPDATE => {
                let pos = r.get()?;
                let n = r.get_u16()?;
                let items = (0..n).map(|_| r.get::<Item>()).collect::<Result<_, _>>()?;
                Self::TileUpdate { pos, items }
            }
            other => return Err(WireError::UnknownOpcode(other)),
        };
        r.finish()?;
        Ok(msg)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Ping,
    Logout,
    Walk(Direction),
    Turn(Direction),
    Say(String),
}

impl Command {
    #[must_use]
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Ping => opcodes::PING,
            Self::Logout => opcodes::LOGOUT,
            Self::Walk(_) => opcodes::WALK,
            Self::Turn(_) => opcodes::TURN,
            Self::Say(_) => opcodes::SAY,
        }
    }

    /// Client-side encode, used by tools and tests.
    pub fn write_frame(&self, out: &mut Vec<u8>) -> Result<(), WireError> {
        let mut w = PacketWriter::new();
        match self {
            Self::Ping | Self::Logout => {}
            Self::Walk(d) | Self::Turn(d) => {
                w.put(d);
            }
            Self::Say(text) => {
                w.put_str(text);
            }
        }
        frame::write_msg(out, self.opcode(), w.as_bytes())
    }
}

pub type ParseFn = fn(&mut PacketReader<'_>) -> Result<Command, WireError>;

/// Opcode -> parser table for inbound frames.
#[derive(Clone, Debug, Default)]
pub struct CommandParsers {
    table: HashMap<u8, ParseFn>,
}

impl CommandParsers {
    /// Empty table; see [`CommandParsers::with_defaults`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        let mut p = Self::new();
        p.register(opcodes::PING, |_| Ok(Command::Ping));
        p.register(opcodes::LOGOUT, |_| Ok(Command::Logout));
        p.register(opcodes::WALK, |r| Ok(Command::Walk(r.get()?)));
        p.register(opcodes::TURN, |r| Ok(Command::Turn(r.get()?)));
        p.register(opcodes::SAY, |r| {
            let text = r.get_str()?;
            if text.len() > MAX_SAY_LEN {
                return Err(WireError::InvalidValue {
                    field: "say length",
                    value: u32::try_from(text.len()).unwrap_or(u32::MAX),
                });
            }
            Ok(Command::Say(text.to_string()))
        });
        p
    }

    /// Install or replace the parser for `opcode`.
    pub fn register(&mut self, opcode: u8, parse: ParseFn) -> Option<ParseFn> {
        self.table.insert(opcode, parse)
    }

    /// Parse one frame; the payload must be consumed exactly.
    pub fn parse(&self, frame: &OwnedFrame) -> Result<Command, WireError> {
        let parse = self
            .table
            .get(&frame.opcode)
            .ok_or(WireError::UnknownOpcode(frame.opcode))?;
        let mut r = PacketReader::new(&frame.payload);
        let cmd = parse(&mut r)?;
        r.finish()?;
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(bytes: &[u8]) -> OwnedFrame {
        let (f, used) = frame::read_msg(bytes).expect("read").expect("complete");
        assert_eq!(used, bytes.len());
        OwnedFrame {
            opcode: f.opcode,
            payload: f.payload.to_vec(),
        }
    }

    #[test]
    fn default_parsers_cover_every_command() {
        let p = CommandParsers::with_defaults();
        for cmd in [
            Command::Ping,
            Command::Logout,
            Command::Walk(Direction::East),
            Command::Turn(Direction::North),
            Command::Say("hello".to_string()),
        ] {
            let mut buf = Vec::new();
            cmd.write_frame(&mut buf).expect("encode");
            assert_eq!(p.parse(&owned(&buf)).expect("parse"), cmd);
        }
    }

    #[test]
    fn unknown_opcode_and_trailing_bytes_are_rejected() {
        let p = CommandParsers::with_defaults();
        let mut buf = Vec::new();
        frame::write_msg(&mut buf, 0xff, &[]).expect("frame");
        assert!(matches!(
            p.parse(&owned(&buf)),
            Err(WireError::UnknownOpcode(0xff))
        ));
        let mut buf = Vec::new();
        frame::write_msg(&mut buf, opcodes::PING, &[1]).expect("frame");
        assert!(matches!(
            p.parse(&owned(&buf)),
            Err(WireError::TrailingBytes(1))
        ));
        let mut buf = Vec::new();
        frame::write_msg(&mut buf, opcodes::WALK, &[7]).expect("frame");
        assert!(p.parse(&owned(&buf)).is_err());
    }

    #[test]
    fn overlong_say_is_rejected() {
        let p = CommandParsers::with_defaults();
        let mut buf = Vec::new();
        Command::Say("x".repeat(MAX_SAY_LEN + 1))
            .write_frame(&mut buf)
            .expect("encode");
        assert!(p.parse(&owned(&buf)).is_err());
    }

    #[test]
    fn registered_parser_overrides_default() {
        let mut p = CommandParsers::with_defaults();
        assert!(p.register(opcodes::PING, |_| Ok(Command::Logout)).is_some());
        let mut buf = Vec::new();
        Command::Ping.write_frame(&mut buf).expect("encode");
        assert_eq!(p.parse(&owned(&buf)).expect("parse"), Command::Logout);
    }

    #[test]
    fn move_message_layout() {
        let msg = ServerMessage::CreatureMove {
            id: EntityId(7),
            from: Position::new(1, 2, 7),
            to: Position::new(2, 2, 7),
            dir: Direction::East,
        };
        let mut buf = Vec::new();
        msg.write_frame(&mut buf).expect("encode");
        assert_eq!(buf[0], opcodes::CREATURE_MOVE);
        assert_eq!(u16::from_le_bytes([buf[1], buf[2]]), 4 + 5 + 5 + 1);
        let (f, _) = frame::read_msg(&buf).expect("read").expect("complete");
        assert_eq!(ServerMessage::decode(f).expect("decode"), msg);
    }
}
