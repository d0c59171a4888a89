//! World positions and facing directions.

use std::fmt;

use glam::UVec3;
use net_core::WireError;
use net_core::codec::{PacketReader, PacketWriter, WireDecode, WireEncode};

/// A tile address. `z` is the floor. Positions compare by equality only.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Position {
    pub x: u16,
    pub y: u16,
    pub z: u8,
}

impl Position {
    #[must_use]
    pub const fn new(x: u16, y: u16, z: u8) -> Self {
        Self { x, y, z }
    }

    #[inline]
    #[must_use]
    pub fn as_uvec3(self) -> UVec3 {
        UVec3::new(u32::from(self.x), u32::from(self.y), u32::from(self.z))
    }

    /// Inverse of `as_uvec3`; `None` if a component does not fit.
    #[must_use]
    pub fn from_uvec3(v: UVec3) -> Option<Self> {
        Some(Self {
            x: u16::try_from(v.x).ok()?,
            y: u16::try_from(v.y).ok()?,
            z: u8::try_from(v.z).ok()?,
        })
    }

    /// Neighbouring position one tile towards `dir` on the same floor.
    #[must_use]
    pub fn step(self, dir: Direction) -> Option<Self> {
        let (x, y) = match dir {
            Direction::North => (Some(self.x), self.y.checked_sub(1)),
            Direction::East => (self.x.checked_add(1), Some(self.y)),
            Direction::South => (Some(self.x), self.y.checked_add(1)),
            Direction::West => (self.x.checked_sub(1), Some(self.y)),
        };
        Some(Self { x: x?, y: y?, z: self.z })
    }

    /// Chebyshev distance on the same floor; `None` across floors.
    #[must_use]
    pub fn distance_on_floor(self, other: Self) -> Option<u16> {
        (self.z == other.z).then(|| self.x.abs_diff(other.x).max(self.y.abs_diff(other.y)))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

impl WireEncode for Position {
    fn encode(&self, w: &mut PacketWriter) {
        w.put_pos(self.x, self.y, self.z);
    }
}

impl WireDecode for Position {
    fn decode(r: &mut PacketReader<'_>) -> Result<Self, WireError> {
        let (x, y, z) = r.get_pos()?;
        Ok(Self { x, y, z })
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Direction {
    North,
    East,
    #[default]
    South,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Self::North, Self::East, Self::South, Self::West];

    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::North => 0,
            Self::East => 1,
            Self::South => 2,
            Self::West => 3,
        }
    }

    pub fn from_u8(v: u8) -> Result<Self, WireError> {
        match v {
            0 => Ok(Self::North),
            1 => Ok(Self::East),
            2 => Ok(Self::South),
            3 => Ok(Self::West),
            other => Err(WireError::InvalidValue {
                field: "direction",
                value: u32::from(other),
            }),
        }
    }
}

impl WireEncode for Direction {
    fn encode(&self, w: &mut PacketWriter) {
        w.put_u8(self.as_u8());
    }
}

impl WireDecode for Direction {
    fn decode(r: &mut PacketReader<'_>) -> Result<Self, WireError> {
        Self::from_u8(r.get_u8()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_stays_on_floor_and_checks_edges() {
        let p = Position::new(0, 0, 7);
        assert_eq!(p.step(Direction::North), None);
        assert_eq!(p.step(Direction::West), None);
        assert_eq!(p.step(Direction::East), Some(Position::new(1, 0, 7)));
        assert_eq!(p.step(Direction::South), Some(Position::new(0, 1, 7)));
        let far = Position::new(u16::MAX, 3, 0);
        assert_eq!(far.step(Direction::East), None);
    }

    #[test]
    fn distance_is_chebyshev_on_same_floor() {
        let a = Position::new(10, 10, 7);
        assert_eq!(a.distance_on_floor(Position::new(13, 8, 7)), Some(3));
        assert_eq!(a.distance_on_floor(Position::new(10, 10, 6)), None);
    }

    #[test]
    fn position_is_five_bytes_on_the_wire() {
        let mut w = PacketWriter::new();
        w.put(&Position::new(0x0102, 0x0304, 5));
        assert_eq!(w.as_bytes(), &[2, 1, 4, 3, 5]);
        let mut r = PacketReader::new(w.as_bytes());
        assert_eq!(r.get::<Position>().expect("pos"), Position::new(0x0102, 0x0304, 5));
    }

    #[test]
    fn direction_rejects_out_of_range() {
        assert!(Direction::from_u8(4).is_err());
        for d in Direction::ALL {
            assert_eq!(Direction::from_u8(d.as_u8()).expect("dir"), d);
        }
    }
}
