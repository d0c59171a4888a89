//! `server_core`: authoritative tick-driven world simulation.
//!
//! Each step runs in a fixed order on the scheduler thread:
//! accept connections -> ingest commands -> advance clock -> drain due events
//! -> dispatch active creatures -> flush one batch per connection -> reap
//! closed sessions.
//!
//! The world is an arena: creatures live in the registry, chunks in the
//! lattice, sessions in the connection table, and everything refers to
//! everything else by id.
#![forbid(unsafe_code)]

pub mod broadcast;
pub mod conditions;
pub mod connection;
pub mod diagnostics;
pub mod effects;
pub mod entity;
pub mod events;
pub mod fault;
pub mod ids;
pub mod position;
pub mod protocol;
pub mod scheduler;
pub mod spatial;
pub mod telemetry;
pub mod tick;
pub mod world;

pub use ids::{ConnectionId, EntityId};
pub use position::{Direction, Position};
pub use world::{MoveError, World};
