//! Fixed-order step orchestration:
//! accept -> ingest -> advance clock -> drain events -> dispatch -> flush -> reap.

use std::time::Instant;

use anyhow::Context;

use crate::broadcast::FlushReport;
use crate::connection::CloseReason;
use crate::entity::{Behavior, Think};
use crate::events::DrainReport;
use crate::fault;
use crate::ids::{ConnectionId, EntityId};
use crate::protocol::{Command, ServerMessage};
use crate::world::World;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Behaviors invoked this tick.
    pub invoked: usize,
    /// Snapshot members removed before their turn.
    pub skipped: usize,
    /// Thinks that returned an error or panicked.
    pub failed: usize,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub frames: usize,
    pub commands: usize,
    /// Commands dropped (no creature, or its queue was full).
    pub dropped: usize,
    /// Connections that used their whole frame budget this step.
    pub throttled: usize,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StepReport {
    pub tick: u64,
    pub now_ms: u64,
    pub accepted: usize,
    pub ingest: IngestReport,
    pub events: DrainReport,
    pub dispatch: DispatchReport,
    pub flush: FlushReport,
    pub closed: usize,
}

fn phase_ms(t: Instant, phase: &'static str) -> Instant {
    let now = Instant::now();
    metrics::histogram!("step.phase_ms", "phase" => phase)
        .record(now.duration_since(t).as_secs_f64() * 1000.0);
    now
}

impl World {
    /// Run one simulation step.
    pub fn step(&mut self) -> StepReport {
        let t0 = Instant::now();
        let accepted = self.connections.accept_incoming().len();
        let ingest = self.ingest();
        let t = phase_ms(t0, "ingest");
        let tick = self.clock.advance();
        let events = self.drain_events();
        let t = phase_ms(t, "events");
        let dispatch = self.dispatch_tick();
        let t = phase_ms(t, "dispatch");
        let flush = self.flush_all();
        let closed = self.reap_closed();
        phase_ms(t, "flush");

        let ms = t0.elapsed().as_secs_f64() * 1000.0;
        metrics::histogram!("tick.ms").record(ms);
        let every = self.cfg.stats_every_ticks;
        if every > 0 && tick % every == 0 {
            let s = self.stats();
            log::info!(
                "tick {}: {} entities ({} active), {} connections, {} events pending ({} heap), step {ms:.2} ms",
                s.tick,
                s.entities,
                s.active,
                s.connections,
                s.events_pending,
                s.events_heap
            );
        }
        StepReport {
            tick,
            now_ms: self.clock.now_ms(),
            accepted,
            ingest,
            events,
            dispatch,
            flush,
            closed,
        }
    }

    /// Read each connection's inbound frames, at most `max_frames_per_step`
    /// apiece, and route the parsed commands. The first bad frame closes its
    /// session; later frames are ignored.
    pub fn ingest(&mut self) -> IngestReport {
        let mut report = IngestReport::default();
        let budget = self.cfg.net.max_frames_per_step.max(1);
        for conn in self.connections.ids() {
            let Some(c) = self.connections.get_mut(conn) else {
                continue;
            };
            if c.is_closing() {
                continue;
            }
            let frames = c.read_frames(budget);
            if frames.len() == budget {
                report.throttled += 1;
            }
            report.frames += frames.len();
            for frame in &frames {
                match self.parsers.parse(frame) {
                    Ok(cmd) => {
                        report.commands += 1;
                        if !self.route_command(conn, cmd) {
                            report.dropped += 1;
                        }
                    }
                    Err(e) => {
                        log::warn!("conn {conn}: bad frame 0x{:02x}: {e}", frame.opcode);
                        if let Some(c) = self.connections.get_mut(conn) {
                            c.close(CloseReason::Protocol(e.to_string()));
                        }
                        break;
                    }
                }
            }
        }
        metrics::counter!("net.frames_in_total").increment(report.frames as u64);
        report
    }

    /// Hand a command to the connection's player. Entity-less connections
    /// only get answers to ping and logout. Returns `false` if dropped.
    fn route_command(&mut self, conn: ConnectionId, cmd: Command) -> bool {
        let entity = self.connections.get(conn).and_then(|c| c.entity);
        let Some(id) = entity else {
            match cmd {
                Command::Ping => self.send_to(conn, &ServerMessage::Pong),
                Command::Logout => {
                    if let Some(c) = self.connections.get_mut(conn) {
                        c.close(CloseReason::Logout);
                    }
                }
                other => {
                    log::debug!("conn {conn}: {other:?} before login; dropped");
                    return false;
                }
            }
            return true;
        };
        let brain = self
            .registry
            .get_mut(id)
            .and_then(|c| c.behavior.as_mut())
            .and_then(|b| b.player_mut());
        let Some(b) = brain else {
            return false;
        };
        if b.push(cmd) {
            true
        } else {
            log::debug!("conn {conn}: command queue full for {id}");
            false
        }
    }

    /// Fire every event due by now, bounded by `max_events_per_drain`.
    /// Callbacks may schedule more work; anything due now fires in the same
    /// drain.
    pub fn drain_events(&mut self) -> DrainReport {
        let now = self.clock.now_ms();
        self.events.set_now(now);
        let cap = self.cfg.events.max_events_per_drain;
        let mut report = DrainReport::default();
        while report.fired < cap {
            let Some(ev) = self.events.pop_due(now) else {
                break;
            };
            report.fired += 1;
            if !ev.fire_isolated(self) {
                report.failed += 1;
            }
        }
        if report.fired >= cap && self.events.next_due().is_some_and(|at| at <= now) {
            report.capped = true;
            log::warn!("events: drain cap {cap} hit at {now} ms; remainder deferred");
            metrics::counter!("events.drain_capped_total").increment(1);
        }
        metrics::counter!("events.fired_total").increment(report.fired as u64);
        report
    }

    /// Advance every creature that was active when the tick began, once.
    ///
    /// Creatures registered during the tick wait for the next one. Creatures
    /// removed before their turn are skipped; one removed during its own
    /// think finishes that think, and keeps its behavior if it respawns.
    pub fn dispatch_tick(&mut self) -> DispatchReport {
        let snapshot = self.registry.active_snapshot();
        self.dispatch_ids(&snapshot)
    }

    pub(crate) fn dispatch_ids(&mut self, snapshot: &[EntityId]) -> DispatchReport {
        let mut report = DispatchReport::default();
        for &id in snapshot {
            let Some(c) = self.registry.get_mut(id) else {
                report.skipped += 1;
                continue;
            };
            let Some(mut behavior) = c.behavior.take() else {
                continue;
            };
            report.invoked += 1;
            let ok = fault::isolate("think", || {
                behavior
                    .think(id, self)
                    .with_context(|| format!("think {id}"))
            })
            .is_some();
            if !ok {
                report.failed += 1;
            }
            self.reattach_behavior(id, behavior);
        }
        report
    }

    /// Give a detached behavior back to its creature, or to the pending
    /// respawn if the creature died while it was detached.
    fn reattach_behavior(&mut self, id: EntityId, behavior: Behavior) {
        if let Some(c) = self.registry.get_mut(id) {
            c.behavior = Some(behavior);
        } else if let Some(dead) = self.respawning.get_mut(&id) {
            dead.behavior.get_or_insert(behavior);
        }
    }

    /// Remove connections marked closing, despawning their creatures.
    pub fn reap_closed(&mut self) -> usize {
        let closing: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|c| c.is_closing())
            .map(|c| c.id)
            .collect();
        for conn in &closing {
            if let Some(id) = self.connections.get(*conn).and_then(|c| c.entity) {
                self.remove_creature(id);
            }
            self.detach_spectator(*conn);
            if let Some(c) = self.connections.remove(*conn) {
                c.transport().close();
                let reason = c.close_reason().map_or("unknown", |r| r.label());
                log::info!(
                    "conn {conn}: closed ({})",
                    c.close_reason().map_or_else(|| "unknown".to_string(), ToString::to_string)
                );
                metrics::counter!("net.sessions_closed_total", "reason" => reason).increment(1);
            }
        }
        closing.len()
    }

    /// Close every connection (server shutdown) and flush what they have.
    pub fn disconnect_all(&mut self) {
        for c in self.connections.iter_mut() {
            c.close(CloseReason::Shutdown);
        }
        self.flush_all();
        self.reap_closed();
    }
}
