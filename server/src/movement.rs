//! Straight-line movement shared by monsters and companions.
//!
//! A move is a chain of delayed continuations. Each chain captures the
//! owner's movement token when it starts; starting another move mints a new
//! token, and every continuation of the old chain then sees the mismatch and
//! returns without touching anything. That comparison is the only way a move
//! is ever stopped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{trace, warn};
use rand::Rng;

use aisim_shared::{EntityRef, Rect, ServerMessage, Vec2};

use crate::services::{Broadcaster, CastScope};
use crate::task::spawn_guarded;

/// Distance under which a mover is considered to have arrived
pub const ARRIVAL_DISTANCE: f32 = 1.0;

/// Movement generation bookkeeping of one entity
#[derive(Debug, Default)]
pub struct MovementState {
    /// Token of the live chain, 0 when none
    token: AtomicU64,
    /// Last minted token; tokens only ever grow so a new one never equals
    /// the current one
    generation: AtomicU64,
    moving: AtomicBool,
}

impl MovementState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> u64 {
        self.token.load(Ordering::Acquire)
    }

    pub fn is_moving(&self) -> bool {
        self.moving.load(Ordering::Acquire)
    }

    pub fn is_current(&self, token: u64) -> bool {
        token != 0 && self.token() == token
    }

    fn mint(&self) -> u64 {
        let token = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.token.store(token, Ordering::Release);
        token
    }

    /// Invalidate any live chain and mark a new one as running
    pub fn begin(&self) -> u64 {
        let token = self.mint();
        self.moving.store(true, Ordering::Release);
        token
    }

    /// Invalidate any live chain without starting another
    pub fn cancel(&self) {
        self.mint();
        self.moving.store(false, Ordering::Release);
    }

    /// Mark the chain holding `token` as arrived. No-op for stale tokens.
    pub fn finish(&self, token: u64) -> bool {
        if self.token.compare_exchange(token, 0, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            self.moving.store(false, Ordering::Release);
            true
        } else {
            false
        }
    }
}

/// Anything the interpolator can move
pub trait Movable: Send + Sync + 'static {
    fn movement(&self) -> &MovementState;
    fn position(&self) -> Vec2;
    fn set_position(&self, position: Vec2);
    fn entity_ref(&self) -> EntityRef;
    fn cast_scope(&self) -> CastScope;
}

/// Next action of a movement chain
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// Snap to this position and stop
    Arrived(Vec2),
    /// Broadcast, wait `delay`, then stand at `next`
    Advance { next: Vec2, delay: Duration },
}

/// Plan one step from `from` towards `to`
pub fn plan_step(from: Vec2, to: Vec2, speed: f32, step: Duration) -> Step {
    let distance = from.distance_to(to);
    if distance < ARRIVAL_DISTANCE {
        return Step::Arrived(to);
    }
    if !(speed > 0.0) {
        return Step::Arrived(from);
    }

    let reach = speed * step.as_secs_f32();
    if distance <= reach {
        Step::Advance { next: to, delay: Duration::from_secs_f32(distance / speed) }
    } else {
        Step::Advance { next: from.lerp(to, reach / distance), delay: step }
    }
}

/// Uniform point inside `bounds`
pub fn random_point_in<R: Rng + ?Sized>(rng: &mut R, bounds: Rect) -> Vec2 {
    let x = if bounds.max.x > bounds.min.x { rng.gen_range(bounds.min.x..=bounds.max.x) } else { bounds.min.x };
    let z = if bounds.max.z > bounds.min.z { rng.gen_range(bounds.min.z..=bounds.max.z) } else { bounds.min.z };
    Vec2::new(x, z)
}

#[derive(Clone)]
pub struct MovementInterpolator {
    broadcaster: Arc<dyn Broadcaster>,
    step: Duration,
}

impl MovementInterpolator {
    pub fn new(broadcaster: Arc<dyn Broadcaster>, step: Duration) -> Self {
        Self { broadcaster, step }
    }

    /// Start moving `mover` to `destination`, superseding any move in flight.
    /// Returns the token of the new chain.
    pub fn start<M: Movable>(&self, mover: Arc<M>, destination: Vec2, speed: f32) -> u64 {
        if !(speed > 0.0) {
            warn!("{:?} asked to move at speed {}", mover.entity_ref(), speed);
        }
        let token = mover.movement().begin();
        let this = self.clone();
        let label = format!("movement of {:?}", mover.entity_ref());
        spawn_guarded(label, async move {
            this.run(mover, destination, speed, token).await;
        });
        token
    }

    async fn run<M: Movable>(&self, mover: Arc<M>, destination: Vec2, speed: f32, token: u64) {
        let mut from = mover.position();
        loop {
            if !mover.movement().is_current(token) {
                trace!("{:?}: movement {} superseded", mover.entity_ref(), token);
                return;
            }

            match plan_step(from, destination, speed, self.step) {
                Step::Arrived(position) => {
                    mover.set_position(position);
                    mover.movement().finish(token);
                    return;
                }
                Step::Advance { next, delay } => {
                    self.broadcaster.cast(mover.cast_scope(), ServerMessage::Move {
                        entity: mover.entity_ref(),
                        from,
                        to: destination,
                        speed,
                    });

                    tokio::time::sleep(delay).await;

                    if !mover.movement().is_current(token) {
                        trace!("{:?}: movement {} superseded mid-step", mover.entity_ref(), token);
                        return;
                    }
                    trace!("{:?} stepped to ({:.1}, {:.1})", mover.entity_ref(), next.x, next.z);
                    mover.set_position(next);
                    from = next;
                }
            }
        }
    }
}
