//! Asynchronous unit scheduling.
//!
//! The embedding pipeline fires one unit of work per chunk and never waits
//! for them. [`UnitScheduler`] is the seam; [`TokioScheduler`] spawns the
//! unit on the runtime after the requested delay. At-least-once delivery is
//! acceptable because unit handling is idempotent per
//! `(document id, chunk index, generation)`.

use std::time::Duration;

use futures_util::future::BoxFuture;

/// Accepts a unit of work with an optional start delay.
pub trait UnitScheduler: Send + Sync {
    fn schedule(&self, delay: Duration, unit: BoxFuture<'static, ()>);
}

/// Fire-and-forget scheduling on the tokio runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioScheduler;

impl UnitScheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, unit: BoxFuture<'static, ()>) {
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            unit.await;
        });
    }
}
