//! Client-side double-spend guard.
//!
//! Tracks which boxes are committed to an in-flight transaction so two
//! concurrent operations in this process never select the same input.  The
//! network's own double-spend rejection stays the authoritative backstop;
//! this only avoids sending transactions that are bound to lose the race.
//!
//! * [`ReservationGuard::reserve`] is a single check-and-set under one lock.
//! * [`Reservation`] releases its boxes on drop unless handed over to
//!   [`ReservationGuard::await_and_release`], which releases them when the
//!   watcher resolves, fails, times out or the guard shuts down.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use escrow_protocol::BoxId;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{Result, ServiceError};

/// Resolves once a submitted transaction is confirmed.
#[async_trait]
pub trait ConfirmationWatcher: Send + Sync {
    async fn wait_for_confirmation(&self, tx_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Confirmed,
    Failed(String),
    TimedOut,
    Cancelled,
    /// No watcher configured; the boxes were released right away.
    Unwatched,
}

struct Watch {
    watcher: Arc<dyn ConfirmationWatcher>,
    timeout: Duration,
}

#[derive(Clone)]
pub struct ReservationGuard {
    reserved: Arc<Mutex<HashSet<BoxId>>>,
    watch: Option<Arc<Watch>>,
    shutdown: CancellationToken,
}

impl Default for ReservationGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ReservationGuard {
    pub fn new() -> Self {
        Self {
            reserved: Arc::new(Mutex::new(HashSet::new())),
            watch: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_watcher(watcher: Arc<dyn ConfirmationWatcher>, timeout: Duration) -> Self {
        Self {
            watch: Some(Arc::new(Watch { watcher, timeout })),
            ..Self::new()
        }
    }

    /// Reserve all of `inputs`, or none of them if any is already taken.
    pub fn reserve(&self, inputs: &[BoxId]) -> bool {
        let mut reserved = self.reserved.lock();
        if inputs.iter().any(|id| reserved.contains(id)) {
            return false;
        }
        reserved.extend(inputs.iter().copied());
        true
    }

    pub fn release(&self, inputs: &[BoxId]) {
        let mut reserved = self.reserved.lock();
        for id in inputs {
            reserved.remove(id);
        }
    }

    pub fn is_reserved(&self, id: &BoxId) -> bool {
        self.reserved.lock().contains(id)
    }

    pub fn reserved_count(&self) -> usize {
        self.reserved.lock().len()
    }

    /// Reserve `inputs` and hold them in a drop guard.
    pub fn lease(&self, inputs: Vec<BoxId>) -> Result<Reservation> {
        if !self.reserve(&inputs) {
            let taken = inputs
                .iter()
                .find(|id| self.is_reserved(id))
                .map(|id| id.to_string())
                .unwrap_or_default();
            return Err(ServiceError::BoxReserved(taken));
        }
        debug!("reserved {} boxes", inputs.len());
        Ok(Reservation {
            guard: self.clone(),
            inputs,
        })
    }

    /// Wait for `tx_id` through the configured watcher, then release
    /// `inputs` whatever the outcome.
    pub async fn await_and_release(&self, tx_id: &str, inputs: Vec<BoxId>) -> ConfirmationOutcome {
        let _release = Reservation {
            guard: self.clone(),
            inputs,
        };
        let Some(watch) = self.watch.clone() else {
            return ConfirmationOutcome::Unwatched;
        };

        let outcome = tokio::select! {
            _ = self.shutdown.cancelled() => ConfirmationOutcome::Cancelled,
            waited = tokio::time::timeout(watch.timeout, watch.watcher.wait_for_confirmation(tx_id)) => {
                match waited {
                    Ok(Ok(())) => ConfirmationOutcome::Confirmed,
                    Ok(Err(e)) => ConfirmationOutcome::Failed(e.to_string()),
                    Err(_) => ConfirmationOutcome::TimedOut,
                }
            }
        };
        match &outcome {
            ConfirmationOutcome::Confirmed => info!("transaction {tx_id} confirmed"),
            ConfirmationOutcome::TimedOut => {
                warn!("transaction {tx_id} unconfirmed after {:?}; releasing inputs", watch.timeout)
            }
            other => warn!("transaction {tx_id}: {other:?}; releasing inputs"),
        }
        outcome
    }

    /// Hand a reservation to a background task that releases it on
    /// confirmation.
    pub fn spawn_release(&self, tx_id: String, reservation: Reservation) {
        let guard = self.clone();
        let inputs = reservation.into_inner();
        tokio::spawn(async move {
            guard.await_and_release(&tx_id, inputs).await;
        });
    }

    /// Abort every pending wait; their reservations are released.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Boxes held by one operation; released on drop.
pub struct Reservation {
    guard: ReservationGuard,
    inputs: Vec<BoxId>,
}

impl Reservation {
    pub fn inputs(&self) -> &[BoxId] {
        &self.inputs
    }

    /// Take the ids out without releasing them.
    fn into_inner(mut self) -> Vec<BoxId> {
        std::mem::take(&mut self.inputs)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.inputs.is_empty() {
            self.guard.release(&self.inputs);
        }
    }
}
