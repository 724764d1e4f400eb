//! Single-slot delivery guard.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::trace;

/// Ensures at most one delivery is in flight.
///
/// The gate only goes busy through [`DeliveryGate::try_acquire`] and only
/// goes idle when the returned [`GatePermit`] is released or dropped. There
/// is no timeout: a delivery that never completes keeps the gate busy and
/// every later flush is skipped.
#[derive(Debug, Default)]
pub struct DeliveryGate {
    busy: AtomicBool,
}

impl DeliveryGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the slot. `None` means a delivery is already running.
    pub fn try_acquire(self: &Arc<Self>) -> Option<GatePermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| {
                trace!("Delivery gate acquired");
                GatePermit {
                    gate: Arc::clone(self),
                }
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof of holding the delivery slot.
///
/// The slot is released exactly once, when the permit is released or
/// dropped, whichever path the delivery task leaves by.
#[derive(Debug)]
#[must_use = "dropping the permit releases the gate immediately"]
pub struct GatePermit {
    gate: Arc<DeliveryGate>,
}

impl GatePermit {
    pub fn release(self) {}
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
        trace!("Delivery gate released");
    }
}
