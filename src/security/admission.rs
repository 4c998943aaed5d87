//! Admission control (load shedding).
//!
//! The in-flight count is bumped with a compare-exchange loop so it can never
//! pass the ceiling, and released by an RAII guard on every exit path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Concurrency ceiling for in-flight requests.
#[derive(Debug)]
pub struct AdmissionControl {
    in_flight: AtomicUsize,
    max_concurrent: usize,
}

impl AdmissionControl {
    pub fn new(max_concurrent: usize) -> Arc<Self> {
        Arc::new(Self {
            in_flight: AtomicUsize::new(0),
            max_concurrent,
        })
    }

    /// Take a slot, or `None` when at capacity.
    pub fn try_admit(self: &Arc<Self>) -> Option<AdmissionGuard> {
        let mut current = self.in_flight.load(Ordering::Relaxed);
        loop {
            if current >= self.max_concurrent {
                return None;
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        Some(AdmissionGuard {
            control: Arc::clone(self),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

/// Holds one in-flight slot until dropped.
#[derive(Debug)]
pub struct AdmissionGuard {
    control: Arc<AdmissionControl>,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.control.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
