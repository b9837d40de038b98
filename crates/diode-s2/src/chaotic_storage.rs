//! Chaotic storage wrapper for fault-injection testing.
//!
//! Wraps any [`Storage`] implementation with a seeded-LCG failure injector,
//! so chaos tests against the real `FileStorage` backend stay reproducible
//! across runs while exercising its error-handling paths.

#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::sync::{Arc, Mutex};

use crate::storage::{Storage, StorageError};

/// Storage wrapper that randomly fails operations to exercise error-handling
/// paths. The failure pattern is deterministic given the same seed, so chaos
/// tests are reproducible.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: Arc<S>,
    failure_rate: f64,
    rng: Arc<Mutex<ChaoticRng>>,
    operation_count: Arc<Mutex<usize>>,
}

struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next(&mut self) -> f64 {
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Creates a chaotic wrapper with a fixed default seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is outside `[0.0, 1.0]`.
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Creates a chaotic wrapper with an explicit seed, for reproducible
    /// chaos across test runs.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is outside `[0.0, 1.0]`.
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );
        Self {
            inner: Arc::new(inner),
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(Mutex::new(0)),
        }
    }

    /// The wrapped storage, for inspecting invariants after a chaos run.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total storage operations attempted so far.
    pub fn operation_count(&self) -> usize {
        *self.operation_count.lock().expect("operation_count mutex poisoned")
    }

    fn record_and_maybe_fail(&self) -> bool {
        let mut count = self.operation_count.lock().expect("operation_count mutex poisoned");
        *count += 1;
        drop(count);
        self.rng.lock().expect("ChaoticRng mutex poisoned").should_fail(self.failure_rate)
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn write_payload(&self, file_stem: &str, payload: &[u8]) -> Result<(), StorageError> {
        if self.record_and_maybe_fail() {
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        self.inner.write_payload(file_stem, payload)
    }

    fn flush_buffers(&self) -> Result<(), StorageError> {
        if self.record_and_maybe_fail() {
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        self.inner.flush_buffers()
    }
}
