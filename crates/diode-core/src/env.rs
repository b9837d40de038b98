//! Environment abstraction for deterministic testing.
//!
//! Decouples gateway logic from system resources (time, randomness), so that
//! `diode-harness` can drive virtual time and seeded randomness under Turmoil
//! while the S1/S2 binaries use real system resources in production.

use std::time::Duration;

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards.
/// - `wall_clock_millis()` MAY go backwards (wall clocks can be stepped or
///   adjusted); callers must never rely on it for ordering or uniqueness,
///   only as a human-readable label on stored files.
/// - `random_bytes()` uses cryptographically secure entropy in production.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`; simulation
    /// environments use virtual time (e.g. `turmoil::Instant`).
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    ///
    /// # Invariants
    ///
    /// This method MUST return values that never decrease within a single
    /// execution context. Subsequent calls must return times >= previous
    /// calls.
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Current wall-clock time in milliseconds since the Unix epoch.
    ///
    /// Used only for the informational `wall_ms` component of stored file
    /// names; never for ordering or collision resistance, which a
    /// process-wide monotonic counter in `diode-s2` provides instead.
    fn wall_clock_millis(&self) -> u64;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes.
    /// - Uses cryptographically secure RNG in production.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`, e.g. for a connection's diagnostic id.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
