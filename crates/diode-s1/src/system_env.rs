//! Production `Environment` implementation using system time and RNG.
//!
//! Real system time, OS cryptographic RNG (`getrandom`), and Tokio async
//! sleep. Production behavior is non-deterministic; `diode-harness` swaps in
//! a virtual-time environment for simulation.

use std::time::Duration;

use diode_core::env::Environment;

/// Production environment using system time and cryptographic RNG.
///
/// # Panics
///
/// [`Environment::random_bytes`] panics if the OS RNG fails. This is
/// intentional: a gateway without functioning cryptographic randomness
/// cannot generate dependable diagnostic identifiers, and RNG failure
/// indicates an unrecoverable OS-level issue.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Creates a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn wall_clock_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("invariant: system clock is after the Unix epoch")
            .as_millis() as u64
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_advances() {
        let env = SystemEnv::new();
        let t1 = env.now();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = env.now();
        assert!(t2 > t1);
    }

    #[test]
    fn random_bytes_are_random() {
        let env = SystemEnv::new();
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        env.random_bytes(&mut a);
        env.random_bytes(&mut b);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn sleep_waits_at_least_the_requested_duration() {
        let env = SystemEnv::new();
        let start = env.now();
        env.sleep(Duration::from_millis(50)).await;
        assert!(env.now() - start >= Duration::from_millis(50));
    }
}
