//! In-memory stand-in for the diode's unreliable, unidirectional datagram
//! channel.
//!
//! A real deployment swaps this for a hardware diode; this harness swaps it
//! for loopback UDP sockets in full end-to-end tests, or for the channel
//! here when a test wants controlled, reproducible packet loss without
//! depending on real OS socket buffer behavior. The type only exposes a
//! sender half and a receiver half — there is no API by which the receiver
//! half could address or write to the sender half, so the no-back-channel
//! guarantee is structural, not just a convention.

#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::sync::{Arc, Mutex};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc;

/// The sending half of a simulated diode link. Cloned freely; every clone
/// shares the same loss model and seeded RNG so a test stays deterministic
/// regardless of how many producers feed it.
#[derive(Clone)]
pub struct LinkSender {
    tx: mpsc::Sender<Vec<u8>>,
    drop_probability: f64,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

/// The receiving half of a simulated diode link.
pub struct LinkReceiver {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl LinkReceiver {
    /// Awaits the next datagram that survived the loss model.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

impl LinkSender {
    /// Sends `datagram` across the link. Returns `true` if it was enqueued
    /// (still subject to ordinary channel backpressure/closure), `false` if
    /// the loss model dropped it before it ever reached the channel —
    /// indistinguishable, from a caller's perspective, from real diode loss.
    pub fn send(&self, datagram: Vec<u8>) -> bool {
        let roll = self.rng.lock().expect("link rng mutex poisoned").next_u64() as f64 / u64::MAX as f64;
        if roll < self.drop_probability {
            return false;
        }
        self.tx.try_send(datagram).is_ok()
    }
}

/// Builds a simulated diode link with a fixed, seeded packet-loss rate.
///
/// `capacity` bounds the in-flight datagram queue the same way a real UDP
/// socket's kernel buffer is bounded: once full, `send` silently fails
/// (reported as a dropped datagram), never blocks.
#[must_use]
pub fn channel(capacity: usize, drop_probability: f64, seed: u64) -> (LinkSender, LinkReceiver) {
    assert!((0.0..=1.0).contains(&drop_probability), "drop_probability must be in [0.0, 1.0]");
    let (tx, rx) = mpsc::channel(capacity);
    let sender = LinkSender { tx, drop_probability, rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))) };
    (sender, LinkReceiver { rx })
}
