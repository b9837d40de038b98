//! S1-side heartbeat generator.
//!
//! Every `heartbeat_interval`, enqueues a heartbeat frame through the same
//! channel ordinary connection traffic uses, so it passes through the
//! encapsulator's limiter exactly like any other request.

use std::net::Ipv4Addr;

use diode_core::env::Environment;
use tokio::sync::{mpsc, watch};

use crate::encapsulator::{EncapsulateRequest, HEARTBEAT_PAYLOAD};

/// Runs until shutdown, emitting a heartbeat request on every tick.
pub async fn run<E: Environment>(
    env: E,
    interval: std::time::Duration,
    submit: mpsc::Sender<EncapsulateRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => return,
            () = env.sleep(interval) => {
                let request = EncapsulateRequest {
                    src_ip: Ipv4Addr::LOCALHOST,
                    src_port: 0,
                    payload: bytes::Bytes::from_static(HEARTBEAT_PAYLOAD),
                };
                if submit.send(request).await.is_err() {
                    return;
                }
            }
        }
    }
}
