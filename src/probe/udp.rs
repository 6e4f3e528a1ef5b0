use std::net::UdpSocket;
use std::time::Instant;

use super::{with_hard_timeout, ProbeError, ProbeResult, ProbeTarget, Prober};
use crate::config::ProbeConfig;
use crate::context::Context;

/// UDP is connection-less: a successful `send_to` is the only signal this
/// prober requires. Non-responsiveness is not a failure.
#[derive(Debug, Default)]
pub struct UdpProber;

impl Prober for UdpProber {
    fn probe(&self, target: &ProbeTarget, config: &ProbeConfig, _cancel: &Context) -> ProbeResult {
        let addr = format!("{}:{}", target.address, target.port);
        let timeout = config.timeout;

        with_hard_timeout(timeout, move || {
            let start = Instant::now();
            let socket = match UdpSocket::bind("0.0.0.0:0") {
                Ok(socket) => socket,
                Err(err) => {
                    return ProbeResult::failed(start.elapsed(), ProbeError::Other(err.to_string()))
                }
            };

            match socket.send_to(&[0u8], &addr) {
                Ok(_) => ProbeResult::ok(start.elapsed(), ""),
                Err(err) => ProbeResult::failed(start.elapsed(), ProbeError::Other(err.to_string())),
            }
        })
    }
}
