use std::net::TcpStream;
use std::time::Instant;

use super::{with_hard_timeout, ProbeError, ProbeResult, ProbeTarget, Prober};
use crate::config::ProbeConfig;
use crate::context::Context;

#[derive(Debug, Default)]
pub struct TcpProber;

impl Prober for TcpProber {
    fn probe(&self, target: &ProbeTarget, config: &ProbeConfig, _cancel: &Context) -> ProbeResult {
        let addr = format!("{}:{}", target.address, target.port);
        let timeout = config.timeout;

        with_hard_timeout(timeout, move || {
            let start = Instant::now();
            let socket_addr = match addr.parse() {
                Ok(addr) => addr,
                Err(_) => match std::net::ToSocketAddrs::to_socket_addrs(&addr) {
                    Ok(mut addrs) => match addrs.next() {
                        Some(addr) => addr,
                        None => {
                            return ProbeResult::failed(
                                start.elapsed(),
                                ProbeError::Other("could not resolve address".into()),
                            )
                        }
                    },
                    Err(_) => {
                        return ProbeResult::failed(
                            start.elapsed(),
                            ProbeError::Other("could not resolve address".into()),
                        )
                    }
                },
            };

            match TcpStream::connect_timeout(&socket_addr, timeout) {
                Ok(_) => ProbeResult::ok(start.elapsed(), ""),
                Err(err) if err.kind() == std::io::ErrorKind::ConnectionRefused => {
                    ProbeResult::failed(start.elapsed(), ProbeError::ConnectionRefused)
                }
                Err(err) => ProbeResult::failed(start.elapsed(), ProbeError::Other(err.to_string())),
            }
        })
    }
}
