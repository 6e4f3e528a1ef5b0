use std::net::IpAddr;
use std::str::FromStr;
use std::time::Instant;

use super::{ProbeError, ProbeResult, ProbeTarget, Prober};
use crate::config::ProbeConfig;
use crate::context::Context;

/// At least one echo reply within the timeout counts as success.
#[derive(Debug, Default)]
pub struct IcmpProber;

impl Prober for IcmpProber {
    fn probe(&self, target: &ProbeTarget, config: &ProbeConfig, _cancel: &Context) -> ProbeResult {
        let start = Instant::now();
        let addr = match IpAddr::from_str(&target.address) {
            Ok(addr) => addr,
            Err(err) => {
                return ProbeResult::failed(start.elapsed(), ProbeError::Other(err.to_string()))
            }
        };
        let timeout = config.timeout;

        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(err) => {
                return ProbeResult::failed(start.elapsed(), ProbeError::Other(err.to_string()))
            }
        };

        runtime.block_on(async move {
            let payload = [0u8; 8];
            match tokio::time::timeout(timeout, surge_ping::ping(addr, &payload)).await {
                Ok(Ok((_packet, rtt))) => ProbeResult::ok(rtt, ""),
                Ok(Err(err)) => ProbeResult::failed(start.elapsed(), ProbeError::Other(err.to_string())),
                Err(_) => ProbeResult::failed(start.elapsed(), ProbeError::ProbeTimeout),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn invalid_address_fails_without_a_real_socket() {
        let prober = IcmpProber;
        let target = ProbeTarget {
            address: "not-an-ip".into(),
            port: 0,
        };
        let config = ProbeConfig {
            timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let result = prober.probe(&target, &config, &Context::new());
        assert!(!result.success);
    }
}
