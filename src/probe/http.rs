use std::time::Instant;

use super::{with_hard_timeout, ProbeError, ProbeResult, ProbeTarget, Prober};
use crate::config::ProbeConfig;
use crate::context::Context;

#[derive(Debug, Default)]
pub struct HttpProber;

impl Prober for HttpProber {
    fn probe(&self, target: &ProbeTarget, config: &ProbeConfig, _cancel: &Context) -> ProbeResult {
        let url = format!(
            "http://{}:{}{}",
            target.address,
            target.port,
            if config.path.is_empty() { "/" } else { &config.path }
        );
        let method = reqwest::Method::from_bytes(config.method.as_bytes())
            .unwrap_or(reqwest::Method::GET);
        let expected_status = config.status_code;
        let timeout = config.timeout;

        with_hard_timeout(timeout, move || {
            let start = Instant::now();
            let client = match reqwest::blocking::Client::builder().timeout(timeout).build() {
                Ok(client) => client,
                Err(err) => {
                    return ProbeResult::failed(start.elapsed(), ProbeError::Other(err.to_string()))
                }
            };

            match client.request(method, &url).send() {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if status == expected_status {
                        ProbeResult::ok(start.elapsed(), format!("status {status}"))
                    } else {
                        ProbeResult::failed(
                            start.elapsed(),
                            ProbeError::Other(format!("unexpected status {status}")),
                        )
                    }
                }
                Err(err) if err.is_timeout() => {
                    ProbeResult::failed(start.elapsed(), ProbeError::ProbeTimeout)
                }
                Err(err) if err.is_connect() => {
                    ProbeResult::failed(start.elapsed(), ProbeError::ConnectionRefused)
                }
                Err(err) => ProbeResult::failed(start.elapsed(), ProbeError::Other(err.to_string())),
            }
        })
    }
}
