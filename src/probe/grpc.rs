use std::time::{Duration, Instant};

use tonic::transport::Endpoint;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

use super::{ProbeError, ProbeResult, ProbeTarget, Prober};
use crate::config::ProbeConfig;
use crate::context::Context;

/// Bridges the async `tonic` client into this crate's otherwise
/// thread-per-unit-of-work model with a small dedicated runtime, the same
/// idiom used for the Docker port-discovery path.
#[derive(Debug, Default)]
pub struct GrpcProber;

impl Prober for GrpcProber {
    fn probe(&self, target: &ProbeTarget, config: &ProbeConfig, _cancel: &Context) -> ProbeResult {
        let start = Instant::now();
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(err) => {
                return ProbeResult::failed(start.elapsed(), ProbeError::Other(err.to_string()))
            }
        };

        let uri = format!("http://{}:{}", target.address, target.port);
        let service = config.service.clone();
        let timeout = config.timeout;

        runtime.block_on(async move {
            let attempt = async {
                let endpoint = Endpoint::from_shared(uri)
                    .map_err(|err| ProbeError::Other(err.to_string()))?
                    .connect_timeout(timeout);
                let channel = endpoint
                    .connect()
                    .await
                    .map_err(|_| ProbeError::ConnectionRefused)?;
                let mut client = HealthClient::new(channel);
                let response = client
                    .check(HealthCheckRequest { service })
                    .await
                    .map_err(|err| ProbeError::Other(err.to_string()))?;
                Ok::<_, ProbeError>(response.into_inner().status)
            };

            match tokio::time::timeout(timeout, attempt).await {
                Ok(Ok(status)) if status == tonic_health::ServingStatus::Serving as i32 => {
                    ProbeResult::ok(start.elapsed(), "SERVING")
                }
                Ok(Ok(_)) => ProbeResult::failed(
                    start.elapsed(),
                    ProbeError::Other("service not serving".into()),
                ),
                Ok(Err(err)) => ProbeResult::failed(start.elapsed(), err),
                Err(_) => ProbeResult::failed(start.elapsed(), ProbeError::ProbeTimeout),
            }
        })
    }
}
