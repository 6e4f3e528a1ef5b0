use std::sync::Arc;
use std::time::Duration;

use super::exec::ExecProber;
use super::grpc::GrpcProber;
use super::http::HttpProber;
use super::icmp::IcmpProber;
use super::tcp::TcpProber;
use super::udp::UdpProber;
use super::Prober;
use crate::config::ProbeType;

/// Prober factory port: `create(probe_type, timeout) -> Prober`.
/// `timeout` is accepted for parity with the port contract; the concrete
/// probers read their own timeout from the `ProbeConfig` passed to
/// `probe()` on every call, so it is unused here.
pub trait ProberFactory: Send + Sync {
    fn create(&self, probe_type: ProbeType, timeout: Duration) -> Arc<dyn Prober>;
}

#[derive(Debug, Default)]
pub struct DefaultProberFactory;

impl ProberFactory for DefaultProberFactory {
    fn create(&self, probe_type: ProbeType, _timeout: Duration) -> Arc<dyn Prober> {
        match probe_type {
            ProbeType::Tcp => Arc::new(TcpProber),
            ProbeType::Udp => Arc::new(UdpProber),
            ProbeType::Http => Arc::new(HttpProber),
            ProbeType::Grpc => Arc::new(GrpcProber),
            ProbeType::Exec => Arc::new(ExecProber),
            ProbeType::Icmp => Arc::new(IcmpProber),
        }
    }
}
