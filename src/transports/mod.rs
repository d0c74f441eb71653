//! Echo transports shipped with the crate.
//!
//! Each transport runs its peers under a different concurrency model, which
//! is exactly what the coordinator has to cope with:
//!
//! - [`LoopbackTransport`]: in-process channels, ticked by the driver
//! - [`TcpTransport`]: tokio tasks reacting to socket readiness
//! - [`UdpTransport`]: one dedicated thread per peer, ticking at a fixed rate

pub mod datagram;
pub mod loopback;
pub mod tcp;
pub mod udp;

pub use loopback::LoopbackTransport;
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

use crate::config::BenchmarkSetup;
use crate::transport::Transport;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Address the server of a transport actually bound to.
///
/// Lets in-process clients find a server that was configured with port 0.
#[derive(Debug, Clone, Default)]
pub(crate) struct BoundAddress {
    inner: Arc<Mutex<Option<SocketAddr>>>,
}

impl BoundAddress {
    pub(crate) fn set(&self, addr: SocketAddr) {
        *self.inner.lock() = Some(addr);
    }

    pub(crate) fn clear(&self) {
        *self.inner.lock() = None;
    }

    /// The bound address if a server of this transport is up, otherwise the
    /// configured endpoint.
    pub(crate) fn resolve(&self, setup: &BenchmarkSetup) -> Result<SocketAddr> {
        if let Some(addr) = *self.inner.lock() {
            return Ok(addr);
        }
        resolve_endpoint(setup)
    }
}

pub(crate) fn resolve_endpoint(setup: &BenchmarkSetup) -> Result<SocketAddr> {
    let endpoint = setup.endpoint();
    endpoint
        .to_socket_addrs()
        .map_err(|e| Error::Connection(format!("Cannot resolve {}: {}", endpoint, e)))?
        .next()
        .ok_or_else(|| Error::Connection(format!("No address found for {}", endpoint)))
}

/// Unspecified local address of the same family as `remote`.
pub(crate) fn local_any(remote: &SocketAddr) -> SocketAddr {
    if remote.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    }
}

/// Handle of the runtime the calling peer method runs on.
pub(crate) fn runtime(peer: &str) -> Result<Handle> {
    Handle::try_current()
        .map_err(|_| Error::Lifecycle(format!("{} must be driven from a tokio runtime", peer)))
}

/// Looks a transport up by its name.
///
/// # Examples
///
/// ```
/// use netbench::transports::by_name;
///
/// assert_eq!(by_name("tcp").unwrap().name(), "tcp");
/// assert!(by_name("carrier-pigeon").is_err());
/// ```
pub fn by_name(name: &str) -> Result<Arc<dyn Transport>> {
    match name.to_ascii_lowercase().as_str() {
        "tcp" => Ok(Arc::new(TcpTransport::new())),
        "udp" => Ok(Arc::new(UdpTransport::new())),
        "loopback" => Ok(Arc::new(LoopbackTransport::new())),
        other => Err(Error::Config(format!("Unknown transport '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_address_overrides_endpoint() {
        let setup = BenchmarkSetup::new().with_endpoint("127.0.0.1", 0);
        let bound = BoundAddress::default();
        assert_eq!(bound.resolve(&setup).unwrap().port(), 0);

        bound.set("127.0.0.1:4567".parse().unwrap());
        assert_eq!(bound.resolve(&setup).unwrap().port(), 4567);

        bound.clear();
        assert_eq!(bound.resolve(&setup).unwrap().port(), 0);
    }

    #[test]
    fn test_local_any_matches_family() {
        let v4: SocketAddr = "10.1.2.3:80".parse().unwrap();
        let v6: SocketAddr = "[::1]:80".parse().unwrap();
        assert!(local_any(&v4).is_ipv4());
        assert!(local_any(&v6).is_ipv6());
    }
}
