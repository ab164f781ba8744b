//! UDP front end for the resolver.

use hickory_proto::op::Message;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::resolver::Resolver;

/// Largest plain DNS datagram we read
const MAX_DATAGRAM_SIZE: usize = 4096;

#[derive(Debug, Default)]
struct ServerCounters {
    requests: AtomicU64,
    responses: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of request counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsServerStats {
    pub requests: u64,
    pub responses: u64,
    pub dropped: u64,
}

pub struct DnsServer {
    socket: Arc<UdpSocket>,
    resolver: Arc<Resolver>,
    counters: Arc<ServerCounters>,
}

impl DnsServer {
    pub async fn bind(addr: &str, resolver: Arc<Resolver>) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!(addr = %socket.local_addr()?, "DNS UDP listening");
        Ok(Self {
            socket: Arc::new(socket),
            resolver,
            counters: Arc::new(ServerCounters::default()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    #[must_use]
    pub fn stats(&self) -> DnsServerStats {
        DnsServerStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            responses: self.counters.responses.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Answer datagrams until cancelled. Each request is handled on its own task.
    pub fn serve(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                let received = tokio::select! {
                    () = cancel.cancelled() => {
                        info!("DNS server shutting down");
                        return;
                    }
                    received = self.socket.recv_from(&mut buf) => received,
                };

                match received {
                    Ok((len, peer_addr)) => {
                        self.counters.requests.fetch_add(1, Ordering::Relaxed);
                        let data = buf[..len].to_vec();
                        let server = Arc::clone(&self);
                        tokio::spawn(async move {
                            server.handle_datagram(&data, peer_addr).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to receive UDP packet");
                    }
                }
            }
        })
    }

    async fn handle_datagram(&self, data: &[u8], peer_addr: SocketAddr) {
        let request = match Message::from_vec(data) {
            Ok(request) => request,
            Err(e) => {
                debug!(peer_addr = %peer_addr, error = %e, "Dropping undecodable datagram");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let response = self.resolver.handle_request(&request);
        let bytes = match response.to_vec() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(peer_addr = %peer_addr, id = request.id(), error = %e, "Failed to encode response");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        match self.socket.send_to(&bytes, peer_addr).await {
            Ok(_) => {
                self.counters.responses.fetch_add(1, Ordering::Relaxed);
                debug!(
                    peer_addr = %peer_addr,
                    id = request.id(),
                    answers = response.answers().len(),
                    "Sent DNS response"
                );
            }
            Err(e) => {
                warn!(peer_addr = %peer_addr, error = %e, "Failed to send DNS response");
            }
        }
    }
}
