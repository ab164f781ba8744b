//! In-memory hostname index and query answering.
//!
//! The index is a cache over the store. Each change notification re-reads one
//! hostname and replaces its entry; a miss removes it so withdrawn hostnames
//! stop answering. Store failures leave the existing entry in place.

use dashmap::DashMap;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{RData, Record, RecordType};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use gslb_core::models::normalize_hostname;
use gslb_core::{HostStateStore, RandomSource};

use crate::error::Result;
use crate::index::{build_entries, select, WeightedEntry};

pub struct Resolver {
    store: Arc<dyn HostStateStore>,
    random: Arc<dyn RandomSource>,
    index: DashMap<String, Arc<Vec<WeightedEntry>>>,
    ttl: u32,
}

impl Resolver {
    pub fn new(store: Arc<dyn HostStateStore>, random: Arc<dyn RandomSource>, ttl: u32) -> Self {
        Self {
            store,
            random,
            index: DashMap::new(),
            ttl,
        }
    }

    /// Re-read one hostname from the store and replace its index entry.
    pub async fn refresh_hostname(&self, hostname: &str) -> Result<()> {
        let hostname = normalize_hostname(hostname);
        let entries = match self.store.get_host_information(&hostname).await? {
            Some(host) => build_entries(&host),
            None => Vec::new(),
        };

        if entries.is_empty() {
            if self.index.remove(&hostname).is_some() {
                debug!(hostname = %hostname, "Removed hostname from index");
            }
        } else {
            debug!(hostname = %hostname, entries = entries.len(), "Indexed hostname");
            self.index.insert(hostname, Arc::new(entries));
        }
        Ok(())
    }

    /// Reload every hostname and drop entries the store no longer has.
    pub async fn rebuild_all(&self) -> Result<usize> {
        let hostnames: BTreeSet<String> = self.store.get_hostnames(None).await?;
        for hostname in &hostnames {
            if let Err(e) = self.refresh_hostname(hostname).await {
                warn!(hostname = %hostname, error = %e, "Failed to index hostname");
            }
        }
        self.index.retain(|hostname, _| hostnames.contains(hostname));

        let indexed = self.index.len();
        info!(indexed, "Rebuilt resolver index");
        Ok(indexed)
    }

    /// Pick one address for `hostname`, if it is indexed
    #[must_use]
    pub fn resolve(&self, hostname: &str) -> Option<IpAddr> {
        let hostname = normalize_hostname(hostname);
        let entries = self.index.get(&hostname).map(|e| Arc::clone(e.value()))?;
        select(&entries, self.random.as_ref()).map(|entry| entry.ip)
    }

    #[must_use]
    pub fn indexed_hostnames(&self) -> usize {
        self.index.len()
    }

    /// Answer every question independently.
    ///
    /// Unknown hostnames and non-A question types contribute no answers; the
    /// response code stays NOERROR. A request without questions gets FORMERR.
    #[must_use]
    pub fn handle_request(&self, request: &Message) -> Message {
        let mut response = Message::new();
        response
            .set_id(request.id())
            .set_message_type(MessageType::Response)
            .set_op_code(request.op_code())
            .set_recursion_desired(request.recursion_desired())
            .set_authoritative(true);

        if request.queries().is_empty() {
            debug!(id = request.id(), "Request without questions");
            response.set_response_code(ResponseCode::FormErr);
            return response;
        }

        for query in request.queries() {
            response.add_query(query.clone());
            if !matches!(query.query_type(), RecordType::A | RecordType::ANY) {
                continue;
            }

            let name = query.name();
            match self.resolve(&name.to_ascii()) {
                Some(IpAddr::V4(v4)) => {
                    trace!(name = %name, ip = %v4, "Answering");
                    response.add_answer(Record::from_rdata(name.clone(), self.ttl, RData::A(A(v4))));
                }
                Some(IpAddr::V6(_)) | None => {
                    trace!(name = %name, "No IPv4 answer");
                }
            }
        }

        response.set_response_code(ResponseCode::NoError);
        response
    }

    /// Apply change notifications until cancelled. Lagging triggers a full rebuild.
    pub fn run(
        self: Arc<Self>,
        mut changes: broadcast::Receiver<String>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let change = tokio::select! {
                    () = cancel.cancelled() => {
                        info!("Resolver subscription shutting down");
                        return;
                    }
                    change = changes.recv() => change,
                };

                match change {
                    Ok(hostname) => {
                        if let Err(e) = self.refresh_hostname(&hostname).await {
                            warn!(hostname = %hostname, error = %e, "Failed to refresh hostname");
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Change notifications lagged, rebuilding index");
                        if let Err(e) = self.rebuild_all().await {
                            error!(error = %e, "Failed to rebuild resolver index");
                        }
                    }
                    Err(RecvError::Closed) => {
                        info!("Change notification channel closed");
                        return;
                    }
                }
            }
        })
    }
}
