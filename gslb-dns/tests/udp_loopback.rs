//! End-to-end queries over a real UDP socket on loopback.

use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RData, RecordType};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use gslb_core::models::HostIp;
use gslb_core::notify::LocalNotifier;
use gslb_core::random::SeededRandom;
use gslb_core::store::{KeyValueHostState, MemoryKv};
use gslb_core::HostStateStore;
use gslb_dns::{DnsServer, Resolver};

struct TestServer {
    server: Arc<DnsServer>,
    store: Arc<dyn HostStateStore>,
    resolver: Arc<Resolver>,
    cancel: CancellationToken,
}

impl TestServer {
    async fn start() -> Self {
        let store: Arc<dyn HostStateStore> = Arc::new(KeyValueHostState::new(
            Arc::new(MemoryKv::new()),
            Arc::new(LocalNotifier::new()),
        ));
        let resolver = Arc::new(Resolver::new(store.clone(), Arc::new(SeededRandom::new(3)), 5));
        let server = Arc::new(DnsServer::bind("127.0.0.1:0", resolver.clone()).await.unwrap());
        let cancel = CancellationToken::new();
        server.clone().serve(cancel.clone());
        Self {
            server,
            store,
            resolver,
            cancel,
        }
    }

    async fn exchange(&self, payload: &[u8]) -> Option<Message> {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(payload, self.server.local_addr().unwrap())
            .await
            .unwrap();

        let mut buf = vec![0u8; 4096];
        match tokio::time::timeout(Duration::from_millis(500), client.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => Some(Message::from_vec(&buf[..len]).unwrap()),
            _ => None,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn a_query(id: u16, name: &str) -> Vec<u8> {
    let mut request = Message::new();
    request
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(Name::from_ascii(name).unwrap(), RecordType::A));
    request.to_vec().unwrap()
}

#[tokio::test]
async fn answers_known_hostname() {
    let server = TestServer::start().await;
    server
        .store
        .set_host_ips(
            "app.example.com",
            "east",
            &[HostIp::new("10.0.0.1", 0, 50, ""), HostIp::new("10.0.0.2", 1, 50, "")],
        )
        .await
        .unwrap();
    server.resolver.rebuild_all().await.unwrap();

    let response = server.exchange(&a_query(7, "App.Example.com.")).await.unwrap();

    assert_eq!(response.id(), 7);
    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert_eq!(response.answers().len(), 1);
    match response.answers()[0].data() {
        RData::A(a) => assert_eq!(a.0.to_string(), "10.0.0.1"),
        other => panic!("unexpected record {other:?}"),
    }
    assert_eq!(response.answers()[0].ttl(), 5);
}

#[tokio::test]
async fn unknown_hostname_gets_empty_noerror() {
    let server = TestServer::start().await;

    let response = server.exchange(&a_query(8, "missing.example.com.")).await.unwrap();

    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert!(response.answers().is_empty());
    assert_eq!(response.queries().len(), 1);
}

#[tokio::test]
async fn garbage_datagram_is_dropped() {
    let server = TestServer::start().await;

    assert!(server.exchange(&[0xde, 0xad]).await.is_none());
    assert_eq!(server.server.stats().dropped, 1);

    // Still serving afterwards
    assert!(server.exchange(&a_query(9, "missing.example.com.")).await.is_some());
}
