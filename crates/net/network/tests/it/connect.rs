//! Connection tests

use crate::session::{listener, listener_with, next_event, wait_connected};
use futures::StreamExt;
use relay_eth_wire::{Capability, DisconnectReason, Protocol};
use relay_network::{
    config::rng_secret_key, ListenerEvent, NetworkConfig, NodeRecord, PeerError, SessionTimeouts,
};
use std::time::Duration;
use tokio::{io::AsyncWriteExt, net::TcpStream};

#[tokio::test(flavor = "multi_thread")]
async fn test_establish_session() {
    relay_tracing::init_test_tracing();

    let mut a = listener().await;
    let mut b = listener().await;
    let mut a_events = a.events();
    let mut b_events = b.events();

    a.connect(b.enode()).await.unwrap();

    let outgoing = wait_connected(&mut a_events).await;
    let incoming = wait_connected(&mut b_events).await;

    assert_eq!(outgoing.peer_id(), b.local_id());
    assert_eq!(incoming.peer_id(), a.local_id());
    assert_eq!(outgoing.client_version(), b.client_version());
    assert!(incoming.direction().is_incoming());
    assert!(!outgoing.direction().is_incoming());

    let eth = outgoing.capability("eth").unwrap().capability();
    assert_eq!(eth.version(), 68);
    assert_eq!(eth.offset, 16);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_enode_matches_bound_port() {
    let mut a = listener().await;
    let enode = a.enode();
    assert_eq!(enode.tcp_port, a.local_addr().port());
    assert_eq!(enode.id, a.local_id());
    assert_eq!(a.config().hello_message.port, a.local_addr().port());

    let parsed: NodeRecord = enode.to_string().parse().unwrap();
    assert_eq!(parsed, enode);

    // the event stream is handed out once
    let _events = a.events();
    assert!(a.events().next().await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_disconnect_closes_both_sides() {
    relay_tracing::init_test_tracing();

    let mut a = listener().await;
    let mut b = listener().await;
    let mut a_events = a.events();
    let mut b_events = b.events();

    a.connect(b.enode()).await.unwrap();
    let handle = wait_connected(&mut a_events).await;
    let _ = wait_connected(&mut b_events).await;

    assert!(handle.disconnect(DisconnectReason::ClientQuitting));

    loop {
        if let ListenerEvent::PeerClosed { peer, reason, we_initiated } =
            next_event(&mut b_events).await
        {
            assert_eq!(peer, a.local_id());
            assert_eq!(reason, Some(DisconnectReason::ClientQuitting));
            assert!(!we_initiated);
            break
        }
    }
    loop {
        if let ListenerEvent::PeerClosed { reason, we_initiated, .. } =
            next_event(&mut a_events).await
        {
            assert_eq!(reason, Some(DisconnectReason::ClientQuitting));
            assert!(we_initiated);
            break
        }
    }

    // the session is gone
    assert!(!handle.send_raw("eth", 1, vec![0xc0].into()).unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wrong_identity_fails_handshake() {
    relay_tracing::init_test_tracing();

    let a = listener().await;
    let mut b = listener().await;
    let mut b_events = b.events();

    // the auth is encrypted to a key `b` does not hold
    let wrong = NodeRecord::new(b.local_addr(), a.local_id());
    a.connect(wrong).await.unwrap();

    loop {
        match next_event(&mut b_events).await {
            ListenerEvent::PeerError { peer, error, .. } => {
                assert_eq!(peer, None);
                assert!(matches!(error, PeerError::Ecies(_)));
                break
            }
            ListenerEvent::PeerConnected(_) => panic!("session must not be established"),
            _ => {}
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_silent_peer_times_out() {
    relay_tracing::init_test_tracing();

    let timeouts =
        SessionTimeouts { handshake_timeout: Duration::from_millis(200), ..Default::default() };
    let mut b = listener_with(NetworkConfig::builder(rng_secret_key()).timeouts(timeouts)).await;
    let mut b_events = b.events();

    let mut stream = TcpStream::connect(b.local_addr()).await.unwrap();
    stream.write_all(&[0x04]).await.unwrap();

    match next_event(&mut b_events).await {
        ListenerEvent::PeerError { peer, error, .. } => {
            assert_eq!(peer, None);
            assert!(matches!(error, PeerError::HandshakeTimeout));
        }
        ev => panic!("unexpected event {ev:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_useless_peer() {
    relay_tracing::init_test_tracing();

    let other = Protocol::raw(Capability::new_static("other", 1), 4);
    let mut a = listener_with(NetworkConfig::builder(rng_secret_key()).protocols([other])).await;
    let b = listener().await;
    let mut a_events = a.events();

    a.connect(b.enode()).await.unwrap();

    loop {
        match next_event(&mut a_events).await {
            ListenerEvent::PeerError { peer, error, .. } => {
                assert_eq!(peer, Some(b.local_id()));
                assert!(matches!(error, PeerError::P2P(_)));
                break
            }
            ListenerEvent::PeerConnected(_) => panic!("session must not be established"),
            _ => {}
        }
    }
}
