//! Message exchange over established sessions

use futures::{Stream, StreamExt};
use relay_eth_wire::{
    block::{FeedBlock, FeedHeader},
    eth::EthMessageID,
    Capability, Protocol, RlpItem,
};
use relay_network::{
    config::rng_secret_key, ListenerEvent, NetworkConfig, NetworkConfigBuilder, PeerHandle,
    PeerMessage, RlpxListener,
};
use std::time::Duration;
use tokio::time::timeout;

pub(crate) async fn listener_with(builder: NetworkConfigBuilder) -> RlpxListener {
    let config = builder.listener_addr("127.0.0.1:0".parse().unwrap()).build();
    RlpxListener::bind(config).await.unwrap()
}

pub(crate) async fn listener() -> RlpxListener {
    listener_with(NetworkConfig::builder(rng_secret_key())).await
}

pub(crate) async fn next_event<S>(events: &mut S) -> ListenerEvent
where
    S: Stream<Item = ListenerEvent> + Unpin,
{
    timeout(Duration::from_secs(10), events.next())
        .await
        .expect("no event in time")
        .expect("event stream ended")
}

pub(crate) async fn wait_connected<S>(events: &mut S) -> PeerHandle
where
    S: Stream<Item = ListenerEvent> + Unpin,
{
    loop {
        if let ListenerEvent::PeerConnected(handle) = next_event(events).await {
            return handle
        }
    }
}

async fn wait_message<S>(events: &mut S) -> PeerMessage
where
    S: Stream<Item = ListenerEvent> + Unpin,
{
    loop {
        if let ListenerEvent::PeerMessage { message, .. } = next_event(events).await {
            return message
        }
    }
}

fn block() -> FeedBlock {
    let header = FeedHeader {
        number: vec![0x01, 0x02].into(),
        gas_limit: vec![0x01, 0xc9, 0xc3, 0x80].into(),
        base_fee_per_gas: 7,
        ..Default::default()
    };
    let legacy_tx = RlpItem::list([RlpItem::from(1u64), RlpItem::from(2u64)]);
    let typed_tx = RlpItem::from(&[0x02, 0xc0][..]);
    FeedBlock::new(header, vec![legacy_tx, typed_tx])
}

#[tokio::test(flavor = "multi_thread")]
async fn test_status_is_echoed() {
    relay_tracing::init_test_tracing();

    let mut a = listener().await;
    let b = listener().await;
    let mut a_events = a.events();

    a.connect(b.enode()).await.unwrap();
    let handle = wait_connected(&mut a_events).await;

    let status = RlpItem::list([RlpItem::from(68u64), RlpItem::from(56u64)]);
    assert!(handle.send_raw("eth", 0, alloy_rlp::encode(&status).into()).unwrap());

    match wait_message(&mut a_events).await {
        PeerMessage::EthStatus(echo) => assert_eq!(echo, status),
        msg => panic!("unexpected message {msg:?}"),
    }
    match wait_message(&mut a_events).await {
        PeerMessage::Eth { id, payload } => {
            assert_eq!(id, EthMessageID::UpgradeStatus);
            assert_eq!(&payload[..], &[0xc2, 0xc1, 0x01]);
        }
        msg => panic!("unexpected message {msg:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_new_block_relay() {
    relay_tracing::init_test_tracing();

    let mut a = listener().await;
    let mut b = listener().await;
    let mut a_events = a.events();
    let mut b_events = b.events();

    a.connect(b.enode()).await.unwrap();
    let handle = wait_connected(&mut a_events).await;
    let _ = wait_connected(&mut b_events).await;

    let block = block();
    assert!(handle.send_new_block(&block).unwrap());

    match wait_message(&mut b_events).await {
        PeerMessage::Eth { id, payload } => {
            assert_eq!(id, EthMessageID::NewBlock);
            assert_eq!(payload.to_vec(), block.encode_new_block());
        }
        msg => panic!("unexpected message {msg:?}"),
    }

    // blocks with blob gas are not announced
    let mut blob_block = block;
    blob_block.header.blob_gas_used = vec![0x02, 0x00, 0x00].into();
    assert!(!handle.send_new_block(&blob_block).unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_block_headers_request_gets_empty_answer() {
    relay_tracing::init_test_tracing();

    let mut a = listener().await;
    let b = listener().await;
    let mut a_events = a.events();

    a.connect(b.enode()).await.unwrap();
    let handle = wait_connected(&mut a_events).await;

    let request = RlpItem::list([RlpItem::from(42u64), RlpItem::list([RlpItem::from(1u64)])]);
    let id = EthMessageID::GetBlockHeaders.into();
    assert!(handle.send_raw("eth", id, alloy_rlp::encode(&request).into()).unwrap());

    match wait_message(&mut a_events).await {
        PeerMessage::Eth { id, payload } => {
            assert_eq!(id, EthMessageID::BlockHeaders);
            let response: RlpItem = alloy_rlp::decode_exact(&payload).unwrap();
            assert_eq!(response, RlpItem::list([RlpItem::from(42u64), RlpItem::empty_list()]));
        }
        msg => panic!("unexpected message {msg:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_raw_capability_messages() {
    relay_tracing::init_test_tracing();

    let relay = Protocol::raw(Capability::new_static("relay", 1), 4);
    let mut a = listener_with(NetworkConfig::builder(rng_secret_key()).add_protocol(relay.clone()))
        .await;
    let mut b =
        listener_with(NetworkConfig::builder(rng_secret_key()).add_protocol(relay)).await;
    let mut a_events = a.events();
    let mut b_events = b.events();

    a.connect(b.enode()).await.unwrap();
    let handle = wait_connected(&mut a_events).await;
    let _ = wait_connected(&mut b_events).await;

    let relay = handle.capability("relay").unwrap();
    // eth owns 16..33, relay follows
    assert_eq!(relay.capability().offset, 33);
    assert!(relay.send(4, vec![0xc0].into()).is_err());
    assert!(relay.send(3, vec![0x83, b'a', b'b', b'c'].into()).unwrap());

    match wait_message(&mut b_events).await {
        PeerMessage::Capability { capability, id, payload } => {
            assert_eq!(capability, Capability::new_static("relay", 1));
            assert_eq!(id, 3);
            assert_eq!(&payload[..], &[0x83, b'a', b'b', b'c']);
        }
        msg => panic!("unexpected message {msg:?}"),
    }
}
