//! End-to-end TURN flows over loopback UDP: the authentication handshake,
//! allocation lifecycle, permission-gated relaying and channel data.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use turn_relay::allocation::{AllocationLimits, AllocationManager};
use turn_relay::auth::CredentialIssuer;
use turn_relay::relay::RelayServer;
use turn_relay::stun::{self, attr, error_code, ChannelData, Class, Message, Method};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));

struct Harness {
    server_addr: SocketAddr,
    manager: Arc<AllocationManager>,
    issuer: Arc<CredentialIssuer>,
}

async fn start_server(port_range: (u16, u16)) -> Harness {
    let issuer = Arc::new(CredentialIssuer::new(
        "integration-secret",
        "icebridge",
        Duration::from_secs(600),
        LOCALHOST,
        3478,
    ));
    let manager = Arc::new(AllocationManager::new(
        LOCALHOST,
        port_range,
        AllocationLimits::default(),
    ));
    let server = Arc::new(
        RelayServer::bind("127.0.0.1:0".parse().unwrap(), issuer.clone(), manager.clone())
            .await
            .unwrap(),
    );
    let server_addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    Harness {
        server_addr,
        manager,
        issuer,
    }
}

async fn exchange(socket: &UdpSocket, server: SocketAddr, request: &[u8]) -> Message {
    socket.send_to(request, server).await.unwrap();
    recv_message(socket).await
}

async fn recv_message(socket: &UdpSocket) -> Message {
    let mut buf = vec![0u8; 2048];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for reply")
        .unwrap();
    Message::decode(&buf[..len]).unwrap()
}

async fn recv_raw(socket: &UdpSocket) -> (Vec<u8>, SocketAddr) {
    let mut buf = vec![0u8; 2048];
    let (len, from) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for datagram")
        .unwrap();
    (buf[..len].to_vec(), from)
}

/// 401 challenge for a bare Allocate; returns (nonce, realm)
async fn auth_challenge(socket: &UdpSocket, server: SocketAddr) -> (String, String) {
    let mut msg = Message::new(Class::Request, Method::Allocate, [1u8; 12]);
    msg.add(attr::REQUESTED_TRANSPORT, vec![17, 0, 0, 0]);
    let reply = exchange(socket, server, &msg.encode()).await;

    assert_eq!(reply.class, Class::ErrorResponse);
    assert_eq!(reply.error_code(), Some(error_code::UNAUTHORIZED));
    let nonce = reply.attr_string(attr::NONCE).unwrap().to_string();
    let realm = reply.attr_string(attr::REALM).unwrap().to_string();
    (nonce, realm)
}

fn signed(
    mut msg: Message,
    issuer: &CredentialIssuer,
    username: &str,
    realm: &str,
    nonce: &str,
) -> Vec<u8> {
    msg.add(attr::USERNAME, username.as_bytes().to_vec());
    msg.add(attr::REALM, realm.as_bytes().to_vec());
    msg.add(attr::NONCE, nonce.as_bytes().to_vec());
    let mut raw = msg.encode();
    stun::append_integrity(&mut raw, &issuer.long_term_key(username));
    stun::append_fingerprint(&mut raw);
    raw
}

#[tokio::test]
async fn allocate_without_credentials_creates_nothing() {
    let harness = start_server((47100, 47109)).await;
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let (nonce, realm) = auth_challenge(&client, harness.server_addr).await;
    assert!(!nonce.is_empty());
    assert_eq!(realm, "icebridge");
    assert_eq!(harness.manager.allocation_count().await, 0);
}

#[tokio::test]
async fn binding_request_reflects_mapped_address() {
    let harness = start_server((47110, 47119)).await;
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let msg = Message::new(Class::Request, Method::Binding, [2u8; 12]);
    let reply = exchange(&client, harness.server_addr, &msg.encode()).await;

    assert_eq!(reply.class, Class::SuccessResponse);
    assert_eq!(
        reply.xor_address(attr::XOR_MAPPED_ADDRESS),
        Some(client.local_addr().unwrap())
    );
}

#[tokio::test]
async fn full_allocation_relay_and_release() {
    let harness = start_server((47120, 47129)).await;
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let peer_addr = peer.local_addr().unwrap();

    let creds = harness.issuer.issue("alice");
    let (nonce, realm) = auth_challenge(&client, harness.server_addr).await;

    // authenticated Allocate
    let mut allocate = Message::new(Class::Request, Method::Allocate, [3u8; 12]);
    allocate.add(attr::REQUESTED_TRANSPORT, vec![17, 0, 0, 0]);
    allocate.add(attr::LIFETIME, 600u32.to_be_bytes().to_vec());
    let raw = signed(allocate, &harness.issuer, &creds.username, &realm, &nonce);
    let reply = exchange(&client, harness.server_addr, &raw).await;

    assert_eq!(reply.class, Class::SuccessResponse);
    assert_eq!(reply.attr_u32(attr::LIFETIME), Some(600));
    let relay_addr = reply.xor_address(attr::XOR_RELAYED_ADDRESS).unwrap();
    assert!((47120..=47129).contains(&relay_addr.port()));
    assert_eq!(harness.manager.allocation_count().await, 1);

    // success responses carry MESSAGE-INTEGRITY under the same key
    let integrity = reply.attribute(attr::MESSAGE_INTEGRITY).unwrap();
    assert_eq!(integrity.len(), 20);

    // a datagram from a peer without permission is never forwarded
    peer.send_to(b"sneaky", relay_addr).await.unwrap();
    let early = tokio::time::timeout(Duration::from_millis(200), async {
        let mut buf = [0u8; 64];
        client.recv_from(&mut buf).await
    })
    .await;
    assert!(early.is_err(), "unpermitted datagram must be dropped");

    // CreatePermission for the peer
    let mut permit = Message::new(Class::Request, Method::CreatePermission, [4u8; 12]);
    permit.add_xor_address(attr::XOR_PEER_ADDRESS, peer_addr);
    let raw = signed(permit, &harness.issuer, &creds.username, &realm, &nonce);
    let reply = exchange(&client, harness.server_addr, &raw).await;
    assert_eq!(reply.class, Class::SuccessResponse);

    // client -> peer via Send indication
    let mut send = Message::new(Class::Indication, Method::Send, [5u8; 12]);
    send.add_xor_address(attr::XOR_PEER_ADDRESS, peer_addr);
    send.add(attr::DATA, b"hello peer".to_vec());
    client
        .send_to(&send.encode(), harness.server_addr)
        .await
        .unwrap();
    let (data, from) = recv_raw(&peer).await;
    assert_eq!(data, b"hello peer");
    assert_eq!(from, relay_addr);

    // peer -> client arrives as a Data indication naming the peer
    peer.send_to(b"hello client", relay_addr).await.unwrap();
    let indication = recv_message(&client).await;
    assert_eq!(indication.class, Class::Indication);
    assert_eq!(indication.method, Method::Data);
    assert_eq!(indication.attribute(attr::DATA), Some(&b"hello client"[..]));
    assert_eq!(
        indication.xor_address(attr::XOR_PEER_ADDRESS),
        Some(peer_addr)
    );

    // bind a channel and relay both directions through it
    let mut bind = Message::new(Class::Request, Method::ChannelBind, [6u8; 12]);
    bind.add(attr::CHANNEL_NUMBER, vec![0x40, 0x00, 0, 0]);
    bind.add_xor_address(attr::XOR_PEER_ADDRESS, peer_addr);
    let raw = signed(bind, &harness.issuer, &creds.username, &realm, &nonce);
    let reply = exchange(&client, harness.server_addr, &raw).await;
    assert_eq!(reply.class, Class::SuccessResponse);

    client
        .send_to(
            &ChannelData::encode(0x4000, b"channel out"),
            harness.server_addr,
        )
        .await
        .unwrap();
    let (data, _) = recv_raw(&peer).await;
    assert_eq!(data, b"channel out");

    peer.send_to(b"channel back", relay_addr).await.unwrap();
    let (framed, _) = recv_raw(&client).await;
    let frame = ChannelData::decode(&framed).unwrap();
    assert_eq!(frame.number, 0x4000);
    assert_eq!(frame.data, b"channel back");

    // Refresh with lifetime 0 deletes the allocation and frees the port
    let mut release = Message::new(Class::Request, Method::Refresh, [7u8; 12]);
    release.add(attr::LIFETIME, 0u32.to_be_bytes().to_vec());
    let raw = signed(release, &harness.issuer, &creds.username, &realm, &nonce);
    let reply = exchange(&client, harness.server_addr, &raw).await;
    assert_eq!(reply.class, Class::SuccessResponse);
    assert_eq!(reply.attr_u32(attr::LIFETIME), Some(0));
    assert_eq!(harness.manager.allocation_count().await, 0);
    assert_eq!(harness.manager.free_ports().await, 10);
}

#[tokio::test]
async fn channel_number_out_of_range_rejected() {
    let harness = start_server((47130, 47139)).await;
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let creds = harness.issuer.issue("bob");
    let (nonce, realm) = auth_challenge(&client, harness.server_addr).await;

    let mut allocate = Message::new(Class::Request, Method::Allocate, [8u8; 12]);
    allocate.add(attr::REQUESTED_TRANSPORT, vec![17, 0, 0, 0]);
    let raw = signed(allocate, &harness.issuer, &creds.username, &realm, &nonce);
    let reply = exchange(&client, harness.server_addr, &raw).await;
    assert_eq!(reply.class, Class::SuccessResponse);

    let mut bind = Message::new(Class::Request, Method::ChannelBind, [9u8; 12]);
    bind.add(attr::CHANNEL_NUMBER, vec![0x30, 0x00, 0, 0]);
    bind.add_xor_address(
        attr::XOR_PEER_ADDRESS,
        "127.0.0.1:9999".parse::<SocketAddr>().unwrap(),
    );
    let raw = signed(bind, &harness.issuer, &creds.username, &realm, &nonce);
    let reply = exchange(&client, harness.server_addr, &raw).await;

    assert_eq!(reply.class, Class::ErrorResponse);
    assert_eq!(reply.error_code(), Some(error_code::BAD_REQUEST));

    let five_tuple = turn_relay::FiveTuple {
        client: client.local_addr().unwrap(),
        transport: turn_relay::Transport::Udp,
    };
    let allocation = harness.manager.get(five_tuple).await.unwrap();
    assert_eq!(allocation.channel_peer(0x3000).await, None);
}

#[tokio::test]
async fn stale_nonce_answered_with_438() {
    let harness = start_server((47140, 47149)).await;
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let creds = harness.issuer.issue("carol");
    let mut allocate = Message::new(Class::Request, Method::Allocate, [10u8; 12]);
    allocate.add(attr::REQUESTED_TRANSPORT, vec![17, 0, 0, 0]);
    let raw = signed(
        allocate,
        &harness.issuer,
        &creds.username,
        "icebridge",
        "nonce-the-server-never-minted",
    );
    let reply = exchange(&client, harness.server_addr, &raw).await;

    assert_eq!(reply.class, Class::ErrorResponse);
    assert_eq!(reply.error_code(), Some(error_code::STALE_NONCE));
    assert!(reply.attr_string(attr::NONCE).is_some());
    assert_eq!(harness.manager.allocation_count().await, 0);
}
