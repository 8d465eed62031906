//! End-to-end tests driving two `WSConnection`s (server role / client role)
//! over an in-memory `tokio::io::duplex` transport, without any real socket
//! or handshake involved -- the handshake itself is covered separately in
//! `handshake.rs`'s unit tests.

use futures::StreamExt;
use wavecore::config::WebSocketConfig;
use wavecore::extensions::Extensions;
use wavecore::frame::CloseCode;
use wavecore::message::{CloseDetails, Message};
use wavecore::read::Role;
use wavecore::stream::SocketFlowStream;
use wavecore::WSConnection;

const DUPLEX_BUFFER_SIZE: usize = 1 << 20;

fn connection_pair(config: WebSocketConfig) -> (WSConnection, WSConnection) {
    let (client_half, server_half) = tokio::io::duplex(DUPLEX_BUFFER_SIZE);
    let server = WSConnection::new(
        SocketFlowStream::Duplex(server_half),
        Role::Server,
        config.clone(),
        None,
    );
    let client = WSConnection::new(SocketFlowStream::Duplex(client_half), Role::Client, config, None);
    (server, client)
}

#[tokio::test]
async fn small_text_message_round_trips() {
    let (server, client) = connection_pair(WebSocketConfig::default());
    let (mut server_reader, mut server_writer) = server.split();
    let (mut client_reader, mut client_writer) = client.split();

    client_writer.send_as_text("hello there".to_string()).await.unwrap();
    let received = server_reader.next().await.unwrap().unwrap();
    assert_eq!(received, Message::Text("hello there".to_string()));

    server_writer.send_as_text("general kenobi".to_string()).await.unwrap();
    let reply = client_reader.next().await.unwrap().unwrap();
    assert_eq!(reply, Message::Text("general kenobi".to_string()));
}

#[tokio::test]
async fn large_binary_message_spans_multiple_fragments() {
    let (server, client) = connection_pair(WebSocketConfig::default());
    let (mut server_reader, _server_writer) = server.split();
    let (_client_reader, mut client_writer) = client.split();

    let payload: Vec<u8> = (0..300_000u32).map(|n| (n % 256) as u8).collect();
    client_writer
        .send_large_data_fragmented(payload.clone(), 4096)
        .await
        .unwrap();

    let received = server_reader.next().await.unwrap().unwrap();
    assert_eq!(received, Message::Binary(payload));
}

#[tokio::test]
async fn compressed_message_round_trips_through_permessage_deflate() {
    let mut config = WebSocketConfig {
        allow_per_message_deflate: true,
        ..WebSocketConfig::default()
    };
    config.extensions = Some(Extensions {
        permessage_deflate: true,
        ..Extensions::default()
    });

    let (server, client) = connection_pair(config);
    let (mut server_reader, _server_writer) = server.split();
    let (_client_reader, mut client_writer) = client.split();

    let payload = "a".repeat(2048);
    client_writer.send_as_text(payload.clone()).await.unwrap();

    let received = server_reader.next().await.unwrap().unwrap();
    assert_eq!(received, Message::Text(payload));
}

#[tokio::test]
async fn ping_interleaved_with_data_does_not_disrupt_messages() {
    let (server, client) = connection_pair(WebSocketConfig::default());
    let (mut server_reader, _server_writer) = server.split();
    let (_client_reader, mut client_writer) = client.split();

    client_writer.send_ping().await.unwrap();
    client_writer.send_as_text("after the ping".to_string()).await.unwrap();

    let received = server_reader.next().await.unwrap().unwrap();
    assert_eq!(received, Message::Text("after the ping".to_string()));
}

#[tokio::test]
async fn graceful_close_handshake_settles_both_sides() {
    let (server, client) = connection_pair(WebSocketConfig::default());
    let (mut server_reader, _server_writer) = server.split();
    let (_client_reader, mut client_writer) = client.split();

    client_writer.close(CloseCode::Normal, "done").await.unwrap();

    // The server's reader observes the close as a `Message::Close` carrying
    // the peer's status and reason, then its stream ends once the server
    // has replied with its own Close frame.
    let received = server_reader.next().await.unwrap().unwrap();
    assert_eq!(
        received,
        Message::Close(CloseDetails {
            status: CloseCode::Normal,
            reason: "done".to_string(),
        })
    );
    assert!(server_reader.next().await.is_none());
}

#[tokio::test]
async fn oversize_message_is_rejected_before_it_reaches_the_wire() {
    let config = WebSocketConfig {
        max_message_size: Some(16),
        ..WebSocketConfig::default()
    };
    let (server, client) = connection_pair(config);
    let (_server_reader, _server_writer) = server.split();
    let (_client_reader, mut client_writer) = client.split();

    let result = client_writer.send_as_text("this message is far too long".to_string()).await;
    assert!(result.is_err());
}
