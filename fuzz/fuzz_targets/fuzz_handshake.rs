#![no_main]

use libfuzzer_sys::fuzz_target;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Runtime;
use wavecore::config::{ServerConfig, WebSocketConfig};
use wavecore::handshake::accept_async_with_config;
use wavecore::stream::SocketFlowStream;

// Feeds arbitrary bytes directly as the server's view of the handshake
// request, with no attempt at constructing well-formed HTTP first -- this
// complements `fuzz_target_1`, which only fuzzes the Sec-WebSocket-Key
// inside an otherwise valid request.
fuzz_target!(|data: &[u8]| {
    let runtime = Runtime::new().unwrap();
    let data = data.to_vec();

    runtime.block_on(async move {
        let (mut client_side, server_side) = tokio::io::duplex(1 << 16);
        let _ = client_side.write_all(&data).await;
        drop(client_side);

        let config = ServerConfig {
            web_socket_config: Some(WebSocketConfig {
                allow_per_message_deflate: true,
                ..WebSocketConfig::default()
            }),
            tls_config: None,
        };

        let result = accept_async_with_config(SocketFlowStream::Duplex(server_side), Some(config)).await;
        if let Err(err) = result {
            println!("{:?}", err);
        }
    });
});
