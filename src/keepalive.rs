//! C11: cooperative keep-alive. Periodically pings the peer and aborts the
//! connection if no Pong has arrived within two ping intervals.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use uuid::Uuid;

use crate::connection_state::ConnectionState;
use crate::frame::{CloseCode, Frame, OpCode};
use crate::write::Writer;

/// Spawns the keep-alive task, or returns `None` if `interval_duration` is
/// zero (keep-alive disabled, the `WebSocketConfig` default).
pub fn spawn(
    writer: Arc<Mutex<Writer>>,
    state: Arc<Mutex<ConnectionState>>,
    last_pong: Arc<Mutex<Instant>>,
    interval_duration: Duration,
    id: Uuid,
) -> Option<JoinHandle<()>> {
    if interval_duration.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = interval(interval_duration);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            if state.lock().await.is_terminal() {
                return;
            }

            if last_pong.lock().await.elapsed() >= interval_duration * 2 {
                log::warn!("[{id}] keep-alive timeout, no pong received within two intervals");
                *state.lock().await = ConnectionState::Aborted;
                if let Ok(mut writer) = writer.try_lock() {
                    let _ = writer
                        .write_frame(Frame::close(CloseCode::Error, "keep-alive timeout"), false)
                        .await;
                }
                return;
            }

            let mut writer = match writer.try_lock() {
                Ok(writer) => writer,
                Err(_) => continue,
            };
            let ping = Frame::new(true, OpCode::Ping, Vec::new(), false);
            if writer.write_frame(ping, false).await.is_err() {
                log::warn!("[{id}] failed to write keep-alive ping, aborting connection");
                drop(writer);
                *state.lock().await = ConnectionState::Aborted;
                return;
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::{FrameReader, Role};
    use crate::write::WriterKind;
    use tokio::io::{split, BufReader};

    #[tokio::test]
    async fn disabled_interval_spawns_nothing() {
        let (_client, server) = tokio::io::duplex(1024);
        let (_read, write_half) = split(server);
        let writer = Arc::new(Mutex::new(Writer::new(write_half, WriterKind::Server, crate::event::generate_new_uuid())));
        let state = Arc::new(Mutex::new(ConnectionState::Open));
        let last_pong = Arc::new(Mutex::new(Instant::now()));

        assert!(spawn(writer, state, last_pong, Duration::ZERO, crate::event::generate_new_uuid()).is_none());
    }

    #[tokio::test]
    async fn sends_a_ping_on_each_tick() {
        let (client, server) = tokio::io::duplex(1024);
        let (_read, write_half) = split(server);
        let writer = Arc::new(Mutex::new(Writer::new(write_half, WriterKind::Server, crate::event::generate_new_uuid())));
        let state = Arc::new(Mutex::new(ConnectionState::Open));
        let last_pong = Arc::new(Mutex::new(Instant::now()));

        let handle = spawn(
            writer,
            state,
            last_pong,
            Duration::from_millis(30),
            crate::event::generate_new_uuid(),
        )
        .unwrap();

        let (read_half, _write_half) = split(client);
        let mut reader = FrameReader::new(BufReader::new(read_half), Role::Client);
        let frame = reader.read_frame(1 << 20).await.unwrap();
        assert_eq!(frame.opcode, OpCode::Ping);

        handle.abort();
    }
}
