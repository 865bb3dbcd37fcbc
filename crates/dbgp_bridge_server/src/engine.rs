//! TCP side: the debug engine connects here.

use std::sync::Arc;

use dbgp_bridge_core::dbgp::framing::{read_packet, write_command};
use dbgp_bridge_core::{Bridge, EngineOutbound};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub async fn serve(listener: TcpListener, bridge: Arc<Bridge>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(handle_connection(bridge.clone(), stream, peer.to_string()));
            }
            Err(e) => tracing::error!("Failed to accept engine connection: {}", e),
        }
    }
}

/// Runs one engine connection until either side ends it, then detaches the
/// engine so the session resets.
pub async fn handle_connection<S>(bridge: Arc<Bridge>, stream: S, peer: String)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let engine_id = match bridge.attach_engine(tx).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!("Dropping engine connection from {}: {}", peer, e);
            return;
        }
    };
    tracing::info!("Engine {} connected from {}", engine_id, peer);

    // Detach runs even if the pump task panics.
    if let Err(e) = tokio::spawn(pump(bridge.clone(), stream, rx, engine_id)).await {
        tracing::error!("Engine {} connection task failed: {}", engine_id, e);
    }

    bridge.detach_engine(engine_id).await;
}

async fn pump<S>(
    bridge: Arc<Bridge>,
    stream: S,
    mut rx: mpsc::UnboundedReceiver<EngineOutbound>,
    engine_id: u64,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let reader_loop = async {
        loop {
            match read_packet(&mut reader).await {
                Ok(Some(xml)) => {
                    tracing::debug!("Engine {} -> {}", engine_id, xml);
                    bridge.handle_engine_packet(&xml).await;
                }
                Ok(None) => {
                    tracing::info!("Engine {} closed the connection", engine_id);
                    break;
                }
                Err(e) => {
                    tracing::error!("Engine {} read failed: {}", engine_id, e);
                    break;
                }
            }
        }
    };

    let writer_loop = async {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                EngineOutbound::Command(wire) => {
                    if let Err(e) = write_command(&mut write_half, &wire).await {
                        tracing::error!("Engine {} write failed: {}", engine_id, e);
                        break;
                    }
                }
                EngineOutbound::Close => {
                    let _ = write_half.shutdown().await;
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = reader_loop => {}
        _ = writer_loop => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgp_bridge_core::BridgeConfig;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncReadExt, ReadBuf};

    struct PanickingStream;

    impl AsyncRead for PanickingStream {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            panic!("stream failure");
        }
    }

    impl AsyncWrite for PanickingStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn frame(xml: &str) -> Vec<u8> {
        format!("{}\0{}\0", xml.len(), xml).into_bytes()
    }

    #[tokio::test]
    async fn handshake_then_disconnect_detaches_engine() {
        let bridge = Arc::new(Bridge::new(&BridgeConfig::default()));
        let (client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(handle_connection(bridge.clone(), server, "test".to_string()));

        let (mut client_read, mut client_write) = tokio::io::split(client);
        let init = r#"<init xmlns="urn:debugger_protocol_v1" fileuri="file:///a.php" language="PHP"/>"#;
        client_write.write_all(&frame(init)).await.unwrap();

        let mut received = String::new();
        let mut buf = [0u8; 256];
        while !(received.contains("run -i ") && received.ends_with('\0')) {
            let n = client_read.read(&mut buf).await.unwrap();
            assert!(n > 0, "engine side closed early: {received:?}");
            received.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
        let commands: Vec<&str> = received.split('\0').filter(|c| !c.is_empty()).collect();
        assert!(commands[0].starts_with("stdout -i "));
        assert!(commands[commands.len() - 1].starts_with("run -i "));

        drop(client_read);
        drop(client_write);
        task.await.unwrap();
        assert!(!bridge.is_engine_attached().await);
    }

    #[tokio::test]
    async fn second_engine_is_dropped() {
        let bridge = Arc::new(Bridge::new(&BridgeConfig::default()));
        let (tx, _rx) = mpsc::unbounded_channel();
        bridge.attach_engine(tx).await.unwrap();

        let (mut client, server) = tokio::io::duplex(64);
        handle_connection(bridge.clone(), server, "second".to_string()).await;

        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
        assert!(bridge.is_engine_attached().await);
    }

    #[tokio::test]
    async fn oversized_length_header_drops_connection() {
        let bridge = Arc::new(Bridge::new(&BridgeConfig::default()));
        let (mut client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(handle_connection(bridge.clone(), server, "huge".to_string()));

        client
            .write_all(b"18446744073709551615\0<x/>\0")
            .await
            .unwrap();
        task.await.unwrap();
        assert!(!bridge.is_engine_attached().await);
    }

    #[tokio::test]
    async fn panicking_connection_still_detaches_engine() {
        let bridge = Arc::new(Bridge::new(&BridgeConfig::default()));
        handle_connection(bridge.clone(), PanickingStream, "panic".to_string()).await;
        assert!(!bridge.is_engine_attached().await);

        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(bridge.attach_engine(tx).await.is_ok());
    }
}
