//! Bidirectional relay between an accepted connection and its outbound leg

use std::io;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::listener::ForwardStats;
use crate::transport::ByteStream;

const RELAY_BUFFER_SIZE: usize = 32 * 1024;

/// Relay bytes until the outbound side finishes.
///
/// Client -> remote runs on its own task and shuts down the outbound write
/// half once the client stops sending. Remote -> client runs on the calling
/// task; when it ends the other task is aborted and both streams are
/// dropped, so neither socket outlives the relay.
pub async fn relay<A, B>(inbound: A, outbound: B, stats: Arc<RwLock<ForwardStats>>) -> io::Result<()>
where
    A: ByteStream,
    B: ByteStream,
{
    let (mut inbound_read, mut inbound_write) = tokio::io::split(inbound);
    let (mut outbound_read, mut outbound_write) = tokio::io::split(outbound);

    let upstream_stats = stats.clone();
    let upstream = tokio::spawn(async move {
        let result = pump(&mut inbound_read, &mut outbound_write, |n| {
            upstream_stats.write().bytes_sent += n;
        })
        .await;
        if let Err(e) = &result {
            debug!("Client -> remote copy ended: {}", e);
        }
        // Propagate EOF to the remote
        let _ = outbound_write.shutdown().await;
    });

    let downstream = pump(&mut outbound_read, &mut inbound_write, |n| {
        stats.write().bytes_received += n;
    })
    .await;

    upstream.abort();
    downstream.map(|total| debug!("Remote -> client copy finished after {} bytes", total))
}

async fn pump<R, W, F>(reader: &mut R, writer: &mut W, mut on_chunk: F) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(u64),
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        total += n as u64;
        on_chunk(n as u64);
    }
}
