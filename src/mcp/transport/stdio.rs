//! Newline-delimited JSON-RPC over a process's stdin and stdout.

use std::io;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::mcp::server::McpServer;
use crate::mcp::session::Channel;

pub async fn serve_stdio(server: Arc<McpServer>) -> io::Result<()> {
    serve(server, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serves a single client until `reader` reaches EOF or writing fails.
///
/// Each line is handled on its own task so a slow tool call does not hold up
/// later requests; replies are written in completion order.
pub async fn serve<R, W>(server: Arc<McpServer>, reader: R, writer: W) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let channel = Channel::new(None, server);
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_loop(writer, reply_rx, channel.take_push_stream()));
    info!("stdio transport ready");

    let mut lines = BufReader::new(reader).lines();
    let mut in_flight = JoinSet::new();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
            _ = reply_tx.closed() => {
                warn!("stdout writer stopped; no longer reading stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let channel = channel.clone();
        let reply_tx = reply_tx.clone();
        in_flight.spawn(async move {
            if let Some(reply) = channel.handle(&line).await {
                if reply_tx.send(reply).is_err() {
                    debug!("stdout writer gone; dropping reply");
                }
            }
        });
    }

    debug!("stdin closed; waiting for in-flight requests");
    while in_flight.join_next().await.is_some() {}
    channel.close();
    drop(reply_tx);
    writer_task.await.map_err(io::Error::other)?
}

async fn write_loop<W>(
    mut writer: W,
    mut replies: mpsc::UnboundedReceiver<Value>,
    mut push: Option<mpsc::Receiver<Value>>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            reply = replies.recv() => match reply {
                Some(reply) => reply,
                None => break,
            },
            Some(pushed) = next_push(&mut push) => pushed,
        };
        write_message(&mut writer, &message).await?;
    }
    if let Some(receiver) = push.as_mut() {
        while let Ok(pushed) = receiver.try_recv() {
            write_message(&mut writer, &pushed).await?;
        }
    }
    writer.flush().await
}

async fn write_message<W>(writer: &mut W, message: &Value) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = message.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

async fn next_push(push: &mut Option<mpsc::Receiver<Value>>) -> Option<Value> {
    match push {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}
