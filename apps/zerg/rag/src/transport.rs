//! Newline-delimited JSON transport
//!
//! Each input line is one `ToolRequest`; each output line is one envelope.
//! Requests run concurrently, so envelopes come back in completion order and
//! callers correlate them by `request_id`.

use std::sync::Arc;

use domain_rag::{ToolDispatcher, ToolHandler, ToolRequest, ToolResponse};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, warn};

const OUTPUT_BUFFER: usize = 256;

/// Read requests from `reader` until EOF and write every envelope to `writer`.
///
/// Returns the writer once every in-flight request has been answered.
pub async fn serve<H, R, W>(
    dispatcher: Arc<ToolDispatcher<H>>,
    reader: R,
    writer: W,
) -> std::io::Result<W>
where
    H: ToolHandler,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<String>(OUTPUT_BUFFER);
    let output = tokio::spawn(write_lines(rx, writer));

    let mut in_flight = JoinSet::new();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<ToolRequest>(line) {
            Ok(request) => {
                let dispatcher = Arc::clone(&dispatcher);
                let tx = tx.clone();
                in_flight.spawn(async move {
                    let response = dispatcher.dispatch(request).await;
                    send(&tx, &response).await;
                });
            }
            Err(e) => {
                warn!(error = %e, "Malformed request line");
                let response = ToolResponse::invalid_request(format!("Malformed request: {}", e));
                send(&tx, &response).await;
            }
        }
    }

    while in_flight.join_next().await.is_some() {}
    drop(tx);

    output
        .await
        .map_err(|e| std::io::Error::other(format!("output task failed: {}", e)))?
}

async fn send(tx: &mpsc::Sender<String>, response: &ToolResponse) {
    match serde_json::to_string(response) {
        Ok(line) => {
            if tx.send(line).await.is_err() {
                error!(request_id = %response.request_id, "Output closed, dropping response");
            }
        }
        Err(e) => error!(request_id = %response.request_id, error = %e, "Failed to encode response"),
    }
}

async fn write_lines<W>(mut rx: mpsc::Receiver<String>, mut writer: W) -> std::io::Result<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(writer)
}
