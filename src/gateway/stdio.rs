//! Newline-delimited JSON-RPC over stdin/stdout as a single implicit session.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::error::ServerError;
use crate::gateway::registry::SessionRegistry;
use crate::gateway::session::{InboundMessage, SessionContext, SessionHandler};

const OUTBOUND_CAPACITY: usize = 64;

/// Serve one session on the process's stdin and stdout until stdin closes.
pub async fn run_stdio(
    registry: Arc<SessionRegistry>,
    handler: Arc<dyn SessionHandler>,
    context: SessionContext,
) -> Result<(), ServerError> {
    serve_lines(
        tokio::io::stdin(),
        tokio::io::stdout(),
        registry,
        handler,
        context,
    )
    .await
}

/// Read one JSON-RPC message per line from `input`; write one reply per line to `output`.
///
/// Replies still in flight when `input` ends are written before returning.
pub async fn serve_lines<R, W>(
    input: R,
    output: W,
    registry: Arc<SessionRegistry>,
    handler: Arc<dyn SessionHandler>,
    context: SessionContext,
) -> Result<(), ServerError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let session_id = registry.open(context, outbound_tx, handler);
    let writer = tokio::spawn(write_lines(output, outbound_rx));

    let mut lines = BufReader::new(input).lines();
    let read_result = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(e) => break Err(ServerError::Io(e)),
        };
        if line.trim().is_empty() {
            continue;
        }
        if let Err(e) = registry
            .dispatch(session_id.as_str(), InboundMessage::new(line))
            .await
        {
            tracing::warn!(session_id = %session_id, error = %e, "Stdio session ended early");
            break Ok(());
        }
    };

    // Closing drops the worker's inbound sender; the worker drains what is
    // queued, then drops the outbound sender, which ends the writer.
    registry.close(session_id.as_str());
    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(ServerError::Io(e)),
        Err(e) => {
            return Err(ServerError::StartupFailed {
                name: "stdio".to_string(),
                reason: format!("writer task failed: {e}"),
            });
        }
    }
    read_result
}

async fn write_lines<W>(mut output: W, mut outbound: mpsc::Receiver<String>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        output.write_all(message.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    output.shutdown().await
}
