//! Line-delimited JSON-RPC over a byte stream (stdin/stdout).
//!
//! The whole stream is one session: a single stateful transport, activated
//! up front since there is only one peer.  Each input line is a message or
//! batch; each answer is written as one line.  Server events emitted while
//! a request runs (progress, log messages) are interleaved as their own
//! lines.  Logs never go to the output stream.

use std::pin::pin;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use mr_sessions::SessionId;

use crate::mcp::protocol::{JsonRpcError, JsonRpcResponse, Payload};
use crate::state::AppState;

/// What the stdio loop saw before the input ended.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StdioSummary {
    pub lines: usize,
    pub responses: usize,
    pub events: usize,
}

/// Drive `reader` to EOF, writing responses and server events to `writer`.
///
/// Returns once the input ends (or the transport is closed under it) and
/// every pending line has been flushed.
pub async fn serve<R, W>(state: &AppState, reader: R, writer: &mut W) -> anyhow::Result<StdioSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let session_id = SessionId::generate();
    let transport = state.transports.stateful(session_id.clone());
    transport.begin_initialize()?;
    transport.activate()?;
    let subscription = transport.subscribe(None)?;
    tracing::info!(session_id = %session_id, "stdio session started");

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // ── Reader: one message or batch per line ────────────────────────
    let requests = {
        let tx = tx.clone();
        let transport = transport.clone();
        async move {
            let mut lines = reader.lines();
            let mut seen = 0usize;
            let mut answered = 0usize;
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed, ending session");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                seen += 1;

                let responses = match Payload::parse(line.as_bytes()) {
                    Err(e) => vec![JsonRpcResponse::failure(Value::Null, JsonRpcError::parse_error(e))],
                    Ok(Payload::Batch(items)) if items.is_empty() => {
                        vec![JsonRpcResponse::failure(Value::Null, JsonRpcError::invalid_request("empty batch"))]
                    }
                    Ok(payload) => {
                        let batch = matches!(payload, Payload::Batch(_));
                        match transport
                            .exclusive(state.server.handle_all(&transport, payload.into_values()))
                            .await
                        {
                            Ok(responses) if batch && !responses.is_empty() => {
                                answered += responses.len();
                                if !send_json(&tx, &responses) {
                                    break;
                                }
                                continue;
                            }
                            Ok(responses) => responses,
                            Err(e) => {
                                tracing::info!(error = %e, "stdio transport closed, ending session");
                                break;
                            }
                        }
                    }
                };

                answered += responses.len();
                if !responses.iter().all(|r| send_json(&tx, r)) {
                    break;
                }
            }
            // Ends the event forwarder below.
            transport.abort();
            (seen, answered)
        }
    };

    // ── Server events ────────────────────────────────────────────────
    let events = {
        let tx = tx.clone();
        async move {
            let mut stream = pin!(subscription.into_stream());
            let mut forwarded = 0usize;
            while let Some(entry) = stream.next().await {
                if !send_json(&tx, &entry.payload) {
                    break;
                }
                forwarded += 1;
            }
            forwarded
        }
    };
    drop(tx);

    // ── Writer ───────────────────────────────────────────────────────
    let output = async {
        while let Some(line) = rx.recv().await {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    };

    let ((lines, responses), events, written) = tokio::join!(requests, events, output);
    written?;

    tracing::info!(session_id = %session_id, lines, responses, events, "stdio session ended");
    Ok(StdioSummary { lines, responses, events })
}

/// `false` once the writer side is gone.
fn send_json<T: serde::Serialize>(tx: &mpsc::UnboundedSender<String>, value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(line) => tx.send(line).is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode stdio output line");
            true
        }
    }
}
