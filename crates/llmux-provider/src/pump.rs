//! The line-buffered streaming pump.
//!
//! Reads upstream bytes, reassembles newline-terminated SSE lines, pushes
//! each through the per-response transform, and forwards the result to the
//! client channel. Only the pump writes toward the client. When the client
//! side goes away it keeps draining upstream briefly so the final token
//! usage counters are still captured, then aborts.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use llmux_protocol::sse::LineBuffer;
use llmux_storage::TokenUsage;
use llmux_transform::scan_usage;

use crate::adapter::StreamOutcome;

const CLIENT_CHANNEL_DEPTH: usize = 16;
const DISCONNECT_DRAIN_BUDGET: Duration = Duration::from_secs(2);

/// Spawn the pump task. `transform` maps one upstream line (trailing newline
/// included) to the bytes the client should see; empty output drops the line.
pub fn spawn_stream_pump<F>(
    mut upstream: mpsc::Receiver<Bytes>,
    mut transform: F,
) -> (mpsc::Receiver<Bytes>, oneshot::Receiver<StreamOutcome>)
where
    F: FnMut(&str) -> Vec<u8> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Bytes>(CLIENT_CHANNEL_DEPTH);
    let (done_tx, done_rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut lines = LineBuffer::new();
        let mut usage = TokenUsage::default();
        let mut client_disconnected = false;

        'pump: while let Some(chunk) = upstream.recv().await {
            for line in lines.push(&chunk) {
                let out = transform(&line);
                fold_usage(&mut usage, &out);
                if out.is_empty() {
                    continue;
                }
                if tx.send(Bytes::from(out)).await.is_err() {
                    client_disconnected = true;
                    break 'pump;
                }
            }
        }

        if client_disconnected {
            drain_for_usage(&mut upstream, &mut lines, &mut transform, &mut usage).await;
        } else if let Some(rest) = lines.finish() {
            let out = transform(&rest);
            fold_usage(&mut usage, &out);
            if !out.is_empty() {
                let _ = tx.send(Bytes::from(out)).await;
            }
        }

        let _ = done_tx.send(StreamOutcome {
            client_disconnected,
            usage,
        });
    });

    (rx, done_rx)
}

/// Best-effort: the client is gone but the final usage chunk may still be in
/// flight. Bounded by a small time budget, then the receiver drops and the
/// upstream transfer is canceled.
async fn drain_for_usage<F>(
    upstream: &mut mpsc::Receiver<Bytes>,
    lines: &mut LineBuffer,
    transform: &mut F,
    usage: &mut TokenUsage,
) where
    F: FnMut(&str) -> Vec<u8> + Send,
{
    let deadline = tokio::time::Instant::now() + DISCONNECT_DRAIN_BUDGET;
    loop {
        let next = tokio::time::timeout_at(deadline, upstream.recv()).await;
        let Ok(Some(chunk)) = next else { break };
        for line in lines.push(&chunk) {
            let out = transform(&line);
            fold_usage(usage, &out);
        }
    }
}

/// Scan transformed output for usage counters. The output is client-dialect
/// SSE, so every `data:` line is a candidate.
fn fold_usage(usage: &mut TokenUsage, out: &[u8]) {
    let Ok(text) = std::str::from_utf8(out) else {
        return;
    };
    for line in text.lines() {
        let Some(payload) = line.strip_prefix("data:").map(str::trim_start) else {
            continue;
        };
        if let Some(found) = scan_usage(payload) {
            usage.merge(TokenUsage {
                input_tokens: found.input_tokens,
                output_tokens: found.output_tokens,
                cache_read_tokens: found.cache_read_tokens,
                cache_write_tokens: 0,
            });
        }
    }
}
