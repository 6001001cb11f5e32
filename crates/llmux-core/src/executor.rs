//! The per-request retry coordinator.
//!
//! Walks the matched route list in order; each candidate gets its route's
//! retry budget with exponential backoff, failures are classified and fed to
//! the cooldown engine, every upstream call leaves an attempt record. The
//! first adapter success terminates the walk — and because adapters return
//! before anything reaches the client socket, failover never happens after
//! the first byte.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use llmux_provider::adapter::{AttemptContext, ClientResponse};
use llmux_provider::{ErrorKind, ProxyError};
use llmux_storage::{AttemptRecord, AttemptStatus, RequestRecord, TokenUsage};
use llmux_transform::scan_usage;

use crate::context::RequestContext;
use crate::router::MatchedRoute;
use crate::state::AppState;

pub async fn execute(
    state: &AppState,
    ctx: &RequestContext,
    record: &mut RequestRecord,
) -> Result<ClientResponse, ProxyError> {
    let candidates = state.match_routes(ctx.client_type, ctx.project_id)?;
    let client_type = ctx.client_type.as_str();
    let mut last_err = ProxyError::cooling_down();

    for candidate in candidates {
        if let Some(until) = state
            .cooldown
            .is_in_cooldown(candidate.provider.id, client_type)
            .await
        {
            tracing::debug!(
                provider = %candidate.provider.name,
                %until,
                "candidate skipped: in cooldown"
            );
            continue;
        }

        match try_route(state, ctx, record, &candidate, client_type).await {
            Ok(response) => return Ok(response),
            Err(err) => {
                if err.kind == ErrorKind::ClientDisconnected {
                    return Err(err);
                }
                // Retries are exhausted for this route; a retryable terminal
                // error cools the provider down before failover moves on.
                if err.retryable {
                    let reason = err.cooldown_reason();
                    state
                        .cooldown
                        .set_cooldown(candidate.provider.id, client_type, reason, err.retry_after)
                        .await;
                }
                tracing::warn!(
                    provider = %candidate.provider.name,
                    error = %err,
                    "candidate failed, trying next"
                );
                last_err = err;
            }
        }
    }

    Err(last_err)
}

/// One candidate: attempt 0..=max_retries with backoff sleeps in between.
async fn try_route(
    state: &AppState,
    ctx: &RequestContext,
    record: &mut RequestRecord,
    candidate: &MatchedRoute,
    client_type: &str,
) -> Result<ClientResponse, ProxyError> {
    let mapped_model = candidate
        .route
        .map_model(&ctx.request_model)
        .to_string();
    let mut last_err = ProxyError::internal("no attempt made");

    for attempt_no in 0..=candidate.retry.max_retries {
        if attempt_no > 0 {
            tokio::time::sleep(backoff_interval(&candidate.retry, attempt_no)).await;
        }

        let attempt = Arc::new(Mutex::new(AttemptRecord::begin(
            record.id,
            candidate.route.id,
            candidate.provider.id,
            ctx.is_stream,
        )));
        persist_attempt_insert(state, &attempt).await;
        record.attempt_count += 1;

        let attempt_ctx = AttemptContext {
            client_type: ctx.client_type,
            request_model: ctx.request_model.clone(),
            mapped_model: mapped_model.clone(),
            body: ctx.body.clone(),
            is_stream: ctx.is_stream,
            session_id: ctx.session_id.clone(),
            attempt: Arc::clone(&attempt),
        };

        match candidate.adapter.execute(&attempt_ctx).await {
            Ok(response) => {
                if let ClientResponse::Buffered { body, .. } = &response
                    && let Some(found) = scan_usage(&String::from_utf8_lossy(body))
                {
                    let usage = TokenUsage {
                        input_tokens: found.input_tokens,
                        output_tokens: found.output_tokens,
                        cache_read_tokens: found.cache_read_tokens,
                        cache_write_tokens: 0,
                    };
                    if let Ok(mut guard) = attempt.lock() {
                        guard.usage.merge(usage);
                    }
                    record.usage.merge(usage);
                }

                let attempt_id = {
                    let mut guard = attempt.lock().expect("attempt record poisoned");
                    guard.status = AttemptStatus::Success;
                    guard.id
                };
                persist_attempt_update(state, &attempt).await;

                record.route_id = candidate.route.id;
                record.provider_id = candidate.provider.id;
                record.final_attempt_id = attempt_id;
                record.response_model = Some(mapped_model.clone());

                state
                    .cooldown
                    .record_success(candidate.provider.id, client_type)
                    .await;
                return Ok(response);
            }
            Err(err) => {
                persist_attempt_update(state, &attempt).await;
                if err.kind == ErrorKind::ClientDisconnected || !err.retryable {
                    return Err(err);
                }
                tracing::debug!(
                    provider = %candidate.provider.name,
                    attempt = attempt_no,
                    error = %err,
                    "attempt failed, backing off"
                );
                last_err = err;
            }
        }
    }

    Err(last_err)
}

/// `min(initial * rate^(n-1), max)` before retry attempt n.
fn backoff_interval(retry: &llmux_storage::RetryConfigRow, attempt_no: u32) -> Duration {
    let factor = retry.backoff_rate.max(1.0).powi(attempt_no.saturating_sub(1) as i32);
    let millis = (retry.initial_interval_ms as f64 * factor) as u64;
    Duration::from_millis(millis.min(retry.max_interval_ms))
}

async fn persist_attempt_insert(state: &AppState, attempt: &Arc<Mutex<AttemptRecord>>) {
    let snapshot = match attempt.lock() {
        Ok(guard) => guard.clone(),
        Err(_) => return,
    };
    match state.storage.insert_attempt(&snapshot).await {
        Ok(id) => {
            if let Ok(mut guard) = attempt.lock() {
                guard.id = id;
            }
        }
        Err(err) => tracing::warn!(%err, "attempt insert failed"),
    }
}

async fn persist_attempt_update(state: &AppState, attempt: &Arc<Mutex<AttemptRecord>>) {
    let snapshot = match attempt.lock() {
        Ok(guard) => guard.clone(),
        Err(_) => return,
    };
    if snapshot.id == 0 {
        return;
    }
    if let Err(err) = state.storage.update_attempt(&snapshot).await {
        tracing::warn!(%err, "attempt update failed");
    }
}
