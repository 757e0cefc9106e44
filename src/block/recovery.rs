//! Per-child recovery loop.
//!
//! When a child's first attempt fails, the composite asks the child for its
//! policy stack keyed by the failure's [`ErrorKind`] and walks the stack in
//! order. `attempt` increases monotonically across the whole walk and is
//! what appears in stats records.
//!
//! Retry and repair are gated by the child's side-effect class: a
//! non-idempotent child yields an `unsafe_to_retry` response that preserves
//! the original failure in its details. Repairs derive the next request from
//! the previous child request rather than the parent, so repairs compound
//! across one stack walk.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use super::{Block, BlockCore};
use crate::envelope::{JsonMap, Request, Response, keys, next_id};
use crate::error::ErrorKind;
use crate::policy::RecoveryPolicy;
use crate::sanitize::exception_details;

/// Execute a child node, applying its recovery policies on failure.
pub(crate) async fn execute_child_with_recovery(
    core: &BlockCore,
    parent_request: &Request,
    child: &Arc<dyn Block>,
    node_name: &str,
) -> Response {
    let mut attempt: u32 = 1;
    let mut last_child_request =
        build_child_request(parent_request, child.name(), node_name, attempt, None);
    let first = child.execute(&last_child_request).await;
    if first.success {
        return first;
    }

    let error_kind = first.error_kind.unwrap_or(ErrorKind::InternalError);
    let policies = child.policy_stack(error_kind);
    let mut current_failure = first;

    for policy in policies {
        match policy {
            RecoveryPolicy::Retry {
                max_attempts,
                delay,
            } => {
                if !child.side_effect_class().retry_safe() {
                    return unsafe_to_retry(child.as_ref(), &current_failure);
                }
                while attempt < max_attempts {
                    attempt += 1;
                    if delay > Duration::ZERO {
                        sleep(delay).await;
                    }
                    let retry_request = build_child_request(
                        parent_request,
                        child.name(),
                        node_name,
                        attempt,
                        Some(&last_child_request),
                    );
                    let response = child.execute(&retry_request).await;
                    last_child_request = retry_request;
                    if response.success {
                        return response;
                    }
                    current_failure = response;
                }
            }
            RecoveryPolicy::Repair { repair_function } => {
                if !child.side_effect_class().retry_safe() {
                    return unsafe_to_retry(child.as_ref(), &current_failure);
                }
                let repair = match core.repairs().get(&repair_function) {
                    Ok(repair) => repair,
                    Err(resolution_error) => {
                        let mut details = JsonMap::new();
                        details.insert(
                            "repair_function".into(),
                            Value::String(repair_function.clone()),
                        );
                        details.insert(
                            "error".into(),
                            Value::String(resolution_error.to_string()),
                        );
                        return Response::failure_kind(ErrorKind::RepairExecutionFailed, details);
                    }
                };
                let repaired = match repair(&last_child_request, &current_failure) {
                    Ok(repaired) => repaired,
                    Err(repair_error) => {
                        let mut details = JsonMap::new();
                        details.insert(
                            "repair_function".into(),
                            Value::String(repair_function.clone()),
                        );
                        details.insert(
                            "error".into(),
                            Value::Object(exception_details(&repair_error)),
                        );
                        return Response::failure_kind(ErrorKind::RepairExecutionFailed, details);
                    }
                };
                attempt += 1;
                let repaired_request = build_child_request(
                    parent_request,
                    child.name(),
                    node_name,
                    attempt,
                    Some(&repaired),
                );
                let response = child.execute(&repaired_request).await;
                last_child_request = repaired_request;
                if response.success {
                    return response;
                }
                current_failure = response;
            }
            RecoveryPolicy::Debug => {
                let mut details = JsonMap::new();
                details.insert(
                    "original_error".into(),
                    serde_json::to_value(&current_failure).unwrap_or(Value::Null),
                );
                return Response::failure_kind(ErrorKind::DebugBreakpointHit, details)
                    .with_metadata_map(last_child_request.metadata.clone());
            }
            // Terminal for the stack: escalate the failure unchanged.
            RecoveryPolicy::Bubble => return current_failure,
        }
    }

    current_failure
}

/// Construct a child request, rotating correlation metadata.
///
/// Payload, context, and the metadata chain come from `source` when present
/// (the previous attempt's request, so repairs compound), otherwise from the
/// parent. A fresh `id` and `span_id` are always minted, `parent_span_id`
/// becomes the derived-from envelope's span, and `trace_id`/`run_id` are
/// preserved. The input requests are never mutated.
pub(crate) fn build_child_request(
    parent_request: &Request,
    child_name: &str,
    node_name: &str,
    attempt: u32,
    source_request: Option<&Request>,
) -> Request {
    let base = source_request.unwrap_or(parent_request);
    let mut metadata = base.metadata.clone();

    metadata.insert(keys::ID.to_string(), Value::String(next_id()));
    for key in [keys::TRACE_ID, keys::RUN_ID] {
        metadata
            .entry(key.to_string())
            .or_insert_with(|| Value::String(next_id()));
    }
    if let Some(previous_span) = metadata.get(keys::SPAN_ID).cloned() {
        metadata.insert(keys::PARENT_SPAN_ID.to_string(), previous_span);
    }
    metadata.insert(keys::SPAN_ID.to_string(), Value::String(next_id()));
    metadata.insert(keys::ATTEMPT.to_string(), Value::from(attempt));
    metadata.insert(
        keys::BLOCK_NAME.to_string(),
        Value::String(child_name.to_string()),
    );
    metadata.insert(
        keys::NODE_NAME.to_string(),
        Value::String(node_name.to_string()),
    );

    Request {
        payload: base.payload.clone(),
        context: base.context.clone(),
        metadata,
    }
}

/// Standard response for retry/repair against a non-idempotent child. The
/// original failure is preserved under `details` and the underlying error
/// kind is inherited.
fn unsafe_to_retry(child: &dyn Block, failure: &Response) -> Response {
    let mut details = JsonMap::new();
    details.insert(
        "side_effect_class".into(),
        Value::String(child.side_effect_class().as_str().into()),
    );
    details.insert(
        "failure_reason".into(),
        failure
            .reason
            .as_ref()
            .map(|reason| Value::String(reason.clone()))
            .unwrap_or(Value::Null),
    );
    details.insert(
        "failure_error_type".into(),
        failure
            .error_kind
            .map(|kind| Value::String(kind.as_str().into()))
            .unwrap_or(Value::Null),
    );
    details.insert(
        "failure_details".into(),
        Value::Object(failure.details.clone()),
    );
    Response::failure(
        "unsafe_to_retry",
        failure.error_kind.unwrap_or(ErrorKind::InternalError),
        details,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn child_request_rotates_ids_and_chains_spans() {
        let parent = Request::new(json!({"value": 1}))
            .with_metadata(keys::TRACE_ID, json!("trace-1"))
            .with_metadata(keys::RUN_ID, json!("run-1"))
            .with_metadata(keys::SPAN_ID, json!("span-parent"));

        let first = build_child_request(&parent, "child", "node_a", 1, None);
        assert_eq!(first.metadata_str(keys::TRACE_ID), Some("trace-1"));
        assert_eq!(first.metadata_str(keys::PARENT_SPAN_ID), Some("span-parent"));
        assert_eq!(first.metadata[keys::ATTEMPT], json!(1));
        assert_eq!(first.metadata_str(keys::BLOCK_NAME), Some("child"));
        assert_eq!(first.metadata_str(keys::NODE_NAME), Some("node_a"));
        assert_ne!(
            first.metadata_str(keys::ID),
            parent.metadata_str(keys::ID)
        );

        let second = build_child_request(&parent, "child", "node_a", 2, Some(&first));
        // The second attempt chains off the first attempt's span.
        assert_eq!(
            second.metadata_str(keys::PARENT_SPAN_ID),
            first.metadata_str(keys::SPAN_ID)
        );
        assert_eq!(second.metadata_str(keys::TRACE_ID), Some("trace-1"));
        assert_ne!(second.metadata_str(keys::ID), first.metadata_str(keys::ID));
        assert_eq!(second.metadata[keys::ATTEMPT], json!(2));
    }

    #[test]
    fn child_request_copies_payload_from_source() {
        let parent = Request::new(json!({"value": "original"}));
        let mut amended = parent.clone();
        amended.payload = json!({"value": "repaired"});

        let request = build_child_request(&parent, "child", "node_a", 2, Some(&amended));
        assert_eq!(request.payload, json!({"value": "repaired"}));
    }
}
