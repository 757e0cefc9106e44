//! The LLM primitive block.
//!
//! A stateless atomic block wrapping one structured-output LLM interaction.
//! Declared idempotent: a repeated call with the same input is safe, so
//! retry and repair policies may re-execute it.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{
    ChatMessage, LlmRequest, LlmStatsAdapter, LlmStatus, StructuredOutputExecutor,
};
use crate::block::{Block, BlockCore, SideEffectClass};
use crate::envelope::{JsonMap, Request, Response, keys};
use crate::error::{BlockError, ErrorKind};
use crate::policy::RecoveryPolicy;
use crate::registry::ADD_VALIDATION_FEEDBACK;
use crate::sanitize::sanitize_details;
use crate::stats::{BlockAttemptRecord, Estimate, StatsStore};

/// Model used when the caller does not override one.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Atomic block that sends a prompt to a structured-output executor and
/// returns the validated output as response data.
pub struct LlmPrimitive {
    core: BlockCore,
    system_prompt: String,
    output_schema: Value,
    model: String,
    temperature: f32,
    api_base: Option<String>,
    api_key: Option<String>,
    executor: Arc<dyn StructuredOutputExecutor>,
}

impl LlmPrimitive {
    /// Block type label for LLM primitives.
    pub const BLOCK_TYPE: &'static str = "llm_primitive";

    /// Create an LLM primitive with the default model and temperature 0.
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        output_schema: Value,
        executor: Arc<dyn StructuredOutputExecutor>,
    ) -> Self {
        Self {
            core: BlockCore::new(name, Self::BLOCK_TYPE, SideEffectClass::Idempotent),
            system_prompt: system_prompt.into(),
            output_schema,
            model: DEFAULT_MODEL.into(),
            temperature: 0.0,
            api_base: None,
            api_key: None,
            executor,
        }
    }

    /// Override the model, builder style.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the sampling temperature, builder style.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Route requests through a proxy base URL, builder style.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    /// Supply a provider API key, builder style.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Override the stats store, builder style.
    pub fn with_stats_store(mut self, store: Arc<dyn StatsStore>) -> Self {
        self.core.set_stats_store(store);
        self
    }

    /// Normalize the request payload into a prompt string: a bare string,
    /// or a map carrying one of `prompt`/`content`/`input`.
    fn coerce_payload(&self, payload: &Value) -> Result<String, BlockError> {
        match payload {
            Value::String(prompt) => Ok(prompt.clone()),
            Value::Object(map) => ["prompt", "content", "input"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .map(str::to_string)
                .ok_or_else(|| {
                    BlockError::Validation(
                        "llm primitive payload must be a string or a prompt map".into(),
                    )
                }),
            _ => Err(BlockError::Validation(
                "llm primitive payload must be a string or a prompt map".into(),
            )),
        }
    }

    fn build_messages(&self, prompt: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if !self.system_prompt.is_empty() {
            messages.push(ChatMessage::system(self.system_prompt.clone()));
        }
        messages.push(ChatMessage::user(prompt));
        messages
    }

    fn build_execution_id(&self) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}", self.core.name(), &suffix[..8])
    }

    fn build_llm_request(&self, request: &Request, prompt: &str, execution_id: &str) -> LlmRequest {
        let mut metadata = request.metadata.clone();
        metadata
            .entry(keys::BLOCK_NAME.to_string())
            .or_insert_with(|| Value::String(self.core.name().to_string()));
        LlmRequest {
            messages: self.build_messages(prompt),
            output_schema: self.output_schema.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            execution_id: execution_id.to_string(),
            attempt: 1,
            metadata,
            api_base: self.api_base.clone(),
            api_key: self.api_key.clone(),
        }
    }

    fn response_metadata(&self, llm_request: &LlmRequest, usage: Option<&super::LlmUsage>) -> JsonMap {
        let mut metadata = JsonMap::new();
        metadata.insert("model".into(), Value::String(self.model.clone()));
        metadata.insert(
            "llm.execution_id".into(),
            Value::String(llm_request.execution_id.clone()),
        );
        metadata.insert("llm.attempt".into(), Value::from(llm_request.attempt));
        if let Some(usage) = usage {
            metadata.insert(
                "llm_usage".into(),
                serde_json::to_value(usage).unwrap_or(Value::Null),
            );
            if let Some(requests) = usage.requests {
                metadata.insert("llm_calls".into(), Value::from(requests));
                metadata.insert(
                    "llm.retry_count".into(),
                    Value::from(requests.saturating_sub(1)),
                );
            }
            if let Some(input_tokens) = usage.input_tokens {
                metadata.insert("input_tokens".into(), Value::from(input_tokens));
            }
            if let Some(output_tokens) = usage.output_tokens {
                metadata.insert("output_tokens".into(), Value::from(output_tokens));
            }
        }
        metadata
    }
}

#[async_trait]
impl Block for LlmPrimitive {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }

    async fn execute_primitive(&self, request: &Request) -> Result<Response, BlockError> {
        let prompt = match self.coerce_payload(&request.payload) {
            Ok(prompt) => prompt,
            Err(coerce_error) => {
                return Ok(Response::failure(
                    "invalid_payload",
                    ErrorKind::SchemaError,
                    crate::sanitize::exception_details(&coerce_error),
                ));
            }
        };

        let execution_id = self.build_execution_id();
        let llm_request = self.build_llm_request(request, &prompt, &execution_id);
        let llm_response = self.executor.execute(&llm_request).await;
        let metadata = self.response_metadata(&llm_request, llm_response.usage.as_ref());

        if llm_response.status == LlmStatus::Success {
            let mut response = Response::success(llm_response.data.unwrap_or(Value::Null));
            response.metadata.extend(metadata);
            return Ok(response);
        }

        let reason = llm_response
            .reason
            .unwrap_or_else(|| "llm_execution_failed".to_string());
        let error_kind = llm_response.error_kind.unwrap_or(ErrorKind::InternalError);
        let mut failure = Response::failure(
            reason,
            error_kind,
            sanitize_details(&llm_response.error_details),
        );
        failure.metadata.extend(metadata);
        Ok(failure)
    }

    fn policy_stack(&self, error: ErrorKind) -> Vec<RecoveryPolicy> {
        match error {
            ErrorKind::SchemaError => vec![
                RecoveryPolicy::retry(2),
                RecoveryPolicy::repair(ADD_VALIDATION_FEEDBACK),
                RecoveryPolicy::repair(ADD_VALIDATION_FEEDBACK),
                RecoveryPolicy::Bubble,
            ],
            ErrorKind::RateLimitError => vec![
                RecoveryPolicy::retry_with_delay(3, Duration::from_secs(2)),
                RecoveryPolicy::Bubble,
            ],
            _ => vec![RecoveryPolicy::Bubble],
        }
    }

    fn attempt_record(
        &self,
        request: &Request,
        response: &Response,
        duration_ms: f64,
    ) -> BlockAttemptRecord {
        let mut record =
            crate::block::base_attempt_record(&self.stats_identity(), request, response, duration_ms);
        record.model = Some(
            response
                .metadata
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(&self.model)
                .to_string(),
        );
        record.llm_calls = Some(
            response
                .metadata
                .get("llm_calls")
                .and_then(Value::as_u64)
                .unwrap_or(1),
        );
        record.input_tokens = response.metadata.get("input_tokens").and_then(Value::as_u64);
        record.output_tokens = response
            .metadata
            .get("output_tokens")
            .and_then(Value::as_u64);
        record.block_executions = Some(1);
        record
    }

    fn estimate_execution(&self, request: &Request) -> Estimate {
        let identity = self.stats_identity();
        let prompt = self.coerce_payload(&request.payload).unwrap_or_default();
        let estimated_input_tokens = prompt.len() / 4;
        let prior = Estimate::from_prior(&identity)
            .with_time(750.0, 400.0)
            .with_cost(0.01, 0.02)
            .with_expected_calls(1.0, 1.0)
            .with_note(format!("estimated_input_tokens={estimated_input_tokens}"))
            .with_note("estimated_output_tokens=256")
            .with_note("pricing_unknown_prior");
        LlmStatsAdapter::new(self.core.stats_store()).estimate(&identity, prior)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, LlmUsage};
    use crate::stats::{EstimateSource, InMemoryStatsStore};
    use serde_json::json;

    struct CannedExecutor {
        response: LlmResponseFactory,
    }

    type LlmResponseFactory = Box<dyn Fn() -> LlmResponse + Send + Sync>;

    #[async_trait]
    impl StructuredOutputExecutor for CannedExecutor {
        async fn execute(&self, _request: &LlmRequest) -> LlmResponse {
            (self.response)()
        }
    }

    fn primitive_with(
        response: impl Fn() -> LlmResponse + Send + Sync + 'static,
    ) -> LlmPrimitive {
        LlmPrimitive::new(
            "summarize",
            "You summarize text.",
            json!({"type": "object"}),
            Arc::new(CannedExecutor {
                response: Box::new(response),
            }),
        )
        .with_stats_store(Arc::new(InMemoryStatsStore::new()))
    }

    #[test]
    fn coerce_accepts_string_and_prompt_maps() {
        let primitive = primitive_with(|| LlmResponse::success(json!({})));
        assert_eq!(
            primitive.coerce_payload(&json!("plain prompt")).unwrap(),
            "plain prompt"
        );
        assert_eq!(
            primitive
                .coerce_payload(&json!({"prompt": "from prompt"}))
                .unwrap(),
            "from prompt"
        );
        assert_eq!(
            primitive
                .coerce_payload(&json!({"content": "from content"}))
                .unwrap(),
            "from content"
        );
        assert_eq!(
            primitive
                .coerce_payload(&json!({"input": "from input"}))
                .unwrap(),
            "from input"
        );
        assert!(primitive.coerce_payload(&json!(42)).is_err());
        assert!(primitive.coerce_payload(&json!({"other": 1})).is_err());
    }

    #[test]
    fn execution_id_embeds_block_name() {
        let primitive = primitive_with(|| LlmResponse::success(json!({})));
        let execution_id = primitive.build_execution_id();
        assert!(execution_id.starts_with("summarize-"));
        assert_eq!(execution_id.len(), "summarize-".len() + 8);
    }

    #[test]
    fn messages_include_system_prompt_when_present() {
        let primitive = primitive_with(|| LlmResponse::success(json!({})));
        let messages = primitive.build_messages("hello");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].content, "hello");
    }

    #[tokio::test]
    async fn success_carries_usage_metadata() {
        let primitive = primitive_with(|| {
            LlmResponse::success(json!({"title": "ok"})).with_usage(LlmUsage {
                requests: Some(2),
                input_tokens: Some(100),
                output_tokens: Some(30),
            })
        });

        let response = primitive
            .execute(&Request::new(json!({"prompt": "summarize this"})))
            .await;
        assert!(response.success);
        assert_eq!(response.data, Some(json!({"title": "ok"})));
        assert_eq!(response.metadata["llm_calls"], json!(2));
        assert_eq!(response.metadata["llm.retry_count"], json!(1));
        assert_eq!(response.metadata["input_tokens"], json!(100));
        assert_eq!(response.metadata["model"], json!(DEFAULT_MODEL));
    }

    #[tokio::test]
    async fn invalid_payload_maps_to_schema_error_kind() {
        let primitive = primitive_with(|| LlmResponse::success(json!({})));
        let response = primitive.execute(&Request::new(json!(["not", "valid"]))).await;
        assert!(!response.success);
        assert_eq!(response.reason.as_deref(), Some("invalid_payload"));
        assert_eq!(response.error_kind, Some(ErrorKind::SchemaError));
    }

    #[test]
    fn schema_error_stack_retries_then_repairs() {
        let primitive = primitive_with(|| LlmResponse::success(json!({})));
        let stack = primitive.policy_stack(ErrorKind::SchemaError);
        assert_eq!(stack.len(), 4);
        assert!(matches!(stack[0], RecoveryPolicy::Retry { .. }));
        assert!(matches!(stack[1], RecoveryPolicy::Repair { .. }));
        assert!(matches!(stack[2], RecoveryPolicy::Repair { .. }));
        assert_eq!(stack[3], RecoveryPolicy::Bubble);
    }

    #[test]
    fn cold_start_estimate_comes_from_prompt_prior() {
        let primitive = primitive_with(|| LlmResponse::success(json!({})));
        let request = Request::new(json!({"prompt": "p".repeat(400)}));
        let estimate = primitive.estimate_execution(&request);
        assert_eq!(estimate.estimate_source, EstimateSource::Prior);
        assert!((estimate.time_ms_mean - 750.0).abs() < 1e-9);
        assert!((estimate.expected_llm_calls - 1.0).abs() < 1e-9);
        assert!(
            estimate
                .notes
                .iter()
                .any(|note| note == "estimated_input_tokens=100")
        );
    }
}
