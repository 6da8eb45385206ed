//! Shared fixtures for the gateway tests.

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vllm_router::engine::echo::{EchoConfig, EchoEngine};
use vllm_router::engine::{
    EngineError, EngineHandle, EngineStep, FinishReason, SamplingParams, SequenceOutput,
    StepStream,
};
use vllm_router::openai::openai_server::router;
use vllm_router::openai::requests::Message;
use vllm_router::openai::OpenAIServerData;
use vllm_router::Scheduler;

/// Emits one partial step per sequence and then fails.
#[derive(Default)]
pub struct FailingEngine {
    pub aborts: AtomicUsize,
    pub aborted_ids: Mutex<Vec<String>>,
}

impl FailingEngine {
    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineHandle for FailingEngine {
    fn name(&self) -> &str {
        "failing"
    }

    async fn generate(
        &self,
        _request_id: &str,
        _history: Vec<Message>,
        params: SamplingParams,
    ) -> Result<StepStream, EngineError> {
        let first: EngineStep = (0..params.n)
            .map(|i| SequenceOutput::new(i, "par", None))
            .collect();
        let steps = vec![
            Ok(first),
            Err(EngineError::Generation("device lost".to_string())),
        ];
        Ok(Box::pin(stream::iter(steps)))
    }

    async fn abort(&self, request_id: &str) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.aborted_ids.lock().push(request_id.to_string());
    }
}

/// Finishes index 0 right away and leaves index 1 truncated by length.
pub struct MixedEngine;

#[async_trait]
impl EngineHandle for MixedEngine {
    fn name(&self) -> &str {
        "mixed"
    }

    async fn generate(
        &self,
        _request_id: &str,
        _history: Vec<Message>,
        _params: SamplingParams,
    ) -> Result<StepStream, EngineError> {
        let steps: Vec<Result<EngineStep, EngineError>> = vec![
            Ok(vec![
                SequenceOutput::new(0, "ok", Some(FinishReason::Stop)),
                SequenceOutput::new(1, "lo", None),
            ]),
            Ok(vec![
                SequenceOutput::new(0, "ok", Some(FinishReason::Stop)),
                SequenceOutput::new(1, "long", Some(FinishReason::Length)),
            ]),
        ];
        Ok(Box::pin(stream::iter(steps)))
    }

    async fn abort(&self, _request_id: &str) {}
}

pub fn echo(name: &str) -> Arc<dyn EngineHandle> {
    Arc::new(EchoEngine::new(name, EchoConfig::default()))
}

pub fn app_with(scheduler: Arc<Scheduler>) -> axum::Router {
    let data = OpenAIServerData {
        scheduler,
        owned_by: "tests".to_string(),
        keep_alive: Duration::from_secs(5),
    };
    router(Arc::new(data))
}

/// Waits for streaming tasks to hand their engines back.
pub async fn wait_idle(scheduler: &Scheduler) {
    for _ in 0..200 {
        if scheduler.in_flight() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{} request(s) still in flight", scheduler.in_flight());
}

/// `data:` payloads of an SSE body, keep-alive comments excluded.
pub fn sse_payloads(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.trim_start().to_string())
        .collect()
}
