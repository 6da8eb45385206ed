use super::{
    EngineError, EngineHandle, EngineStep, FinishReason, SamplingParams, SequenceOutput,
    StepStream, MAX_N,
};
use crate::openai::requests::{Message, Role};
use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

fn default_chunk_chars() -> usize {
    4
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EchoConfig {
    /// Characters appended to every unfinished sequence per step.
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    /// Pause between two steps.
    #[serde(default)]
    pub delay_ms: u64,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            chunk_chars: default_chunk_chars(),
            delay_ms: 0,
        }
    }
}

/// Replica that streams the last user message back, a few characters at a
/// time, on every requested sequence. A reply longer than `max_tokens`
/// characters is cut and finishes with `length`.
pub struct EchoEngine {
    name: String,
    config: EchoConfig,
    live: Arc<Mutex<HashSet<String>>>,
}

impl EchoEngine {
    pub fn new(name: impl Into<String>, config: EchoConfig) -> Self {
        Self {
            name: name.into(),
            config,
            live: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn running(&self) -> usize {
        self.live.lock().len()
    }
}

struct EchoRun {
    request_id: String,
    reply: Vec<char>,
    target: usize,
    reason: FinishReason,
    emitted: Vec<usize>,
    chunk_chars: usize,
    delay: Duration,
    step: usize,
    done: bool,
    live: Arc<Mutex<HashSet<String>>>,
}

impl EchoRun {
    fn next_step(&mut self) -> EngineStep {
        self.step += 1;
        let mut outputs = Vec::with_capacity(self.emitted.len());
        for (index, emitted) in self.emitted.iter_mut().enumerate() {
            *emitted = (*emitted + self.chunk_chars).min(self.target);
            let text: String = self.reply[..*emitted].iter().collect();
            let finish_reason = (*emitted == self.target).then_some(self.reason);
            outputs.push(SequenceOutput::new(index, text, finish_reason));
        }
        if outputs.iter().all(SequenceOutput::is_finished) {
            self.done = true;
            self.live.lock().remove(&self.request_id);
        }
        outputs
    }
}

#[async_trait]
impl EngineHandle for EchoEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        request_id: &str,
        history: Vec<Message>,
        params: SamplingParams,
    ) -> Result<StepStream, EngineError> {
        if params.n == 0 || params.n > MAX_N {
            return Err(EngineError::Rejected {
                request_id: request_id.to_string(),
                reason: format!("between 1 and {} sequences must be requested", MAX_N),
            });
        }
        if !self.live.lock().insert(request_id.to_string()) {
            return Err(EngineError::Rejected {
                request_id: request_id.to_string(),
                reason: "request id is already running".to_string(),
            });
        }

        let reply: Vec<char> = history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.chars().collect())
            .unwrap_or_default();
        let (target, reason) = if reply.len() <= params.max_tokens {
            (reply.len(), FinishReason::Stop)
        } else {
            (params.max_tokens, FinishReason::Length)
        };

        let run = EchoRun {
            request_id: request_id.to_string(),
            reply,
            target,
            reason,
            emitted: vec![0; params.n],
            chunk_chars: self.config.chunk_chars.max(1),
            delay: Duration::from_millis(self.config.delay_ms),
            step: 0,
            done: false,
            live: self.live.clone(),
        };

        Ok(Box::pin(stream::unfold(run, |mut run| async move {
            if run.done {
                return None;
            }
            if run.step > 0 && !run.delay.is_zero() {
                tokio::time::sleep(run.delay).await;
            }
            let still_live = run.live.lock().contains(&run.request_id);
            if !still_live {
                debug!("echo stream for {} stopped after abort", run.request_id);
                return None;
            }
            let step = run.next_step();
            Some((Ok(step), run))
        })))
    }

    async fn abort(&self, request_id: &str) {
        if self.live.lock().remove(request_id) {
            debug!("{} aborted running request {}", self.name, request_id);
        }
    }
}
