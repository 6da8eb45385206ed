//! The contract every engine replica fulfils.
//!
//! An engine receives a request id, the conversation history and sampling
//! parameters, and answers with a stream of steps. Each step carries, for
//! every parallel sequence, the full text accumulated so far and an optional
//! finish reason. Tokenization, prompt templating and sampling all live
//! behind this trait.

use crate::openai::requests::Message;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use thiserror::Error;

pub mod echo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Stop,
    Length,
    /// Never reported by an engine; synthesized when generation fails.
    Abort,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::Abort => "abort",
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parallel sequence as observed at a single engine step.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceOutput {
    pub index: usize,
    /// Full text accumulated since the start of generation, not a delta.
    pub text: String,
    pub finish_reason: Option<FinishReason>,
}

impl SequenceOutput {
    pub fn new(index: usize, text: impl Into<String>, finish_reason: Option<FinishReason>) -> Self {
        Self {
            index,
            text: text.into(),
            finish_reason,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finish_reason.is_some()
    }
}

pub const DEFAULT_MAX_TOKENS: usize = 1024;
pub const DEFAULT_TEMPERATURE: f32 = 0.75;
pub const DEFAULT_TOP_P: f32 = 0.95;
/// Upper bound on parallel sequences per request.
pub const MAX_N: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    /// Number of parallel sequences to generate.
    pub n: usize,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            n: 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine rejected request `{request_id}`: {reason}")]
    Rejected { request_id: String, reason: String },
    #[error("generation failed: {0}")]
    Generation(String),
}

/// All sequences of one request at one engine step.
pub type EngineStep = Vec<SequenceOutput>;

pub type StepStream = Pin<Box<dyn Stream<Item = Result<EngineStep, EngineError>> + Send>>;

#[async_trait]
pub trait EngineHandle: Send + Sync {
    /// Human readable name used in logs.
    fn name(&self) -> &str;

    async fn generate(
        &self,
        request_id: &str,
        history: Vec<Message>,
        params: SamplingParams,
    ) -> Result<StepStream, EngineError>;

    /// Stop generating for `request_id`. Must be safe to call after the
    /// request already finished, and for ids the engine never saw.
    async fn abort(&self, request_id: &str);
}
