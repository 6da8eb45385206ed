//! Lifetime of one admitted request.
//!
//! A [`GenerationScope`] exists from a successful admit until the engine has
//! been told to abort the request and the scheduler has released it. Both
//! happen exactly once: through [`GenerationScope::finish`] on every path the
//! code controls, or from `Drop` when the owning future is cancelled or
//! unwinds.

use super::aggregator::{self, DeltaTracker};
use super::requests::Message;
use super::responses::{ChatCompletionChunk, Choice, ChoiceData};
use super::streaming::ChatResponse;
use crate::engine::{EngineHandle, FinishReason, SamplingParams, SequenceOutput};
use crate::scheduler::{Scheduler, SchedulerError};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

pub struct GenerationScope {
    request_id: String,
    engine: Arc<dyn EngineHandle>,
    scheduler: Arc<Scheduler>,
    aborted: bool,
    released: bool,
}

impl GenerationScope {
    pub fn admit(
        scheduler: &Arc<Scheduler>,
        request_id: &str,
        model: &str,
    ) -> Result<Self, SchedulerError> {
        let engine = scheduler.admit(request_id, model)?;
        Ok(Self {
            request_id: request_id.to_string(),
            engine,
            scheduler: scheduler.clone(),
            aborted: false,
            released: false,
        })
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn engine(&self) -> &Arc<dyn EngineHandle> {
        &self.engine
    }

    /// Aborts on the engine, then releases. The abort runs on its own task,
    /// so it still completes if this future is dropped while waiting on it.
    pub async fn finish(mut self, failed: bool) {
        let abort = tokio::spawn(abort_on(self.engine.clone(), self.request_id.clone()));
        self.aborted = true;
        if let Err(e) = abort.await {
            error!("Abort of request {} did not complete: {}", self.request_id, e);
        }
        self.released = true;
        self.scheduler.release(&self.request_id, failed);
    }
}

async fn abort_on(engine: Arc<dyn EngineHandle>, request_id: String) {
    engine.abort(&request_id).await;
}

impl Drop for GenerationScope {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            warn!(
                "Request {} left its generation scope early, releasing as failed",
                self.request_id
            );
            self.scheduler.release(&self.request_id, true);
        }
        if !self.aborted {
            self.aborted = true;
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(abort_on(self.engine.clone(), self.request_id.clone()));
                }
                Err(_) => error!(
                    "No async runtime to abort request {} on engine {}",
                    self.request_id,
                    self.engine.name()
                ),
            }
        }
    }
}

/// Non-streaming generation. Returns the finished sequences, or nothing when
/// the engine failed.
pub async fn complete(
    scope: GenerationScope,
    history: Vec<Message>,
    params: SamplingParams,
) -> Vec<SequenceOutput> {
    let outcome = match scope
        .engine()
        .generate(scope.request_id(), history, params)
        .await
    {
        Ok(steps) => aggregator::collect(steps).await,
        Err(e) => Err(e),
    };

    let (outputs, failed) = match outcome {
        Ok(outputs) => (outputs, false),
        Err(e) => {
            error!("Request {} failed during generation: {}", scope.request_id(), e);
            (Vec::new(), true)
        }
    };
    scope.finish(failed).await;
    outputs
}

/// Identity shared by every chunk of one streamed response.
#[derive(Debug, Clone)]
pub struct ChunkMeta {
    pub id: String,
    pub model: String,
    pub created: u64,
}

impl ChunkMeta {
    fn chunk(&self, choices: Vec<Choice>) -> ChatCompletionChunk {
        ChatCompletionChunk::new(self.id.clone(), self.model.clone(), self.created, choices)
    }
}

enum StreamEnd {
    Completed,
    EngineFailed,
    ClientGone,
}

/// Streaming generation. Forwards one chunk per engine step, then always
/// exactly one [`ChatResponse::Done`]. Stops early when `hangup` fires.
pub async fn stream(
    scope: GenerationScope,
    history: Vec<Message>,
    params: SamplingParams,
    meta: ChunkMeta,
    tx: flume::Sender<ChatResponse>,
    mut hangup: oneshot::Receiver<()>,
) {
    let mut tracker = DeltaTracker::new(params.n);
    let mut announced = HashSet::new();
    let mut steps_seen = 0usize;

    let end = match scope
        .engine()
        .generate(scope.request_id(), history, params)
        .await
    {
        Err(e) => {
            error!("Request {} rejected by engine: {}", scope.request_id(), e);
            StreamEnd::EngineFailed
        }
        Ok(mut steps) => loop {
            let step = tokio::select! {
                step = steps.next() => step,
                _ = &mut hangup => break StreamEnd::ClientGone,
            };
            match step {
                None => break StreamEnd::Completed,
                Some(Err(e)) => {
                    error!("Request {} stream failed: {}", scope.request_id(), e);
                    break StreamEnd::EngineFailed;
                }
                Some(Ok(outputs)) => {
                    steps_seen += 1;
                    let choices = tracker
                        .advance(&outputs)
                        .into_iter()
                        .map(|delta| Choice {
                            index: delta.index,
                            delta: ChoiceData {
                                role: announced
                                    .insert(delta.index)
                                    .then(|| "assistant".to_string()),
                                content: delta.text,
                            },
                            finish_reason: delta.finish_reason,
                        })
                        .collect();
                    if tx.send(ChatResponse::Chunk(meta.chunk(choices))).is_err() {
                        break StreamEnd::ClientGone;
                    }
                }
            }
        },
    };

    let failed = match end {
        StreamEnd::Completed => false,
        StreamEnd::EngineFailed => {
            let choices: Vec<Choice> = tracker
                .unfinished()
                .map(|index| Choice {
                    index,
                    delta: ChoiceData::default(),
                    finish_reason: Some(FinishReason::Abort),
                })
                .collect();
            if !choices.is_empty() {
                let _ = tx.send(ChatResponse::Chunk(meta.chunk(choices)));
            }
            true
        }
        StreamEnd::ClientGone => {
            warn!(
                "Request {} lost its client after {} steps",
                scope.request_id(),
                steps_seen
            );
            true
        }
    };
    let _ = tx.send(ChatResponse::Done);
    info!(
        "Request {} stream closed after {} steps",
        scope.request_id(),
        steps_seen
    );
    scope.finish(failed).await;
}
