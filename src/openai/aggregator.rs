//! Turns an engine's per-step sequence images into client output.
//!
//! Engines report the *full* text of every sequence at every step. Streaming
//! clients want only what is new, non-streaming clients want the final text
//! of each sequence. [`DeltaTracker`] handles the former, [`collect`] the
//! latter.

use crate::engine::{EngineError, FinishReason, SequenceOutput, StepStream};
use futures::StreamExt;
use std::collections::BTreeMap;
use tracing::debug;

/// What has already been forwarded for one sequence index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceState {
    /// Bytes of text already emitted; never decreases.
    pub emitted_len: usize,
    pub finished: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceDelta {
    pub index: usize,
    pub text: String,
    pub finish_reason: Option<FinishReason>,
}

/// Per-index state is created when an index is first reported, so `n` only
/// widens the set of indices considered unfinished.
#[derive(Debug, Clone, Default)]
pub struct DeltaTracker {
    expected: usize,
    states: Vec<SequenceState>,
}

impl DeltaTracker {
    pub fn new(n: usize) -> Self {
        Self {
            expected: n,
            states: Vec::new(),
        }
    }

    fn width(&self) -> usize {
        self.expected.max(self.states.len())
    }

    fn is_finished(&self, index: usize) -> bool {
        self.states.get(index).is_some_and(|state| state.finished)
    }

    pub fn state(&self, index: usize) -> Option<&SequenceState> {
        self.states.get(index)
    }

    /// Deltas for one step: an entry per index whose text grew or that just
    /// finished. Finished indices are silent from then on.
    pub fn advance(&mut self, step: &[SequenceOutput]) -> Vec<SequenceDelta> {
        let mut deltas = Vec::new();
        for output in step {
            if output.index >= self.states.len() {
                self.states
                    .resize_with(output.index + 1, SequenceState::default);
            }
            let state = &mut self.states[output.index];
            if state.finished {
                continue;
            }

            let text = match output.text.get(state.emitted_len..) {
                Some(suffix) => suffix,
                None => {
                    debug!(
                        "sequence {} no longer extends the {} bytes already sent",
                        output.index, state.emitted_len
                    );
                    ""
                }
            };
            if text.is_empty() && output.finish_reason.is_none() {
                continue;
            }

            state.emitted_len = state.emitted_len.max(output.text.len());
            state.finished = output.finish_reason.is_some();
            deltas.push(SequenceDelta {
                index: output.index,
                text: text.to_string(),
                finish_reason: output.finish_reason,
            });
        }
        deltas
    }

    /// Indices that never reported a finish reason.
    pub fn unfinished(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.width()).filter(|&index| !self.is_finished(index))
    }

    pub fn all_finished(&self) -> bool {
        (0..self.width()).all(|index| self.is_finished(index))
    }
}

/// Drains the whole stream and keeps each index as it looked when it first
/// reported a finish reason. Indices that never finish are left out.
pub async fn collect(mut steps: StepStream) -> Result<Vec<SequenceOutput>, EngineError> {
    let mut finals: BTreeMap<usize, SequenceOutput> = BTreeMap::new();
    while let Some(step) = steps.next().await {
        for output in step? {
            if output.is_finished() {
                finals.entry(output.index).or_insert(output);
            }
        }
    }
    Ok(finals.into_values().collect())
}
