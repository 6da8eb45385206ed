use super::streaming::Streamer;
use crate::engine::{FinishReason, SequenceOutput};
use axum::extract::Json;
use axum::http::{self, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Sse};
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

#[derive(Debug, Display, Error, Serialize)]
#[display(fmt = "Error: {}", data)]
pub struct APIError {
    data: String,
}

impl APIError {
    pub fn new(data: String) -> Self {
        Self { data }
    }

    pub fn new_str(data: &str) -> Self {
        Self {
            data: data.to_string(),
        }
    }

    pub fn from<T: ToString>(value: T) -> Self {
        Self::new(value.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCard {
    pub id: String,
    pub object: String,
    pub owned_by: String,
    pub permission: Vec<serde_json::Value>,
}

impl ModelCard {
    pub fn new(id: String, owned_by: String) -> Self {
        Self {
            id,
            object: "model".to_string(),
            owned_by,
            permission: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelCard>,
}

impl ModelList {
    pub fn new(data: Vec<ModelCard>) -> Self {
        Self {
            object: "list".to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatChoiceData {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatChoice {
    pub index: usize,
    pub message: ChatChoiceData,
    pub finish_reason: FinishReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
}

impl ChatCompletionResponse {
    /// Only finished sequences become choices.
    pub fn new(id: String, model: String, created: u64, outputs: Vec<SequenceOutput>) -> Self {
        let choices = outputs
            .into_iter()
            .filter_map(|output| {
                let finish_reason = output.finish_reason?;
                Some(ChatChoice {
                    index: output.index,
                    message: ChatChoiceData {
                        role: "assistant".to_string(),
                        content: output.text,
                    },
                    finish_reason,
                })
            })
            .collect();
        Self {
            id,
            object: "chat.completion",
            created,
            model,
            choices,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChoiceData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Choice {
    pub index: usize,
    pub delta: ChoiceData,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<Choice>,
}

impl ChatCompletionChunk {
    pub fn new(id: String, model: String, created: u64, choices: Vec<Choice>) -> Self {
        Self {
            id,
            object: "chat.completion.chunk",
            created,
            model,
            choices,
        }
    }
}

trait ErrorToResponse: Serialize {
    fn to_response(&self, code: StatusCode) -> axum::response::Response {
        let mut r = Json(self).into_response();
        *r.status_mut() = code;
        r
    }
}

#[derive(Serialize)]
struct JsonError {
    message: String,
}

impl JsonError {
    fn new(message: String) -> Self {
        Self { message }
    }
}
impl ErrorToResponse for JsonError {}

pub enum ChatResponder {
    Streamer(Sse<Streamer>),
    Completion(ChatCompletionResponse),
    NotFound(APIError),
    Conflict(APIError),
    ValidationError(APIError),
}

impl IntoResponse for ChatResponder {
    fn into_response(self) -> axum::response::Response {
        match self {
            ChatResponder::Streamer(s) => {
                let mut response = s.into_response();
                let headers = response.headers_mut();
                headers.insert(http::header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
                headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
                response
            }
            ChatResponder::Completion(s) => Json(s).into_response(),
            ChatResponder::NotFound(e) => {
                JsonError::new(e.to_string()).to_response(http::StatusCode::NOT_FOUND)
            }
            ChatResponder::Conflict(e) => {
                JsonError::new(e.to_string()).to_response(http::StatusCode::CONFLICT)
            }
            ChatResponder::ValidationError(e) => {
                JsonError::new(e.to_string()).to_response(http::StatusCode::UNPROCESSABLE_ENTITY)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn completion_keeps_only_finished_sequences() {
        let response = ChatCompletionResponse::new(
            "chatcmpl-1".to_string(),
            "m".to_string(),
            7,
            vec![
                SequenceOutput::new(0, "done", Some(FinishReason::Stop)),
                SequenceOutput::new(1, "half", None),
                SequenceOutput::new(2, "cut", Some(FinishReason::Length)),
            ],
        );
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "created": 7,
                "model": "m",
                "choices": [
                    {"index": 0, "message": {"role": "assistant", "content": "done"}, "finish_reason": "stop"},
                    {"index": 2, "message": {"role": "assistant", "content": "cut"}, "finish_reason": "length"}
                ]
            })
        );
    }

    #[test]
    fn chunk_serializes_role_only_when_set() {
        let chunk = ChatCompletionChunk::new(
            "chatcmpl-1".to_string(),
            "m".to_string(),
            7,
            vec![
                Choice {
                    index: 0,
                    delta: ChoiceData {
                        role: Some("assistant".to_string()),
                        content: "ab".to_string(),
                    },
                    finish_reason: None,
                },
                Choice {
                    index: 1,
                    delta: ChoiceData::default(),
                    finish_reason: Some(FinishReason::Abort),
                },
            ],
        );
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["object"], "chat.completion.chunk");
        assert_eq!(
            value["choices"][0],
            json!({"index": 0, "delta": {"role": "assistant", "content": "ab"}, "finish_reason": null})
        );
        assert_eq!(
            value["choices"][1],
            json!({"index": 1, "delta": {"content": ""}, "finish_reason": "abort"})
        );
    }

    #[test]
    fn model_list_shape() {
        let list = ModelList::new(vec![ModelCard::new("m".to_string(), "owner".to_string())]);
        assert_eq!(
            serde_json::to_value(&list).unwrap(),
            json!({
                "object": "list",
                "data": [{"id": "m", "object": "model", "owned_by": "owner", "permission": []}]
            })
        );
    }

    #[test]
    fn api_error_display() {
        assert_eq!(APIError::new_str("boom").to_string(), "Error: boom");
    }
}
