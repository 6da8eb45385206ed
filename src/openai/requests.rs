use super::responses::APIError;
use crate::engine::{
    SamplingParams, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TOP_P, MAX_N,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub max_tokens: Option<usize>, //1024
    #[serde(default)]
    pub temperature: Option<f32>, //0.75
    #[serde(default)]
    pub top_p: Option<f32>, //0.95
    #[serde(default)]
    pub n: Option<usize>, //1
    #[serde(default)]
    pub stream: Option<bool>, //false
}

impl Default for ChatCompletionRequest {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            messages: Vec::new(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            n: None,
            stream: None,
        }
    }
}

impl ChatCompletionRequest {
    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    pub fn sampling_params(&self) -> Result<SamplingParams, APIError> {
        let n = self.n.unwrap_or(1);
        if n == 0 {
            return Err(APIError::new_str("`n` must be at least 1."));
        }
        if n > MAX_N {
            return Err(APIError::new(format!("`n` must be at most {}.", MAX_N)));
        }
        Ok(SamplingParams {
            max_tokens: self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            top_p: self.top_p.unwrap_or(DEFAULT_TOP_P),
            n,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_fill_missing_fields() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [{"role": "system", "content": "be brief"}, {"role": "user", "content": "hi"}]
        }))
        .unwrap();
        assert!(!request.is_stream());
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.sampling_params().unwrap(), SamplingParams::default());
    }

    #[test]
    fn explicit_fields_are_kept() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [],
            "max_tokens": 8,
            "temperature": 0.1,
            "top_p": 0.5,
            "n": 3,
            "stream": true
        }))
        .unwrap();
        assert!(request.is_stream());
        let params = request.sampling_params().unwrap();
        assert_eq!(params.max_tokens, 8);
        assert_eq!(params.n, 3);
        assert!((params.temperature - 0.1).abs() < f32::EPSILON);
        assert!((params.top_p - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn zero_sequences_are_rejected() {
        let request = ChatCompletionRequest {
            n: Some(0),
            ..Default::default()
        };
        assert!(request.sampling_params().is_err());
    }

    #[test]
    fn sequence_count_is_capped() {
        let at_limit = ChatCompletionRequest {
            n: Some(MAX_N),
            ..Default::default()
        };
        assert_eq!(at_limit.sampling_params().unwrap().n, MAX_N);

        for n in [MAX_N + 1, usize::MAX] {
            let request = ChatCompletionRequest {
                n: Some(n),
                ..Default::default()
            };
            assert!(request.sampling_params().is_err(), "n={n} accepted");
        }
    }

    #[test]
    fn unknown_role_fails_to_parse() {
        let parsed = serde_json::from_value::<ChatCompletionRequest>(json!({
            "model": "m",
            "messages": [{"role": "tool", "content": "x"}]
        }));
        assert!(parsed.is_err());
    }
}
