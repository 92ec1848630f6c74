//! Request and response bodies for the supported chat APIs

use serde::{Deserialize, Serialize};

use super::CompletionError;
use crate::messages::{Message, Role};

// OpenAI chat/completions

#[derive(Debug, Serialize)]
pub struct OpenAiChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<OpenAiMessage<'a>>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Serialize)]
pub struct OpenAiMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: Option<OpenAiReply>,
}

#[derive(Debug, Deserialize)]
struct OpenAiReply {
    content: Option<String>,
}

pub fn encode_openai<'a>(
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
) -> OpenAiChatRequest<'a> {
    OpenAiChatRequest {
        model,
        messages: messages
            .iter()
            .map(|m| OpenAiMessage {
                role: m.role().as_str(),
                content: m.content(),
            })
            .collect(),
        temperature,
        max_tokens,
    }
}

/// Extract `choices[0].message.content`
pub fn parse_openai(body: &str) -> Result<String, CompletionError> {
    let response: OpenAiChatResponse = serde_json::from_str(body)
        .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| CompletionError::MalformedResponse("No choices in response".to_string()))?;

    choice
        .message
        .and_then(|m| m.content)
        .ok_or_else(|| CompletionError::MalformedResponse("Choice has no message content".to_string()))
}

// Gemini generateContent

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest<'a> {
    pub contents: Vec<GeminiContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GeminiContent<'a>>,
    pub generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
pub struct GeminiContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    pub parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
pub struct GeminiPart<'a> {
    pub text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiGenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiReplyContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiReplyContent {
    #[serde(default)]
    parts: Vec<GeminiReplyPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiReplyPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

/// Path of the generateContent call, relative to the base URL
pub fn gemini_path(model: &str) -> String {
    format!("v1beta/models/{}:generateContent", model)
}

/// System messages become the system instruction; the rest map to
/// `user` / `model` turns in order.
pub fn encode_gemini(messages: &[Message], temperature: f32, max_tokens: u32) -> GeminiRequest<'_> {
    let system_parts: Vec<GeminiPart<'_>> = messages
        .iter()
        .filter(|m| m.role() == Role::System)
        .map(|m| GeminiPart { text: m.content() })
        .collect();

    let contents = messages
        .iter()
        .filter_map(|m| {
            let role = match m.role() {
                Role::System => return None,
                Role::User => "user",
                Role::Assistant => "model",
            };
            Some(GeminiContent {
                role: Some(role),
                parts: vec![GeminiPart { text: m.content() }],
            })
        })
        .collect();

    GeminiRequest {
        contents,
        system_instruction: if system_parts.is_empty() {
            None
        } else {
            Some(GeminiContent {
                role: None,
                parts: system_parts,
            })
        },
        generation_config: GeminiGenerationConfig {
            temperature,
            max_output_tokens: max_tokens,
        },
    }
}

/// Extract `candidates[0].content.parts[0].text`, reporting safety blocks
pub fn parse_gemini(body: &str) -> Result<String, CompletionError> {
    let response: GeminiResponse = serde_json::from_str(body)
        .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;

    let Some(candidate) = response.candidates.into_iter().next() else {
        return match response.prompt_feedback.and_then(|f| f.block_reason) {
            Some(reason) => Err(CompletionError::Blocked(reason)),
            None => Err(CompletionError::MalformedResponse(
                "No candidates in response".to_string(),
            )),
        };
    };

    candidate
        .content
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .ok_or_else(|| {
            CompletionError::MalformedResponse("Candidate has no text part".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conversation() -> Vec<Message> {
        vec![
            Message::system("be brief"),
            Message::user("hello"),
            Message::assistant("hi"),
            Message::user("weather?"),
        ]
    }

    #[test]
    fn test_encode_openai() {
        let messages = conversation();
        let body = serde_json::to_value(encode_openai("gpt-test", &messages, 0.5, 99)).unwrap();

        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["max_tokens"], 99);
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["messages"].as_array().unwrap().len(), 4);
        assert_eq!(body["messages"][0], json!({"role": "system", "content": "be brief"}));
        assert_eq!(body["messages"][2]["role"], "assistant");
    }

    #[test]
    fn test_parse_openai_reply() {
        let body = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"hi there"}}]}"#;
        assert_eq!(parse_openai(body).unwrap(), "hi there");
    }

    #[test]
    fn test_parse_openai_malformed() {
        assert!(matches!(
            parse_openai(r#"{"choices":[]}"#),
            Err(CompletionError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_openai(r#"{"id":"x"}"#),
            Err(CompletionError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_openai("not json"),
            Err(CompletionError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_openai(r#"{"choices":[{"message":{"role":"assistant"}}]}"#),
            Err(CompletionError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_encode_gemini() {
        let messages = conversation();
        let body = serde_json::to_value(encode_gemini(&messages, 0.3, 42)).unwrap();

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert!(body["systemInstruction"].get("role").is_none());

        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["text"], "hi");

        assert_eq!(body["generationConfig"]["maxOutputTokens"], 42);
    }

    #[test]
    fn test_encode_gemini_without_system() {
        let messages = vec![Message::user("hello")];
        let body = serde_json::to_value(encode_gemini(&messages, 0.7, 10)).unwrap();
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn test_parse_gemini_reply() {
        let body = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"sunny"}]}}]}"#;
        assert_eq!(parse_gemini(body).unwrap(), "sunny");
    }

    #[test]
    fn test_parse_gemini_blocked() {
        let body = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        let err = parse_gemini(body).unwrap_err();
        assert_eq!(err, CompletionError::Blocked("SAFETY".to_string()));
        assert_eq!(
            err.to_string(),
            "Request blocked by API for safety reasons: SAFETY"
        );
    }

    #[test]
    fn test_parse_gemini_empty() {
        assert!(matches!(
            parse_gemini(r#"{"candidates":[]}"#),
            Err(CompletionError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_gemini(r#"{"candidates":[{"finishReason":"STOP"}]}"#),
            Err(CompletionError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_gemini_path() {
        assert_eq!(
            gemini_path("gemini-1.5-flash"),
            "v1beta/models/gemini-1.5-flash:generateContent"
        );
    }
}
