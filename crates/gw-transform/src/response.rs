use gw_protocol::gemini::response::GenerateContentResponse;
use gw_protocol::openai::request::{ChatMessage, ChatMessageContent};
use gw_protocol::openai::response::{ChatChoice, ChatCompletionResponse, ChatUsage};
use gw_protocol::gemini::request::Part;

/// Maps a Gemini `finishReason` to the closest OpenAI `finish_reason`
/// (spec §4.2 reverse-direction conversion).
fn map_finish_reason(reason: &str) -> String {
    match reason {
        "STOP" => "stop",
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" => "content_filter",
        "TOOL_CALLS" => "tool_calls",
        other => return other.to_lowercase(),
    }
    .to_string()
}

/// Gemini → OpenAI response conversion (spec §4.2): candidate 0's content
/// text parts concatenate into the message content; `usageMetadata` maps
/// onto the OpenAI `usage` block.
pub fn gemini_response_to_openai(
    resp: &GenerateContentResponse,
    model: &str,
    id: String,
    created: i64,
) -> ChatCompletionResponse {
    let choices = resp
        .candidates
        .iter()
        .enumerate()
        .map(|(i, candidate)| {
            let text = candidate
                .content
                .parts
                .iter()
                .filter_map(|p| match p {
                    Part::Text { text } => Some(text.as_str()),
                    Part::InlineDataPart { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("");
            ChatChoice {
                index: i as u32,
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: Some(ChatMessageContent::Text(text)),
                    name: None,
                },
                finish_reason: candidate.finish_reason.as_deref().map(map_finish_reason),
            }
        })
        .collect();

    let usage = resp.usage_metadata.as_ref().map(|u| ChatUsage {
        prompt_tokens: u.prompt_token_count,
        completion_tokens: u.candidates_token_count,
        total_tokens: u.total_token_count,
    });

    ChatCompletionResponse {
        id,
        object: "chat.completion".to_string(),
        created,
        model: model.to_string(),
        choices,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_protocol::gemini::request::Content;
    use gw_protocol::gemini::response::{Candidate, UsageMetadata};

    #[test]
    fn finish_reason_maps_to_openai_vocabulary() {
        assert_eq!(map_finish_reason("STOP"), "stop");
        assert_eq!(map_finish_reason("MAX_TOKENS"), "length");
        assert_eq!(map_finish_reason("SAFETY"), "content_filter");
    }

    #[test]
    fn converts_single_candidate_response() {
        let resp = GenerateContentResponse {
            candidates: vec![Candidate {
                content: Content {
                    role: "model".to_string(),
                    parts: vec![Part::Text { text: "hello".to_string() }],
                },
                finish_reason: Some("STOP".to_string()),
                index: 0,
            }],
            usage_metadata: Some(UsageMetadata {
                prompt_token_count: 5,
                candidates_token_count: 2,
                total_token_count: 7,
            }),
            model_version: None,
        };
        let openai = gemini_response_to_openai(&resp, "gemini-2.5-pro", "id1".to_string(), 100);
        assert_eq!(openai.choices.len(), 1);
        assert_eq!(
            openai.choices[0].message.content.as_ref().unwrap().to_text(),
            "hello"
        );
        assert_eq!(openai.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(openai.usage.unwrap().total_tokens, 7);
    }
}
