use gw_protocol::openai::response::{ChatChunkChoice, ChatCompletionChunk, ChatDelta};

/// `data: [DONE]` sentinel terminating every SSE stream (spec §4.2).
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Synthesizes the SSE chunk sequence for a complete (non-streaming)
/// response (spec §4.2 "Fake streaming"): splits `content` into
/// `chunk_size`-rune pieces, carrying `role:"assistant"` on the first
/// chunk and a trailing chunk with `finish_reason` and no delta content.
pub fn synthesize_fake_stream_chunks(
    content: &str,
    finish_reason: Option<&str>,
    model: &str,
    id: String,
    created: i64,
    chunk_size: usize,
) -> Vec<ChatCompletionChunk> {
    let chunk_size = chunk_size.max(1);
    let runes: Vec<char> = content.chars().collect();
    let mut chunks = Vec::new();

    if runes.is_empty() {
        chunks.push(ChatCompletionChunk {
            id: id.clone(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChatChunkChoice {
                index: 0,
                delta: ChatDelta {
                    role: Some("assistant".to_string()),
                    content: None,
                },
                finish_reason: None,
            }],
        });
    } else {
        for (i, piece) in runes.chunks(chunk_size).enumerate() {
            let text: String = piece.iter().collect();
            chunks.push(ChatCompletionChunk {
                id: id.clone(),
                object: "chat.completion.chunk".to_string(),
                created,
                model: model.to_string(),
                choices: vec![ChatChunkChoice {
                    index: 0,
                    delta: ChatDelta {
                        role: if i == 0 { Some("assistant".to_string()) } else { None },
                        content: Some(text),
                    },
                    finish_reason: None,
                }],
            });
        }
    }

    chunks.push(ChatCompletionChunk {
        id,
        object: "chat.completion.chunk".to_string(),
        created,
        model: model.to_string(),
        choices: vec![ChatChunkChoice {
            index: 0,
            delta: ChatDelta::default(),
            finish_reason: finish_reason.map(str::to_string),
        }],
    });

    chunks
}

/// Formats one chunk as an SSE `data:` frame.
pub fn format_sse_frame(chunk: &ChatCompletionChunk) -> Result<String, serde_json::Error> {
    Ok(format!("data: {}\n\n", serde_json::to_string(chunk)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_content_by_rune_count() {
        let chunks = synthesize_fake_stream_chunks("hello", Some("stop"), "m", "id1".to_string(), 0, 2);
        // "he", "ll", "o" + trailing finish_reason frame = 4
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("he"));
        assert_eq!(chunks[1].choices[0].delta.role, None);
        assert_eq!(chunks[1].choices[0].delta.content.as_deref(), Some("ll"));
        let last = chunks.last().unwrap();
        assert_eq!(last.choices[0].delta.content, None);
        assert_eq!(last.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn empty_content_still_emits_role_then_finish_frame() {
        let chunks = synthesize_fake_stream_chunks("", Some("stop"), "m", "id1".to_string(), 0, 5);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(chunks[1].choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn frame_is_prefixed_and_newline_terminated() {
        let chunks = synthesize_fake_stream_chunks("hi", None, "m", "id".to_string(), 0, 10);
        let frame = format_sse_frame(&chunks[0]).unwrap();
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));
    }
}
