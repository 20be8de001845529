use gw_protocol::gemini::request::{
    Content, FunctionDeclaration, GenerateContentRequest, GenerationConfig, InlineData, Part, Tool,
};
use gw_protocol::openai::request::{
    ChatCompletionRequest, ChatMessage, ChatMessageContent, ContentPart, FunctionDef, ToolDef,
};
use serde_json::Value as JsonValue;

/// Clamp bounds for generation-config translation (spec §4.2). The upstream
/// Gemini API's own `topK` ceiling is 40; `MaxOutputTokens` mirrors the
/// upstream's per-model cap for the common case.
pub const DEFAULT_TOP_K: i64 = 40;
pub const MAX_TOP_K: i64 = 40;
pub const MAX_OUTPUT_TOKENS: i64 = 8192;

/// Client-facing wire format, detected from an inbound request body (spec
/// §4.2 `DetectFormat`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    OpenAi,
    Gemini,
}

/// `DetectFormat(body)` (spec §4.2): presence of `contents` /
/// `systemInstruction` / `generationConfig.maxOutputTokens` means Gemini;
/// presence of `messages` means OpenAI; otherwise OpenAI is the default.
pub fn detect_format(body: &JsonValue) -> Format {
    let Some(obj) = body.as_object() else {
        return Format::OpenAi;
    };
    if obj.contains_key("contents") || obj.contains_key("systemInstruction") {
        return Format::Gemini;
    }
    if let Some(gen_config) = obj.get("generationConfig").and_then(|v| v.as_object()) {
        if gen_config.contains_key("maxOutputTokens") {
            return Format::Gemini;
        }
    }
    if obj.contains_key("messages") {
        return Format::OpenAi;
    }
    Format::OpenAi
}

fn clamp_top_k(top_k: Option<i64>) -> Option<i64> {
    Some(top_k.unwrap_or(DEFAULT_TOP_K).clamp(1, MAX_TOP_K))
}

fn clamp_max_output_tokens(max_tokens: Option<i64>) -> Option<i64> {
    max_tokens.map(|v| v.clamp(1, MAX_OUTPUT_TOKENS))
}

/// data:<mime>;base64,<data> -> (mime, data)
fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (mime, data) = rest.split_once(";base64,")?;
    Some((mime.to_string(), data.to_string()))
}

fn data_url(mime: &str, data: &str) -> String {
    format!("data:{mime};base64,{data}")
}

/// OpenAI → Gemini request conversion (spec §4.2).
pub fn openai_request_to_gemini(req: &ChatCompletionRequest) -> GenerateContentRequest {
    let mut contents = Vec::new();
    let mut system_instruction: Option<Content> = None;

    for message in &req.messages {
        let parts = message_to_parts(message);
        match message.role.as_str() {
            "system" => {
                let text = message
                    .content
                    .as_ref()
                    .map(|c| c.to_text())
                    .unwrap_or_default();
                system_instruction = Some(Content {
                    role: "system".to_string(),
                    parts: vec![Part::Text { text }],
                });
            }
            "assistant" => contents.push(Content {
                role: "model".to_string(),
                parts,
            }),
            _ => contents.push(Content {
                role: "user".to_string(),
                parts,
            }),
        }
    }

    let generation_config = GenerationConfig {
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: clamp_top_k(req.top_k),
        max_output_tokens: clamp_max_output_tokens(req.max_tokens),
    };

    let tools = req.tools.as_ref().map(|tools| {
        vec![Tool {
            function_declarations: Some(
                tools
                    .iter()
                    .filter(|t| t.kind == "function")
                    .map(|t| FunctionDeclaration {
                        name: t.function.name.clone(),
                        description: t.function.description.clone(),
                        parameters_json_schema: t.function.parameters.clone(),
                    })
                    .collect(),
            ),
        }]
    });

    GenerateContentRequest {
        contents,
        system_instruction,
        generation_config: Some(generation_config),
        tools,
        extra: Default::default(),
    }
}

fn message_to_parts(message: &ChatMessage) -> Vec<Part> {
    match &message.content {
        None => Vec::new(),
        Some(ChatMessageContent::Text(text)) => vec![Part::Text { text: text.clone() }],
        Some(ChatMessageContent::Parts(parts)) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => Part::Text { text: text.clone() },
                ContentPart::ImageUrl { image_url } => {
                    if let Some((mime_type, data)) = parse_data_url(&image_url.url) {
                        Part::InlineDataPart {
                            inline_data: InlineData { mime_type, data },
                        }
                    } else {
                        // Not an inline data URL (e.g. a remote http URL);
                        // preserve as text so the upstream at least sees it.
                        Part::Text {
                            text: image_url.url.clone(),
                        }
                    }
                }
            })
            .collect(),
    }
}

/// Gemini → OpenAI request conversion (spec §4.2, reverse direction): used
/// for the property-based round-trip test and for any gateway path that
/// needs to re-express a Gemini-shaped request as OpenAI messages.
pub fn gemini_request_to_openai(req: &GenerateContentRequest) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(system) = &req.system_instruction {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: Some(ChatMessageContent::Text(concat_text_parts(&system.parts))),
            name: None,
        });
    }

    for content in &req.contents {
        let role = match content.role.as_str() {
            "model" => "assistant",
            other => other,
        };
        messages.push(ChatMessage {
            role: role.to_string(),
            content: Some(ChatMessageContent::Text(concat_text_parts(&content.parts))),
            name: None,
        });
    }

    let (temperature, top_p, top_k, max_tokens) = match &req.generation_config {
        Some(gc) => (gc.temperature, gc.top_p, gc.top_k, gc.max_output_tokens),
        None => (None, None, None, None),
    };

    let tools = req.tools.as_ref().and_then(|tools| {
        let defs: Vec<ToolDef> = tools
            .iter()
            .flat_map(|t| t.function_declarations.iter().flatten())
            .map(|fd| ToolDef {
                kind: "function".to_string(),
                function: FunctionDef {
                    name: fd.name.clone(),
                    description: fd.description.clone(),
                    parameters: fd.parameters_json_schema.clone(),
                },
            })
            .collect();
        if defs.is_empty() {
            None
        } else {
            Some(defs)
        }
    });

    ChatCompletionRequest {
        model: String::new(),
        messages,
        temperature,
        top_p,
        top_k,
        max_tokens,
        stream: None,
        tools,
        stop: None,
        extra: Default::default(),
    }
}

/// Concatenates a content's text parts into one string; non-text parts
/// (inline data) are dropped — spec §4.2 "each content's text parts
/// concatenate into one string".
fn concat_text_parts(parts: &[Part]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            Part::Text { text } => Some(text.as_str()),
            Part::InlineDataPart { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

/// Converts an image data URL's `data:<mime>;base64,<data>` back into a
/// data URL, used when re-expressing Gemini inline data as an OpenAI
/// `image_url` content part.
pub fn inline_data_to_data_url(inline: &InlineData) -> String {
    data_url(&inline.mime_type, &inline.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_protocol::openai::request::ImageUrl;
    use serde_json::json;

    #[test]
    fn detect_format_prefers_gemini_markers() {
        assert_eq!(detect_format(&json!({"contents": []})), Format::Gemini);
        assert_eq!(
            detect_format(&json!({"generationConfig": {"maxOutputTokens": 10}})),
            Format::Gemini
        );
        assert_eq!(detect_format(&json!({"messages": []})), Format::OpenAi);
        assert_eq!(detect_format(&json!({})), Format::OpenAi);
    }

    #[test]
    fn top_k_clamps_to_bounds() {
        assert_eq!(clamp_top_k(Some(0)), Some(1));
        assert_eq!(clamp_top_k(Some(1000)), Some(MAX_TOP_K));
        assert_eq!(clamp_top_k(None), Some(DEFAULT_TOP_K));
    }

    #[test]
    fn max_tokens_clamps_to_bounds() {
        assert_eq!(clamp_max_output_tokens(Some(0)), Some(1));
        assert_eq!(clamp_max_output_tokens(Some(1_000_000)), Some(MAX_OUTPUT_TOKENS));
        assert_eq!(clamp_max_output_tokens(None), None);
    }

    #[test]
    fn system_message_becomes_dedicated_system_instruction() {
        let req = ChatCompletionRequest {
            model: "gemini-2.5-pro".to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(ChatMessageContent::Text("be terse".to_string())),
                    name: None,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(ChatMessageContent::Text("hi".to_string())),
                    name: None,
                },
            ],
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            stream: None,
            tools: None,
            stop: None,
            extra: Default::default(),
        };
        let gemini = openai_request_to_gemini(&req);
        assert!(gemini.system_instruction.is_some());
        assert_eq!(gemini.contents.len(), 1);
        assert_eq!(gemini.contents[0].role, "user");
    }

    #[test]
    fn assistant_role_maps_to_model() {
        let req = ChatCompletionRequest {
            model: "x".to_string(),
            messages: vec![ChatMessage {
                role: "assistant".to_string(),
                content: Some(ChatMessageContent::Text("ok".to_string())),
                name: None,
            }],
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            stream: None,
            tools: None,
            stop: None,
            extra: Default::default(),
        };
        let gemini = openai_request_to_gemini(&req);
        assert_eq!(gemini.contents[0].role, "model");
    }

    #[test]
    fn inline_image_data_url_round_trips() {
        let url = ImageUrl {
            url: "data:image/png;base64,QUJD".to_string(),
        };
        let message = ChatMessage {
            role: "user".to_string(),
            content: Some(ChatMessageContent::Parts(vec![ContentPart::ImageUrl {
                image_url: url,
            }])),
            name: None,
        };
        let parts = message_to_parts(&message);
        match &parts[0] {
            Part::InlineDataPart { inline_data } => {
                assert_eq!(inline_data.mime_type, "image/png");
                assert_eq!(inline_data.data, "QUJD");
            }
            other => panic!("expected inline data part, got {other:?}"),
        }
    }

    #[test]
    fn round_trip_preserves_role_and_content_pairs() {
        let req = ChatCompletionRequest {
            model: "m".to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(ChatMessageContent::Text("sys".to_string())),
                    name: None,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(ChatMessageContent::Text("hello".to_string())),
                    name: None,
                },
                ChatMessage {
                    role: "assistant".to_string(),
                    content: Some(ChatMessageContent::Text("hi there".to_string())),
                    name: None,
                },
            ],
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            stream: None,
            tools: None,
            stop: None,
            extra: Default::default(),
        };
        let gemini = openai_request_to_gemini(&req);
        let back = gemini_request_to_openai(&gemini);
        let pairs: Vec<(String, String)> = back
            .messages
            .iter()
            .map(|m| (m.role.clone(), m.content.as_ref().unwrap().to_text()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("system".to_string(), "sys".to_string()),
                ("user".to_string(), "hello".to_string()),
                ("assistant".to_string(), "hi there".to_string()),
            ]
        );
    }
}
