mod request;
mod response;

pub use request::{
    ChatCompletionRequest, ChatMessage, ChatMessageContent, ContentPart, FunctionDef, ToolDef,
};
pub use response::{
    ChatChoice, ChatCompletionChunk, ChatCompletionResponse, ChatDelta, ChatUsage,
};
