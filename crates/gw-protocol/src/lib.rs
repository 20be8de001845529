//! Wire-format DTOs for the two client-facing protocols this gateway
//! understands natively: OpenAI chat completions and Gemini generateContent.
//!
//! Only the fields needed for request/response translation (spec §4.2) and
//! for the client HTTP surfaces (spec §6.1) are modeled; anything else
//! round-trips through `extra` maps so unknown fields are preserved rather
//! than dropped (spec §9 "Heterogeneous JSON manipulation").

pub mod gemini;
pub mod openai;

pub use gemini::{GenerateContentRequest, GenerateContentResponse};
pub use openai::{ChatCompletionRequest, ChatCompletionResponse};
