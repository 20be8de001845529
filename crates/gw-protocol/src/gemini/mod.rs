mod request;
mod response;

pub use request::{
    Content, FunctionDeclaration, GenerateContentRequest, GenerationConfig, InlineData, Part,
    Tool,
};
pub use response::{Candidate, GenerateContentResponse, UsageMetadata};
