pub mod branch_fn;
pub mod call;
pub mod types;

pub use branch_fn::PromptBranchFn;
pub use call::{MockProvider, ProviderCall};
pub use types::{
    ChatMessage, FinishReason, ProviderRequest, ProviderResponse, Role, TokenUsage,
    ToolDefinition, ToolInvocation,
};
