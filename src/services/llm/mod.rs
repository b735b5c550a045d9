//! LLM collaborator
//!
//! The pipeline's two model-mediated stages (schema reasoning and response
//! synthesis) share one transport contract: `complete_json(prompt)` over a
//! chat-shaped prompt. Replies are bounded by Draft-7 schemas loaded at
//! startup.

pub mod client;
pub mod prompts;
pub mod reasoner;
pub mod synthesizer;

pub use client::{EchoLlmClient, LlmClient, LlmError, OpenAiClient, build_llm_client};
pub use prompts::PromptResources;
pub use reasoner::{LlmReasoner, ReasonerError, ReasonerOutput, TableContext};
pub use synthesizer::{ResponseSynthesizer, SynthesizerError};
