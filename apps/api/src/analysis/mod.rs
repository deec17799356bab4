pub mod handlers;
pub mod normalize;
pub mod orchestrator;
pub mod pipeline;
pub mod prompts;
