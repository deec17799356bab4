/// System message sent with every OpenAI-compatible and Anthropic call.
pub const SYSTEM_PROMPT: &str =
    "You are an AI career analyst that only outputs valid JSON per instructions.";
