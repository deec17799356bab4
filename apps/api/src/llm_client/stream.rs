//! Incremental parser for OpenAI-compatible `text/event-stream` responses.
//!
//! Fragments are appended in arrival order. A payload that fails to parse is
//! skipped: one bad event must not abort a whole generation.

use serde::Deserialize;
use tracing::debug;

use super::Completion;

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
    reasoning_content: Option<String>,
}

/// Accumulates `delta.content` (and optionally `delta.reasoning_content`)
/// across network chunks. Lines split between chunks are reassembled.
#[derive(Debug)]
pub struct DeltaAccumulator {
    include_reasoning: bool,
    pending: Vec<u8>,
    content: String,
    reasoning: String,
    saw_reasoning: bool,
    done: bool,
}

impl DeltaAccumulator {
    pub fn new(include_reasoning: bool) -> Self {
        Self {
            include_reasoning,
            pending: Vec::new(),
            content: String::new(),
            reasoning: String::new(),
            saw_reasoning: false,
            done: false,
        }
    }

    #[cfg(test)]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feeds one network chunk. Returns `true` once the done sentinel was seen;
    /// anything after it is ignored.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> bool {
        if self.done {
            return true;
        }
        self.pending.extend_from_slice(chunk);

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            self.process_line(&line);
            if self.done {
                self.pending.clear();
                return true;
            }
        }
        false
    }

    /// Flushes a trailing line without a newline and returns the accumulated text.
    pub fn finish(mut self) -> Completion {
        if !self.done && !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest).into_owned();
            self.process_line(&line);
        }

        let reasoning = if self.saw_reasoning {
            Some(self.reasoning.trim().to_string()).filter(|r| !r.is_empty())
        } else {
            None
        };

        Completion {
            text: self.content.trim().to_string(),
            reasoning,
        }
    }

    fn process_line(&mut self, line: &str) {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            // blank separators, comments, `event:` and `id:` fields
            return;
        };
        let data = data.trim();

        if data == DONE_SENTINEL {
            self.done = true;
            return;
        }

        let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!("Skipping unparseable stream event: {e}");
                return;
            }
        };

        let Some(choice) = chunk.choices.into_iter().next() else {
            return;
        };

        if let Some(content) = choice.delta.content {
            self.content.push_str(&content);
        }
        if self.include_reasoning {
            if let Some(reasoning) = choice.delta.reasoning_content {
                self.saw_reasoning = true;
                self.reasoning.push_str(&reasoning);
            }
        }
    }
}
