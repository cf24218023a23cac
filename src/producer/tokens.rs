//! Token-by-token emitter simulating LLM text generation.
//!
//! The response text is fixed apart from the embedded prompt, so a one-word
//! prompt still streams a few dozen tokens.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use super::traits::{Pacer, Producer};
use crate::error::ProducerError;
use crate::streaming::{Event, EVENT_CHUNK, EVENT_COMPLETE};

/// Longest prompt prefix quoted back in the simulated response.
const PROMPT_PREVIEW_CHARS: usize = 100;

/// Build the simulated response for a prompt. Empty for a blank prompt.
pub fn simulated_response(prompt: &str) -> String {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return String::new();
    }

    let preview: String = if prompt.chars().count() > PROMPT_PREVIEW_CHARS {
        let truncated: String = prompt.chars().take(PROMPT_PREVIEW_CHARS).collect();
        format!("{}...", truncated)
    } else {
        prompt.to_string()
    };

    format!(
        "This is a simulated LLM response to your prompt: \"{}\". \
         This streaming response demonstrates real-time text generation. \
         Each chunk of text is sent as soon as it is available, which gives \
         a better experience than waiting for the complete response. \
         Streaming is useful for long-form content generation, real-time chat, \
         progressive content delivery and better perceived performance. \
         This completes the simulated streaming response.",
        preview
    )
}

/// Deterministic token split for a prompt: whitespace words of the response.
pub fn tokenize(prompt: &str) -> Vec<String> {
    simulated_response(prompt)
        .split_whitespace()
        .map(String::from)
        .collect()
}

/// Emits one `chunk` event per token, then a terminal `complete` event.
pub struct TokenEmitter {
    tokens: Vec<String>,
    pacer: Pacer,
    index: usize,
    completed: bool,
}

#[derive(Serialize)]
struct TokenChunk<'a> {
    chunk: &'a str,
    index: usize,
    is_final: bool,
    metadata: ChunkMetadata,
}

#[derive(Serialize)]
struct ChunkMetadata {
    /// Share of the response sent so far, rounded to a whole percent.
    progress: usize,
}

#[derive(Serialize)]
struct TokenComplete {
    message: &'static str,
    total_chunks: usize,
}

impl TokenEmitter {
    pub fn new(prompt: &str, interval: Duration) -> Self {
        Self {
            tokens: tokenize(prompt),
            pacer: Pacer::new(interval),
            index: 0,
            completed: false,
        }
    }

    pub fn total_tokens(&self) -> usize {
        self.tokens.len()
    }

    fn complete_event(&self) -> Result<Event, ProducerError> {
        let total = self.total_tokens();
        let payload = TokenComplete {
            message: "LLM response completed",
            total_chunks: total,
        };
        Ok(Event::json(EVENT_COMPLETE, &payload)?.with_id((total + 1).to_string()))
    }
}

#[async_trait]
impl Producer for TokenEmitter {
    fn name(&self) -> &'static str {
        "tokens"
    }

    async fn next(&mut self) -> Option<Result<Event, ProducerError>> {
        if self.completed {
            return None;
        }

        if self.index >= self.tokens.len() {
            self.completed = true;
            return Some(self.complete_event());
        }

        self.pacer.wait().await;

        let index = self.index;
        let Some(token) = self.tokens.get(index) else {
            return Some(Err(ProducerError::Internal(format!(
                "token index {} out of range ({} tokens)",
                index,
                self.tokens.len()
            ))));
        };

        // Leading space on every token but the first, so chunks concatenate back to text
        let chunk = if index == 0 {
            token.clone()
        } else {
            format!(" {}", token)
        };
        let total = self.total_tokens();
        let payload = TokenChunk {
            chunk: &chunk,
            index,
            is_final: false,
            metadata: ChunkMetadata {
                progress: ((index + 1) * 100 + total / 2) / total,
            },
        };
        let event = match Event::json(EVENT_CHUNK, &payload) {
            Ok(event) => event.with_id((index + 1).to_string()),
            Err(e) => return Some(Err(e.into())),
        };

        self.index += 1;
        self.pacer.emitted();
        Some(Ok(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    async fn drain(emitter: &mut TokenEmitter) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = emitter.next().await {
            events.push(event.unwrap());
        }
        events
    }

    #[test]
    fn test_tokenize_is_deterministic() {
        assert_eq!(tokenize("Tell me"), tokenize("Tell me"));
        assert!(tokenize("hi").len() > 20);
        assert!(tokenize("hi").contains(&"\"hi\".".to_string()));
    }

    #[test]
    fn test_long_prompt_is_truncated() {
        let prompt = "word ".repeat(100);
        let response = simulated_response(&prompt);
        assert!(response.contains("..."));
        assert!(response.len() < prompt.len() + 600);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_reconstruct_token_split() {
        let mut emitter = TokenEmitter::new("Tell me about streaming", Duration::from_millis(100));
        let tokens = tokenize("Tell me about streaming");
        let events = drain(&mut emitter).await;

        let (chunks, terminal) = events.split_at(events.len() - 1);
        assert_eq!(chunks.len(), tokens.len());

        let mut text = String::new();
        for (i, event) in chunks.iter().enumerate() {
            assert_eq!(event.kind(), "chunk");
            assert_eq!(event.id.as_deref(), Some((i + 1).to_string().as_str()));
            let data = event.json_data().unwrap();
            assert_eq!(data["index"], i);
            assert_eq!(data["is_final"], false);
            text.push_str(data["chunk"].as_str().unwrap());
        }
        assert_eq!(text, tokens.join(" "));

        let complete = terminal[0].json_data().unwrap();
        assert_eq!(terminal[0].kind(), "complete");
        assert_eq!(complete["total_chunks"], tokens.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_progress_reaches_100() {
        let mut emitter = TokenEmitter::new("progress", Duration::from_millis(1));
        let total = emitter.total_tokens();
        let events = drain(&mut emitter).await;

        let progress: Vec<u64> = events[..total]
            .iter()
            .map(|e| e.json_data().unwrap()["metadata"]["progress"].as_u64().unwrap())
            .collect();
        assert!(progress[0] > 0);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress[total - 1], 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_are_paced() {
        let mut emitter = TokenEmitter::new("pace", Duration::from_millis(100));
        let start = Instant::now();

        emitter.next().await.unwrap().unwrap();
        emitter.next().await.unwrap().unwrap();
        assert_eq!(start.elapsed().as_millis(), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_prompt_completes_immediately() {
        let mut emitter = TokenEmitter::new("   ", Duration::from_secs(10));
        let start = Instant::now();

        let event = emitter.next().await.unwrap().unwrap();
        assert_eq!(event.kind(), "complete");
        assert_eq!(event.json_data().unwrap()["total_chunks"], 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(emitter.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_is_sticky() {
        let mut emitter = TokenEmitter::new("x", Duration::from_millis(1));
        drain(&mut emitter).await;
        assert!(emitter.next().await.is_none());
        assert!(emitter.next().await.is_none());
    }
}
