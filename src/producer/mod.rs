//! Event producers.

mod echo;
mod heartbeat;
mod progress;
mod tokens;
mod traits;

pub use echo::{split_chunks, EchoChunker, ANONYMOUS_USER};
pub use heartbeat::Heartbeat;
pub use progress::{ProgressEmitter, STATUS_COMPLETE, STATUS_IN_PROGRESS};
pub use tokens::{simulated_response, tokenize, TokenEmitter};
pub use traits::{Pacer, Producer};

use crate::config::ProducerConfig;

/// What a session should stream, as decided by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerSpec {
    Heartbeat,
    Tokens {
        prompt: String,
    },
    Progress {
        task: String,
        steps: Option<u32>,
    },
    Echo {
        body: String,
        user_id: Option<String>,
        chunk_size: Option<usize>,
    },
}

/// Create a fresh producer for one session.
pub fn create_producer(spec: ProducerSpec, config: &ProducerConfig) -> Box<dyn Producer> {
    match spec {
        ProducerSpec::Heartbeat => {
            let heartbeat =
                Heartbeat::new(config.heartbeat_interval(), config.heartbeat_message.clone());
            match config.heartbeat_limit {
                0 => Box::new(heartbeat),
                limit => Box::new(heartbeat.with_limit(limit)),
            }
        }
        ProducerSpec::Tokens { prompt } => {
            Box::new(TokenEmitter::new(&prompt, config.token_interval()))
        }
        ProducerSpec::Progress { task, steps } => Box::new(ProgressEmitter::new(
            task,
            steps.unwrap_or(config.progress_steps),
            config.progress_interval(),
        )),
        ProducerSpec::Echo {
            body,
            user_id,
            chunk_size,
        } => {
            let chunker = EchoChunker::new(
                &body,
                chunk_size.unwrap_or(config.echo_chunk_size),
                config.echo_delay(),
            );
            match user_id {
                Some(user_id) => Box::new(chunker.with_user_id(user_id)),
                None => Box::new(chunker),
            }
        }
    }
}
