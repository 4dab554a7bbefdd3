use std::time::Duration;

use futures::stream::BoxStream;
use tracing::debug;

use crate::config::SimulationConfig;
use crate::models::Message;

/// Items yielded by a response source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseEvent {
    /// Newly produced text, to be appended to what came before.
    Chunk(String),
    /// Final text of the response. Empty means "whatever was streamed".
    Done(String),
    Error(String),
}

/// Type alias for response streams
pub type ResponseStream = BoxStream<'static, ResponseEvent>;

/// The assistant backend, reduced to what the engine needs from it.
///
/// `produce` is called exactly once per streaming session.
pub trait ResponseSource: Send + Sync {
    fn produce(&self, prior_messages: Vec<Message>) -> ResponseStream;
}

/// Stand-in backend that replays a canned answer word by word.
pub struct SimulatedResponseSource {
    text: String,
    initial_delay: Duration,
    chunk_delay: Duration,
}

impl SimulatedResponseSource {
    pub fn new(text: impl Into<String>, initial_delay: Duration, chunk_delay: Duration) -> Self {
        Self {
            text: text.into(),
            initial_delay,
            chunk_delay,
        }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(
            config.response_text.clone(),
            config.response_delay(),
            config.chunk_delay(),
        )
    }
}

impl ResponseSource for SimulatedResponseSource {
    fn produce(&self, prior_messages: Vec<Message>) -> ResponseStream {
        debug!(messages = prior_messages.len(), "Simulating response");

        let text = self.text.clone();
        let initial_delay = self.initial_delay;
        let chunk_delay = self.chunk_delay;

        Box::pin(async_stream::stream! {
            tokio::time::sleep(initial_delay).await;
            for word in text.split_inclusive(' ') {
                yield ResponseEvent::Chunk(word.to_string());
                if !chunk_delay.is_zero() {
                    tokio::time::sleep(chunk_delay).await;
                }
            }
            yield ResponseEvent::Done(text);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_simulated_source_streams_words_then_done() {
        let source = SimulatedResponseSource::new("one two three", Duration::ZERO, Duration::ZERO);
        let events: Vec<ResponseEvent> = source.produce(Vec::new()).collect().await;

        assert_eq!(
            events,
            vec![
                ResponseEvent::Chunk("one ".into()),
                ResponseEvent::Chunk("two ".into()),
                ResponseEvent::Chunk("three".into()),
                ResponseEvent::Done("one two three".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_simulated_source_from_config() {
        let config = SimulationConfig {
            response_delay_ms: 0,
            chunk_delay_ms: 0,
            response_text: "ok".into(),
            ..SimulationConfig::default()
        };
        let events: Vec<ResponseEvent> = SimulatedResponseSource::from_config(&config)
            .produce(vec![Message::user("hi", Vec::new())])
            .collect()
            .await;
        assert_eq!(events.last(), Some(&ResponseEvent::Done("ok".into())));
    }
}
