use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use counsel_common::{Error, Result};
use futures::Stream;
use tokio::time::{Instant, Sleep};

use crate::providers::{LlmProvider, LlmRequest, LlmStream};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyEvent {
    /// A piece of generated text, in arrival order.
    Fragment(String),
    /// The concatenation of every fragment. Always the last event.
    Finished(String),
}

/// Relays a provider stream as fragments and collects the full reply.
///
/// Yields `Fragment`s as the provider produces them, then exactly one
/// `Finished` with the concatenated text. A provider error or an idle gap
/// longer than `idle_timeout` ends the stream with a single `Err`.
pub struct ReplyStream {
    inner: LlmStream,
    collected: String,
    idle_timeout: Duration,
    deadline: Pin<Box<Sleep>>,
    done: bool,
}

impl ReplyStream {
    pub fn new(inner: LlmStream, idle_timeout: Duration) -> Self {
        Self {
            inner,
            collected: String::new(),
            idle_timeout,
            deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            done: false,
        }
    }

    /// Open a streaming completion, bounding the wait for the provider to answer.
    pub async fn open(
        provider: &dyn LlmProvider,
        request: &LlmRequest,
        idle_timeout: Duration,
    ) -> Result<Self> {
        let inner = tokio::time::timeout(idle_timeout, provider.complete_stream(request))
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "{} did not start streaming within {}s",
                    provider.provider_id(),
                    idle_timeout.as_secs()
                ))
            })??;
        Ok(Self::new(inner, idle_timeout))
    }
}

impl Stream for ReplyStream {
    type Item = Result<ReplyEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(response))) => {
                    let next_deadline = Instant::now() + this.idle_timeout;
                    this.deadline.as_mut().reset(next_deadline);
                    if response.delta.is_empty() {
                        continue;
                    }
                    this.collected.push_str(&response.delta);
                    return Poll::Ready(Some(Ok(ReplyEvent::Fragment(response.delta))));
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    let full = std::mem::take(&mut this.collected);
                    return Poll::Ready(Some(Ok(ReplyEvent::Finished(full))));
                }
                Poll::Pending => {
                    if this.deadline.as_mut().poll(cx).is_ready() {
                        this.done = true;
                        return Poll::Ready(Some(Err(Error::Timeout(format!(
                            "no reply fragment for {}s",
                            this.idle_timeout.as_secs()
                        )))));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::LlmStreamResponse;
    use futures::StreamExt;

    fn fragment(text: &str) -> Result<LlmStreamResponse> {
        Ok(LlmStreamResponse {
            delta: text.to_string(),
            usage: None,
            stop_reason: None,
        })
    }

    #[tokio::test]
    async fn yields_fragments_then_full_text() {
        let inner: LlmStream = Box::pin(futures::stream::iter(vec![
            fragment("안녕"),
            fragment(""),
            fragment("하세요"),
        ]));
        let events: Vec<_> = ReplyStream::new(inner, Duration::from_secs(5))
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(
            events,
            vec![
                ReplyEvent::Fragment("안녕".to_string()),
                ReplyEvent::Fragment("하세요".to_string()),
                ReplyEvent::Finished("안녕하세요".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn provider_error_ends_stream() {
        let inner: LlmStream = Box::pin(futures::stream::iter(vec![
            fragment("partial"),
            Err(Error::Agent("connection reset".to_string())),
            fragment("never seen"),
        ]));
        let mut stream = ReplyStream::new(inner, Duration::from_secs(5));

        assert!(matches!(
            stream.next().await,
            Some(Ok(ReplyEvent::Fragment(_)))
        ));
        assert!(matches!(stream.next().await, Some(Err(Error::Agent(_)))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn stalled_provider_times_out() {
        let inner: LlmStream = Box::pin(futures::stream::pending::<Result<LlmStreamResponse>>());
        let mut stream = ReplyStream::new(inner, Duration::from_millis(50));

        assert!(matches!(stream.next().await, Some(Err(Error::Timeout(_)))));
        assert!(stream.next().await.is_none());
    }
}
