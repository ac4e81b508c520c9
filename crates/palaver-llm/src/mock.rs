//! Scripted provider for tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use palaver_core::{
    CompletionProvider, FragmentStream, GenerationParams, PromptMessage, TokenFragment,
    UpstreamError,
};
use parking_lot::Mutex;

/// One step of a scripted stream.
#[derive(Clone, Debug)]
pub enum MockStep {
    /// Yield a fragment.
    Fragment(TokenFragment),
    /// Yield an error. The stream keeps going if more steps follow.
    Error(UpstreamError),
    /// Sleep before the next step.
    Delay(Duration),
}

/// Pre-programmed response for one `stream()` call.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Stream the steps in order, then end.
    Script(Vec<MockStep>),
    /// Fail the `stream()` call itself.
    Fail(UpstreamError),
    /// Wait, then behave like the inner response.
    Delayed(Duration, Box<MockResponse>),
    /// Yield the fragments, then never yield again until dropped.
    Hang(Vec<TokenFragment>),
}

impl MockResponse {
    /// Plain fragments with no delays.
    pub fn fragments(fragments: Vec<TokenFragment>) -> Self {
        Self::Script(fragments.into_iter().map(MockStep::Fragment).collect())
    }

    /// A single complete reply.
    pub fn text(text: &str) -> Self {
        Self::fragments(vec![TokenFragment::stop(text)])
    }

    /// Fragments spaced `gap` apart.
    pub fn paced(fragments: Vec<TokenFragment>, gap: Duration) -> Self {
        let mut steps = Vec::with_capacity(fragments.len() * 2);
        for fragment in fragments {
            steps.push(MockStep::Delay(gap));
            steps.push(MockStep::Fragment(fragment));
        }
        Self::Script(steps)
    }

    /// Wrap any response with a delay before the stream opens.
    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delayed(delay, Box::new(inner))
    }
}

/// Provider that replays [`MockResponse`]s in call order.
///
/// Once the queue is empty, the fallback response (if any) is used for every
/// further call. Records prompts and parameters and tracks how many streams
/// are open at once.
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    fallback: Option<MockResponse>,
    calls: Mutex<Vec<(Vec<PromptMessage>, GenerationParams)>>,
    open_streams: Arc<AtomicUsize>,
    peak_streams: Arc<AtomicUsize>,
}

impl MockProvider {
    /// Replay `responses` in order; calls beyond the script fail.
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
            open_streams: Arc::new(AtomicUsize::new(0)),
            peak_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Answer every call with `response`.
    pub fn always(response: MockResponse) -> Self {
        Self::new(Vec::new()).with_fallback(response)
    }

    /// Response used once the script runs out.
    #[must_use]
    pub fn with_fallback(mut self, response: MockResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    /// Number of `stream()` calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Prompt of the most recent call.
    pub fn last_prompt(&self) -> Option<Vec<PromptMessage>> {
        self.calls.lock().last().map(|(m, _)| m.clone())
    }

    /// Parameters of the most recent call.
    pub fn last_params(&self) -> Option<GenerationParams> {
        self.calls.lock().last().map(|(_, p)| p.clone())
    }

    /// Streams currently alive (not yet dropped).
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously alive streams.
    pub fn peak_streams(&self) -> usize {
        self.peak_streams.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> Option<MockResponse> {
        self.responses
            .lock()
            .pop_front()
            .or_else(|| self.fallback.clone())
    }

    fn open_guard(&self) -> StreamGuard {
        let now = self.open_streams.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.peak_streams.fetch_max(now, Ordering::SeqCst);
        StreamGuard(self.open_streams.clone())
    }
}

/// Decrements the open-stream count when the stream is dropped.
struct StreamGuard(Arc<AtomicUsize>);

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream(
        &self,
        messages: &[PromptMessage],
        params: &GenerationParams,
    ) -> Result<FragmentStream, UpstreamError> {
        let index = {
            let mut calls = self.calls.lock();
            calls.push((messages.to_vec(), params.clone()));
            calls.len() - 1
        };

        let mut response = self.next_response().ok_or_else(|| {
            UpstreamError::InvalidRequest(format!("MockProvider: no response configured for call {index}"))
        })?;

        loop {
            match response {
                MockResponse::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    response = *inner;
                }
                MockResponse::Fail(err) => return Err(err),
                MockResponse::Script(steps) => {
                    return Ok(Box::pin(scripted(steps.into(), self.open_guard())));
                }
                MockResponse::Hang(fragments) => {
                    let guard = self.open_guard();
                    let head = futures::stream::iter(fragments.into_iter().map(Ok));
                    let tail = futures::stream::unfold(guard, |guard| async move {
                        futures::future::pending::<()>().await;
                        Some((Err(UpstreamError::StreamInterrupted("unreachable".into())), guard))
                    });
                    return Ok(Box::pin(futures::StreamExt::chain(head, tail)));
                }
            }
        }
    }
}

fn scripted(
    steps: VecDeque<MockStep>,
    guard: StreamGuard,
) -> impl futures::Stream<Item = Result<TokenFragment, UpstreamError>> + Send {
    futures::stream::unfold((steps, guard), |(mut steps, guard)| async move {
        loop {
            match steps.pop_front()? {
                MockStep::Delay(d) => tokio::time::sleep(d).await,
                MockStep::Fragment(f) => return Some((Ok(f), (steps, guard))),
                MockStep::Error(e) => return Some((Err(e), (steps, guard))),
            }
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn drain(stream: FragmentStream) -> Vec<Result<TokenFragment, UpstreamError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn replays_script_in_order() {
        let provider = MockProvider::new(vec![
            MockResponse::text("first"),
            MockResponse::text("second"),
        ]);
        let params = GenerationParams::default();

        let a = drain(provider.stream(&[], &params).await.unwrap()).await;
        let b = drain(provider.stream(&[], &params).await.unwrap()).await;
        assert_eq!(a[0].as_ref().unwrap().text, "first");
        assert_eq!(b[0].as_ref().unwrap().text, "second");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_script_errors() {
        let provider = MockProvider::new(vec![]);
        let err = provider
            .stream(&[], &GenerationParams::default())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("no response configured"));
    }

    #[tokio::test]
    async fn fallback_repeats() {
        let provider = MockProvider::always(MockResponse::text("again"));
        for _ in 0..3 {
            let items = drain(provider.stream(&[], &GenerationParams::default()).await.unwrap()).await;
            assert_eq!(items.len(), 1);
        }
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn fail_response_fails_call() {
        let provider = MockProvider::new(vec![MockResponse::Fail(UpstreamError::NetworkError(
            "down".into(),
        ))]);
        let err = provider
            .stream(&[], &GenerationParams::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, UpstreamError::NetworkError(_)));
    }

    #[tokio::test]
    async fn mid_stream_error_step() {
        let provider = MockProvider::new(vec![MockResponse::Script(vec![
            MockStep::Fragment(TokenFragment::text("a")),
            MockStep::Error(UpstreamError::StreamInterrupted("cut".into())),
        ])]);
        let items = drain(provider.stream(&[], &GenerationParams::default()).await.unwrap()).await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn paced_fragments_wait() {
        let provider = MockProvider::new(vec![MockResponse::paced(
            vec![TokenFragment::text("a"), TokenFragment::stop("b")],
            Duration::from_secs(1),
        )]);
        let start = tokio::time::Instant::now();
        let items = drain(provider.stream(&[], &GenerationParams::default()).await.unwrap()).await;
        assert_eq!(items.len(), 2);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn records_prompt_and_params() {
        let provider = MockProvider::always(MockResponse::text("x"));
        let params = GenerationParams {
            max_tokens: 42,
            ..GenerationParams::default()
        };
        let _ = provider
            .stream(&[PromptMessage::system("sys"), PromptMessage::user("hi")], &params)
            .await
            .unwrap();
        assert_eq!(provider.last_prompt().unwrap()[0], PromptMessage::system("sys"));
        assert_eq!(provider.last_params().unwrap().max_tokens, 42);
    }

    #[tokio::test]
    async fn open_stream_tracking() {
        let provider = MockProvider::always(MockResponse::Hang(vec![TokenFragment::text("a")]));
        let s1 = provider.stream(&[], &GenerationParams::default()).await.unwrap();
        let s2 = provider.stream(&[], &GenerationParams::default()).await.unwrap();
        assert_eq!(provider.open_streams(), 2);
        assert_eq!(provider.peak_streams(), 2);
        drop(s1);
        drop(s2);
        assert_eq!(provider.open_streams(), 0);
        assert_eq!(provider.peak_streams(), 2);
    }

    #[tokio::test]
    async fn hang_yields_head_then_pends() {
        let provider = MockProvider::always(MockResponse::Hang(vec![TokenFragment::text("a")]));
        let mut stream = provider.stream(&[], &GenerationParams::default()).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().text, "a");
        let next = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(next.is_err(), "stream should still be pending");
    }
}
