//! Generation driver.
//!
//! [`StreamCoordinator`] turns a chat request into one generation task per
//! session: it opens the upstream stream, feeds fragments through a
//! [`ChunkBuffer`] and writes the resulting frames to the client socket.
//! Cancellation is checked before every fragment and raced against every
//! suspension point.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use metrics::{counter, histogram};
use palaver_core::messages::build_prompt;
use palaver_core::{
    ChatRequest, ChunkBuffer, CompletionProvider, FragmentStream, GenerationParams,
    PromptMessage, SessionError, SessionId, StreamId, UpstreamError,
};
use palaver_telemetry::names;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::StreamDefaults;
use crate::generation::{GenerationContext, GenerationOutcome, GenerationTicket};
use crate::registry::SessionRegistry;

/// Starts, replaces and stops generations.
pub struct StreamCoordinator {
    registry: Arc<SessionRegistry>,
    provider: Arc<dyn CompletionProvider>,
    defaults: StreamDefaults,
}

impl StreamCoordinator {
    /// Create a coordinator over `registry` and `provider`.
    pub fn new(
        registry: Arc<SessionRegistry>,
        provider: Arc<dyn CompletionProvider>,
        defaults: StreamDefaults,
    ) -> Self {
        Self {
            registry,
            provider,
            defaults,
        }
    }

    /// The session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Defaults applied to every generation.
    pub fn defaults(&self) -> &StreamDefaults {
        &self.defaults
    }

    /// Start a generation for `session`, replacing any running one.
    ///
    /// Returns once the task is spawned. Await the ticket to observe how it
    /// ended.
    pub async fn generate(
        &self,
        session: &SessionId,
        request: ChatRequest,
    ) -> Result<GenerationTicket, SessionError> {
        let system_prompt = request
            .system_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&self.defaults.system_prompt);
        let prompt = build_prompt(system_prompt, &request.messages);
        let params = request.params(&self.defaults.params);
        let provider = Arc::clone(&self.provider);
        let threshold = self.defaults.flush_threshold;
        let stream_id = StreamId::new();

        debug!(
            session_id = %session,
            %stream_id,
            conversation = %request.session_id,
            messages = request.messages.len(),
            continue_last = request.continue_last,
            "starting generation"
        );

        self.registry
            .start_generation(session, move |ctx| {
                run_generation(ctx, stream_id, provider, prompt, params, threshold)
            })
            .await
    }

    /// Stop the running generation and wait for it to end.
    ///
    /// Returns `false` if the session is unknown.
    pub async fn stop(&self, session: &SessionId) -> bool {
        if !self.registry.stop_stream(session).await {
            return false;
        }
        self.registry.wait_for_generation(session).await;
        true
    }
}

/// Timing and counts for one generation.
#[derive(Debug)]
pub struct StreamMetrics {
    started: Instant,
    /// Fragments received from upstream.
    pub chunk_count: u64,
    /// Upstream errors seen.
    pub errors: u64,
}

impl StreamMetrics {
    /// Start the clock.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            chunk_count: 0,
            errors: 0,
        }
    }

    /// Time since [`start`](Self::start).
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Fragment throughput. Zero before any time has passed.
    #[allow(clippy::cast_precision_loss)]
    pub fn chunks_per_second(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.chunk_count as f64 / secs
        } else {
            0.0
        }
    }

    fn record(&self, provider: &str, outcome: &GenerationOutcome) {
        let elapsed = self.elapsed();
        info!(
            provider,
            outcome = outcome.label(),
            duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            chunks = self.chunk_count,
            errors = self.errors,
            chunks_per_second = self.chunks_per_second(),
            "generation finished"
        );
        counter!(names::GENERATIONS_TOTAL, "outcome" => outcome.label()).increment(1);
        counter!(names::FRAGMENTS_TOTAL).increment(self.chunk_count);
        histogram!(names::GENERATION_DURATION_SECONDS).record(elapsed.as_secs_f64());
    }
}

#[instrument(skip_all, fields(session_id = %ctx.session_id, stream_id = %stream_id))]
async fn run_generation(
    ctx: GenerationContext,
    stream_id: StreamId,
    provider: Arc<dyn CompletionProvider>,
    prompt: Vec<PromptMessage>,
    params: GenerationParams,
    threshold: usize,
) -> GenerationOutcome {
    let mut metrics = StreamMetrics::start();

    let opened = tokio::select! {
        biased;
        () = ctx.cancel.cancelled() => None,
        result = provider.stream(&prompt, &params) => Some(result),
    };

    let outcome = match opened {
        None => GenerationOutcome::Cancelled,
        Some(Err(e)) => {
            metrics.errors += 1;
            report_upstream_error(&ctx, &e).await
        }
        Some(Ok(stream)) => drive(&ctx, stream, threshold, &mut metrics).await,
    };

    metrics.record(provider.name(), &outcome);
    outcome
}

async fn drive(
    ctx: &GenerationContext,
    mut stream: FragmentStream,
    threshold: usize,
    metrics: &mut StreamMetrics,
) -> GenerationOutcome {
    let mut buffer = ChunkBuffer::with_threshold(threshold);
    let mut frames = 0usize;

    loop {
        if ctx.cancel.is_cancelled() {
            buffer.discard();
            return GenerationOutcome::Cancelled;
        }

        let next = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => {
                buffer.discard();
                return GenerationOutcome::Cancelled;
            }
            next = stream.next() => next,
        };

        let frame = match next {
            Some(Ok(fragment)) => {
                metrics.chunk_count += 1;
                buffer.push(&fragment)
            }
            Some(Err(e)) => {
                metrics.errors += 1;
                buffer.discard();
                return report_upstream_error(ctx, &e).await;
            }
            None => buffer.finish(),
        };

        if let Some(frame) = frame {
            if !send_frame(ctx, frame).await {
                return if ctx.cancel.is_cancelled() {
                    GenerationOutcome::Cancelled
                } else {
                    GenerationOutcome::Failed("client disconnected".into())
                };
            }
            frames += 1;
        }

        if buffer.is_done() {
            return GenerationOutcome::Completed {
                truncated: buffer.is_truncated(),
                frames,
            };
        }
    }
}

async fn send_frame(ctx: &GenerationContext, frame: String) -> bool {
    let sent = tokio::select! {
        biased;
        () = ctx.cancel.cancelled() => false,
        sent = ctx.socket.send_text(frame) => sent,
    };
    if sent {
        counter!(names::FRAMES_TOTAL).increment(1);
    }
    sent
}

/// Tell the client unless the failure coincides with a deliberate stop.
async fn report_upstream_error(ctx: &GenerationContext, error: &UpstreamError) -> GenerationOutcome {
    counter!(names::UPSTREAM_ERRORS_TOTAL, "kind" => error.error_kind()).increment(1);
    if ctx.cancel.is_cancelled() {
        debug!(error = %error, "upstream error after stop suppressed");
        return GenerationOutcome::Cancelled;
    }
    warn!(error = %error, kind = error.error_kind(), "upstream failed");
    let sent = tokio::select! {
        biased;
        () = ctx.cancel.cancelled() => false,
        sent = ctx.socket.send_text(format!("Error: {error}")) => sent,
    };
    if !sent && ctx.cancel.is_cancelled() {
        return GenerationOutcome::Cancelled;
    }
    GenerationOutcome::Failed(error.to_string())
}

#[cfg(test)]
mod tests {
    use palaver_core::{ChatMessage, Role, TokenFragment};
    use palaver_llm::{MockProvider, MockResponse, MockStep};

    use super::*;
    use crate::registry::RegistryConfig;
    use crate::socket::test_support::{drain, socket, socket_with_capacity};

    const SID: &str = "127.0.0.1:5000";

    fn sid() -> SessionId {
        SessionId::from_raw(SID)
    }

    fn request(text: &str) -> ChatRequest {
        ChatRequest {
            session_id: "conv-1".into(),
            messages: vec![ChatMessage {
                role: Role::User,
                content: text.into(),
                timestamp: "2024-01-01T00:00:00Z".into(),
            }],
            max_tokens: None,
            temperature: None,
            continue_last: false,
            system_prompt: None,
            database_id: None,
        }
    }

    async fn setup(
        provider: MockProvider,
    ) -> (
        StreamCoordinator,
        Arc<MockProvider>,
        tokio::sync::mpsc::Receiver<String>,
    ) {
        let registry = SessionRegistry::new(RegistryConfig::default());
        let (s, rx) = socket(SID);
        assert!(registry.connect(s).await);
        let provider = Arc::new(provider);
        let coordinator = StreamCoordinator::new(
            registry,
            provider.clone() as Arc<dyn CompletionProvider>,
            StreamDefaults::default(),
        );
        (coordinator, provider, rx)
    }

    async fn wait_for_open_stream(provider: &MockProvider) {
        while provider.open_streams() == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn first_frame_waits_for_stop() {
        let (coord, _provider, mut rx) = setup(MockProvider::new(vec![MockResponse::fragments(vec![
            TokenFragment::text("Hello"),
            TokenFragment::text(" world."),
            TokenFragment::stop(" Bye!"),
        ])]))
        .await;

        let ticket = coord.generate(&sid(), request("hi")).await.unwrap();
        assert_eq!(
            ticket.outcome().await,
            GenerationOutcome::Completed { truncated: false, frames: 1 }
        );
        assert_eq!(drain(&mut rx), vec!["Hello world. Bye!"]);
    }

    #[tokio::test]
    async fn exhausted_stream_flushes_remainder() {
        let (coord, _provider, mut rx) = setup(MockProvider::new(vec![MockResponse::fragments(vec![
            TokenFragment::text("abc"),
            TokenFragment::text("def"),
        ])]))
        .await;

        let ticket = coord.generate(&sid(), request("hi")).await.unwrap();
        assert!(matches!(ticket.outcome().await, GenerationOutcome::Completed { frames: 1, .. }));
        assert_eq!(drain(&mut rx), vec!["abcdef"]);
    }

    #[tokio::test]
    async fn streaming_flushes_on_punctuation_and_length() {
        let (coord, _provider, mut rx) = setup(MockProvider::new(vec![MockResponse::fragments(vec![
            TokenFragment::stop("First."),
            TokenFragment::text("Second"),
            TokenFragment::text(" part."),
            TokenFragment::length(" cut"),
        ])]))
        .await;

        let ticket = coord.generate(&sid(), request("hi")).await.unwrap();
        assert_eq!(
            ticket.outcome().await,
            GenerationOutcome::Completed { truncated: true, frames: 3 }
        );
        assert_eq!(drain(&mut rx), vec!["First.", "Second part.", " cut"]);
    }

    #[tokio::test]
    async fn prompt_uses_default_system_prompt() {
        let (coord, provider, _rx) = setup(MockProvider::always(MockResponse::text("ok"))).await;
        let ticket = coord.generate(&sid(), request("question")).await.unwrap();
        let _ = ticket.outcome().await;

        let prompt = provider.last_prompt().unwrap();
        assert_eq!(prompt[0], PromptMessage::system(&coord.defaults().system_prompt));
        assert_eq!(prompt[1], PromptMessage::user("question"));
    }

    #[tokio::test]
    async fn request_overrides_system_prompt_and_params() {
        let (coord, provider, _rx) = setup(MockProvider::always(MockResponse::text("ok"))).await;
        let mut req = request("q");
        req.system_prompt = Some("Be terse.".into());
        req.max_tokens = Some(42);
        req.temperature = Some(0.1);
        let ticket = coord.generate(&sid(), req).await.unwrap();
        let _ = ticket.outcome().await;

        assert_eq!(provider.last_prompt().unwrap()[0], PromptMessage::system("Be terse."));
        let params = provider.last_params().unwrap();
        assert_eq!(params.max_tokens, 42);
        assert!((params.temperature - 0.1).abs() < f32::EPSILON);
        assert!((params.top_p - 0.95).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn blank_system_prompt_falls_back_to_default() {
        let (coord, provider, _rx) = setup(MockProvider::always(MockResponse::text("ok"))).await;
        let mut req = request("q");
        req.system_prompt = Some("   ".into());
        let _ = coord.generate(&sid(), req).await.unwrap().outcome().await;
        assert_eq!(
            provider.last_prompt().unwrap()[0],
            PromptMessage::system(&coord.defaults().system_prompt)
        );
    }

    #[tokio::test]
    async fn upstream_open_failure_sends_error_frame() {
        let (coord, _provider, mut rx) = setup(MockProvider::new(vec![MockResponse::Fail(
            UpstreamError::AuthenticationFailed("bad key".into()),
        )]))
        .await;

        let ticket = coord.generate(&sid(), request("hi")).await.unwrap();
        assert!(matches!(ticket.outcome().await, GenerationOutcome::Failed(_)));
        assert_eq!(drain(&mut rx), vec!["Error: authentication failed: bad key"]);
        assert!(coord.registry().contains(&sid()).await);
    }

    #[tokio::test]
    async fn mid_stream_error_discards_buffer() {
        let (coord, _provider, mut rx) = setup(MockProvider::new(vec![MockResponse::Script(vec![
            MockStep::Fragment(TokenFragment::text("partial")),
            MockStep::Error(UpstreamError::StreamInterrupted("reset".into())),
        ])]))
        .await;

        let ticket = coord.generate(&sid(), request("hi")).await.unwrap();
        assert!(matches!(ticket.outcome().await, GenerationOutcome::Failed(m) if m.contains("reset")));
        assert_eq!(drain(&mut rx), vec!["Error: stream interrupted: reset"]);
    }

    #[tokio::test]
    async fn stop_cancels_and_discards_pending_text() {
        let (coord, provider, mut rx) =
            setup(MockProvider::always(MockResponse::Hang(vec![TokenFragment::text("partial")]))).await;

        let ticket = coord.generate(&sid(), request("hi")).await.unwrap();
        wait_for_open_stream(&provider).await;

        assert!(coord.stop(&sid()).await);
        assert!(!coord.registry().has_active_generation(&sid()).await);
        assert_eq!(ticket.outcome().await, GenerationOutcome::Cancelled);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(provider.open_streams(), 0);
    }

    #[tokio::test]
    async fn stop_before_upstream_opens() {
        let (coord, provider, mut rx) = setup(MockProvider::always(MockResponse::delayed(
            Duration::from_secs(3600),
            MockResponse::text("late"),
        )))
        .await;

        let ticket = coord.generate(&sid(), request("hi")).await.unwrap();
        tokio::task::yield_now().await;
        assert!(coord.stop(&sid()).await);
        assert_eq!(ticket.outcome().await, GenerationOutcome::Cancelled);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(provider.peak_streams(), 0);
    }

    #[tokio::test]
    async fn stop_without_generation_returns_immediately() {
        let (coord, _provider, _rx) = setup(MockProvider::new(vec![])).await;
        assert!(coord.stop(&sid()).await);
        assert!(!coord.stop(&SessionId::from_raw("nobody:1")).await);
    }

    #[tokio::test]
    async fn new_generation_cancels_previous() {
        let (coord, provider, mut rx) = setup(MockProvider::new(vec![
            MockResponse::Hang(vec![TokenFragment::text("old")]),
            MockResponse::text("new"),
        ]))
        .await;

        let first = coord.generate(&sid(), request("one")).await.unwrap();
        wait_for_open_stream(&provider).await;
        let second = coord.generate(&sid(), request("two")).await.unwrap();

        assert_eq!(first.outcome().await, GenerationOutcome::Cancelled);
        assert!(matches!(second.outcome().await, GenerationOutcome::Completed { .. }));
        assert_eq!(provider.peak_streams(), 1);
        assert_eq!(drain(&mut rx), vec!["new"]);
    }

    #[tokio::test]
    async fn generate_for_unknown_session_fails() {
        let (coord, _provider, _rx) = setup(MockProvider::always(MockResponse::text("x"))).await;
        let err = coord
            .generate(&SessionId::from_raw("ghost:1"), request("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn error_frame_on_full_queue_does_not_block_disconnect() {
        let registry = SessionRegistry::new(RegistryConfig::default());
        let (s, _rx) = socket_with_capacity(SID, 1);
        assert!(s.send_text("backlog").await);
        assert!(registry.connect(s).await);
        let provider = Arc::new(MockProvider::always(MockResponse::Fail(
            UpstreamError::NetworkError("reset".into()),
        )));
        let coord = StreamCoordinator::new(
            registry,
            provider.clone() as Arc<dyn CompletionProvider>,
            StreamDefaults::default(),
        );

        let ticket = coord.generate(&sid(), request("hi")).await.unwrap();
        while provider.call_count() == 0 {
            tokio::task::yield_now().await;
        }

        let disconnected = tokio::time::timeout(
            Duration::from_secs(2),
            coord.registry().disconnect(&sid()),
        )
        .await;
        assert_eq!(disconnected, Ok(true));
        assert_eq!(ticket.outcome().await, GenerationOutcome::Cancelled);
    }

    #[tokio::test]
    async fn stop_unblocks_error_frame_on_full_queue() {
        let registry = SessionRegistry::new(RegistryConfig::default());
        let (s, _rx) = socket_with_capacity(SID, 1);
        assert!(s.send_text("backlog").await);
        assert!(registry.connect(s).await);
        let coord = StreamCoordinator::new(
            registry,
            Arc::new(MockProvider::always(MockResponse::Fail(
                UpstreamError::NetworkError("reset".into()),
            ))),
            StreamDefaults::default(),
        );

        let ticket = coord.generate(&sid(), request("hi")).await.unwrap();
        tokio::task::yield_now().await;
        let stopped = tokio::time::timeout(Duration::from_secs(2), coord.stop(&sid())).await;
        assert_eq!(stopped, Ok(true));
        assert!(!matches!(ticket.outcome().await, GenerationOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn closed_socket_fails_generation() {
        let (coord, _provider, rx) = setup(MockProvider::always(MockResponse::text("lost"))).await;
        drop(rx);
        let ticket = coord.generate(&sid(), request("hi")).await.unwrap();
        assert_eq!(
            ticket.outcome().await,
            GenerationOutcome::Failed("client disconnected".into())
        );
    }

    #[test]
    fn metrics_rate_is_zero_without_chunks() {
        let m = StreamMetrics::start();
        assert_eq!(m.chunk_count, 0);
        assert!(m.chunks_per_second() >= 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_rate_uses_elapsed_time() {
        let mut m = StreamMetrics::start();
        m.chunk_count = 20;
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!((m.chunks_per_second() - 5.0).abs() < 0.01);
    }
}
