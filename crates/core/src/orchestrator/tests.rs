use std::fmt::{self, Display, Formatter};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::timeout;
use trip_agent_model::{
    ErrorKind as ModelErrorKind, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
    ToolCallRequest,
};
use trip_agent_test_model::{PresetResponse, TestModelProvider};

use crate::conversation::Stage;
use crate::email::{EmailParams, MailError, Mailer, OutgoingEmail};
use crate::store::{FsStateStore, MemoryStateStore, StateStore};
use crate::tool::{Error as ToolError, Tool, ToolResult};
use crate::{Error, OrchestratorBuilder};

const SYSTEM_PROMPT: &str = "You are a smart travel agency.";

#[derive(Deserialize)]
struct FlightsInput {
    departure_airport: String,
    arrival_airport: String,
    #[serde(default)]
    delay_ms: u64,
}

struct StubFlights {
    schema: Value,
    panic: bool,
}

impl StubFlights {
    fn new() -> Self {
        Self {
            schema: json!({
                "type": "object",
                "properties": {
                    "departure_airport": { "type": "string" },
                    "arrival_airport": { "type": "string" }
                }
            }),
            panic: false,
        }
    }

    fn panicking() -> Self {
        Self {
            panic: true,
            ..Self::new()
        }
    }
}

impl Tool for StubFlights {
    type Input = FlightsInput;

    fn name(&self) -> &str {
        "flights_finder"
    }

    fn description(&self) -> &str {
        "Finds flights."
    }

    fn parameter_schema(&self) -> &Value {
        &self.schema
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let panic = self.panic;
        async move {
            tokio::time::sleep(Duration::from_millis(input.delay_ms)).await;
            if panic {
                panic!("search backend is down");
            }
            if input.arrival_airport.is_empty() {
                return Err(ToolError::invalid_input()
                    .with_reason("arrival airport is required"));
            }
            Ok(json!([format!(
                "{}-{} $420",
                input.departure_airport, input.arrival_airport
            )]))
        }
    }
}

#[derive(Clone, Default)]
struct StubMailer {
    failing: Arc<AtomicBool>,
    sent: Arc<Mutex<Vec<OutgoingEmail>>>,
}

impl StubMailer {
    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for StubMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MailError::new("HTTP 503").with_status(503));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

fn builder(
    provider: &TestModelProvider,
    store: &Arc<MemoryStateStore>,
    mailer: &StubMailer,
) -> OrchestratorBuilder {
    OrchestratorBuilder::new(
        provider.clone(),
        store.clone(),
        Arc::new(mailer.clone()),
    )
    .with_system_prompt(SYSTEM_PROMPT)
    .with_tool(StubFlights::new())
}

fn flights_call(id: &str, arrival: &str) -> ToolCallRequest {
    ToolCallRequest {
        id: id.to_owned(),
        name: "flights_finder".to_owned(),
        arguments: json!({
            "departure_airport": "JFK",
            "arrival_airport": arrival,
        }),
    }
}

fn params() -> EmailParams {
    EmailParams::new("agent@example.com", "traveler@example.com", "Your trip")
}

fn tool_messages(messages: &[ModelMessage]) -> Vec<(String, String)> {
    messages
        .iter()
        .filter_map(|msg| match msg {
            ModelMessage::Tool(result) => {
                Some((result.id.clone(), result.content.clone()))
            }
            _ => None,
        })
        .collect()
}

/// Runs thread `t1` to a final answer. `later_turns` script the model
/// calls that follow.
async fn awaiting_send(
    provider: &mut TestModelProvider,
    store: &Arc<MemoryStateStore>,
    mailer: &StubMailer,
    later_turns: Vec<PresetResponse>,
) -> crate::Orchestrator {
    provider.add_assistant_turn(PresetResponse::with_text(
        "## Flights\n\nJFK to LHR for $420.",
    ));
    for turn in later_turns {
        provider.add_assistant_turn(turn);
    }
    let orchestrator = builder(provider, store, mailer).build();
    orchestrator
        .run("t1", Some("Flights to London".to_owned()))
        .await
        .unwrap();
    orchestrator
}

#[tokio::test]
async fn test_tool_round_trip() {
    let mut provider = TestModelProvider::default();
    provider
        .add_assistant_turn(PresetResponse::with_tool_calls([flights_call(
            "call_1", "LHR",
        )]));
    provider.add_assistant_turn(PresetResponse::with_text(
        "One option: JFK to LHR for $420.",
    ));
    let store = Arc::new(MemoryStateStore::default());
    let mailer = StubMailer::default();
    let orchestrator = builder(&provider, &store, &mailer).build();

    let conversation = orchestrator
        .run(
            "t1",
            Some(
                "flights from JFK to LHR on 2025-03-01, returning 2025-03-10"
                    .to_owned(),
            ),
        )
        .await
        .unwrap();

    assert_eq!(conversation.stage(), Stage::AwaitingSend);
    assert_eq!(conversation.messages().len(), 4);
    assert_eq!(
        conversation.final_answer(),
        Some("One option: JFK to LHR for $420.")
    );
    assert_eq!(
        tool_messages(conversation.messages()),
        vec![("call_1".to_owned(), r#"["JFK-LHR $420"]"#.to_owned())]
    );
    assert_eq!(store.get("t1").await.unwrap(), Some(conversation));

    let requests = provider.received_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0].messages[0],
        ModelMessage::System(SYSTEM_PROMPT.to_owned())
    );
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(requests[0].tools[0].name, "flights_finder");
    // The second call sees the tool result.
    assert_eq!(tool_messages(&requests[1].messages).len(), 1);
}

#[tokio::test]
async fn test_tool_panic_is_reported_to_the_model() {
    let mut provider = TestModelProvider::default();
    provider
        .add_assistant_turn(PresetResponse::with_tool_calls([flights_call(
            "call_1", "LHR",
        )]));
    provider.add_assistant_turn(PresetResponse::with_text(
        "The flight search is unavailable right now.",
    ));
    let store = Arc::new(MemoryStateStore::default());
    let mailer = StubMailer::default();
    let orchestrator = OrchestratorBuilder::new(
        provider.clone(),
        store.clone(),
        Arc::new(mailer),
    )
    .with_tool(StubFlights::panicking())
    .build();

    let conversation = orchestrator
        .run("t1", Some("Flights to London".to_owned()))
        .await
        .unwrap();
    assert_eq!(conversation.stage(), Stage::AwaitingSend);

    let requests = provider.received_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        tool_messages(&requests[1].messages),
        vec![(
            "call_1".to_owned(),
            "Error: tool panicked: search backend is down".to_owned()
        )]
    );
}

#[tokio::test]
async fn test_unknown_tool_and_order() {
    let mut slow_call = flights_call("call_1", "LHR");
    slow_call.arguments["delay_ms"] = json!(50);
    let unknown_call = ToolCallRequest {
        id: "call_2".to_owned(),
        name: "trains_finder".to_owned(),
        arguments: json!({}),
    };
    let bad_input_call = flights_call("call_3", "");

    let mut provider = TestModelProvider::default();
    provider.add_assistant_turn(PresetResponse::with_tool_calls([
        slow_call,
        unknown_call,
        bad_input_call,
    ]));
    provider.add_assistant_turn(PresetResponse::with_text("Done."));
    let store = Arc::new(MemoryStateStore::default());
    let mailer = StubMailer::default();
    let orchestrator = builder(&provider, &store, &mailer).build();

    let conversation = orchestrator
        .run("t1", Some("Trips to London".to_owned()))
        .await
        .unwrap();
    assert_eq!(
        tool_messages(conversation.messages()),
        vec![
            (
                "call_1".to_owned(),
                r#"["JFK-LHR $420"]"#.to_owned()
            ),
            ("call_2".to_owned(), "Invalid tool name. Retry.".to_owned()),
            (
                "call_3".to_owned(),
                "Error: arrival airport is required".to_owned()
            ),
        ]
    );
}

#[tokio::test]
async fn test_resume_sends_once() {
    let mut provider = TestModelProvider::default();
    let store = Arc::new(MemoryStateStore::default());
    let mailer = StubMailer::default();
    let orchestrator =
        awaiting_send(&mut provider, &store, &mailer, vec![]).await;

    let conversation = orchestrator.resume("t1", &params()).await.unwrap();
    assert_eq!(conversation.stage(), Stage::Done);
    assert_eq!(store.get("t1").await.unwrap().unwrap().stage(), Stage::Done);

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "traveler@example.com");
    assert_eq!(sent[0].subject, "Your trip");
    assert!(sent[0].html_body.contains("<h2>Flights</h2>"));

    let err = orchestrator.resume("t1", &params()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
    let err = orchestrator
        .run("t1", Some("One more thing".to_owned()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
    assert_eq!(mailer.sent().len(), 1);
}

#[tokio::test]
async fn test_mail_failure_keeps_awaiting_send() {
    let mut provider = TestModelProvider::default();
    let store = Arc::new(MemoryStateStore::default());
    let mailer = StubMailer::default();
    let orchestrator =
        awaiting_send(&mut provider, &store, &mailer, vec![]).await;
    let before = store.raw("t1").await.unwrap();

    mailer.set_failing(true);
    let err = orchestrator.resume("t1", &params()).await.unwrap_err();
    let Error::MailDelivery(mail_err) = &err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(mail_err.status(), Some(503));
    assert_eq!(store.raw("t1").await.unwrap(), before);

    mailer.set_failing(false);
    let conversation = orchestrator.resume("t1", &params()).await.unwrap();
    assert_eq!(conversation.stage(), Stage::Done);
    assert_eq!(mailer.sent().len(), 1);
}

#[tokio::test]
async fn test_run_without_input_while_awaiting_send() {
    let mut provider = TestModelProvider::default();
    let store = Arc::new(MemoryStateStore::default());
    let mailer = StubMailer::default();
    let orchestrator =
        awaiting_send(&mut provider, &store, &mailer, vec![]).await;
    let before = store.raw("t1").await.unwrap();

    let err = orchestrator.run("t1", None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
    assert_eq!(store.raw("t1").await.unwrap(), before);
    assert_eq!(provider.received_requests().len(), 1);
}

#[tokio::test]
async fn test_new_input_reopens_the_thread() {
    let mut provider = TestModelProvider::default();
    let store = Arc::new(MemoryStateStore::default());
    let mailer = StubMailer::default();
    let cheaper = PresetResponse::with_text("Cheaper: $380.");
    let orchestrator =
        awaiting_send(&mut provider, &store, &mailer, vec![cheaper]).await;

    let conversation = orchestrator
        .run("t1", Some("Anything cheaper?".to_owned()))
        .await
        .unwrap();
    assert_eq!(conversation.stage(), Stage::AwaitingSend);
    assert_eq!(conversation.messages().len(), 4);
    assert_eq!(conversation.final_answer(), Some("Cheaper: $380."));
}

#[tokio::test]
async fn test_model_failure_leaves_state_untouched() {
    let mut provider = TestModelProvider::default();
    let store = Arc::new(MemoryStateStore::default());
    let mailer = StubMailer::default();
    let failing = PresetResponse::with_text("x").with_failures(0);
    let orchestrator =
        awaiting_send(&mut provider, &store, &mailer, vec![failing]).await;
    let before = store.raw("t1").await.unwrap();

    let err = orchestrator
        .run("t1", Some("Anything cheaper?".to_owned()))
        .await
        .unwrap_err();
    let Error::ModelInvocation { kind, .. } = err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(kind, ModelErrorKind::Other);
    assert_eq!(store.raw("t1").await.unwrap(), before);
}

#[tokio::test]
async fn test_iteration_guard() {
    let mut provider = TestModelProvider::default();
    provider.set_fallback(PresetResponse::with_tool_calls([flights_call(
        "call_1", "LHR",
    )]));
    let store = Arc::new(MemoryStateStore::default());
    let mailer = StubMailer::default();
    let orchestrator = builder(&provider, &store, &mailer)
        .with_max_iterations(3)
        .build();

    let err = timeout(
        Duration::from_secs(5),
        orchestrator.run("t1", Some("Flights to London".to_owned())),
    )
    .await
    .unwrap()
    .unwrap_err();
    assert!(matches!(err, Error::RecursionExceeded { limit: 3 }));
    assert_eq!(provider.received_requests().len(), 3);

    // Progress is kept and the thread can be continued.
    let stored = store.get("t1").await.unwrap().unwrap();
    assert_eq!(stored.stage(), Stage::Open);
    assert_eq!(stored.messages().len(), 7);
    assert!(matches!(stored.last_message(), Some(ModelMessage::Tool(_))));

    let err = orchestrator.run("t1", None).await.unwrap_err();
    assert!(matches!(err, Error::RecursionExceeded { .. }));
    assert_eq!(provider.received_requests().len(), 6);
}

#[tokio::test]
async fn test_duplicate_call_ids_are_rejected() {
    let mut provider = TestModelProvider::default();
    provider.add_assistant_turn(PresetResponse::with_tool_calls([
        flights_call("call_1", "LHR"),
        flights_call("call_1", "CDG"),
    ]));
    let store = Arc::new(MemoryStateStore::default());
    let mailer = StubMailer::default();
    let orchestrator = builder(&provider, &store, &mailer).build();

    let err = orchestrator
        .run("t1", Some("Flights to Europe".to_owned()))
        .await
        .unwrap_err();
    let Error::ModelInvocation { kind, .. } = err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(kind, ModelErrorKind::MalformedResponse);
    assert_eq!(store.raw("t1").await, None);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_calls_are_retried() {
    let mut provider = TestModelProvider::default();
    provider.add_assistant_turn(
        PresetResponse::with_text("Hello!")
            .with_failures(2)
            .with_failure_kind(ModelErrorKind::RateLimitExceeded),
    );
    let store = Arc::new(MemoryStateStore::default());
    let mailer = StubMailer::default();
    let orchestrator = builder(&provider, &store, &mailer)
        .with_model_retry_budget(Some(Duration::from_secs(60)))
        .build();

    let conversation = orchestrator
        .run("t1", Some("Hi".to_owned()))
        .await
        .unwrap();
    assert_eq!(conversation.final_answer(), Some("Hello!"));
    assert_eq!(provider.received_requests().len(), 3);
}

#[tokio::test]
async fn test_rate_limit_without_retry() {
    let mut provider = TestModelProvider::default();
    provider.add_assistant_turn(
        PresetResponse::with_text("Hello!")
            .with_failures(1)
            .with_failure_kind(ModelErrorKind::RateLimitExceeded),
    );
    let store = Arc::new(MemoryStateStore::default());
    let mailer = StubMailer::default();
    let orchestrator = builder(&provider, &store, &mailer)
        .with_model_retry_budget(None)
        .build();

    let err = orchestrator
        .run("t1", Some("Hi".to_owned()))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(
        err,
        Error::ModelInvocation {
            kind: ModelErrorKind::RateLimitExceeded,
            ..
        }
    ));

    // The caller retries the same message.
    orchestrator
        .run("t1", Some("Hi".to_owned()))
        .await
        .unwrap();
}

#[derive(Debug)]
struct RateLimited;

impl Display for RateLimited {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "rate limit exceeded")
    }
}

impl std::error::Error for RateLimited {}

impl ModelProviderError for RateLimited {
    fn kind(&self) -> ModelErrorKind {
        ModelErrorKind::RateLimitExceeded
    }
}

/// Streams a few words, then gets rate limited.
#[derive(Clone, Default)]
struct CutOffProvider {
    attempts: Arc<AtomicUsize>,
}

struct CutOffResponse {
    deltas: Vec<&'static str>,
}

impl ModelResponse for CutOffResponse {
    type Error = RateLimited;

    fn poll_next_event(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        if this.deltas.is_empty() {
            return Poll::Ready(Err(RateLimited));
        }
        let delta = this.deltas.remove(0).to_owned();
        Poll::Ready(Ok(Some(ModelResponseEvent::MessageDelta(delta))))
    }
}

impl ModelProvider for CutOffProvider {
    type Error = RateLimited;
    type Response = CutOffResponse;

    fn send_request(
        &self,
        _req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(CutOffResponse {
            deltas: vec!["Flights ", "from "],
        }))
    }
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_after_streaming_is_not_retried() {
    let provider = CutOffProvider::default();
    let store = Arc::new(MemoryStateStore::default());
    let mailer = StubMailer::default();
    let transcript = Arc::new(Mutex::new(String::new()));
    let orchestrator = OrchestratorBuilder::new(
        provider.clone(),
        store.clone(),
        Arc::new(mailer.clone()),
    )
    .with_model_retry_budget(Some(Duration::from_secs(60)))
    .on_transcript({
        let transcript = Arc::clone(&transcript);
        move |delta| transcript.lock().unwrap().push_str(delta)
    })
    .build();

    let err = orchestrator
        .run("t1", Some("Flights to London".to_owned()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ModelInvocation {
            kind: ModelErrorKind::RateLimitExceeded,
            ..
        }
    ));
    assert_eq!(provider.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(*transcript.lock().unwrap(), "Flights from ");
    assert!(store.get("t1").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_model_timeout() {
    let mut provider = TestModelProvider::default();
    provider.add_assistant_turn(PresetResponse::with_text("Too late."));
    provider.set_delay(Duration::from_secs(600));
    let store = Arc::new(MemoryStateStore::default());
    let mailer = StubMailer::default();
    let orchestrator = builder(&provider, &store, &mailer)
        .with_model_timeout(Duration::from_secs(1))
        .build();

    let err = orchestrator
        .run("t1", Some("Hi".to_owned()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ModelInvocation {
            kind: ModelErrorKind::Timeout,
            ..
        }
    ));
}

#[tokio::test]
async fn test_same_thread_is_serialized() {
    let mut provider = TestModelProvider::default();
    provider.set_fallback(PresetResponse::with_text("Noted."));
    let store = Arc::new(MemoryStateStore::default());
    let mailer = StubMailer::default();
    let orchestrator = builder(&provider, &store, &mailer).build();

    let (a, b, c) = tokio::join!(
        orchestrator.run("t1", Some("First".to_owned())),
        orchestrator.run("t1", Some("Second".to_owned())),
        orchestrator.run("t2", Some("Other".to_owned())),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    let t1 = store.get("t1").await.unwrap().unwrap();
    let roles: Vec<_> = t1
        .messages()
        .iter()
        .map(|msg| match msg {
            ModelMessage::User(_) => "user",
            ModelMessage::Assistant(_) => "assistant",
            _ => "other",
        })
        .collect();
    assert_eq!(roles, vec!["user", "assistant", "user", "assistant"]);
    assert_eq!(store.get("t2").await.unwrap().unwrap().messages().len(), 2);
}

#[tokio::test]
async fn test_transcript_hook() {
    let mut provider = TestModelProvider::default();
    provider.add_assistant_turn(PresetResponse::with_text("Bon voyage!"));
    let store = Arc::new(MemoryStateStore::default());
    let mailer = StubMailer::default();
    let transcript = Arc::new(Mutex::new(String::new()));
    let orchestrator = builder(&provider, &store, &mailer)
        .on_transcript({
            let transcript = Arc::clone(&transcript);
            move |delta| transcript.lock().unwrap().push_str(delta)
        })
        .build();

    orchestrator
        .run("t1", Some("Hi".to_owned()))
        .await
        .unwrap();
    assert_eq!(*transcript.lock().unwrap(), "Bon voyage!");
}

#[tokio::test]
async fn test_discard_and_invalid_params() {
    let mut provider = TestModelProvider::default();
    let store = Arc::new(MemoryStateStore::default());
    let mailer = StubMailer::default();
    let orchestrator =
        awaiting_send(&mut provider, &store, &mailer, vec![]).await;

    let mut bad_params = params();
    bad_params.to = String::new();
    let err = orchestrator.resume("t1", &bad_params).await.unwrap_err();
    assert!(matches!(err, Error::InvalidParams(_)));

    orchestrator.discard("t1").await.unwrap();
    assert_eq!(orchestrator.state("t1").await.unwrap(), None);
    orchestrator.discard("t1").await.unwrap();

    let err = orchestrator.run("t1", None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
    let err = orchestrator.resume("t1", &params()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
}

#[tokio::test]
async fn test_resume_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut provider = TestModelProvider::default();
    provider.add_assistant_turn(PresetResponse::with_text("**Hotel V**"));
    let mailer = StubMailer::default();

    let first = OrchestratorBuilder::new(
        provider.clone(),
        Arc::new(FsStateStore::new(dir.path())),
        Arc::new(mailer.clone()),
    )
    .build();
    first
        .run("trip-1", Some("Hotels in Amsterdam".to_owned()))
        .await
        .unwrap();
    drop(first);

    let second = OrchestratorBuilder::new(
        provider,
        Arc::new(FsStateStore::new(dir.path())),
        Arc::new(mailer.clone()),
    )
    .build();
    let before = std::fs::read(dir.path().join("trip-1.json")).unwrap();
    let err = second.run("trip-1", None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
    assert_eq!(
        std::fs::read(dir.path().join("trip-1.json")).unwrap(),
        before
    );

    let conversation = second.resume("trip-1", &params()).await.unwrap();
    assert_eq!(conversation.stage(), Stage::Done);
    assert_eq!(
        mailer.sent()[0].html_body,
        "<p><strong>Hotel V</strong></p>\n"
    );
}
