use async_trait::async_trait;
use gemflows::capability::{ClipboardSink, FileSink, InputSource};
use gemflows::engine::{Dependencies, Engine, EngineError, StepError, StepExecutor};
use gemflows::provider::http::HttpProvider;
use gemflows::provider::GenerationProvider;
use gemflows::telemetry::TelemetrySink;
use gemflows::workflow::parser::parse_workflow;
use gemflows::workflow::{Step, StepKind, ValidationError, Workflow};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ScriptedInput {
    answers: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<(String, &'static str)>>,
}

impl ScriptedInput {
    fn new(answers: &[&str]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn next(&self, prompt: &str, mode: &'static str) -> anyhow::Result<String> {
        self.prompts.lock().unwrap().push((prompt.to_string(), mode));
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no more scripted input"))
    }

    fn prompts(&self) -> Vec<(String, &'static str)> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl InputSource for ScriptedInput {
    async fn read_line(&self, prompt: &str) -> anyhow::Result<String> {
        self.next(prompt, "line")
    }

    async fn read_until_end(&self, prompt: &str) -> anyhow::Result<String> {
        self.next(prompt, "multiline")
    }

    async fn read_clipboard_after_confirm(&self, prompt: &str) -> anyhow::Result<String> {
        self.next(prompt, "clipboard")
    }
}

#[derive(Default)]
struct RecordingClipboard {
    writes: Mutex<Vec<String>>,
}

#[async_trait]
impl ClipboardSink for RecordingClipboard {
    async fn write(&self, text: &str) -> anyhow::Result<()> {
        self.writes.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct MemoryFiles {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

#[async_trait]
impl FileSink for MemoryFiles {
    async fn write(&self, path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }
}

type Reply = (Duration, Result<String, String>);

/// Provider whose replies are keyed by user prompt.
#[derive(Default)]
struct FakeProvider {
    replies: HashMap<String, Reply>,
    calls: Mutex<Vec<(String, String, String)>>,
    finished: AtomicUsize,
}

impl FakeProvider {
    fn reply(mut self, user_prompt: &str, text: &str) -> Self {
        self.replies
            .insert(user_prompt.into(), (Duration::ZERO, Ok(text.into())));
        self
    }

    fn delayed(mut self, user_prompt: &str, delay: Duration, reply: Result<&str, &str>) -> Self {
        let reply = reply.map(String::from).map_err(String::from);
        self.replies.insert(user_prompt.into(), (delay, reply));
        self
    }

    fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationProvider for FakeProvider {
    async fn generate(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push((
            model.to_string(),
            system_prompt.to_string(),
            user_prompt.to_string(),
        ));
        let (delay, reply) = self
            .replies
            .get(user_prompt)
            .cloned()
            .unwrap_or((Duration::ZERO, Ok(format!("echo: {}", user_prompt))));
        tokio::time::sleep(delay).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        reply.map_err(|e| anyhow::anyhow!(e))
    }
}

#[derive(Default)]
struct RecordingTelemetry {
    events: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl TelemetrySink for RecordingTelemetry {
    fn step_completed(&self, workflow_name: &str, step_id: &str, step_type: &str, _duration_ms: u64) {
        self.events.lock().unwrap().push((
            workflow_name.to_string(),
            step_id.to_string(),
            step_type.to_string(),
        ));
    }
}

struct Harness {
    input: Arc<ScriptedInput>,
    clipboard: Arc<RecordingClipboard>,
    files: Arc<MemoryFiles>,
    provider: Arc<FakeProvider>,
    telemetry: Arc<RecordingTelemetry>,
}

impl Harness {
    fn new(answers: &[&str], provider: FakeProvider) -> Self {
        Self {
            input: Arc::new(ScriptedInput::new(answers)),
            clipboard: Arc::new(RecordingClipboard::default()),
            files: Arc::new(MemoryFiles::default()),
            provider: Arc::new(provider),
            telemetry: Arc::new(RecordingTelemetry::default()),
        }
    }

    fn engine(&self) -> Engine {
        Engine::new(Dependencies {
            generator: Some(self.provider.clone()),
            input: self.input.clone(),
            clipboard: self.clipboard.clone(),
            files: self.files.clone(),
            telemetry: Some(self.telemetry.clone()),
        })
    }

    fn engine_without_provider(&self) -> Engine {
        Engine::new(Dependencies {
            generator: None,
            input: self.input.clone(),
            clipboard: self.clipboard.clone(),
            files: self.files.clone(),
            telemetry: None,
        })
    }

    fn events(&self) -> Vec<String> {
        self.telemetry
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, id, _)| id.clone())
            .collect()
    }
}

fn workflow(yaml: &str) -> Workflow {
    gemflows::logger::init_test();
    parse_workflow(yaml).unwrap()
}

// ---------------------------------------------------------------------------
// Sequential runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_topic_to_post_end_to_end() {
    let wf = workflow(
        r#"
name: blog
steps:
  - id: topic
    type: input
    prompt: "Topic?"
  - id: draft
    type: generate
    model: gemini-2.0-flash
    system_prompt: "You write short posts."
    user_prompt: "Write about {{ topic }}"
  - id: saved
    type: save
    filename: "posts/{{topic}}.md"
    content: "{{draft}}"
  - id: copy
    type: clipboard
    content: "{{ draft }}"
"#,
    );
    let h = Harness::new(&["rust"], FakeProvider::default().reply("Write about rust", "Rust is fast."));

    let memory = h.engine().run(&wf).await.unwrap();

    assert_eq!(memory.len(), 4);
    assert_eq!(memory.get("topic"), Some("rust"));
    assert_eq!(memory.get("draft"), Some("Rust is fast."));
    assert_eq!(memory.get("saved"), Some("posts/rust.md"));
    assert_eq!(memory.get("copy"), Some("copied"));

    assert_eq!(
        h.provider.calls(),
        vec![(
            "gemini-2.0-flash".to_string(),
            "You write short posts.".to_string(),
            "Write about rust".to_string()
        )]
    );
    let files = h.files.files.lock().unwrap();
    assert_eq!(
        files.get(Path::new("posts/rust.md")).map(Vec::as_slice),
        Some("Rust is fast.".as_bytes())
    );
    assert_eq!(*h.clipboard.writes.lock().unwrap(), vec!["Rust is fast."]);
    assert_eq!(h.events(), vec!["topic", "draft", "saved", "copy"]);
}

#[tokio::test]
async fn test_input_modes_and_default_prompts() {
    let wf = workflow(
        r#"
name: modes
steps:
  - id: a
    type: input
  - id: b
    type: input
    multiline: true
    prompt: "Paste:"
  - id: c
    type: input
    from_clipboard: true
    multiline: true
"#,
    );
    let h = Harness::new(&["one", "two\nlines", "clip"], FakeProvider::default());

    let memory = h.engine().run(&wf).await.unwrap();
    assert_eq!(memory.get("b"), Some("two\nlines"));

    let prompts = h.input.prompts();
    assert_eq!(prompts[0].1, "line");
    assert_eq!(prompts[1], ("Paste:".to_string(), "multiline"));
    // Clipboard mode wins over multiline.
    assert_eq!(prompts[2].1, "clipboard");
}

#[tokio::test]
async fn test_gemini_alias_runs_as_generate() {
    let wf = workflow(
        r#"
name: alias
steps:
  - id: g
    type: gemini
    model: m
    user_prompt: hi
"#,
    );
    let h = Harness::new(&[], FakeProvider::default().reply("hi", "hello"));
    let memory = h.engine().run(&wf).await.unwrap();
    assert_eq!(memory.get("g"), Some("hello"));
}

#[tokio::test]
async fn test_render_error_names_step_and_variable() {
    let wf = workflow(
        r#"
name: broken
steps:
  - id: first
    type: input
  - id: second
    type: generate
    model: m
    user_prompt: "{{ first }} and {{ nowhere }}"
"#,
    );
    let h = Harness::new(&["x"], FakeProvider::default());

    let err = h.engine().run(&wf).await.unwrap_err();
    assert_eq!(err.step_id(), Some("second"));
    assert!(matches!(err, EngineError::Render { .. }));
    assert!(err.to_string().contains("nowhere"));
    assert!(h.provider.calls().is_empty());
    assert_eq!(h.events(), vec!["first"]);
}

#[tokio::test]
async fn test_missing_provider_fails_generate_step() {
    let wf = workflow(
        r#"
name: no-provider
steps:
  - id: g
    type: generate
    model: m
    user_prompt: hi
"#,
    );
    let h = Harness::new(&[], FakeProvider::default());
    let err = h.engine_without_provider().run(&wf).await.unwrap_err();
    assert_eq!(err.step_id(), Some("g"));
    assert!(err.to_string().contains("not configured"));
}

#[tokio::test]
async fn test_empty_required_fields_are_errors() {
    let cases = [
        ("generate", "user_prompt: hi", "model is required"),
        ("save", "content: x", "filename is required"),
        ("clipboard", "content: \"\"", "content is required"),
    ];
    for (kind, extra, message) in cases {
        let yaml = format!("name: t\nsteps:\n  - id: s\n    type: {}\n    {}\n", kind, extra);
        let wf = workflow(&yaml);
        let h = Harness::new(&[], FakeProvider::default());
        let err = h.engine().run(&wf).await.unwrap_err();
        assert!(err.to_string().contains(message), "{}: {}", kind, err);
        assert!(h.provider.calls().is_empty());
    }
}

#[tokio::test]
async fn test_empty_generation_is_an_error() {
    let wf = workflow(
        r#"
name: empty
steps:
  - id: g
    type: generate
    model: m
    user_prompt: quiet
"#,
    );
    let h = Harness::new(&[], FakeProvider::default().reply("quiet", ""));
    let err = h.engine().run(&wf).await.unwrap_err();
    assert!(err.to_string().contains("no text in response"));
}

// ---------------------------------------------------------------------------
// Validation happens before execution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_duplicate_ids_rejected_before_running() {
    let wf = Workflow {
        name: "dup".into(),
        description: String::new(),
        steps: vec![Step::new("a", StepKind::Input), Step::new("a", StepKind::Input)],
    };
    let h = Harness::new(&["x", "y"], FakeProvider::default());

    let err = h.engine().run(&wf).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::DuplicateStepId(ref id)) if id == "a"
    ));
    assert!(h.input.prompts().is_empty());
}

#[tokio::test]
async fn test_mixed_parallel_group_rejected_before_running() {
    let mut gen = Step::new("g", StepKind::Generate);
    gen.model = "m".into();
    gen.parallel_group = Some("p".into());
    let mut save = Step::new("s", StepKind::Save);
    save.filename = "out.txt".into();
    save.parallel_group = Some("p".into());

    let wf = Workflow {
        name: "mixed".into(),
        description: String::new(),
        steps: vec![Step::new("first", StepKind::Input), gen, save],
    };
    let h = Harness::new(&["x"], FakeProvider::default());

    let err = h.engine().run(&wf).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::MixedParallelGroup { .. })
    ));
    assert!(h.input.prompts().is_empty());
    assert!(h.files.files.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_parse_rejects_input_group() {
    let yaml = r#"
name: mixed
steps:
  - id: a
    type: input
    parallel_group: p
  - id: b
    type: input
    parallel_group: p
"#;
    let err = parse_workflow(yaml).unwrap_err();
    assert!(format!("{:#}", err).contains("only supports generate"));
}

// ---------------------------------------------------------------------------
// Parallel groups
// ---------------------------------------------------------------------------

const PARALLEL: &str = r#"
name: fanout
steps:
  - id: topic
    type: input
  - id: a
    type: generate
    model: m
    user_prompt: "A {{topic}}"
    parallel_group: drafts
  - id: b
    type: generate
    model: m
    user_prompt: "B {{topic}}"
    parallel_group: drafts
  - id: c
    type: generate
    model: m
    user_prompt: "C {{topic}}"
    parallel_group: drafts
  - id: pick
    type: generate
    model: m
    user_prompt: "{{a}}|{{b}}|{{c}}"
"#;

#[tokio::test]
async fn test_parallel_group_commits_all_and_reports_in_order() {
    let wf = workflow(PARALLEL);
    let provider = FakeProvider::default()
        .delayed("A x", Duration::from_millis(60), Ok("a!"))
        .delayed("B x", Duration::from_millis(5), Ok("b!"))
        .delayed("C x", Duration::from_millis(30), Ok("c!"));
    let h = Harness::new(&["x"], provider);

    let memory = h.engine().run(&wf).await.unwrap();
    assert_eq!(memory.get("pick"), Some("echo: a!|b!|c!"));
    // Completion order differs from declared order; telemetry follows the
    // declaration.
    assert_eq!(h.events(), vec!["topic", "a", "b", "c", "pick"]);
}

#[tokio::test]
async fn test_parallel_group_runs_concurrently() {
    let wf = workflow(PARALLEL);
    let delay = Duration::from_millis(200);
    let provider = FakeProvider::default()
        .delayed("A x", delay, Ok("a"))
        .delayed("B x", delay, Ok("b"))
        .delayed("C x", delay, Ok("c"));
    let h = Harness::new(&["x"], provider);

    let start = std::time::Instant::now();
    h.engine().run(&wf).await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(550));
}

#[tokio::test]
async fn test_parallel_failure_commits_nothing() {
    let wf = workflow(PARALLEL);
    let provider = FakeProvider::default()
        .reply("A x", "a!")
        .delayed("B x", Duration::from_millis(50), Err("quota exceeded"))
        .reply("C x", "c!");
    let h = Harness::new(&["x"], provider);

    let err = h.engine().run(&wf).await.unwrap_err();
    assert_eq!(err.step_id(), Some("b"));
    assert!(err.to_string().contains("quota exceeded"));

    // Every member finished before the run returned.
    assert_eq!(h.provider.finished.load(Ordering::SeqCst), 3);
    // Neither the successful siblings nor the step after the group ran or
    // reported.
    assert_eq!(h.events(), vec!["topic"]);
    assert!(!h.provider.calls().iter().any(|(_, _, u)| u.contains('|')));
}

#[tokio::test]
async fn test_parallel_failure_cancels_slow_siblings() {
    let wf = workflow(PARALLEL);
    let provider = FakeProvider::default()
        .delayed("A x", Duration::from_secs(10), Ok("slow"))
        .reply("B x", "b!")
        .delayed("C x", Duration::from_millis(10), Err("bad request"));
    let h = Harness::new(&["x"], provider);

    let result = tokio::time::timeout(Duration::from_secs(3), h.engine().run(&wf))
        .await
        .expect("group should not wait for cancelled siblings");
    let err = result.unwrap_err();

    // The cancelled sibling is never blamed.
    assert_eq!(err.step_id(), Some("c"));
    assert!(matches!(
        err,
        EngineError::Step {
            source: StepError::Capability(_),
            ..
        }
    ));
}

#[tokio::test]
async fn test_group_members_cannot_see_each_other() {
    let wf = workflow(
        r#"
name: snapshot
steps:
  - id: a
    type: generate
    model: m
    user_prompt: first
    parallel_group: g
  - id: b
    type: generate
    model: m
    user_prompt: "after {{a}}"
    parallel_group: g
"#,
    );
    let h = Harness::new(&[], FakeProvider::default());

    let err = h.engine().run(&wf).await.unwrap_err();
    assert_eq!(err.step_id(), Some("b"));
    assert!(matches!(err, EngineError::Render { .. }));
    // Rendering fails before any member starts.
    assert!(h.provider.calls().is_empty());
}

#[tokio::test]
async fn test_same_tag_split_by_other_step_forms_two_groups() {
    let wf = workflow(
        r#"
name: split
steps:
  - id: a
    type: generate
    model: m
    user_prompt: one
    parallel_group: g
  - id: mid
    type: generate
    model: m
    user_prompt: "{{a}}"
  - id: b
    type: generate
    model: m
    user_prompt: "{{mid}}"
    parallel_group: g
"#,
    );
    let h = Harness::new(&[], FakeProvider::default());
    let memory = h.engine().run(&wf).await.unwrap();
    assert_eq!(memory.get("b"), Some("echo: echo: echo: one"));
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_executor_rejects_unsupported_kind() {
    let h = Harness::new(&[], FakeProvider::default());
    let executor = StepExecutor::new(
        Some(h.provider.clone()),
        h.input.clone(),
        h.clipboard.clone(),
        h.files.clone(),
    );

    let step = Step::new("odd", StepKind::from("shell".to_string()));
    let err = executor
        .execute(&step, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StepError::UnsupportedStepType(ref t) if t == "shell"));
}

#[tokio::test]
async fn test_executor_honours_prior_cancellation() {
    let h = Harness::new(&["never"], FakeProvider::default());
    let executor = StepExecutor::new(None, h.input.clone(), h.clipboard.clone(), h.files.clone());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = executor
        .execute(&Step::new("in", StepKind::Input), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(h.input.prompts().is_empty());
}

// ---------------------------------------------------------------------------
// Engine over the HTTP provider
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_engine_with_http_provider() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "model": "gemini-2.0-flash",
            "messages": [{"role": "user", "content": "Summarize: hello world"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "A greeting."},
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = HttpProvider::new(
        "test-key".into(),
        mock_server.uri(),
        "unused".into(),
        Duration::from_secs(5),
    )
    .unwrap();

    let wf = workflow(
        r#"
name: summarize
steps:
  - id: text
    type: input
  - id: summary
    type: generate
    model: gemini-2.0-flash
    user_prompt: "Summarize: {{text}}"
"#,
    );
    let h = Harness::new(&["hello world"], FakeProvider::default());
    let engine = Engine::new(Dependencies {
        generator: Some(Arc::new(provider)),
        input: h.input.clone(),
        clipboard: h.clipboard.clone(),
        files: h.files.clone(),
        telemetry: None,
    });

    let memory = engine.run(&wf).await.unwrap();
    assert_eq!(memory.get("summary"), Some("A greeting."));
}
