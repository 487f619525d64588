//! Shared helpers for integration tests: a scripted execution engine, a
//! dispatcher builder, and an HTTP test server with an SSE reader.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hitl_orchestrator::app_state::AppState;
use hitl_orchestrator::models::checkpoint::Resolution;
use hitl_orchestrator::models::job::{Job, JobState};
use hitl_orchestrator::models::mode::Mode;
use hitl_orchestrator::routes;
use hitl_orchestrator::services::checkpoint::CheckpointManager;
use hitl_orchestrator::services::dispatcher::Dispatcher;
use hitl_orchestrator::services::engine::{EngineError, EngineSession, EngineStep, ExecutionEngine};
use hitl_orchestrator::services::job_store::JobStore;
use hitl_orchestrator::services::mode_mapper::ModeRegistry;
use hitl_orchestrator::services::queue::JobQueue;
use hitl_orchestrator::services::worker;
use uuid::Uuid;

/// One scripted engine action.
#[derive(Debug, Clone)]
pub enum Scripted {
    Turn(&'static str, Option<u8>),
    Checkpoint(Value),
    Finish(Value),
    /// Fail this call once; the following call moves on to the next action.
    Fail { retryable: bool },
    /// Never answer.
    Hang,
}

/// What the engine observed, shared across all sessions it opened.
#[derive(Default)]
pub struct EngineLog {
    pub opened: AtomicUsize,
    pub aborted: AtomicUsize,
    pub resumes: Mutex<Vec<Resolution>>,
    pub inputs: Mutex<Vec<(Mode, Value)>>,
}

impl EngineLog {
    pub fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

/// Engine that plays back the same script for every session.
pub struct ScriptedEngine {
    script: Vec<Scripted>,
    failing_opens: AtomicUsize,
    open_failure_retryable: bool,
    pub log: Arc<EngineLog>,
}

impl ScriptedEngine {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script,
            failing_opens: AtomicUsize::new(0),
            open_failure_retryable: true,
            log: Arc::new(EngineLog::default()),
        }
    }

    /// Fail the first `count` session opens.
    pub fn failing_opens(mut self, count: usize, retryable: bool) -> Self {
        self.failing_opens = AtomicUsize::new(count);
        self.open_failure_retryable = retryable;
        self
    }
}

#[async_trait]
impl ExecutionEngine for ScriptedEngine {
    async fn open(&self, mode: Mode, input: &Value) -> Result<Box<dyn EngineSession>, EngineError> {
        let remaining = self.failing_opens.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_opens.store(remaining - 1, Ordering::SeqCst);
            return Err(EngineError {
                message: "engine unavailable".to_string(),
                retryable: self.open_failure_retryable,
            });
        }

        self.log.opened.fetch_add(1, Ordering::SeqCst);
        self.log.inputs.lock().push((mode, input.clone()));
        Ok(Box::new(ScriptedSession {
            script: self.script.clone(),
            position: 0,
            log: self.log.clone(),
        }))
    }
}

struct ScriptedSession {
    script: Vec<Scripted>,
    position: usize,
    log: Arc<EngineLog>,
}

#[async_trait]
impl EngineSession for ScriptedSession {
    async fn next_step(&mut self) -> Result<EngineStep, EngineError> {
        let Some(action) = self.script.get(self.position).cloned() else {
            return Err(EngineError::fatal("script exhausted"));
        };
        self.position += 1;

        match action {
            Scripted::Turn(status, percent) => Ok(EngineStep::Turn {
                status: status.to_string(),
                percent: percent.map(f64::from),
                output: None,
            }),
            Scripted::Checkpoint(payload) => Ok(EngineStep::Checkpoint { payload }),
            Scripted::Finish(result) => Ok(EngineStep::Finished { result }),
            Scripted::Fail { retryable } => Err(EngineError {
                message: "model backend error".to_string(),
                retryable,
            }),
            Scripted::Hang => std::future::pending().await,
        }
    }

    async fn resume(&mut self, resolution: &Resolution) -> Result<(), EngineError> {
        self.log.resumes.lock().push(resolution.clone());
        Ok(())
    }

    async fn abort(&mut self) {
        self.log.aborted.fetch_add(1, Ordering::SeqCst);
    }
}

/// Dispatcher over a fresh store and queue, with workers running.
pub fn dispatcher(engine: ScriptedEngine, registry: ModeRegistry) -> (Dispatcher, Arc<EngineLog>) {
    let log = engine.log.clone();
    let store = JobStore::new(64);
    let checkpoints = CheckpointManager::new(store.clone());
    let dispatcher = Dispatcher::new(
        registry,
        store,
        checkpoints,
        Arc::new(engine),
        Arc::new(JobQueue::new()),
    );
    worker::spawn_workers(dispatcher.clone(), 2);
    (dispatcher, log)
}

/// Poll the store until the job satisfies `predicate`.
pub async fn wait_for(
    dispatcher: &Dispatcher,
    job_id: Uuid,
    predicate: impl Fn(&Job) -> bool,
) -> Job {
    for _ in 0..200 {
        let job = dispatcher.store().get(job_id).unwrap();
        if predicate(&job) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never reached the expected condition", job_id);
}

pub async fn wait_for_state(dispatcher: &Dispatcher, job_id: Uuid, state: JobState) -> Job {
    wait_for(dispatcher, job_id, |job| job.state == state).await
}

/// HTTP server over a scripted engine, bound to an ephemeral port.
pub struct TestApp {
    pub base_url: String,
    pub client: reqwest::Client,
    pub dispatcher: Dispatcher,
    pub log: Arc<EngineLog>,
}

pub async fn spawn_app(engine: ScriptedEngine, registry: ModeRegistry) -> TestApp {
    let (dispatcher, log) = dispatcher(engine, registry);
    let app = routes::router(AppState::new(dispatcher.clone(), None), None);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        base_url: format!("http://{}", addr),
        client: reqwest::Client::new(),
        dispatcher,
        log,
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// One parsed SSE frame.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: Value,
}

/// Read SSE frames until `stop` returns true for a frame or the body ends.
pub async fn read_sse(
    response: &mut reqwest::Response,
    stop: impl Fn(&SseFrame) -> bool,
) -> Vec<SseFrame> {
    let mut frames = Vec::new();
    let mut buffer = String::new();

    loop {
        let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
            .await
            .expect("timed out waiting for SSE data")
            .unwrap();
        let Some(chunk) = chunk else {
            return frames;
        };
        buffer.push_str(std::str::from_utf8(&chunk).unwrap());

        while let Some(end) = buffer.find("\n\n") {
            let block: String = buffer.drain(..end + 2).collect();
            if let Some(frame) = parse_frame(&block) {
                let done = stop(&frame);
                frames.push(frame);
                if done {
                    return frames;
                }
            }
        }
    }
}

fn parse_frame(block: &str) -> Option<SseFrame> {
    let mut id = None;
    let mut event = None;
    let mut data = String::new();

    for line in block.lines() {
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "id" => id = Some(value.to_string()),
            "event" => event = Some(value.to_string()),
            "data" => data.push_str(value),
            // Comment lines (keep-alives) have an empty field name.
            _ => {}
        }
    }

    if data.is_empty() {
        return None;
    }
    Some(SseFrame {
        id,
        event,
        data: serde_json::from_str(&data).ok()?,
    })
}

/// True for the frame that ends a job's stream.
pub fn is_terminal_frame(frame: &SseFrame) -> bool {
    frame.event.as_deref() == Some("state_changed")
        && matches!(
            frame.data["payload"]["to"].as_str(),
            Some("succeeded" | "failed" | "cancelled")
        )
}

/// Wait until the engine has seen `count` aborts.
pub async fn wait_for_aborts(log: &EngineLog, count: usize) {
    for _ in 0..200 {
        if log.aborted() >= count {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(log.aborted(), count);
}
