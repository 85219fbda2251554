use async_trait::async_trait;
use mldev_build::error::{BuildError, Result};
use mldev_build::{BuildDefinition, BuildPhase, BuildService, LogTail};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Scripted behaviour of one build instance
#[derive(Debug, Clone, Default)]
pub struct Scenario {
    /// Phases returned by successive queries; the last one repeats
    pub phases: Vec<BuildPhase>,
    pub logs: String,
    pub tail: Vec<String>,
}

impl Scenario {
    pub fn new(phases: &[BuildPhase], logs: &str) -> Self {
        Self {
            phases: phases.to_vec(),
            logs: logs.to_string(),
            tail: Vec::new(),
        }
    }

    #[allow(dead_code)]
    pub fn with_tail(mut self, lines: &[&str]) -> Self {
        self.tail = lines.iter().map(|l| l.to_string()).collect();
        self
    }
}

#[derive(Debug, Default)]
pub struct TailCounters {
    pub opened: AtomicUsize,
    pub terminated: AtomicUsize,
    pub aborted: AtomicUsize,
}

impl TailCounters {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }
}

struct Running {
    phases: VecDeque<BuildPhase>,
    last: BuildPhase,
    scenario: Scenario,
}

impl Running {
    fn new(scenario: Scenario) -> Self {
        Self {
            phases: scenario.phases.iter().copied().collect(),
            last: BuildPhase::New,
            scenario,
        }
    }
}

/// In-memory build service. Every `start` consumes the next scenario.
pub struct FakeService {
    pending: Mutex<VecDeque<Scenario>>,
    current: Mutex<Option<Running>>,
    submitted: Mutex<Vec<BuildDefinition>>,
    pub counters: Arc<TailCounters>,
    pub image_reference: Option<String>,
    stall_phase: bool,
    stall_logs: bool,
}

impl FakeService {
    pub fn new(scenarios: Vec<Scenario>) -> Self {
        Self {
            pending: Mutex::new(scenarios.into()),
            current: Mutex::new(None),
            submitted: Mutex::new(Vec::new()),
            counters: Arc::new(TailCounters::default()),
            image_reference: None,
            stall_phase: false,
            stall_logs: false,
        }
    }

    /// A service whose build is already running
    #[allow(dead_code)]
    pub fn running(scenario: Scenario) -> Self {
        let service = Self::new(Vec::new());
        *service.current.lock().unwrap() = Some(Running::new(scenario));
        service
    }

    #[allow(dead_code)]
    pub fn with_image_reference(mut self, image_ref: &str) -> Self {
        self.image_reference = Some(image_ref.to_string());
        self
    }

    /// Phase queries never return, like an `oc` call stuck on the API server
    #[allow(dead_code)]
    pub fn with_stalled_phase(mut self) -> Self {
        self.stall_phase = true;
        self
    }

    /// Log snapshots never return
    #[allow(dead_code)]
    pub fn with_stalled_logs(mut self) -> Self {
        self.stall_logs = true;
        self
    }

    #[allow(dead_code)]
    pub fn submitted(&self) -> Vec<BuildDefinition> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildService for FakeService {
    async fn submit(&self, definition: &BuildDefinition) -> Result<String> {
        self.submitted.lock().unwrap().push(definition.clone());
        Ok(definition.name().to_string())
    }

    async fn start(&self, definition_name: &str) -> Result<String> {
        let scenario = self
            .pending
            .lock()
            .unwrap()
            .pop_front()
            .expect("no scenario left for this build");
        *self.current.lock().unwrap() = Some(Running::new(scenario));
        Ok(format!("{}-1", definition_name))
    }

    async fn resolve_image_reference(&self, stream: &str, tag: &str) -> Result<String> {
        self.image_reference
            .clone()
            .ok_or_else(|| BuildError::TagNotFound {
                stream: stream.to_string(),
                tag: tag.to_string(),
            })
    }

    async fn phase(&self, build_name: &str) -> Result<BuildPhase> {
        if self.stall_phase {
            std::future::pending::<()>().await;
        }
        let mut current = self.current.lock().unwrap();
        let running = current.as_mut().ok_or_else(|| BuildError::CommandFailed {
            command: format!("oc get build {}", build_name),
            status: "exit status: 1".to_string(),
            stderr: "not found".to_string(),
        })?;
        if let Some(phase) = running.phases.pop_front() {
            running.last = phase;
        }
        Ok(running.last)
    }

    async fn logs(&self, _build_name: &str) -> Result<String> {
        if self.stall_logs {
            std::future::pending::<()>().await;
        }
        let current = self.current.lock().unwrap();
        Ok(current
            .as_ref()
            .map(|running| running.scenario.logs.clone())
            .unwrap_or_default())
    }

    async fn follow_logs(&self, _build_name: &str) -> Result<Box<dyn LogTail>> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        let lines = self
            .current
            .lock()
            .unwrap()
            .as_ref()
            .map(|running| running.scenario.tail.iter().cloned().collect())
            .unwrap_or_default();

        Ok(Box::new(FakeTail {
            lines,
            counters: self.counters.clone(),
        }))
    }
}

struct FakeTail {
    lines: VecDeque<String>,
    counters: Arc<TailCounters>,
}

#[async_trait]
impl LogTail for FakeTail {
    fn try_next_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    async fn terminate(&mut self) -> Result<()> {
        self.counters.terminated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn abort(&mut self) {
        self.counters.aborted.fetch_add(1, Ordering::SeqCst);
    }
}

/// Path of the BuildConfig template shipped with the repository
#[allow(dead_code)]
pub fn template_path() -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../k8s/buildconfig.yaml")
}
