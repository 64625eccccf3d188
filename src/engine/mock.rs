use super::{
    BuildOutput, BuildRequest, ContainerEngine, ContainerSpec, EngineError, EngineInfo,
    ImageRecord, LogLine, LogStream,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Scripted behavior for containers started by a [`MockEngine`]
#[derive(Debug, Clone, Default)]
pub struct MockRun {
    /// Exit status reported right after start; `None` keeps the container
    /// running until it is stopped
    pub exit_code: Option<i64>,
    /// Error returned from `start_container`
    pub start_error: Option<EngineError>,
    /// Output replayed through `follow_logs`
    pub logs: Vec<LogLine>,
}

impl MockRun {
    pub fn running() -> Self {
        Self::default()
    }

    pub fn exits(code: i64, stderr: &[&str]) -> Self {
        Self {
            exit_code: Some(code),
            start_error: None,
            logs: stderr
                .iter()
                .map(|text| LogLine {
                    stream: LogStream::Stderr,
                    text: text.to_string(),
                })
                .collect(),
        }
    }

    pub fn fails_to_start(message: &str) -> Self {
        Self {
            exit_code: None,
            start_error: Some(EngineError::Api {
                status: 500,
                message: message.to_string(),
            }),
            logs: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct MockContainer {
    spec: ContainerSpec,
    stopped: Arc<Notify>,
    exit_code: Option<i64>,
    removed: bool,
}

#[derive(Debug, Default)]
struct State {
    local: HashMap<String, ImageRecord>,
    registry: HashMap<String, ImageRecord>,
    registry_unreachable: bool,
    scripted_builds: VecDeque<BuildOutput>,
    builds: Vec<BuildRequest>,
    pulls: Vec<String>,
    tags: Vec<String>,
    removed_images: Vec<String>,
    containers: HashMap<String, MockContainer>,
    run: MockRun,
    next_container: usize,
}

/// In-memory [`ContainerEngine`] for tests
///
/// Builds succeed by default and produce an image id derived from the
/// build context, so identical inputs yield identical ids.
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<State>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes `reference` pullable with the given repo digest
    pub fn with_remote_image(self, reference: &str, digest: &str) -> Self {
        let name = reference.split(|c: char| c == '@' || c == ':').next().unwrap_or(reference);
        let record = ImageRecord {
            id: format!("sha256:{}", hex::encode(Sha256::digest(reference.as_bytes()))),
            repo_digests: vec![format!("{}@{}", name, digest)],
            labels: HashMap::new(),
        };
        {
            let mut state = self.state();
            state.registry.insert(reference.to_string(), record.clone());
            state
                .registry
                .insert(format!("{}@{}", name, digest), record);
        }
        self
    }

    /// Adds an image that is already present locally
    pub fn with_local_image(self, reference: &str, record: ImageRecord) -> Self {
        self.state().local.insert(reference.to_string(), record);
        self
    }

    /// Pulls fail as if the registry could not be reached
    pub fn with_registry_unreachable(self) -> Self {
        self.state().registry_unreachable = true;
        self
    }

    /// Queues the result of the next build
    pub fn with_build_output(self, output: BuildOutput) -> Self {
        self.state().scripted_builds.push_back(output);
        self
    }

    pub fn with_run(self, run: MockRun) -> Self {
        self.state().run = run;
        self
    }

    pub fn builds(&self) -> Vec<BuildRequest> {
        self.state().builds.clone()
    }

    pub fn pulls(&self) -> Vec<String> {
        self.state().pulls.clone()
    }

    /// Tags applied so far, as `repository:tag`
    pub fn tags(&self) -> Vec<String> {
        self.state().tags.clone()
    }

    pub fn removed_images(&self) -> Vec<String> {
        self.state().removed_images.clone()
    }

    /// References of all locally present images
    pub fn local_references(&self) -> Vec<String> {
        let mut refs: Vec<String> = self.state().local.keys().cloned().collect();
        refs.sort();
        refs
    }

    pub fn container_specs(&self) -> Vec<ContainerSpec> {
        self.state()
            .containers
            .values()
            .map(|c| c.spec.clone())
            .collect()
    }

    pub fn live_containers(&self) -> usize {
        self.state()
            .containers
            .values()
            .filter(|c| !c.removed)
            .count()
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn version(&self) -> Result<EngineInfo, EngineError> {
        Ok(EngineInfo {
            version: "mock".to_string(),
            api_version: "1.47".to_string(),
        })
    }

    async fn inspect_image(&self, reference: &str) -> Result<Option<ImageRecord>, EngineError> {
        let state = self.state();
        if let Some(record) = state.local.get(reference) {
            return Ok(Some(record.clone()));
        }
        Ok(state.local.values().find(|r| r.id == reference).cloned())
    }

    async fn find_image_by_label(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<ImageRecord>, EngineError> {
        let state = self.state();
        let mut matches: Vec<&ImageRecord> = state
            .local
            .values()
            .filter(|r| r.labels.get(key).map(String::as_str) == Some(value))
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches.first().map(|r| (*r).clone()))
    }

    async fn pull_image(&self, reference: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.pulls.push(reference.to_string());
        if state.registry_unreachable {
            return Err(EngineError::Transport(format!(
                "dial tcp: lookup registry for {}: no such host",
                reference
            )));
        }
        match state.registry.get(reference).cloned() {
            Some(record) => {
                state.local.insert(reference.to_string(), record);
                Ok(())
            }
            None => Err(EngineError::NotFound(format!(
                "manifest for {} not found: manifest unknown",
                reference
            ))),
        }
    }

    async fn build_image(&self, request: BuildRequest) -> Result<BuildOutput, EngineError> {
        let mut state = self.state();
        state.builds.push(request.clone());

        let output = match state.scripted_builds.pop_front() {
            Some(output) => output,
            None => {
                let mut hasher = Sha256::new();
                hasher.update(request.dockerfile.as_bytes());
                hasher.update(&request.context);
                BuildOutput {
                    image_id: Some(format!("sha256:{}", hex::encode(hasher.finalize()))),
                    log: "Successfully built".to_string(),
                    error: None,
                }
            }
        };

        if let (Some(id), None) = (&output.image_id, &output.error) {
            state.local.insert(
                request.staging_tag.clone(),
                ImageRecord {
                    id: id.clone(),
                    repo_digests: Vec::new(),
                    labels: request.labels.clone(),
                },
            );
        }

        Ok(output)
    }

    async fn tag_image(&self, image: &str, repository: &str, tag: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        let record = state
            .local
            .get(image)
            .cloned()
            .or_else(|| state.local.values().find(|r| r.id == image).cloned())
            .ok_or_else(|| EngineError::NotFound(format!("No such image: {}", image)))?;
        let reference = format!("{}:{}", repository, tag);
        state.tags.push(reference.clone());
        state.local.insert(reference, record);
        Ok(())
    }

    async fn remove_image(&self, image: &str, _force: bool) -> Result<(), EngineError> {
        let mut state = self.state();
        if state.local.remove(image).is_none() {
            return Err(EngineError::NotFound(format!("No such image: {}", image)));
        }
        state.removed_images.push(image.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let mut state = self.state();
        if !state.local.contains_key(&spec.image)
            && !state.local.values().any(|r| r.id == spec.image)
        {
            return Err(EngineError::NotFound(format!("No such image: {}", spec.image)));
        }
        state.next_container += 1;
        let id = format!("mock-container-{}", state.next_container);
        state.containers.insert(
            id.clone(),
            MockContainer {
                spec: spec.clone(),
                stopped: Arc::new(Notify::new()),
                exit_code: None,
                removed: false,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        if let Some(err) = state.run.start_error.clone() {
            return Err(err);
        }
        let exit_code = state.run.exit_code;
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {}", id)))?;
        container.exit_code = exit_code;
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, EngineError> {
        let stopped = {
            let state = self.state();
            let container = state
                .containers
                .get(id)
                .ok_or_else(|| EngineError::NotFound(format!("No such container: {}", id)))?;
            if let Some(code) = container.exit_code {
                return Ok(code);
            }
            container.stopped.clone()
        };

        stopped.notified().await;

        let state = self.state();
        Ok(state
            .containers
            .get(id)
            .and_then(|c| c.exit_code)
            .unwrap_or(0))
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<(), EngineError> {
        let mut state = self.state();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {}", id)))?;
        if container.exit_code.is_none() {
            container.exit_code = Some(0);
        }
        container.stopped.notify_one();
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {}", id)))?;
        container.removed = true;
        Ok(())
    }

    fn follow_logs(&self, _id: &str) -> mpsc::Receiver<LogLine> {
        let lines = self.state().run.logs.clone();
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            let _ = tx.try_send(line);
        }
        rx
    }
}
