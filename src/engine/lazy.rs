use super::{
    BuildOutput, BuildRequest, ContainerEngine, ContainerSpec, DockerEngine, EngineError,
    EngineInfo, ImageRecord, LogLine,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OnceCell};
use tracing::debug;

type Connector = Box<dyn Fn() -> Result<Arc<dyn ContainerEngine>, EngineError> + Send + Sync>;

/// Engine that connects on first use
///
/// Lets commands that may never touch the engine (`plan --no-pin`) run on
/// hosts without a reachable daemon. A failed connection is not cached; the
/// next call tries again.
pub struct LazyEngine {
    engine: OnceCell<Arc<dyn ContainerEngine>>,
    connect: Connector,
}

impl LazyEngine {
    pub fn new<F>(connect: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn ContainerEngine>, EngineError> + Send + Sync + 'static,
    {
        Self {
            engine: OnceCell::new(),
            connect: Box::new(connect),
        }
    }

    pub fn docker() -> Self {
        Self::new(|| Ok(Arc::new(DockerEngine::connect()?) as Arc<dyn ContainerEngine>))
    }

    pub fn is_connected(&self) -> bool {
        self.engine.initialized()
    }

    async fn engine(&self) -> Result<&Arc<dyn ContainerEngine>, EngineError> {
        self.engine
            .get_or_try_init(|| async {
                debug!("Connecting to container engine on first use");
                (self.connect)()
            })
            .await
    }
}

#[async_trait]
impl ContainerEngine for LazyEngine {
    async fn version(&self) -> Result<EngineInfo, EngineError> {
        self.engine().await?.version().await
    }

    async fn inspect_image(&self, reference: &str) -> Result<Option<ImageRecord>, EngineError> {
        self.engine().await?.inspect_image(reference).await
    }

    async fn find_image_by_label(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<ImageRecord>, EngineError> {
        self.engine().await?.find_image_by_label(key, value).await
    }

    async fn pull_image(&self, reference: &str) -> Result<(), EngineError> {
        self.engine().await?.pull_image(reference).await
    }

    async fn build_image(&self, request: BuildRequest) -> Result<BuildOutput, EngineError> {
        self.engine().await?.build_image(request).await
    }

    async fn tag_image(&self, image: &str, repository: &str, tag: &str) -> Result<(), EngineError> {
        self.engine().await?.tag_image(image, repository, tag).await
    }

    async fn remove_image(&self, image: &str, force: bool) -> Result<(), EngineError> {
        self.engine().await?.remove_image(image, force).await
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        self.engine().await?.create_container(spec).await
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.engine().await?.start_container(id).await
    }

    async fn wait_container(&self, id: &str) -> Result<i64, EngineError> {
        self.engine().await?.wait_container(id).await
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), EngineError> {
        self.engine().await?.stop_container(id, grace).await
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        self.engine().await?.remove_container(id).await
    }

    fn follow_logs(&self, id: &str) -> mpsc::Receiver<LogLine> {
        match self.engine.get() {
            Some(engine) => engine.follow_logs(id),
            // No container can exist before the first connection
            None => mpsc::channel(1).1,
        }
    }
}
