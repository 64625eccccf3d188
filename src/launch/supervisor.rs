use super::port;
use crate::engine::{classify, ContainerEngine, ContainerSpec, EngineError, LogStream};
use crate::error::{PipelineError, Stage};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Server output lines kept for classifying an unexpected exit
const TAIL_LINES: usize = 200;

/// How long to wait for the log stream to drain after the server stops
const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub const MANAGED_LABEL: &str = "io.slipway.managed";

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Container name; generated when absent
    pub name: Option<String>,
    pub host: String,
    pub host_port: u16,
    pub container_port: u16,
    /// `KEY=VALUE` pairs
    pub env: Vec<String>,
    /// Entry point the image launches, for error reporting
    pub entrypoint: String,
    pub stop_timeout: Duration,
    pub ready_timeout: Duration,
}

impl LaunchOptions {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.host_port)
    }
}

pub struct Launcher {
    engine: Arc<dyn ContainerEngine>,
}

impl Launcher {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// Creates and starts exactly one server container from `image`
    ///
    /// The host address is probed before anything is created, so a busy port
    /// fails with `BindAddressInUse` without leaving a container behind.
    pub async fn launch(
        &self,
        image: &str,
        options: LaunchOptions,
    ) -> Result<RunningServer, PipelineError> {
        let address = options.address();
        port::ensure_available(&options.host, options.host_port)?;

        let name = options
            .name
            .clone()
            .unwrap_or_else(|| format!("slipway-{}", &uuid::Uuid::new_v4().simple().to_string()[..12]));
        let spec = ContainerSpec {
            name: name.clone(),
            image: image.to_string(),
            env: options.env.clone(),
            container_port: options.container_port,
            host_ip: options.host.clone(),
            host_port: options.host_port,
            labels: HashMap::from([(MANAGED_LABEL.to_string(), "true".to_string())]),
        };

        let id = self
            .engine
            .create_container(&spec)
            .await
            .map_err(|e| launch_error(&e, &address, &options.entrypoint))?;
        debug!(container = %id, name = %name, image = %image, "Container created");

        if let Err(e) = self.engine.start_container(&id).await {
            if let Err(remove) = self.engine.remove_container(&id).await {
                warn!(container = %id, "Failed to remove container: {}", remove);
            }
            return Err(classify::start_failure(&e, &address, &options.entrypoint));
        }
        info!(container = %id, address = %address, "Server container started");

        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(TAIL_LINES)));
        let forwarder = {
            let mut logs = self.engine.follow_logs(&id);
            let tail = Arc::clone(&tail);
            tokio::spawn(async move {
                while let Some(line) = logs.recv().await {
                    match line.stream {
                        LogStream::Stdout => info!(target: "slipway::server", "{}", line.text),
                        LogStream::Stderr => info!(target: "slipway::server", stream = "stderr", "{}", line.text),
                    }
                    let mut tail = tail.lock().unwrap_or_else(|p| p.into_inner());
                    if tail.len() == TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line.text);
                }
            })
        };

        let server = {
            let engine = Arc::clone(&self.engine);
            let id = id.clone();
            tokio::spawn(async move { engine.wait_container(&id).await })
        };

        let readiness = {
            let host = options.host.clone();
            let timeout = options.ready_timeout;
            let host_port = options.host_port;
            tokio::spawn(async move { port::wait_until_ready(&host, host_port, timeout).await })
        };

        Ok(RunningServer {
            engine: Arc::clone(&self.engine),
            id,
            address,
            entrypoint: options.entrypoint,
            stop_timeout: options.stop_timeout,
            server,
            forwarder,
            readiness,
            tail,
        })
    }
}

fn launch_error(err: &EngineError, address: &str, entrypoint: &str) -> PipelineError {
    match err {
        EngineError::NotFound(message) => PipelineError::Engine {
            stage: Stage::ProcessLaunch,
            message: message.clone(),
        },
        other => classify::start_failure(other, address, entrypoint),
    }
}

/// A started server container, owned until it exits or is shut down
pub struct RunningServer {
    engine: Arc<dyn ContainerEngine>,
    id: String,
    address: String,
    entrypoint: String,
    stop_timeout: Duration,
    server: JoinHandle<Result<i64, EngineError>>,
    forwarder: JoinHandle<()>,
    readiness: JoinHandle<bool>,
    tail: Arc<Mutex<VecDeque<String>>>,
}

enum Outcome {
    Exited(Result<Result<i64, EngineError>, tokio::task::JoinError>),
    Shutdown,
}

impl RunningServer {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Runs until the server exits or `shutdown` resolves
    ///
    /// On shutdown the container is stopped with the configured grace period
    /// and the launch counts as successful. A non-zero exit is classified
    /// from the server's last output lines.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), PipelineError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let outcome = tokio::select! {
            result = &mut self.server => Outcome::Exited(result),
            _ = &mut shutdown => Outcome::Shutdown,
        };

        let result = match outcome {
            Outcome::Shutdown => {
                info!(container = %self.id, grace_secs = self.stop_timeout.as_secs(), "Shutdown requested, stopping server");
                let stopped = self.engine.stop_container(&self.id, self.stop_timeout).await;
                match stopped {
                    Ok(()) => {
                        if let Ok(Ok(code)) = (&mut self.server).await {
                            debug!(container = %self.id, code, "Server stopped");
                        }
                        Ok(())
                    }
                    Err(e) => Err(PipelineError::Engine {
                        stage: Stage::ProcessLaunch,
                        message: e.to_string(),
                    }),
                }
            }
            Outcome::Exited(joined) => {
                let waited = match joined {
                    Ok(waited) => waited.map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                self.drain_logs().await;

                match waited {
                    Ok(0) => {
                        info!(container = %self.id, "Server exited cleanly");
                        Ok(())
                    }
                    Ok(code) => {
                        let output: Vec<String> = {
                            let tail = self.tail.lock().unwrap_or_else(|p| p.into_inner());
                            tail.iter().cloned().collect()
                        };
                        Err(classify::server_exit(code, &output, &self.address, &self.entrypoint))
                    }
                    Err(message) => Err(PipelineError::Engine {
                        stage: Stage::ProcessLaunch,
                        message,
                    }),
                }
            }
        };

        self.cleanup().await;
        result
    }

    async fn drain_logs(&mut self) {
        if tokio::time::timeout(LOG_DRAIN_TIMEOUT, &mut self.forwarder)
            .await
            .is_err()
        {
            debug!(container = %self.id, "Log stream still open after exit");
        }
    }

    async fn cleanup(&mut self) {
        self.readiness.abort();
        self.forwarder.abort();
        if let Err(e) = self.engine.remove_container(&self.id).await {
            warn!(container = %self.id, "Failed to remove container: {}", e);
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.readiness.abort();
        self.forwarder.abort();
    }
}

/// Installs SIGTERM and SIGINT handlers and returns a future that resolves
/// when either arrives
///
/// Handlers are installed by the call itself, so a signal delivered before
/// the future is first polled is still observed. Must be called inside a
/// Tokio runtime.
#[cfg(unix)]
pub fn shutdown_signal() -> impl Future<Output = ()> + Send + 'static {
    use tokio::signal::unix::{signal, SignalKind};

    let streams = signal(SignalKind::terminate())
        .and_then(|sigterm| Ok((sigterm, signal(SignalKind::interrupt())?)));
    async move {
        match streams {
            Ok((mut sigterm, mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register signal handlers, falling back to Ctrl-C");
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl-C");
                }
            }
        }
    }
}

/// Installs a Ctrl-C handler and returns a future that resolves when it fires
#[cfg(windows)]
pub fn shutdown_signal() -> impl Future<Output = ()> + Send + 'static {
    let ctrl_c = tokio::signal::windows::ctrl_c();
    async move {
        match ctrl_c {
            Ok(mut ctrl_c) => {
                ctrl_c.recv().await;
                info!("Received Ctrl-C");
            }
            Err(e) => {
                warn!(error = %e, "Failed to register Ctrl-C handler");
                std::future::pending::<()>().await;
            }
        }
    }
}
