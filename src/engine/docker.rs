use super::{
    BuildOutput, BuildRequest, ContainerEngine, ContainerSpec, EngineError, EngineInfo,
    ImageRecord, LogLine, LogStream,
};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::image::{
    BuildImageOptions, CreateImageOptions, ListImagesOptions, RemoveImageOptions,
    TagImageOptions,
};
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Messages a registry uses when an image does not exist or is not visible
const NOT_FOUND_MARKERS: &[&str] = &[
    "manifest unknown",
    "not found",
    "pull access denied",
    "repository does not exist",
    "no such image",
];

/// Messages that mean the registry could not be reached at all
const TRANSPORT_MARKERS: &[&str] = &[
    "dial tcp",
    "i/o timeout",
    "no such host",
    "connection refused",
    "tls handshake timeout",
    "network is unreachable",
    "temporary failure in name resolution",
];

impl From<bollard::errors::Error> for EngineError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => EngineError::NotFound(message),
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => classify_message(status_code, message),
            other => EngineError::Transport(other.to_string()),
        }
    }
}

fn classify_message(status: u16, message: String) -> EngineError {
    let lower = message.to_lowercase();
    if TRANSPORT_MARKERS.iter().any(|m| lower.contains(m)) {
        EngineError::Transport(message)
    } else if NOT_FOUND_MARKERS.iter().any(|m| lower.contains(m)) {
        EngineError::NotFound(message)
    } else {
        EngineError::Api { status, message }
    }
}

/// [`ContainerEngine`] backed by the Docker Engine API
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connects using `DOCKER_HOST` or the platform's default socket
    pub fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn version(&self) -> Result<EngineInfo, EngineError> {
        let version = self.docker.version().await?;
        Ok(EngineInfo {
            version: version.version.unwrap_or_else(|| "unknown".to_string()),
            api_version: version.api_version.unwrap_or_else(|| "unknown".to_string()),
        })
    }

    async fn inspect_image(&self, reference: &str) -> Result<Option<ImageRecord>, EngineError> {
        match self.docker.inspect_image(reference).await {
            Ok(inspect) => Ok(Some(ImageRecord {
                id: inspect.id.unwrap_or_default(),
                repo_digests: inspect.repo_digests.unwrap_or_default(),
                labels: inspect
                    .config
                    .and_then(|config| config.labels)
                    .unwrap_or_default(),
            })),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn find_image_by_label(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<ImageRecord>, EngineError> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{}={}", key, value)]);
        let options = ListImagesOptions::<String> {
            filters,
            ..Default::default()
        };

        let images = self.docker.list_images(Some(options)).await?;
        Ok(images.into_iter().next().map(|summary| ImageRecord {
            id: summary.id,
            repo_digests: summary.repo_digests,
            labels: summary.labels,
        }))
    }

    async fn pull_image(&self, reference: &str) -> Result<(), EngineError> {
        debug!(reference, "Pulling image");
        let options = CreateImageOptions::<String> {
            from_image: reference.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            let info = result?;
            if let Some(message) = info.error_detail.and_then(|detail| detail.message) {
                return Err(classify_message(500, message));
            }
            if let Some(status) = info.status {
                trace!(reference, status = %status, "pull progress");
            }
        }

        Ok(())
    }

    async fn build_image(&self, request: BuildRequest) -> Result<BuildOutput, EngineError> {
        let options = BuildImageOptions::<String> {
            dockerfile: request.dockerfile,
            t: request.staging_tag,
            rm: true,
            forcerm: true,
            labels: request.labels,
            ..Default::default()
        };

        let mut output = BuildOutput::default();
        let mut stream = self.docker.build_image(options, None, Some(request.context));

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(id) = info.aux.and_then(|aux| aux.id) {
                        output.image_id = Some(id);
                    }
                    if let Some(text) = info.stream {
                        for line in text.lines().filter(|l| !l.trim().is_empty()) {
                            debug!(target: "slipway::build", "{}", line);
                        }
                        output.log.push_str(&text);
                    }
                    if let Some(message) = info.error_detail.and_then(|e| e.message) {
                        output.log.push('\n');
                        output.log.push_str(&message);
                        output.error.get_or_insert(message);
                    }
                }
                Err(err) => {
                    let message = err.to_string();
                    output.log.push('\n');
                    output.log.push_str(&message);
                    output.error.get_or_insert(message);
                }
            }
        }

        Ok(output)
    }

    async fn tag_image(&self, image: &str, repository: &str, tag: &str) -> Result<(), EngineError> {
        let options = TagImageOptions {
            repo: repository.to_string(),
            tag: tag.to_string(),
        };
        self.docker.tag_image(image, Some(options)).await?;
        Ok(())
    }

    async fn remove_image(&self, image: &str, force: bool) -> Result<(), EngineError> {
        let options = RemoveImageOptions {
            force,
            noprune: false,
        };
        self.docker.remove_image(image, Some(options), None).await?;
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let port_key = format!("{}/tcp", spec.container_port);
        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some([(port_key.clone(), HashMap::new())].into_iter().collect()),
            host_config: Some(HostConfig {
                port_bindings: Some(
                    [(
                        port_key,
                        Some(vec![PortBinding {
                            host_ip: Some(spec.host_ip.clone()),
                            host_port: Some(spec.host_port.to_string()),
                        }]),
                    )]
                    .into_iter()
                    .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self.docker.create_container(Some(options), config).await?;
        for warning in &response.warnings {
            warn!(container = %spec.name, "{}", warning);
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, EngineError> {
        let mut stream = self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>);

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(err)) => Err(err.into()),
            None => Err(EngineError::Transport(format!(
                "wait stream for container {} ended without a status",
                id
            ))),
        }
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), EngineError> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        self.docker.stop_container(id, Some(options)).await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }

    fn follow_logs(&self, id: &str) -> mpsc::Receiver<LogLine> {
        let (tx, rx) = mpsc::channel(256);
        let docker = self.docker.clone();
        let id = id.to_string();

        tokio::spawn(async move {
            let options = LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            };
            let mut stream = docker.logs(&id, Some(options));

            while let Some(result) = stream.next().await {
                let (stream_kind, message) = match result {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        (LogStream::Stdout, message)
                    }
                    Ok(LogOutput::StdErr { message }) => (LogStream::Stderr, message),
                    Ok(LogOutput::StdIn { .. }) => continue,
                    Err(err) => {
                        debug!(container = %id, "Log stream ended: {}", err);
                        break;
                    }
                };

                let text = String::from_utf8_lossy(&message);
                for line in text.lines() {
                    let line = LogLine {
                        stream: stream_kind,
                        text: line.to_string(),
                    };
                    if tx.send(line).await.is_err() {
                        return;
                    }
                }
            }
        });

        rx
    }
}
