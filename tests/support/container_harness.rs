use anyhow::{Context, Result};
use bollard::container::{ListContainersOptions, RemoveContainerOptions};
use bollard::image::RemoveImageOptions;
use bollard::Docker;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;

/// Label slipway puts on every container and image it creates
const MANAGED_LABEL: &str = "io.slipway.managed";

/// Direct engine access for end-to-end tests, independent of slipway's own client
pub struct ContainerTestHarness {
    docker: Docker,
}

#[allow(dead_code)]
impl ContainerTestHarness {
    pub fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().context("Failed to connect to Docker")?;
        Ok(Self { docker })
    }

    /// True when the daemon answers; e2e tests skip themselves otherwise
    pub async fn available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    pub async fn image_exists(&self, reference: &str) -> bool {
        self.docker.inspect_image(reference).await.is_ok()
    }

    /// Image labels, or an empty map when the image is absent
    pub async fn image_labels(&self, reference: &str) -> HashMap<String, String> {
        self.docker
            .inspect_image(reference)
            .await
            .ok()
            .and_then(|inspect| inspect.config)
            .and_then(|config| config.labels)
            .unwrap_or_default()
    }

    /// Repository tags of slipway's staging builds still present
    pub async fn staging_tags(&self) -> Result<Vec<String>> {
        let images = self
            .docker
            .list_images::<String>(None)
            .await
            .context("Failed to list images")?;
        Ok(images
            .into_iter()
            .flat_map(|image| image.repo_tags)
            .filter(|tag| tag.starts_with("slipway-staging/"))
            .collect())
    }

    /// Ids of slipway-managed containers, running or not
    pub async fn managed_containers(&self) -> Result<Vec<String>> {
        let filters = HashMap::from([("label".to_string(), vec![format!("{}=true", MANAGED_LABEL)])]);
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .context("Failed to list containers")?;
        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }

    /// Polls until `port` on the loopback interface accepts a TCP connection
    pub async fn wait_for_port(&self, port: u16, timeout_duration: Duration) -> Result<()> {
        let check = async {
            loop {
                if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        };

        timeout(timeout_duration, check)
            .await
            .context("Timeout waiting for port")
    }

    pub async fn cleanup_image(&self, reference: &str) {
        let _ = self
            .docker
            .remove_image(
                reference,
                Some(RemoveImageOptions {
                    force: true,
                    ..Default::default()
                }),
                None,
            )
            .await;
    }

    pub async fn cleanup_container(&self, id: &str) {
        let _ = self
            .docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;
    }
}
