use crate::error::PipelineError;
use std::io;
use std::net::TcpListener;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Binds `host:port` once and releases it, failing with `BindAddressInUse`
/// when something already holds the address
pub fn ensure_available(host: &str, port: u16) -> Result<(), PipelineError> {
    let address = socket_address(host, port);
    match TcpListener::bind(&address) {
        Ok(listener) => {
            drop(listener);
            debug!(address = %address, "Bind address is free");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            Err(PipelineError::BindAddressInUse { address })
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            // Privileged ports may be unbindable here but still publishable by the engine
            warn!(address = %address, "Cannot probe bind address: {}", e);
            Ok(())
        }
        Err(e) => Err(PipelineError::Engine {
            stage: crate::error::Stage::ProcessLaunch,
            message: format!("cannot bind {}: {}", address, e),
        }),
    }
}

/// Polls `host:port` with TCP connects until one is accepted or `timeout`
/// elapses. Returns whether the port became ready.
pub async fn wait_until_ready(host: &str, port: u16, timeout: Duration) -> bool {
    let address = socket_address(connect_host(host), port);
    let started = Instant::now();

    loop {
        if TcpStream::connect(&address).await.is_ok() {
            info!(address = %address, elapsed_ms = started.elapsed().as_millis() as u64, "Server is accepting connections");
            return true;
        }
        if started.elapsed() >= timeout {
            warn!(address = %address, timeout_secs = timeout.as_secs(), "Server did not accept connections before the readiness timeout");
            return false;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

fn socket_address(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// The wildcard address is not connectable; probe loopback instead
fn connect_host(host: &str) -> &str {
    match host {
        "0.0.0.0" | "" => "127.0.0.1",
        "::" => "::1",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_port_is_available() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(ensure_available("127.0.0.1", port).is_ok());
    }

    #[test]
    fn test_bound_port_is_in_use() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let err = ensure_available("127.0.0.1", port).unwrap_err();
        match &err {
            PipelineError::BindAddressInUse { address } => {
                assert_eq!(address, &format!("127.0.0.1:{}", port))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(err.exit_code(), 14);
        drop(listener);
    }

    #[tokio::test]
    async fn test_ready_when_listening() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(wait_until_ready("0.0.0.0", port, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_not_ready_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(!wait_until_ready("127.0.0.1", port, Duration::from_millis(300)).await);
    }

    #[test]
    fn test_connect_host() {
        assert_eq!(connect_host("0.0.0.0"), "127.0.0.1");
        assert_eq!(connect_host("10.0.0.5"), "10.0.0.5");
        assert_eq!(socket_address(connect_host("::"), 80), "[::1]:80");
    }
}
