use super::entrypoint::EntryPoint;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_SERVER: &str = "uvicorn";

/// How a server executable expects the bind address on its command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindStyle {
    /// `--host H --port P`
    HostPort,
    /// `--bind H:P`
    Bind,
    /// `-k uvicorn.workers.UvicornWorker -b H:P`
    GunicornUvicornWorker,
}

impl BindStyle {
    fn for_server(server: &str) -> Self {
        match server {
            "hypercorn" | "granian" => BindStyle::Bind,
            "gunicorn" => BindStyle::GunicornUvicornWorker,
            _ => BindStyle::HostPort,
        }
    }
}

/// The single server invocation started in the container
///
/// Fixed at build time and rendered as the exec-form `CMD`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchCommand {
    pub executable: String,
    pub args: Vec<String>,
    pub port: u16,
}

impl LaunchCommand {
    pub fn new(server: &str, entrypoint: &EntryPoint, host: &str, port: u16) -> Self {
        let target = entrypoint.to_string();
        let args = match BindStyle::for_server(server) {
            BindStyle::HostPort => vec![
                target,
                "--host".to_string(),
                host.to_string(),
                "--port".to_string(),
                port.to_string(),
            ],
            BindStyle::Bind => vec![target, "--bind".to_string(), format!("{}:{}", host, port)],
            BindStyle::GunicornUvicornWorker => vec![
                target,
                "-k".to_string(),
                "uvicorn.workers.UvicornWorker".to_string(),
                "-b".to_string(),
                format!("{}:{}", host, port),
            ],
        };

        Self {
            executable: server.to_string(),
            args,
            port,
        }
    }

    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.executable.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// JSON array for the exec form of `CMD`
    pub fn exec_form(&self) -> String {
        serde_json::to_string(&self.argv()).unwrap_or_else(|_| "[]".to_string())
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_app() -> EntryPoint {
        EntryPoint::parse("main:app").unwrap()
    }

    #[test]
    fn test_default_command() {
        let cmd = LaunchCommand::new(DEFAULT_SERVER, &main_app(), "0.0.0.0", 80);
        assert_eq!(
            cmd.argv(),
            vec!["uvicorn", "main:app", "--host", "0.0.0.0", "--port", "80"]
        );
        assert_eq!(
            cmd.exec_form(),
            r#"["uvicorn","main:app","--host","0.0.0.0","--port","80"]"#
        );
        assert_eq!(cmd.to_string(), "uvicorn main:app --host 0.0.0.0 --port 80");
    }

    #[test]
    fn test_hypercorn_bind() {
        let cmd = LaunchCommand::new("hypercorn", &main_app(), "0.0.0.0", 8000);
        assert_eq!(cmd.args, vec!["main:app", "--bind", "0.0.0.0:8000"]);
        assert_eq!(cmd.port, 8000);
    }

    #[test]
    fn test_gunicorn_worker() {
        let cmd = LaunchCommand::new("gunicorn", &main_app(), "0.0.0.0", 80);
        assert_eq!(
            cmd.argv(),
            vec![
                "gunicorn",
                "main:app",
                "-k",
                "uvicorn.workers.UvicornWorker",
                "-b",
                "0.0.0.0:80"
            ]
        );
    }
}
