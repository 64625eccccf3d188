use super::schema::BuildPlan;
use crate::context::APP_PREFIX;
use std::fmt::Write;

/// Environment every image gets: no bytecode files, unbuffered output, no pip cache
const IMAGE_ENV: &[(&str, &str)] = &[
    ("PYTHONDONTWRITEBYTECODE", "1"),
    ("PYTHONUNBUFFERED", "1"),
    ("PIP_NO_CACHE_DIR", "1"),
];

/// Renders the Dockerfile for `plan`
///
/// Layer order follows the stages: base, dependency install, application
/// files, launch command. Output depends only on the plan.
pub fn render(plan: &BuildPlan) -> String {
    let mut out = String::new();
    let workdir = plan.placement.workdir.trim_end_matches('/');
    let workdir = if workdir.is_empty() { "/" } else { workdir };

    let _ = writeln!(out, "# syntax=docker/dockerfile:1");
    let _ = writeln!(out, "FROM {}", plan.base.pinned);
    let env = IMAGE_ENV
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ");
    let _ = writeln!(out, "ENV {}", env);
    let _ = writeln!(out, "WORKDIR {}", workdir);

    if let Some(ref install) = plan.install {
        let _ = writeln!(out, "COPY {} {}", install.source, install.target);
        let _ = writeln!(out, "RUN {}", install.command);
    }

    let target = if workdir == "/" {
        "/".to_string()
    } else {
        format!("{}/", workdir)
    };
    let _ = writeln!(out, "COPY {}/ {}", APP_PREFIX, target);
    let _ = writeln!(out, "EXPOSE {}", plan.launch.command.port);
    let _ = writeln!(out, "CMD {}", plan.launch.command.exec_form());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{DependencyManifest, InstallStep};
    use crate::output::schema::tests::sample_plan;
    use std::path::Path;

    #[test]
    fn test_render_without_dependencies() {
        let dockerfile = render(&sample_plan());
        assert_eq!(
            dockerfile,
            "# syntax=docker/dockerfile:1\n\
             FROM python@sha256:abc\n\
             ENV PYTHONDONTWRITEBYTECODE=1 PYTHONUNBUFFERED=1 PIP_NO_CACHE_DIR=1\n\
             WORKDIR /app\n\
             COPY app/ /app/\n\
             EXPOSE 80\n\
             CMD [\"uvicorn\",\"main:app\",\"--host\",\"0.0.0.0\",\"--port\",\"80\"]\n"
        );
    }

    #[test]
    fn test_install_layer_precedes_app_files() {
        let mut plan = sample_plan();
        plan.install = Some(InstallStep {
            source: ".slipway/requirements.txt".to_string(),
            target: "/tmp/slipway/requirements.txt".to_string(),
            command: "pip install --no-cache-dir -r /tmp/slipway/requirements.txt && rm -rf /tmp/slipway".to_string(),
            requirements: 1,
        });
        let dockerfile = plan.to_dockerfile();

        let install = dockerfile.find("RUN pip install").unwrap();
        let copy_app = dockerfile.find("COPY app/ /app/").unwrap();
        assert!(install < copy_app);
        assert!(dockerfile.contains("COPY .slipway/requirements.txt /tmp/slipway/requirements.txt\n"));
    }

    #[test]
    fn test_install_layer_disables_pip_cache() {
        let manifest = DependencyManifest::parse_str(
            Path::new("requirements.txt"),
            "fastapi==0.100.0\nuvicorn==0.23.2\n",
        )
        .unwrap();
        let mut plan = sample_plan();
        plan.install = InstallStep::render(&manifest);
        let dockerfile = render(&plan);
        let lines: Vec<&str> = dockerfile.lines().collect();

        let copy = lines
            .iter()
            .position(|l| l.starts_with("COPY .slipway/requirements.txt "))
            .unwrap();
        let run = lines[copy + 1];
        assert!(run.starts_with("RUN pip install"), "{}", run);
        assert!(run.contains("--no-cache-dir"));
        assert!(lines.iter().any(|l| l.starts_with("ENV ") && l.contains("PIP_NO_CACHE_DIR=1")));
    }

    #[test]
    fn test_custom_workdir_and_port() {
        let mut plan = sample_plan();
        plan.placement.workdir = "/srv/service/".to_string();
        plan.launch.command.port = 8080;
        let dockerfile = render(&plan);
        assert!(dockerfile.contains("WORKDIR /srv/service\n"));
        assert!(dockerfile.contains("COPY app/ /srv/service/\n"));
        assert!(dockerfile.contains("EXPOSE 8080\n"));
    }
}
