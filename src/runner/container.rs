//! Container-based session hosts, driven through the docker CLI.

use super::{LaunchSpec, SessionHostRunner};
use crate::error::{Error, Result};
use crate::state::{ResourceRetrievalResult, SessionHostsStartInfo};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::Duration;

/// Label put on every container so the agent can find its own.
pub const ASSIGNMENT_LABEL: &str = "vmagent.assignment";

/// File the container output is copied into on log collection.
const CONTAINER_LOG_FILE: &str = "container.log";

/// Classify a failed `docker pull` from its stderr.
pub fn classify_pull_failure(stderr: &str) -> ResourceRetrievalResult {
    let stderr = stderr.to_ascii_lowercase();
    if stderr.contains("unauthorized")
        || stderr.contains("authentication required")
        || stderr.contains("denied")
    {
        ResourceRetrievalResult::AuthenticationFailure
    } else if stderr.contains("toomanyrequests") || stderr.contains("rate limit") {
        ResourceRetrievalResult::TooManyRequests
    } else if stderr.contains("manifest unknown") || stderr.contains("not found") {
        ResourceRetrievalResult::ResourceNotFound
    } else if stderr.contains("timeout") || stderr.contains("connection refused") {
        ResourceRetrievalResult::ResourceNotAvailable
    } else {
        ResourceRetrievalResult::Other
    }
}

/// Runs each session host in a container.
///
/// The container is named after the session host's unique id, so the
/// type-specific id equals the unique id.
pub struct ContainerRunner {
    docker: String,
    stop_timeout: Duration,
}

impl ContainerRunner {
    /// Create a runner that invokes `docker_binary`.
    pub fn new(docker_binary: impl Into<String>, stop_timeout: Duration) -> Self {
        Self {
            docker: docker_binary.into(),
            stop_timeout,
        }
    }

    fn docker(&self, operation: &str, args: &[String]) -> Result<Output> {
        let output = Command::new(&self.docker)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::runner(operation, format!("run {}: {}", self.docker, e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::runner(operation, stderr.trim().to_string()));
        }
        Ok(output)
    }

    fn login(&self, registry: &str, username: &str, password: &str) -> Result<()> {
        let mut child = Command::new(&self.docker)
            .args(["login", "--username", username, "--password-stdin"])
            .arg(registry)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::runner("login", e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(password.as_bytes())?;
        }
        let output = child
            .wait_with_output()
            .map_err(|e| Error::runner("login", e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::retrieval(
                "image",
                ResourceRetrievalResult::AuthenticationFailure,
                format!("registry login to {} rejected: {}", registry, stderr.trim()),
            ));
        }
        Ok(())
    }

    /// Arguments for `docker create`.
    fn create_args(&self, launch: &LaunchSpec, image: &str) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            launch.unique_id.clone(),
            "--label".to_string(),
            format!("{}={}", ASSIGNMENT_LABEL, launch.assignment_id),
        ];
        for (key, value) in &launch.environment {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        for mapping in &launch.port_mappings {
            args.push("-p".to_string());
            args.push(format!(
                "{}:{}/{}",
                mapping.node_port,
                mapping.game_port.number,
                mapping.game_port.protocol.to_ascii_lowercase()
            ));
        }
        for mount in &launch.mounts {
            args.push("-v".to_string());
            let mode = if mount.read_only { ":ro" } else { "" };
            args.push(format!(
                "{}:{}{}",
                mount.host_path.display(),
                mount.guest_path,
                mode
            ));
        }
        args.push(image.to_string());
        if let Some(command) = launch.start_command.as_deref().filter(|c| !c.is_empty()) {
            args.extend(["sh".to_string(), "-c".to_string(), command.to_string()]);
        }
        args
    }
}

impl SessionHostRunner for ContainerRunner {
    fn retrieve_resources(&self, start_info: &SessionHostsStartInfo) -> Result<()> {
        let image = start_info.image_details.as_ref().ok_or_else(|| {
            Error::InvalidStartInfo("container assignment without image details".into())
        })?;

        if let (Some(username), Some(password)) = (&image.username, &image.password) {
            self.login(&image.registry, username, password)?;
        }

        let reference = image.reference();
        let output = Command::new(&self.docker)
            .args(["pull", "--quiet", &reference])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                Error::retrieval("image", ResourceRetrievalResult::Other, e.to_string())
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::retrieval(
                "image",
                classify_pull_failure(&stderr),
                format!("pull {}: {}", reference, stderr.trim()),
            ));
        }

        tracing::info!(image = %reference, "pulled image");
        Ok(())
    }

    fn create_and_start(&self, launch: &LaunchSpec) -> Result<String> {
        let image = launch
            .image
            .as_deref()
            .ok_or_else(|| Error::runner("create", "container session host needs an image"))?;

        self.docker("create", &self.create_args(launch, image))?;
        if let Err(e) = self.docker("start", &["start".to_string(), launch.unique_id.clone()]) {
            // Do not leave a created but never started container behind.
            let _ = self.delete(&launch.unique_id);
            return Err(e);
        }

        tracing::info!(
            session_host_id = %launch.unique_id,
            instance = launch.instance_number,
            image = %image,
            "started session host container"
        );
        Ok(launch.unique_id.clone())
    }

    fn is_alive(&self, type_specific_id: &str) -> bool {
        let args = [
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Running}}".to_string(),
            type_specific_id.to_string(),
        ];
        match self.docker("inspect", &args) {
            Ok(output) => String::from_utf8_lossy(&output.stdout).trim() == "true",
            Err(e) => {
                tracing::debug!(container = %type_specific_id, error = %e, "container not inspectable");
                false
            }
        }
    }

    fn stop(&self, type_specific_id: &str) -> Result<()> {
        let args = [
            "stop".to_string(),
            "-t".to_string(),
            self.stop_timeout.as_secs().to_string(),
            type_specific_id.to_string(),
        ];
        self.docker("stop", &args)?;
        Ok(())
    }

    fn collect_logs(&self, type_specific_id: &str, log_folder: &Path) -> Result<()> {
        let output = self.docker("collect logs", &["logs".to_string(), type_specific_id.to_string()])?;
        std::fs::create_dir_all(log_folder)?;
        let mut file = std::fs::File::create(log_folder.join(CONTAINER_LOG_FILE))?;
        file.write_all(&output.stdout)?;
        file.write_all(&output.stderr)?;
        Ok(())
    }

    fn delete(&self, type_specific_id: &str) -> Result<()> {
        match self.docker("delete", &["rm".to_string(), "-f".to_string(), type_specific_id.to_string()]) {
            Ok(_) => Ok(()),
            Err(Error::Runner { reason, .. }) if reason.contains("No such container") => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn delete_resources(&self, start_info: &SessionHostsStartInfo) -> Result<()> {
        let Some(image) = start_info.image_details.as_ref() else {
            return Ok(());
        };
        let reference = image.reference();
        if let Err(e) = self.docker("delete resources", &["rmi".to_string(), reference.clone()]) {
            // Another assignment may still use the image.
            tracing::warn!(image = %reference, error = %e, "failed to remove image");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::VolumeMount;
    use std::path::PathBuf;
    use vmagent_protocol::{GamePort, PortMapping};

    #[test]
    fn test_classify_pull_failure() {
        let cases = [
            (
                "Error response from daemon: unauthorized: authentication required",
                ResourceRetrievalResult::AuthenticationFailure,
            ),
            (
                "Error response from daemon: manifest for game:v9 not found: manifest unknown",
                ResourceRetrievalResult::ResourceNotFound,
            ),
            (
                "toomanyrequests: You have reached your pull rate limit",
                ResourceRetrievalResult::TooManyRequests,
            ),
            (
                "dial tcp: i/o timeout",
                ResourceRetrievalResult::ResourceNotAvailable,
            ),
            ("no space left on device", ResourceRetrievalResult::Other),
        ];
        for (stderr, expected) in cases {
            assert_eq!(classify_pull_failure(stderr), expected, "{}", stderr);
        }
    }

    #[test]
    fn test_create_args() {
        let runner = ContainerRunner::new("docker", Duration::from_secs(10));
        let launch = LaunchSpec {
            unique_id: "host-1".into(),
            assignment_id: "t:b:r".into(),
            instance_number: 2,
            image: Some("game:v1".into()),
            start_command: None,
            environment: vec![("PF_SERVER_INSTANCE_NUMBER".into(), "2".into())],
            port_mappings: vec![PortMapping {
                public_port: 30000,
                node_port: 30002,
                game_port: GamePort {
                    name: "game".into(),
                    number: 7777,
                    protocol: "UDP".into(),
                },
            }],
            mounts: vec![VolumeMount {
                host_path: PathBuf::from("/agent/certificates"),
                guest_path: "/data/GameCertificates".into(),
                read_only: true,
            }],
            working_dir: PathBuf::from("/agent/instances/2"),
            log_folder: PathBuf::from("/agent/logs/x"),
        };

        let args = runner.create_args(&launch, "game:v1");
        let joined = args.join(" ");
        assert!(joined.starts_with("create --name host-1 --label vmagent.assignment=t:b:r"));
        assert!(joined.contains("-e PF_SERVER_INSTANCE_NUMBER=2"));
        assert!(joined.contains("-p 30002:7777/udp"));
        assert!(joined.contains("-v /agent/certificates:/data/GameCertificates:ro"));
        assert_eq!(args.last().map(String::as_str), Some("game:v1"));
    }

    #[test]
    fn test_missing_binary_is_a_runner_error() {
        let runner = ContainerRunner::new("/nonexistent/docker", Duration::from_secs(1));
        assert!(!runner.is_alive("host-1"));
        assert!(matches!(runner.stop("host-1"), Err(Error::Runner { .. })));
    }
}
