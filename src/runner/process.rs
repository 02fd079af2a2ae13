//! Process-based session hosts.

use super::{LaunchSpec, SessionHostRunner};
use crate::error::{Error, Result};
use crate::process;
use crate::state::SessionHostsStartInfo;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Name of the combined stdout/stderr file in the host's log folder.
pub const OUTPUT_LOG_FILE: &str = "output.log";

/// Runs each session host as a child process of the agent.
///
/// The type-specific id is the OS pid. Children are kept so they can be
/// reaped and do not linger as zombies.
pub struct ProcessRunner {
    children: Mutex<HashMap<i32, Child>>,
    stop_timeout: Duration,
}

impl ProcessRunner {
    /// Create a runner.
    pub fn new(stop_timeout: Duration) -> Self {
        Self {
            children: Mutex::new(HashMap::new()),
            stop_timeout,
        }
    }

    fn pid(type_specific_id: &str) -> Result<libc::pid_t> {
        process::parse_pid(type_specific_id)
            .ok_or_else(|| Error::runner("parse pid", format!("invalid pid '{}'", type_specific_id)))
    }
}

impl SessionHostRunner for ProcessRunner {
    fn retrieve_resources(&self, _start_info: &SessionHostsStartInfo) -> Result<()> {
        // Processes run straight from the extracted assets.
        Ok(())
    }

    fn create_and_start(&self, launch: &LaunchSpec) -> Result<String> {
        let command = launch
            .start_command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::runner("create", "process session host needs a start command"))?;

        std::fs::create_dir_all(&launch.log_folder)?;
        std::fs::create_dir_all(&launch.working_dir)?;
        let stdout = File::create(launch.log_folder.join(OUTPUT_LOG_FILE))?;
        let stderr = stdout.try_clone()?;

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&launch.working_dir)
            .envs(launch.environment.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|e| Error::runner("create", format!("spawn '{}': {}", command, e)))?;

        let pid = child.id() as i32;
        tracing::info!(
            session_host_id = %launch.unique_id,
            instance = launch.instance_number,
            pid = pid,
            "started session host process"
        );
        self.children.lock().insert(pid, child);
        Ok(pid.to_string())
    }

    fn is_alive(&self, type_specific_id: &str) -> bool {
        let Some(pid) = process::parse_pid(type_specific_id) else {
            return false;
        };
        let mut children = self.children.lock();
        match children.get_mut(&pid).map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                tracing::debug!(pid = pid, status = %status, "session host process exited");
                children.remove(&pid);
                false
            }
            Some(Err(e)) => {
                tracing::warn!(pid = pid, error = %e, "failed to poll session host process");
                process::is_alive(pid)
            }
            // Not our child: adopted after an agent restart.
            None => process::is_alive(pid),
        }
    }

    fn stop(&self, type_specific_id: &str) -> Result<()> {
        let pid = Self::pid(type_specific_id)?;
        // Drop our handle first so try_wait inside stop_process can reap it.
        self.children.lock().remove(&pid);
        let code = process::stop_process(pid, self.stop_timeout);
        tracing::debug!(pid = pid, exit_code = ?code, "stopped session host process");
        Ok(())
    }

    fn collect_logs(&self, _type_specific_id: &str, log_folder: &Path) -> Result<()> {
        // Output already streams into the log folder.
        if !log_folder.join(OUTPUT_LOG_FILE).exists() {
            tracing::debug!(folder = %log_folder.display(), "no process output to collect");
        }
        Ok(())
    }

    fn delete(&self, type_specific_id: &str) -> Result<()> {
        let pid = Self::pid(type_specific_id)?;
        if process::is_alive(pid) {
            process::stop_process(pid, Duration::ZERO);
        }
        self.children.lock().remove(&pid);
        Ok(())
    }

    fn delete_resources(&self, _start_info: &SessionHostsStartInfo) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launch(dir: &Path, command: &str) -> LaunchSpec {
        LaunchSpec {
            unique_id: "host-1".into(),
            assignment_id: "t:b:r".into(),
            instance_number: 0,
            image: None,
            start_command: Some(command.into()),
            environment: vec![("GREETING".into(), "hello".into())],
            port_mappings: vec![],
            mounts: vec![],
            working_dir: dir.join("work"),
            log_folder: dir.join("logs"),
        }
    }

    #[test]
    fn test_process_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(Duration::from_secs(5));

        let id = runner
            .create_and_start(&launch(dir.path(), "echo $GREETING; exec sleep 30"))
            .unwrap();
        assert!(runner.is_alive(&id));

        runner.stop(&id).unwrap();
        runner.delete(&id).unwrap();
        assert!(!runner.is_alive(&id));

        let output = std::fs::read_to_string(dir.path().join("logs").join(OUTPUT_LOG_FILE)).unwrap();
        assert!(output.contains("hello"));
    }

    #[test]
    fn test_missing_command_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(Duration::from_secs(1));
        let mut spec = launch(dir.path(), "");
        spec.start_command = None;
        assert!(matches!(runner.create_and_start(&spec), Err(Error::Runner { .. })));
    }

    #[test]
    fn test_exited_process_is_not_alive() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(Duration::from_secs(1));
        let id = runner.create_and_start(&launch(dir.path(), "exit 0")).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while runner.is_alive(&id) {
            assert!(std::time::Instant::now() < deadline, "process never exited");
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}
