use std::ffi::OsString;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{HarvestError, HarvestResult};

/// Launches and signals job processes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobSpawner: Send + Sync {
    /// Start a detached process executing the descriptor; returns its pid
    async fn spawn(&self, job_id: &str, descriptor: &Path) -> HarvestResult<u32>;

    /// Ask a job process to terminate. A process that is already gone is not an error.
    fn terminate(&self, pid: u32) -> HarvestResult<()>;

    fn is_alive(&self, pid: u32) -> bool;
}

/// Spawns `program [leading_args..] <descriptor>` in its own process group,
/// capturing output to `<output_dir>/<job_id>.out`
pub struct CommandSpawner {
    program: PathBuf,
    leading_args: Vec<OsString>,
    output_dir: PathBuf,
}

impl CommandSpawner {
    pub fn new(program: impl Into<PathBuf>, leading_args: Vec<OsString>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args,
            output_dir: output_dir.into(),
        }
    }

    /// Re-run this binary's `run-job` command
    pub fn for_current_exe(config_path: Option<&Path>, output_dir: impl Into<PathBuf>) -> HarvestResult<Self> {
        let program = std::env::current_exe()?;

        let mut leading_args = Vec::new();
        if let Some(path) = config_path {
            leading_args.push(OsString::from("--config"));
            leading_args.push(path.as_os_str().to_os_string());
        }
        leading_args.push(OsString::from("run-job"));

        Ok(Self::new(program, leading_args, output_dir))
    }
}

#[async_trait]
impl JobSpawner for CommandSpawner {
    async fn spawn(&self, job_id: &str, descriptor: &Path) -> HarvestResult<u32> {
        std::fs::create_dir_all(&self.output_dir)?;
        let output_path = self.output_dir.join(format!("{}.out", job_id));
        let stdout = OpenOptions::new().create(true).append(true).open(&output_path)?;
        let stderr = stdout.try_clone()?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .arg(descriptor)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(false);

        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            HarvestError::Spawn(format!("failed to launch {}: {}", self.program.display(), e))
        })?;

        let pid = child
            .id()
            .ok_or_else(|| HarvestError::Spawn("job process exited before reporting a pid".to_string()))?;

        // Reap the child so it never lingers as a zombie while we are alive
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("Job process {} (pid {}) exited: {}", job_id, pid, status),
                Err(e) => warn!("Failed to wait for job process {}: {}", job_id, e),
            }
        });

        info!("Spawned job process {} with pid {}", output_path.display(), pid);
        Ok(pid)
    }

    #[cfg(unix)]
    fn terminate(&self, pid: u32) -> HarvestResult<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => {
                info!("Sent SIGTERM to pid {}", pid);
                Ok(())
            }
            Err(Errno::ESRCH) => {
                debug!("Process {} already gone", pid);
                Ok(())
            }
            Err(e) => Err(HarvestError::Spawn(format!("failed to signal pid {}: {}", pid, e))),
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self, _pid: u32) -> HarvestResult<()> {
        Err(HarvestError::Spawn(
            "Signal sending not supported on this platform".to_string(),
        ))
    }

    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    fn is_alive(&self, _pid: u32) -> bool {
        true
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sleeper(dir: &Path) -> CommandSpawner {
        CommandSpawner::new(
            "sh",
            vec!["-c".into(), "sleep 30".into(), "sh".into()],
            dir,
        )
    }

    #[tokio::test]
    async fn test_spawn_and_terminate() {
        let dir = tempfile::tempdir().unwrap();
        let spawner = sleeper(dir.path());

        let pid = spawner.spawn("job-a", &dir.path().join("job-a.job.json")).await.unwrap();
        assert!(spawner.is_alive(pid));
        assert!(dir.path().join("job-a.out").exists());

        spawner.terminate(pid).unwrap();

        let mut alive = true;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if !spawner.is_alive(pid) {
                alive = false;
                break;
            }
        }
        assert!(!alive, "process {} still alive after SIGTERM", pid);

        // Signalling a reaped process is still fine
        spawner.terminate(pid).unwrap();
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let spawner = CommandSpawner::new("/nonexistent/harvester", Vec::new(), dir.path());

        let err = spawner.spawn("job-b", &dir.path().join("job-b.job.json")).await.unwrap_err();
        assert!(matches!(err, HarvestError::Spawn(_)));
    }
}
