use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Run a CLI tool, returning stdout on success. Failures carry the rendered
/// command line and stderr.
pub(crate) async fn run_command(program: &str, args: &[String]) -> Result<String> {
    debug!("running: {} {}", program, args.join(" "));
    let output = Command::new(program).args(args).output().await?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(Error::CommandError {
            command: format!("{} {}", program, args.join(" ")),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        })
    }
}

/// kubectl passthrough scoped to one namespace, for the operations that go
/// through the CLI rather than the API client: manifest application,
/// readiness waits (including custom resources), jsonpath reads, jobs.
pub struct Kubectl {
    namespace: String,
}

impl Kubectl {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn run(&self, args: Vec<String>) -> Result<String> {
        run_command("kubectl", &args).await
    }

    fn namespaced(&self, args: &[&str]) -> Vec<String> {
        let mut full: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        full.push("-n".to_string());
        full.push(self.namespace.clone());
        full
    }

    pub async fn apply_file(&self, path: &Path) -> Result<()> {
        let path = expand_home(path);
        self.run(self.namespaced(&["apply", "-f", &path.to_string_lossy()]))
            .await?;
        Ok(())
    }

    /// `kubectl wait --for=condition=Ready` on a single target such as
    /// `cassandradatacenter/dc1`.
    pub async fn wait_ready(&self, target: &str, timeout_secs: u64) -> Result<()> {
        self.run(self.namespaced(&[
            "wait",
            "--for=condition=Ready",
            target,
            &format!("--timeout={timeout_secs}s"),
        ]))
        .await?;
        Ok(())
    }

    /// `kubectl wait --for=condition=Ready` on all pods matching a label.
    pub async fn wait_pods_ready(&self, label: &str, timeout_secs: u64) -> Result<()> {
        self.run(self.namespaced(&[
            "wait",
            "--for=condition=Ready",
            "pod",
            "-l",
            label,
            &format!("--timeout={timeout_secs}s"),
        ]))
        .await?;
        Ok(())
    }

    pub async fn wait_complete(&self, target: &str, timeout_secs: u64) -> Result<()> {
        self.run(self.namespaced(&[
            "wait",
            "--for=condition=complete",
            &format!("--timeout={timeout_secs}s"),
            target,
        ]))
        .await?;
        Ok(())
    }

    pub async fn rollout_status(&self, deployment: &str) -> Result<String> {
        self.run(self.namespaced(&["rollout", "status", "deployment", deployment]))
            .await
    }

    /// Read a jsonpath expression off a resource, e.g. the finished-node
    /// list of a CassandraBackup.
    pub async fn get_jsonpath(&self, kind: &str, name: &str, jsonpath: &str) -> Result<String> {
        self.run(self.namespaced(&[
            "get",
            kind,
            name,
            "-o",
            &format!("jsonpath={jsonpath}"),
        ]))
        .await
    }

    pub async fn create_job(&self, name: &str, image: &str, command: &[String]) -> Result<()> {
        let mut args = self.namespaced(&["create", "job", &format!("--image={image}"), name]);
        args.push("--".to_string());
        args.extend(command.iter().cloned());
        self.run(args).await?;
        Ok(())
    }

    pub async fn job_logs(&self, name: &str) -> Result<String> {
        self.run(self.namespaced(&["logs", &format!("job/{name}")]))
            .await
    }
}

/// A rollout is only done once the status stream closes with this marker.
pub fn rollout_complete(output: &str) -> bool {
    output.trim_end().ends_with("successfully rolled out")
}

/// Expand a leading `~` so secret manifests can live in the caller's home
/// directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match home::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
