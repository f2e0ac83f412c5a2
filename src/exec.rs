use k8s_openapi::api::core::v1::Pod;
use kube::{api::Api, client::Client, core::subresource::AttachParams};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::Error;
use tracing::{debug, error, warn};

#[derive(Debug)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// One command executed in a named container of a pod, attached over the
/// Kubernetes exec subresource.
pub struct ExecCommand {
    pods_api: Api<Pod>,
    pod_name: String,
    container: String,
}

impl ExecCommand {
    pub fn new(pod_name: String, container: String, namespace: &str, client: Client) -> Self {
        let pods_api: Api<Pod> = Api::namespaced(client, namespace);
        Self {
            pods_api,
            pod_name,
            container,
        }
    }

    pub async fn execute(&self, command: &[String]) -> Result<ExecOutput, Error> {
        let attach_params = AttachParams {
            container: Some(self.container.clone()),
            tty: false,
            stdin: true,
            stdout: true,
            stderr: true,
            max_stdin_buf_size: Some(10240),
            max_stdout_buf_size: Some(10240),
            max_stderr_buf_size: Some(10240),
        };

        let mut attached = self
            .pods_api
            .exec(self.pod_name.as_str(), command, &attach_params)
            .await?;

        let stdout = drain(attached.stdout(), "stdout", &self.pod_name).await;
        let stderr = drain(attached.stderr(), "stderr", &self.pod_name).await;

        let status = match attached.take_status() {
            Some(status) => status.await.unwrap_or_default(),
            None => {
                return Err(Error::KubeExecError(format!(
                    "no status returned for {:?} on pod {}",
                    command, self.pod_name
                )));
            }
        };

        // The exec subresource reports Success or Failure; anything else
        // means the command never ran.
        let success = match status.status.as_deref() {
            Some("Success") => true,
            Some("Failure") => {
                warn!(
                    "Command {:?} failed on pod {}: {}, code {:?}",
                    command,
                    self.pod_name,
                    status.reason.as_deref().unwrap_or("unknown reason"),
                    status.code
                );
                debug!("stdout:\n{stdout}\nstderr:\n{stderr}");
                false
            }
            _ => {
                error!("Undefined exec status from pod {}", self.pod_name);
                return Err(Error::KubeExecError(format!(
                    "undefined status for {:?} on pod {}",
                    command, self.pod_name
                )));
            }
        };
        Ok(ExecOutput {
            stdout,
            stderr,
            success,
        })
    }
}

/// Read one output stream to the end. A stream the server never opened
/// comes back empty rather than failing the exec.
async fn drain<R: AsyncRead + Unpin>(reader: Option<R>, stream: &str, pod_name: &str) -> String {
    let Some(mut reader) = reader else {
        warn!("No {stream} from exec to pod {pod_name}");
        return String::new();
    };
    let mut buffer = String::new();
    reader.read_to_string(&mut buffer).await.unwrap_or_default();
    buffer
}
