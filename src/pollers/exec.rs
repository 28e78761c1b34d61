// Run a diagnostic command inside a container and capture its stdout.

use bollard::Docker;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::time::timeout;

/// Create and start an exec in `container`, drain its output under `limit`
/// and return stdout. A timed-out drain or a nonzero exit code is an error.
/// Dropping the returned future stops the drain, so the bound holds under
/// cancellation too.
pub(crate) async fn exec_capture(
    docker: &Docker,
    container: &str,
    cmd: Vec<String>,
    limit: Duration,
) -> anyhow::Result<String> {
    let exec = docker
        .create_exec(
            container,
            CreateExecOptions {
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                cmd: Some(cmd),
                ..Default::default()
            },
        )
        .await?;

    let StartExecResults::Attached { mut output, .. } = docker
        .start_exec(&exec.id, Option::<StartExecOptions>::None)
        .await?
    else {
        anyhow::bail!("exec started detached, cannot capture output");
    };

    let mut stdout = Vec::<u8>::new();
    let mut stderr = Vec::<u8>::new();
    let drain = async {
        while let Some(frame) = output.next().await {
            match frame? {
                LogOutput::StdOut { message } => stdout.extend_from_slice(&message),
                LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                _ => {}
            }
        }
        Ok::<_, bollard::errors::Error>(())
    };
    timeout(limit, drain)
        .await
        .map_err(|_| anyhow::anyhow!("command timed out after {limit:?}"))??;

    let inspect = docker.inspect_exec(&exec.id).await?;
    let exit_code = inspect.exit_code.unwrap_or_default();
    anyhow::ensure!(
        exit_code == 0,
        "command exited with code {}: {}",
        exit_code,
        String::from_utf8_lossy(&stderr).trim()
    );

    Ok(String::from_utf8_lossy(&stdout).into_owned())
}
