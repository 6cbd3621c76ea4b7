//! OCI lifecycle hooks.
//!
//! Hooks receive the container state document on stdin. A failing
//! `createRuntime` hook does not abort the create.

use std::process::Stdio;
use std::time::Duration;

use corral_common::{CorralError, CorralResult};
use corral_oci::ContainerState;
use corral_oci::runtime::Hook;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Runs one hook to completion.
///
/// # Errors
///
/// Returns an error if the hook cannot be spawned, exceeds its timeout or
/// exits unsuccessfully.
pub async fn run_hook(hook: &Hook, state: &ContainerState) -> CorralResult<()> {
    let mut cmd = Command::new(&hook.path);
    if let Some((argv0, rest)) = hook.args.split_first() {
        cmd.arg0(argv0).args(rest);
    }
    cmd.env_clear()
        .envs(hook.env.iter().filter_map(|kv| kv.split_once('=')))
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        CorralError::configuration_with(format!("failed to run hook {}", hook.path.display()), e)
    })?;

    let payload = serde_json::to_vec(state)?;
    if let Some(mut stdin) = child.stdin.take() {
        // A hook may exit without reading its input.
        if let Err(e) = stdin.write_all(&payload).await {
            tracing::debug!(hook = %hook.path.display(), error = %e, "hook did not read state");
        }
    }

    let output = match hook.timeout {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs.into()), child.wait_with_output())
            .await
            .map_err(|_| CorralError::Timeout {
                operation: format!("hook {}", hook.path.display()),
            })??,
        None => child.wait_with_output().await?,
    };

    if output.status.success() {
        Ok(())
    } else {
        Err(CorralError::configuration(format!(
            "hook {} failed with {}: {}",
            hook.path.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

/// Runs `hooks` in order, logging failures instead of returning them.
pub async fn run_hooks_logged(phase: &str, hooks: &[Hook], state: &ContainerState) {
    for hook in hooks {
        match run_hook(hook, state).await {
            Ok(()) => tracing::debug!(phase, hook = %hook.path.display(), "hook succeeded"),
            Err(e) => tracing::warn!(
                container_id = %state.id,
                phase,
                hook = %hook.path.display(),
                error = %e,
                "hook failed"
            ),
        }
    }
}
