use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, trace};

use crate::errors::InventoryError;

// Run an external tool once and return its standard output.
// A missing tool or a non zero exit makes the source unavailable
pub async fn run_command(
    program: &str,
    args: &[&str],
) -> Result<String, InventoryError> {
    let path = which::which(program).map_err(|e| {
        debug!("\"{program}\" not found: {e}");
        InventoryError::unavailable(program, e)
    })?;

    trace!("Running {} {}", path.display(), args.join(" "));

    let output = Command::new(&path)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| InventoryError::unavailable(program, e))?;

    if !output.status.success() {
        debug!("\"{program}\" failed with {}", output.status);
        return Err(InventoryError::unavailable(
            program,
            format!("exited with {}", output.status),
        ));
    }

    String::from_utf8(output.stdout)
        .map_err(|e| InventoryError::parse("command output", program, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_tool_is_unavailable() {
        let err = run_command("surely-not-an-installed-tool", &[])
            .await
            .unwrap_err();

        assert!(matches!(err, InventoryError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn captures_standard_output() {
        let out = run_command("echo", &["03:00.0"]).await.unwrap();
        assert_eq!(out.trim(), "03:00.0");
    }

    #[tokio::test]
    async fn failing_tool_is_unavailable() {
        let err = run_command("false", &[]).await.unwrap_err();
        assert!(matches!(err, InventoryError::SourceUnavailable { .. }));
    }
}
