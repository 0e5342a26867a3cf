//! `execute_python` (§4.2): runs a short Python snippet in a sandboxed
//! subprocess confined to the workspace.
//!
//! Execution shape (timeout + kill + concurrent output draining) is
//! grounded on `tools/bash.rs::BashTool::execute`. Rather than embedding a
//! Python interpreter, this shells out to the system `python3` on `PATH` —
//! no Rust-embedded interpreter crate appears anywhere in the retrieved
//! pack, and shelling out keeps this tool's shape identical to the bash
//! tool it's modeled on.

use std::process::Stdio;

use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::config::AppConfig;
use crate::tools::workspace::Workspace;
use crate::tools::ToolError;

/// Substrings that, if present anywhere in the submitted code, cause the
/// call to be refused before a process is ever spawned. Lifted from
/// `original_source/backend/agents/executor.py::_execute_python`'s denylist.
const DENIED_SUBSTRINGS: &[&str] = &[
    "os.system",
    "eval(",
    "exec(",
    "__import__",
    "requests.",
    "urllib.",
];

const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

fn denylist_violation(code: &str) -> Option<&'static str> {
    DENIED_SUBSTRINGS.iter().copied().find(|needle| code.contains(needle))
}

async fn read_limited<R: AsyncReadExt + Unpin>(mut reader: R, max_bytes: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => return buf,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() >= max_bytes {
                    return buf;
                }
            }
        }
    }
}

pub async fn execute_python(
    config: &AppConfig,
    workspace: &Workspace,
    args: &Value,
) -> Result<String, ToolError> {
    if !config.allow_code_execution {
        return Err(ToolError::Disabled(
            "execução de código está desabilitada nesta instância".to_string(),
        ));
    }

    let code = args
        .get("code")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidParameters("missing required field 'code'".to_string()))?;

    if let Some(hit) = denylist_violation(code) {
        return Err(ToolError::InvalidParameters(format!(
            "código contém construção não permitida: '{hit}'"
        )));
    }

    std::fs::create_dir_all(workspace.root())
        .map_err(|e| ToolError::ExecutionFailed(format!("falha ao preparar workspace: {e}")))?;
    let script_file = tempfile::Builder::new()
        .prefix("agent_exec_")
        .suffix(".py")
        .tempfile_in(workspace.root())
        .map_err(|e| ToolError::ExecutionFailed(format!("falha ao criar arquivo temporário: {e}")))?;
    std::fs::write(script_file.path(), code)
        .map_err(|e| ToolError::ExecutionFailed(format!("falha ao escrever script: {e}")))?;

    let script_path = script_file.path().to_path_buf();
    let workspace_root = workspace.root().to_path_buf();
    let timeout = config.code_timeout;

    let run = async move {
        let mut child = Command::new("python3")
            .arg(&script_path)
            .current_dir(&workspace_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed(format!("falha ao iniciar python3: {e}")))?;

        let stdout_pipe = child.stdout.take().expect("stdout was piped");
        let stderr_pipe = child.stderr.take().expect("stderr was piped");
        let (stdout_bytes, stderr_bytes) = tokio::join!(
            read_limited(stdout_pipe, MAX_OUTPUT_BYTES),
            read_limited(stderr_pipe, MAX_OUTPUT_BYTES),
        );

        let status = child
            .wait()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("falha ao aguardar processo: {e}")))?;

        let stdout = String::from_utf8_lossy(&stdout_bytes).to_string();
        let stderr = String::from_utf8_lossy(&stderr_bytes).to_string();

        if status.success() {
            Ok(format!("stdout:\n{stdout}\nstderr:\n{stderr}"))
        } else {
            Err(ToolError::ExecutionFailed(format!(
                "processo terminou com código {:?}\nstdout:\n{stdout}\nstderr:\n{stderr}",
                status.code()
            )))
        }
    };

    let outcome = match tokio::time::timeout(timeout, run).await {
        Ok(result) => result,
        Err(_) => Err(ToolError::Timeout(format!(
            "execução excedeu o limite de {:.1}s",
            timeout.as_secs_f64()
        ))),
    };

    // tempfile's Drop removes the file regardless of the branch taken above.
    drop(script_file);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denylist_flags_os_system_calls() {
        assert_eq!(denylist_violation("import os\nos.system('ls')"), Some("os.system"));
        assert_eq!(denylist_violation("print('hello world')"), None);
    }

    #[tokio::test]
    async fn disabled_by_default_returns_a_disabled_error() {
        let config = AppConfig {
            allow_code_execution: false,
            ..AppConfig::from_env()
        };
        let workspace = Workspace::new(config.workspace.clone());
        let err = execute_python(&config, &workspace, &serde_json::json!({"code": "print(1)"}))
            .await
            .unwrap_err();
        matches!(err, ToolError::Disabled(_));
    }

    #[tokio::test]
    async fn rejects_denylisted_code_without_spawning_a_process() {
        let config = AppConfig {
            allow_code_execution: true,
            ..AppConfig::from_env()
        };
        let workspace = Workspace::new(config.workspace.clone());
        let err = execute_python(
            &config,
            &workspace,
            &serde_json::json!({"code": "eval('1+1')"}),
        )
        .await
        .unwrap_err();
        matches!(err, ToolError::InvalidParameters(_));
    }
}
