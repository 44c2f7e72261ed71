//! Built-in step implementations available to every CLI run.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use cascade_core::StepKey;
use cascade_engine::{Step, StepContext, StepError, StepInputs, StepOutputs, StepRegistry};

/// Shells out to an external program.
///
/// Inputs:
/// - `program` (string, required) — the executable to run
/// - `args` (array of strings, optional)
/// - `stdin` (string, optional) — piped to the child's stdin
///
/// Outputs:
/// - `stdout` (string), `stderr` (string), `exit_code` (number)
///
/// A non-zero exit is a step failure. The child is killed on cancellation.
pub struct CommandStep;

#[async_trait]
impl Step for CommandStep {
    async fn run(&self, inputs: StepInputs, ctx: StepContext) -> Result<StepOutputs, StepError> {
        let program = inputs
            .get("program")
            .and_then(serde_json::Value::as_str)
            .ok_or(StepError::MissingInput {
                port: "program".into(),
            })?;
        let args: Vec<String> = inputs
            .get("args")
            .and_then(serde_json::Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let stdin_data = inputs
            .get("stdin")
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string);

        let mut command = tokio::process::Command::new(program);
        command
            .args(&args)
            .stdin(if stdin_data.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &ctx.workdir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| StepError::failed(format!("cannot spawn '{program}': {e}")))?;

        if let Some(data) = stdin_data
            && let Some(mut stdin) = child.stdin.take()
        {
            use tokio::io::AsyncWriteExt;
            stdin
                .write_all(data.as_bytes())
                .await
                .map_err(|e| StepError::failed(format!("cannot write stdin: {e}")))?;
        }

        // `kill_on_drop` reaps the child if cancellation wins the race.
        let output = tokio::select! {
            () = ctx.cancellation.cancelled() => return Err(StepError::Cancelled),
            output = child.wait_with_output() => output
                .map_err(|e| StepError::failed(format!("'{program}' did not complete: {e}")))?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            return Err(StepError::failed(format!(
                "'{program}' exited with {code}: {}",
                stderr.trim()
            )));
        }

        Ok(StepOutputs::from([
            ("stdout".to_string(), serde_json::json!(stdout)),
            ("stderr".to_string(), serde_json::json!(stderr)),
            ("exit_code".to_string(), serde_json::json!(code)),
        ]))
    }
}

/// Register every built-in step.
pub fn builtin_registry() -> Arc<StepRegistry> {
    let registry = Arc::new(StepRegistry::new());
    registry.register(
        StepKey::new("command").expect("valid builtin key"),
        Arc::new(CommandStep),
    );
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::{ExecutionId, NodeId};
    use cascade_execution::{InstanceId, StateIndex};

    fn ctx() -> StepContext {
        StepContext::new(
            ExecutionId::v4(),
            InstanceId::derive(NodeId::v4(), &StateIndex::empty()),
        )
    }

    #[tokio::test]
    async fn command_captures_stdout() {
        let inputs = StepInputs::from([
            ("program".to_string(), serde_json::json!("echo")),
            ("args".to_string(), serde_json::json!(["hello"])),
        ]);
        let outputs = CommandStep.run(inputs, ctx()).await.unwrap();
        assert_eq!(outputs["stdout"], serde_json::json!("hello\n"));
        assert_eq!(outputs["exit_code"], serde_json::json!(0));
    }

    #[tokio::test]
    async fn command_pipes_stdin() {
        let inputs = StepInputs::from([
            ("program".to_string(), serde_json::json!("cat")),
            ("stdin".to_string(), serde_json::json!("piped data")),
        ]);
        let outputs = CommandStep.run(inputs, ctx()).await.unwrap();
        assert_eq!(outputs["stdout"], serde_json::json!("piped data"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure() {
        let inputs = StepInputs::from([
            ("program".to_string(), serde_json::json!("false")),
        ]);
        let err = CommandStep.run(inputs, ctx()).await.unwrap_err();
        assert!(matches!(err, StepError::Failed { .. }));
    }

    #[tokio::test]
    async fn missing_program_is_a_failure() {
        let inputs = StepInputs::from([(
            "program".to_string(),
            serde_json::json!("/nonexistent/cascade-tool"),
        )]);
        let err = CommandStep.run(inputs, ctx()).await.unwrap_err();
        assert!(matches!(err, StepError::Failed { .. }));
    }

    #[test]
    fn builtin_registry_has_command() {
        let registry = builtin_registry();
        assert!(registry.contains(&StepKey::new("command").unwrap()));
    }
}
