use crate::engine::CommandRunner;
use crate::error::LifecycleError;
use crate::model::{CommandResult, CommandSpec, OutputMode};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Spawns real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        cmd: &CommandSpec,
        mode: OutputMode,
    ) -> Result<CommandResult, LifecycleError> {
        tracing::debug!(command = %cmd.display(), cwd = %cmd.cwd.display(), ?mode, "spawning");

        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args).current_dir(&cmd.cwd).stdin(Stdio::null());

        let result = match mode {
            OutputMode::Inherit => {
                let status = command.status().await.map_err(|source| LifecycleError::Spawn {
                    command: cmd.display(),
                    source,
                })?;
                CommandResult {
                    exit_code: status.code().unwrap_or(-1),
                    output: String::new(),
                }
            }
            OutputMode::Capture => run_captured(command, cmd).await?,
        };

        tracing::debug!(command = %cmd.display(), exit_code = result.exit_code, "finished");

        if cmd.strict && !result.success() {
            return Err(LifecycleError::Process {
                command: cmd.display(),
                exit_code: result.exit_code,
                output: result.output,
            });
        }
        Ok(result)
    }
}

/// Run with both output pipes drained into one buffer in arrival order.
async fn run_captured(
    mut command: Command,
    cmd: &CommandSpec,
) -> Result<CommandResult, LifecycleError> {
    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| LifecycleError::Spawn {
            command: cmd.display(),
            source,
        })?;

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    let readers = [
        child.stdout.take().map(|s| tokio::spawn(forward_lines(s, line_tx.clone()))),
        child.stderr.take().map(|s| tokio::spawn(forward_lines(s, line_tx.clone()))),
    ];
    // Readers hold the remaining senders; the channel closes when both pipes hit EOF.
    drop(line_tx);

    let mut output = String::new();
    while let Some(line) = line_rx.recv().await {
        output.push_str(&line);
        output.push('\n');
    }
    for handle in readers.into_iter().flatten() {
        let _ = handle.await;
    }

    let status = child
        .wait()
        .await
        .map_err(|e| LifecycleError::io(format!("waiting for `{}`", cmd.display()), e))?;

    Ok(CommandResult {
        exit_code: status.code().unwrap_or(-1),
        output,
    })
}

/// Forward raw lines until EOF. Bytes that are not UTF-8 are replaced, never
/// dropped, so the pipe stays drained for the whole life of the child.
async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = buf
                    .strip_suffix(b"\n")
                    .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
                    .unwrap_or(&buf[..]);
                // Keep reading after the receiver is gone so the child never sees EPIPE.
                let _ = tx.send(String::from_utf8_lossy(line).into_owned());
            }
            Err(e) => {
                tracing::debug!(error = %e, "output pipe read failed");
                break;
            }
        }
    }
}
