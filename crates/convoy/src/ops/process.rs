use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

/// How often a deadline-bounded command is checked for exit.
const EXIT_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub(crate) struct CommandOutput {
    pub(crate) exit_code: i32,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    pub(crate) timed_out: bool,
    #[allow(dead_code)]
    pub(crate) duration: Duration,
}

/// Run a command to completion, killing it once `timeout` elapses. A killed
/// command reports exit code -1, `timed_out`, and a note appended to stderr.
pub(crate) fn run_command_with_timeout(
    program: &str,
    args: &[&str],
    working_dir: &Path,
    timeout: Option<Duration>,
) -> Result<CommandOutput> {
    let started = Instant::now();
    let mut command = Command::new(program);
    command.args(args).current_dir(working_dir);

    // Without a deadline the process can run to completion in one call.
    let Some(limit) = timeout else {
        let output = command
            .output()
            .with_context(|| format!("unable to run {program}"))?;
        return Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            timed_out: false,
            duration: started.elapsed(),
        });
    };

    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("unable to start {program}"))?;

    let mut status = None;
    while started.elapsed() < limit {
        if let Some(exited) = child
            .try_wait()
            .with_context(|| format!("lost track of running {program}"))?
        {
            status = Some(exited);
            break;
        }
        thread::sleep(EXIT_POLL);
    }

    let timed_out = status.is_none();
    if timed_out {
        let _ = child.kill();
        let _ = child.wait();
    }

    let stdout = slurp(child.stdout.take());
    let mut stderr = slurp(child.stderr.take());
    if timed_out {
        stderr.push_str(&format!(
            "\nprocess killed after exceeding its {} deadline",
            humantime::format_duration(limit)
        ));
    }

    Ok(CommandOutput {
        exit_code: status.and_then(|s| s.code()).unwrap_or(-1),
        stdout,
        stderr,
        timed_out,
        duration: started.elapsed(),
    })
}

/// Read whatever a finished child left in one of its pipes, lossily.
fn slurp(pipe: Option<impl Read>) -> String {
    let mut bytes = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut bytes);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
