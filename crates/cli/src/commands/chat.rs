use std::io::{self, BufRead, Write};

use crate::commands::{agent_runtime, prepare, CommandResult, Failure};

const PROMPT: &str = "you> ";

pub fn run(session: Option<String>) -> CommandResult {
    let stdin = io::stdin();
    let stdout = io::stdout();
    run_with(stdin.lock(), &mut stdout.lock(), session)
}

/// Line loop for one session: every input line is a turn, `exit` or end of input stops.
pub fn run_with(input: impl BufRead, output: &mut impl Write, session: Option<String>) -> CommandResult {
    let (config, runtime) = match prepare("chat") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let (pool, agent) = agent_runtime(&config).await?;
        let session_id = agent.open_session(session.as_deref()).await;
        writeln!(output, "session {session_id} (type `help` for examples, `exit` to leave)").map_err(io_failure)?;

        let mut turns = 0usize;
        let mut lines = input.lines();
        loop {
            write!(output, "{PROMPT}").map_err(io_failure)?;
            output.flush().map_err(io_failure)?;
            let Some(line) = lines.next() else {
                break;
            };
            let line = line.map_err(io_failure)?;
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            if matches!(text, "exit" | "quit") {
                break;
            }

            match agent.handle_message(&session_id, text).await {
                Ok(reply) => writeln!(output, "{}", reply.text()).map_err(io_failure)?,
                Err(error) => writeln!(output, "error: {error}").map_err(io_failure)?,
            }
            turns += 1;
        }
        writeln!(output).map_err(io_failure)?;

        agent.close_session(&session_id).await;
        pool.close().await;
        Ok::<(String, usize), Failure>((session_id, turns))
    });

    match result {
        Ok((session_id, turns)) => {
            CommandResult::success("chat", format!("session {session_id} ended after {turns} turn(s)"))
        }
        Err(failure) => CommandResult::from_failure("chat", failure),
    }
}

fn io_failure(error: io::Error) -> Failure {
    ("terminal_io", error.to_string(), 3u8)
}
