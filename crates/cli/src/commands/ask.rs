use shopdesk_agent::{Reply, ReplyMessage};
use shopdesk_core::plan::PlanStatus;

use crate::commands::{agent_runtime, prepare, CommandResult, Failure};

/// One turn against the configured database. With `auto_confirm` a plan the turn
/// proposes is approved and executed straight away.
pub fn run(text: &str, auto_confirm: bool) -> CommandResult {
    let (config, runtime) = match prepare("ask") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let (pool, agent) = agent_runtime(&config).await?;
        let session_id = agent.open_session(None).await;

        let first = agent.handle_message(&session_id, text).await.map_err(turn_failure)?;
        let mut replies = vec![first];
        if auto_confirm {
            if let Some(plan_id) = pending_plan(&replies[0]) {
                let confirmed =
                    agent.handle_confirmation(&session_id, &plan_id, true).await.map_err(turn_failure)?;
                replies.push(confirmed);
            }
        }

        pool.close().await;
        Ok::<Vec<Reply>, Failure>(replies)
    });

    let replies = match result {
        Ok(replies) => replies,
        Err(failure) => return CommandResult::from_failure("ask", failure),
    };

    let lines: Vec<String> = replies
        .iter()
        .map(|reply| {
            serde_json::to_string(reply).unwrap_or_else(|error| format!("{{\"error\":\"{error}\"}}"))
        })
        .collect();
    let Some(last) = replies.last() else {
        return CommandResult::success("ask", "no reply");
    };

    match incomplete_plan(last) {
        Some((status, summary)) => {
            CommandResult::failure("ask", "plan_incomplete", format!("plan {status}: {summary}"), 5)
                .with_preamble(&lines)
        }
        None if !auto_confirm && pending_plan(last).is_some() => CommandResult::success(
            "ask",
            format!("{}\n(not executed; rerun with --yes to confirm)", last.text()),
        )
        .with_preamble(&lines),
        None => CommandResult::success("ask", last.text()).with_preamble(&lines),
    }
}

fn turn_failure(error: shopdesk_core::errors::ApplicationError) -> Failure {
    ("turn_execution", error.to_string(), 5u8)
}

fn pending_plan(reply: &Reply) -> Option<String> {
    reply.messages.iter().find_map(|message| match message {
        ReplyMessage::PlanPreview { plan_id, .. } => Some(plan_id.clone()),
        _ => None,
    })
}

fn incomplete_plan(reply: &Reply) -> Option<(&'static str, String)> {
    reply.messages.iter().find_map(|message| match message {
        ReplyMessage::PlanResult { status, summary, .. } if *status != PlanStatus::Completed => {
            Some((status.as_str(), summary.clone()))
        }
        _ => None,
    })
}
