use std::io::Write;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tether_client::{ApiClient, ClientConfig, ClientError, RecoveryOutcome, TaskApi, TaskSession};
use tether_core::{
    map_steps, template_for, Interaction, Step, StepStatus, StoreEvent, TaskState, TaskStatus,
};
use tether_observability::{init_logging, redact_text};
use tether_wire::{
    ChatPlanningRequest, InputType, InteractionReply, PaperToCodeRequest, PendingInteraction,
    RemoteStatus, ReplyAction, StartRequest, StreamEndpoint, TaskStatusResponse, WorkflowKind,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Console for tether workflow tasks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Start {
        #[command(subcommand)]
        workflow: StartWorkflow,
    },
    Watch,
    Attach {
        task_id: String,
        #[arg(long)]
        workflow: WorkflowKind,
    },
    Status {
        task_id: Option<String>,
    },
    Active,
    Recent {
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    Cancel,
    Respond {
        #[arg(long)]
        action: String,
        #[arg(long)]
        data: Option<String>,
    },
    Skip,
}

#[derive(Subcommand, Debug)]
enum StartWorkflow {
    PaperToCode {
        input: String,
        #[arg(long)]
        url: bool,
        #[arg(long)]
        index: bool,
    },
    ChatPlanning {
        requirements: String,
        #[arg(long)]
        index: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ClientConfig::from_env()?;
    let (_log_guard, log_info) = init_logging("console", &config.state.logs_dir, 14)?;
    info!("console logging initialized: {:?}", log_info);
    if !config.api_token.is_empty() {
        debug!("api token loaded: {}", redact_text(&config.api_token));
    }

    match cli.command {
        Command::Start { workflow } => {
            let request = build_start_request(workflow);
            let session = TaskSession::new(config)?;
            let started = session.start(request).await?;
            println!("started {}", started.task_id);
            follow(&session).await?;
            session.shutdown().await;
        }
        Command::Watch => {
            let session = TaskSession::new(config)?;
            match session.resume().await {
                RecoveryOutcome::Resumed { task_id } => {
                    println!("reattached to {task_id}");
                    follow(&session).await?;
                }
                RecoveryOutcome::Finalized { status } => {
                    println!("the tracked task settled while this console was away: {status}");
                    print_outcome(&session.snapshot().await);
                }
                RecoveryOutcome::Cleared => {
                    println!("the tracked task is gone on the server; local state was cleared");
                }
                RecoveryOutcome::Idle => {
                    println!("no task to watch; start one with `tether start`");
                }
            }
            session.shutdown().await;
        }
        Command::Attach { task_id, workflow } => {
            let session = TaskSession::new(config)?;
            match session.attach(&task_id, workflow).await {
                Ok(()) => {
                    let state = session.snapshot().await;
                    if state.status.is_active() {
                        println!("attached to {task_id}");
                        follow(&session).await?;
                    } else if state.status == TaskStatus::Idle {
                        println!("the server returned an unusable status for {task_id}");
                    } else {
                        println!("task {task_id} already settled: {}", state.status);
                        print_outcome(&state);
                    }
                }
                Err(ClientError::TaskNotFound) => {
                    println!("the server does not know task {task_id}");
                }
                Err(err) => return Err(err.into()),
            }
            session.shutdown().await;
        }
        Command::Status { task_id } => match task_id {
            Some(task_id) => {
                let api = ApiClient::new(&config)?;
                match api.fetch_status(&task_id).await {
                    Ok(status) => print_status(&status),
                    Err(ClientError::TaskNotFound) => {
                        println!("the server does not know task {task_id}");
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            // Only recovery may read the persisted projection, so the
            // tracked-task default goes through resume.
            None => {
                let session = TaskSession::new(config)?;
                match session.resume().await {
                    RecoveryOutcome::Resumed { task_id } => {
                        let status = session.api().fetch_status(&task_id).await?;
                        print_status(&status);
                    }
                    RecoveryOutcome::Finalized { status } => {
                        println!("task settled: {status}");
                        print_outcome(&session.snapshot().await);
                    }
                    RecoveryOutcome::Cleared => {
                        println!("the tracked task is gone on the server; local state was cleared");
                    }
                    RecoveryOutcome::Idle => {
                        println!("no tracked task; pass a task id or start one with `tether start`");
                    }
                }
                session.shutdown().await;
            }
        },
        Command::Active => {
            let api = ApiClient::new(&config)?;
            let tasks = api.active_tasks().await?;
            if tasks.is_empty() {
                println!("no active tasks");
            }
            for task in tasks {
                print_task_row(&task.task_id, task.status, task.progress, &task.message);
            }
        }
        Command::Recent { limit } => {
            let api = ApiClient::new(&config)?;
            let tasks = api.recent_tasks(limit).await?;
            if tasks.is_empty() {
                println!("no recent tasks");
            }
            for task in tasks {
                print_task_row(&task.task_id, task.status, task.progress, &task.message);
            }
        }
        Command::Cancel => {
            let session = TaskSession::new(config)?;
            match session.resume().await {
                RecoveryOutcome::Resumed { task_id } => {
                    let accepted = session.cancel().await?;
                    if accepted {
                        println!("cancel accepted for {task_id}; local state cleared");
                    } else {
                        println!("server declined the cancel for {task_id}; cleared local state anyway");
                    }
                }
                RecoveryOutcome::Finalized { status } => {
                    println!("nothing to cancel; the last task already settled as {status}");
                }
                RecoveryOutcome::Cleared => {
                    println!("nothing to cancel; the tracked task is gone on the server");
                }
                RecoveryOutcome::Idle => println!("nothing to cancel"),
            }
            session.shutdown().await;
        }
        Command::Respond { action, data } => {
            let action = parse_action(&action)?;
            let mut reply = InteractionReply::new(action);
            if let Some(raw) = data {
                reply = reply.with_data(parse_data(&raw)?);
            }
            let session = TaskSession::new(config)?;
            match session.resume().await {
                RecoveryOutcome::Resumed { .. } => {
                    let ack = session.respond(reply).await?;
                    println!("response sent ({})", ack.action);
                }
                _ => println!("no running task to respond to"),
            }
            session.shutdown().await;
        }
        Command::Skip => {
            let session = TaskSession::new(config)?;
            match session.resume().await {
                RecoveryOutcome::Resumed { .. } => {
                    session.skip().await?;
                    println!("interaction skipped");
                }
                _ => println!("no running task to respond to"),
            }
            session.shutdown().await;
        }
    }

    Ok(())
}

/// Print store events until the task settles or every channel gives up.
async fn follow(session: &TaskSession) -> anyhow::Result<()> {
    let mut events = session.events();

    let snapshot = session.snapshot().await;
    let template = snapshot.kind.map(template_for);
    let steps = snapshot.steps();
    let mut active_step = active_step_id(&steps);
    print_steps(&steps);

    // A prompt restored by recovery was requested before this subscription
    // existed, so it never arrives as an event.
    if let Some(interaction) = snapshot.interaction {
        prompt_and_respond(session, &interaction).await?;
    }

    let mut workflow_down = false;
    let mut code_down = false;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event subscription lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event {
            StoreEvent::ProgressAdvanced { progress, message } => {
                if let Some(template) = template {
                    let steps = map_steps(template, progress);
                    if let Some(step) = steps.iter().find(|s| s.status == StepStatus::Active) {
                        if active_step.as_deref() != Some(step.id.as_str()) {
                            active_step = Some(step.id.clone());
                            println!("step: {}", step.title);
                        }
                    }
                }
                println!("[{progress:>3}%] {message}");
            }
            StoreEvent::StatusChanged { status } => println!("status: {status}"),
            StoreEvent::InteractionRequested { interaction } => {
                prompt_and_respond(session, &interaction).await?;
            }
            StoreEvent::TaskCompleted { .. } => {
                println!("task completed");
                print_outcome(&session.snapshot().await);
                break;
            }
            StoreEvent::TaskFailed { error } => {
                println!("task failed: {error}");
                print_steps(&session.snapshot().await.steps());
                break;
            }
            StoreEvent::TaskReset => {
                println!("the server no longer knows this task; local state was cleared");
                break;
            }
            StoreEvent::FileOpened { filename } => println!("streaming {filename}"),
            StoreEvent::FileClosed { filename } => {
                if let Some(filename) = filename {
                    println!("finished {filename}");
                }
            }
            StoreEvent::ChannelConnected { endpoint } => {
                match endpoint {
                    StreamEndpoint::Workflow => workflow_down = false,
                    StreamEndpoint::CodeStream => code_down = false,
                }
                println!("{} channel connected", endpoint.as_str());
            }
            StoreEvent::ChannelLost { endpoint, attempt } => {
                println!("{} channel lost; reconnect attempt {attempt}", endpoint.as_str());
            }
            StoreEvent::ChannelDown { endpoint } => {
                match endpoint {
                    StreamEndpoint::Workflow => workflow_down = true,
                    StreamEndpoint::CodeStream => code_down = true,
                }
                println!("{} channel is down; retries exhausted", endpoint.as_str());
                if workflow_down && code_down {
                    println!("every channel is down; run `tether watch` once the server is back");
                    break;
                }
            }
            StoreEvent::TaskStarted { .. }
            | StoreEvent::TaskRecovered { .. }
            | StoreEvent::InteractionCleared
            | StoreEvent::ChunkAppended { .. } => {}
        }
    }
    Ok(())
}

async fn prompt_and_respond(session: &TaskSession, interaction: &Interaction) -> anyhow::Result<()> {
    println!();
    println!("input requested: {}", interaction.label());
    if !interaction.description.is_empty() {
        println!("{}", interaction.description);
    }
    if !interaction.options.is_null() {
        println!("options: {}", interaction.options);
    }
    if interaction.required {
        println!("reply with free text, or `confirm` to accept");
    } else {
        println!("reply with free text, `confirm` to accept, or `skip` to pass");
    }
    print!("> ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    let read = BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    if read == 0 {
        println!("stdin closed; answer later with `tether respond`");
        return Ok(());
    }

    match session.respond(reply_for_line(&line)).await {
        Ok(ack) => println!("response sent ({})", ack.action),
        Err(err) => println!("response failed: {err}; retry with `tether respond`"),
    }
    Ok(())
}

/// An empty line confirms, `skip` declines, anything else is submitted as
/// free text under the `response` key.
fn reply_for_line(line: &str) -> InteractionReply {
    let trimmed = line.trim();
    match trimmed.to_lowercase().as_str() {
        "" | "confirm" | "y" | "yes" => InteractionReply::new(ReplyAction::Confirm),
        "skip" => InteractionReply::skip(),
        _ => {
            let mut data = Map::new();
            data.insert("response".to_string(), Value::String(trimmed.to_string()));
            InteractionReply::new(ReplyAction::Submit).with_data(data)
        }
    }
}

fn parse_action(raw: &str) -> anyhow::Result<ReplyAction> {
    match raw.trim().to_lowercase().as_str() {
        "submit" => Ok(ReplyAction::Submit),
        "confirm" => Ok(ReplyAction::Confirm),
        "modify" => Ok(ReplyAction::Modify),
        "skip" => Ok(ReplyAction::Skip),
        "cancel" => Ok(ReplyAction::Cancel),
        other => anyhow::bail!(
            "unknown action `{other}`; expected submit, confirm, modify, skip, or cancel"
        ),
    }
}

fn parse_data(raw: &str) -> anyhow::Result<Map<String, Value>> {
    let value: Value = serde_json::from_str(raw).context("`--data` is not valid JSON")?;
    match value {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("`--data` must be a JSON object"),
    }
}

fn build_start_request(workflow: StartWorkflow) -> StartRequest {
    match workflow {
        StartWorkflow::PaperToCode { input, url, index } => {
            let input_type = if url || looks_like_url(&input) {
                InputType::Url
            } else {
                InputType::File
            };
            StartRequest::PaperToCode(PaperToCodeRequest {
                input_source: input,
                input_type,
                enable_indexing: index,
            })
        }
        StartWorkflow::ChatPlanning {
            requirements,
            index,
        } => StartRequest::ChatPlanning(ChatPlanningRequest {
            requirements,
            enable_indexing: index,
        }),
    }
}

fn looks_like_url(input: &str) -> bool {
    let trimmed = input.trim();
    trimmed.starts_with("http://") || trimmed.starts_with("https://")
}

fn interaction_label(interaction: &PendingInteraction) -> &str {
    interaction
        .title
        .as_deref()
        .filter(|title| !title.is_empty())
        .or_else(|| interaction.kind.as_deref().filter(|kind| !kind.is_empty()))
        .unwrap_or("input requested")
}

fn print_status(status: &TaskStatusResponse) {
    println!("task      {}", status.task_id);
    println!("status    {}", status.status.as_str());
    println!("progress  {}%", status.progress);
    if !status.message.is_empty() {
        println!("message   {}", status.message);
    }
    if let Some(error) = &status.error {
        println!("error     {error}");
    }
    if let Some(interaction) = &status.pending_interaction {
        println!("waiting   {}", interaction_label(interaction));
    }
    if let Some(started) = &status.started_at {
        println!("started   {started}");
    }
    if let Some(completed) = &status.completed_at {
        println!("completed {completed}");
    }
    if let Some(result) = &status.result {
        print_result_value(result);
    }
}

fn print_task_row(task_id: &str, status: RemoteStatus, progress: u8, message: &str) {
    println!("{task_id}  {:<17}  {:>3}%  {message}", status.as_str(), progress);
}

fn active_step_id(steps: &[Step]) -> Option<String> {
    steps
        .iter()
        .find(|step| step.status == StepStatus::Active)
        .map(|step| step.id.clone())
}

fn print_steps(steps: &[Step]) {
    for step in steps {
        let marker = match step.status {
            StepStatus::Completed => "x",
            StepStatus::Active => ">",
            StepStatus::Error => "!",
            StepStatus::Pending => " ",
        };
        println!("  [{marker}] {}", step.title);
    }
}

fn print_outcome(state: &TaskState) {
    if let Some(error) = &state.error {
        println!("error: {error}");
    }
    if let Some(result) = &state.result {
        print_result_value(result);
    }
    let stream = &state.stream;
    if !stream.is_empty() {
        let files = stream.files.len() + usize::from(stream.open.is_some());
        println!("streamed {files} file(s), {} bytes", stream.total_bytes());
    }
}

fn print_result_value(result: &Value) {
    match serde_json::to_string_pretty(result) {
        Ok(pretty) => println!("result:\n{pretty}"),
        Err(_) => println!("result: {result}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_action_accepts_known_actions_case_insensitive() {
        assert_eq!(parse_action(" Confirm ").expect("action"), ReplyAction::Confirm);
        assert_eq!(parse_action("submit").expect("action"), ReplyAction::Submit);
    }

    #[test]
    fn parse_action_rejects_unknown_action() {
        let err = parse_action("approve").unwrap_err();
        assert!(err.to_string().contains("unknown action `approve`"));
    }

    #[test]
    fn parse_data_requires_a_json_object() {
        let data = parse_data(r#"{"notes":"tighten the loop"}"#).expect("object");
        assert_eq!(data["notes"], "tighten the loop");
        assert!(parse_data("[1,2]").is_err());
        assert!(parse_data("not json").is_err());
    }

    #[test]
    fn paper_input_type_follows_url_detection() {
        let request = build_start_request(StartWorkflow::PaperToCode {
            input: "https://arxiv.org/abs/2301.00001".to_string(),
            url: false,
            index: false,
        });
        match request {
            StartRequest::PaperToCode(body) => assert_eq!(body.input_type, InputType::Url),
            _ => panic!("wrong request kind"),
        }

        let request = build_start_request(StartWorkflow::PaperToCode {
            input: "paper.pdf".to_string(),
            url: false,
            index: true,
        });
        match request {
            StartRequest::PaperToCode(body) => {
                assert_eq!(body.input_type, InputType::File);
                assert!(body.enable_indexing);
            }
            _ => panic!("wrong request kind"),
        }
    }

    #[test]
    fn reply_line_maps_to_actions() {
        assert_eq!(reply_for_line("\n").action, ReplyAction::Confirm);
        assert_eq!(reply_for_line("yes\n").action, ReplyAction::Confirm);

        let skip = reply_for_line(" skip \n");
        assert_eq!(skip.action, ReplyAction::Skip);
        assert!(skip.skipped);

        let submit = reply_for_line("use a smaller model\n");
        assert_eq!(submit.action, ReplyAction::Submit);
        assert_eq!(submit.data["response"], "use a smaller model");
    }

    #[test]
    fn active_step_id_tracks_the_running_row() {
        let steps = map_steps(template_for(WorkflowKind::PaperToCode), 35);
        assert_eq!(active_step_id(&steps).as_deref(), Some("plan"));

        let done = map_steps(template_for(WorkflowKind::PaperToCode), 100);
        assert_eq!(active_step_id(&done), None);
    }

    #[test]
    fn interaction_label_prefers_title_then_kind() {
        let mut pending = PendingInteraction {
            kind: Some("plan_review".to_string()),
            title: Some("Review the plan".to_string()),
            description: None,
            data: None,
            options: None,
            required: None,
        };
        assert_eq!(interaction_label(&pending), "Review the plan");

        pending.title = Some(String::new());
        assert_eq!(interaction_label(&pending), "plan_review");

        pending.kind = None;
        assert_eq!(interaction_label(&pending), "input requested");
    }
}
