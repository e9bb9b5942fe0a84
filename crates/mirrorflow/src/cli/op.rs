//! Operation commands - run and inspect mirroring tool operations
//!
//! `op start` runs in the foreground: it streams the tool's output and returns
//! once the operation reaches a terminal status. Ctrl-C stops the operation.
//! The other commands work on records, so they also see operations started
//! by other `mirrorflow` processes.

use crate::cli::context::AppContext;
use crate::cli::error::HelpfulError;
use crate::cli::output::{
    format_duration, format_size, format_time_ago, print_json, print_table_colored,
    status_color,
};
use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;
use mirrorflow_ops::{LogChunk, LogTail, ManifestSummary, Operation, OpsError, Supervisor};
use mirrorflow_protocol::api::LogChunkEvent;
use mirrorflow_protocol::{OperationId, OperationStatus};
use serde::Serialize;
use std::io::Write;
use std::time::Duration;

const EXIT_POLL: Duration = Duration::from_millis(100);

#[derive(Subcommand, Debug)]
pub enum OpAction {
    /// Run the mirroring tool with a stored configuration
    Start {
        /// Operation name
        name: String,

        /// Configuration name under the configs directory
        config: String,

        /// Output the final record as JSON instead of streaming the log
        #[arg(long)]
        json: bool,
    },

    /// Stop a running operation
    Stop {
        id: OperationId,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete an operation record and its log
    Delete {
        id: OperationId,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List operations, newest first
    List {
        /// Only operations with this status
        #[arg(long)]
        status: Option<OperationStatus>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one operation with measured details
    Show {
        id: OperationId,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print an operation's log
    Logs {
        id: OperationId,

        /// Keep printing output until the operation finishes
        #[arg(short, long)]
        follow: bool,

        /// Output log chunks as JSON lines
        #[arg(long)]
        json: bool,
    },
}

impl OpAction {
    pub fn wants_json(&self) -> bool {
        match self {
            OpAction::Start { json, .. }
            | OpAction::Stop { json, .. }
            | OpAction::Delete { json, .. }
            | OpAction::List { json, .. }
            | OpAction::Show { json, .. }
            | OpAction::Logs { json, .. } => *json,
        }
    }
}

/// Attach CLI suggestions to supervisor errors.
fn helpful<T>(result: mirrorflow_ops::Result<T>) -> Result<T> {
    result.map_err(|e| HelpfulError::from(e).into())
}

pub async fn run(ctx: &AppContext, action: OpAction) -> Result<()> {
    let sup = ctx.supervisor()?;
    match action {
        OpAction::Start { name, config, json } => start(ctx, &sup, &name, &config, json).await,
        OpAction::Stop { id, json } => {
            let op = helpful(sup.stop(&id).await)?;
            if json {
                return print_json(&op);
            }
            println!("Operation {} is {}", op.id, op.status);
            Ok(())
        }
        OpAction::Delete { id, json } => {
            let deleted = helpful(sup.delete(&id).await)?;
            if json {
                return print_json(&DeleteOutput { id, deleted });
            }
            if deleted {
                println!("Deleted operation {}", id);
            } else {
                println!("Operation {} does not exist (nothing to delete)", id);
            }
            Ok(())
        }
        OpAction::List { status, json } => list(&sup, status, json),
        OpAction::Show { id, json } => show(&sup, &id, json).await,
        OpAction::Logs { id, follow, json } => logs(&sup, &id, follow, json).await,
    }
}

#[derive(Debug, Serialize)]
struct DeleteOutput {
    id: OperationId,
    deleted: bool,
}

async fn start(
    ctx: &AppContext,
    sup: &Supervisor,
    name: &str,
    config: &str,
    json: bool,
) -> Result<()> {
    let op = match sup.start(name, config).await {
        Ok(op) => op,
        Err(OpsError::NotFound {
            kind: "Configuration",
            ..
        }) => return Err(HelpfulError::config_not_found(config, &ctx.layout).into()),
        Err(e) => return Err(HelpfulError::from(e).into()),
    };

    if !json {
        eprintln!(
            "Started operation {} '{}' (Ctrl-C to stop)",
            op.id, op.name
        );
        stream_until_done(sup, &op).await?;
    }
    let finished = wait_for_exit(sup, &op.id).await?;

    if json {
        print_json(&finished)?;
    } else {
        print_summary(&finished);
    }
    match finished.status {
        OperationStatus::Failed => Err(HelpfulError::operation_failed(
            finished.id.as_str(),
            finished.error_message.as_deref(),
        )
        .into()),
        _ => Ok(()),
    }
}

async fn stream_until_done(sup: &Supervisor, op: &Operation) -> Result<()> {
    let mut stream = match sup.open_stream(&op.id) {
        Ok(stream) => stream,
        // Already finished: everything is in the log.
        Err(OpsError::NotRunning(_)) => {
            print!("{}", helpful(sup.fetch_full(&op.id).await)?);
            return Ok(());
        }
        Err(e) => return Err(HelpfulError::from(e).into()),
    };

    let mut stopping = false;
    loop {
        tokio::select! {
            chunk = stream.next_chunk() => match chunk {
                Some(chunk) => emit_chunk(&chunk?, false)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !stopping => {
                stopping = true;
                eprintln!("Stopping operation {}...", op.id);
                helpful(sup.stop(&op.id).await)?;
            }
        }
    }
    Ok(())
}

/// Wait until the tool process is reaped and its record is final.
async fn wait_for_exit(sup: &Supervisor, id: &OperationId) -> Result<Operation> {
    let mut stopping = false;
    loop {
        if sup.running_count() == 0 {
            return helpful(sup.get(id));
        }
        tokio::select! {
            _ = tokio::time::sleep(EXIT_POLL) => {}
            _ = tokio::signal::ctrl_c(), if !stopping => {
                stopping = true;
                helpful(sup.stop(id).await)?;
            }
        }
    }
}

fn emit_chunk(chunk: &LogChunk, json: bool) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    if json {
        let event = LogChunkEvent {
            offset: chunk.offset,
            data: chunk.data.clone(),
        };
        writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
    } else {
        write!(stdout, "{}", chunk.data)?;
    }
    stdout.flush()?;
    Ok(())
}

fn print_summary(op: &Operation) {
    let duration = op
        .duration_seconds
        .map(format_duration)
        .unwrap_or_else(|| "-".to_string());
    match op.status {
        OperationStatus::Success => eprintln!("Operation {} succeeded in {}", op.id, duration),
        OperationStatus::Stopped => eprintln!("Operation {} stopped after {}", op.id, duration),
        OperationStatus::Failed => eprintln!(
            "Operation {} failed after {}: {}",
            op.id,
            duration,
            op.error_message.as_deref().unwrap_or("")
        ),
        OperationStatus::Running => eprintln!("Operation {} is still running", op.id),
    }
}

fn list(sup: &Supervisor, status: Option<OperationStatus>, json: bool) -> Result<()> {
    let ops = helpful(sup.list(status))?;
    if json {
        return print_json(&ops);
    }
    if ops.is_empty() {
        println!("No operations");
        return Ok(());
    }

    let now = Utc::now();
    let rows = ops
        .iter()
        .map(|op| {
            vec![
                (op.id.to_string(), None),
                (op.name.clone(), None),
                (op.config_ref.clone(), None),
                (op.status.to_string(), Some(status_color(op.status))),
                (format_time_ago(op.started_at, now), None),
                (format_duration(op.elapsed_seconds(now)), None),
                (op.error_message.clone().unwrap_or_default(), None),
            ]
        })
        .collect();
    print_table_colored(
        &["ID", "NAME", "CONFIG", "STATUS", "STARTED", "DURATION", "ERROR"],
        rows,
    );
    Ok(())
}

async fn show(sup: &Supervisor, id: &OperationId, json: bool) -> Result<()> {
    let details = helpful(sup.details(id).await)?;
    if json {
        return print_json(&details);
    }

    let op = &details.operation;
    println!("Operation:   {}", op.id);
    println!("Name:        {}", op.name);
    println!("Config:      {}", op.config_ref);
    println!("Status:      {}", op.status);
    println!("Started:     {}", op.started_at.to_rfc3339());
    if let Some(completed) = op.completed_at {
        println!("Completed:   {}", completed.to_rfc3339());
    }
    println!("Duration:    {}", format_duration(details.elapsed_seconds));
    if let Some(code) = op.exit_code {
        println!("Exit code:   {}", code);
    }
    if let Some(message) = &op.error_message {
        println!("Error:       {}", message);
    }
    println!(
        "Log:         {} ({})",
        op.log_path.display(),
        format_size(details.log_size_bytes)
    );
    if details.destination.exists {
        println!(
            "Destination: {} ({} files, {})",
            op.destination.display(),
            details.destination.file_count,
            format_size(details.destination.total_bytes)
        );
    } else {
        println!("Destination: {} (missing)", op.destination.display());
    }
    match &details.manifest {
        ManifestSummary::Unavailable { reason } => println!("Manifest:    unavailable ({})", reason),
    }
    Ok(())
}

async fn logs(sup: &Supervisor, id: &OperationId, follow: bool, json: bool) -> Result<()> {
    let op = helpful(sup.get(id))?;
    if !follow || !op.is_running() {
        let text = helpful(sup.fetch_full(id).await)?;
        return emit_chunk(&LogChunk { offset: 0, data: text }, json);
    }

    // The process may belong to another supervisor, so finish is detected
    // from the record rather than a live status channel.
    let poll = sup.poll_interval();
    let mut stream = LogTail::new(&op.log_path, poll).stream(None);
    loop {
        let finished = helpful(sup.get(id))?.status.is_terminal();
        while let Some(chunk) = stream.poll_once(finished).await? {
            emit_chunk(&chunk, json)?;
        }
        if finished {
            return Ok(());
        }
        tokio::time::sleep(poll).await;
    }
}
