pub mod application;
pub mod domain;
pub mod infrastructure;

use application::commands::{
    build_controller, create_stopwatch_impl, create_timer_impl, init_impl, login_impl,
    logout_impl, status_impl, stop_impl, watch_impl, AppState,
};
use application::controller::{NotificationLevel, TimerEvent, TimerSnapshot};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "studyroom-timer", version, about = "Study room session timer", long_about = None)]
#[command(arg_required_else_help(true))]
pub struct Cli {
    #[arg(long, global = true, help = "Workspace directory (defaults to the current directory)")]
    workspace: Option<PathBuf>,
    #[arg(long, global = true, help = "Room id, overrides the configured one")]
    room: Option<String>,
    #[arg(long, global = true, help = "Print results as JSON")]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create the workspace and save api settings")]
    Init {
        #[arg(long)]
        api_url: Option<String>,
    },
    #[command(about = "Store the api token in the system keyring", arg_required_else_help = true)]
    Login {
        #[arg(long)]
        token: String,
    },
    #[command(about = "Remove the stored api token")]
    Logout,
    #[command(about = "Show the current study session")]
    Status,
    #[command(about = "Start or resume the timer and follow it until the session completes")]
    Start,
    #[command(about = "End the running interval")]
    Stop,
    #[command(about = "Create a pomodoro timer setting for the room")]
    CreateTimer {
        #[arg(long, default_value_t = 25)]
        focus: u32,
        #[arg(long, default_value_t = 5)]
        short_break: u32,
        #[arg(long, default_value_t = 15)]
        long_break: u32,
        #[arg(long, default_value_t = 4)]
        cycles: u32,
    },
    #[command(about = "Create a stopwatch timer setting for the room")]
    CreateStopwatch,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    execute(cli).await
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    let workspace_root = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let state = AppState::new(workspace_root)?;
    let json = cli.json;

    match cli.command {
        Commands::Init { api_url } => {
            let response = init_impl(&state, api_url, cli.room)
                .map_err(|error| anyhow::anyhow!(state.command_error("init", &error)))?;
            if json {
                print_json(&response)?;
            } else {
                println!("workspace: {}", response.workspace_root);
                println!("api:       {}", response.api_base_url);
                println!("room:      {}", response.room_id.as_deref().unwrap_or("-"));
                println!("token:     {}", if response.has_token { "stored" } else { "missing" });
            }
        }
        Commands::Login { token } => {
            login_impl(&state, token)
                .map_err(|error| anyhow::anyhow!(state.command_error("login", &error)))?;
            println!("api token stored");
        }
        Commands::Logout => {
            logout_impl(&state)
                .map_err(|error| anyhow::anyhow!(state.command_error("logout", &error)))?;
            println!("api token removed");
        }
        Commands::Status => {
            let controller = build_controller(&state, cli.room)?;
            let snapshot = status_impl(&controller)
                .await
                .map_err(|error| anyhow::anyhow!(state.command_error("status", &error)))?;
            print_snapshot(&snapshot, json)?;
        }
        Commands::Start => {
            let controller = build_controller(&state, cli.room)?;
            let shutdown = async {
                if let Err(error) = tokio::signal::ctrl_c().await {
                    tracing::warn!(%error, "failed to listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            };
            let snapshot = watch_impl(&controller, shutdown, |event| print_event(event, json))
                .await
                .map_err(|error| anyhow::anyhow!(state.command_error("start", &error)))?;
            print_snapshot(&snapshot, json)?;
        }
        Commands::Stop => {
            let controller = build_controller(&state, cli.room)?;
            let snapshot = stop_impl(&controller)
                .await
                .map_err(|error| anyhow::anyhow!(state.command_error("stop", &error)))?;
            print_snapshot(&snapshot, json)?;
        }
        Commands::CreateTimer {
            focus,
            short_break,
            long_break,
            cycles,
        } => {
            let controller = build_controller(&state, cli.room)?;
            let snapshot = create_timer_impl(&controller, focus, short_break, long_break, cycles)
                .await
                .map_err(|error| anyhow::anyhow!(state.command_error("create_timer", &error)))?;
            print_snapshot(&snapshot, json)?;
        }
        Commands::CreateStopwatch => {
            let controller = build_controller(&state, cli.room)?;
            let snapshot = create_stopwatch_impl(&controller)
                .await
                .map_err(|error| anyhow::anyhow!(state.command_error("create_stopwatch", &error)))?;
            print_snapshot(&snapshot, json)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn print_snapshot(snapshot: &TimerSnapshot, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(snapshot);
    }
    match &snapshot.session_id {
        None => println!("no study session"),
        Some(session_id) => println!(
            "session {session_id} [{}] interval {}/{} {} {}{}",
            snapshot.phase.as_str(),
            snapshot.interval_index + 1,
            snapshot.total_intervals,
            snapshot.kind.as_str(),
            snapshot.display,
            if snapshot.active { " (running)" } else { "" }
        ),
    }
    Ok(())
}

fn print_event(event: &TimerEvent, json: bool) {
    if json {
        return;
    }
    match event {
        TimerEvent::Tick { countdown } => println!("{countdown}"),
        TimerEvent::IntervalAdvanced { index, kind, countdown } => {
            println!("interval {} ({}) {countdown}", index + 1, kind.as_str());
        }
        TimerEvent::SessionCompleted { session_id } => println!("session {session_id} complete"),
        TimerEvent::Notification { level, message } => match level {
            NotificationLevel::Info => println!("{message}"),
            NotificationLevel::Error => eprintln!("error: {message}"),
        },
        TimerEvent::PingSent { .. } => {}
    }
}
