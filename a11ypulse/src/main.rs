mod app;
mod core;
mod engine;
mod ipc;
mod multiplexer;
mod platform;
mod process;
mod scheduler;
mod telemetry;
#[cfg(windows)]
mod win32;

use anyhow::{bail, Result};
use argh::FromArgs;
use ipc::IpcClient;
use tracing_subscriber::EnvFilter;

use a11ypulse_ipc::{Command, EventFilter, FeatureFamily, Response, StatusInfo};

use crate::core::Config;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// a11ypulse - accessibility feature usage telemetry
#[derive(FromArgs)]
struct Cli {
    #[argh(subcommand)]
    command: Option<SubCommand>,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum SubCommand {
    Start(StartCmd),
    Version(VersionCmd),
    Status(StatusCmd),
    Subscribe(SubscribeCmd),
    Quit(QuitCmd),
}

/// Start the a11ypulse daemon
#[derive(FromArgs)]
#[argh(subcommand, name = "start")]
struct StartCmd {}

/// Show version information
#[derive(FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCmd {}

/// Show the current baselines of every observed feature
#[derive(FromArgs)]
#[argh(subcommand, name = "status")]
struct StatusCmd {
    /// print as JSON
    #[argh(switch)]
    json: bool,
}

/// Stream telemetry events as JSON lines
#[derive(FromArgs)]
#[argh(subcommand, name = "subscribe")]
struct SubscribeCmd {
    /// only show this feature family (repeatable): session, contrast,
    /// display, cursor, theme, color-filters, night-light, process
    #[argh(option)]
    feature: Vec<String>,
    /// send the current status first
    #[argh(switch)]
    snapshot: bool,
}

/// Stop the a11ypulse daemon
#[derive(FromArgs)]
#[argh(subcommand, name = "quit")]
struct QuitCmd {}

fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    match cli.command {
        None => {
            // No subcommand - show help (simulate --help)
            let args: Vec<&str> = vec!["a11ypulse", "--help"];
            match Cli::from_args(&args[..1], &args[1..]) {
                Ok(_) => {}
                Err(e) => {
                    println!("{}", e.output);
                }
            }
            Ok(())
        }
        Some(SubCommand::Start(_)) => {
            // Start daemon
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .init();

            tracing::info!("a11ypulse {} starting", VERSION);
            let config = Config::load()?;
            app::App::run(config)
        }
        Some(SubCommand::Version(_)) => {
            println!("a11ypulse {}", VERSION);
            Ok(())
        }
        Some(SubCommand::Subscribe(cmd)) => {
            let config = Config::load()?;
            let filter = parse_filter(&cmd.feature)?;
            ipc::subscribe_and_print(&config.event_addr, cmd.snapshot, filter)
        }
        Some(subcmd) => run_cli(subcmd),
    }
}

fn run_cli(subcmd: SubCommand) -> Result<()> {
    let (cmd, json) = match subcmd {
        SubCommand::Status(cmd) => (Command::Status, cmd.json),
        SubCommand::Quit(_) => (Command::Quit, false),
        SubCommand::Start(_) | SubCommand::Version(_) | SubCommand::Subscribe(_) => {
            unreachable!("handled in main")
        }
    };

    let config = Config::load()?;
    let mut client = IpcClient::connect(&config.control_addr)?;
    let response = client.send(&cmd)?;

    match response {
        Response::Ok => {}
        Response::Pong { version } => println!("a11ypulse {}", version),
        Response::Error { message } => {
            eprintln!("Error: {}", message);
            std::process::exit(1);
        }
        Response::Status { status } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
    }

    Ok(())
}

fn parse_filter(features: &[String]) -> Result<EventFilter> {
    let mut families = Vec::with_capacity(features.len());
    for feature in features {
        match FeatureFamily::parse(feature) {
            Some(family) => families.push(family),
            None => bail!(
                "Unknown feature: {} (use session, contrast, display, cursor, theme, \
                 color-filters, night-light, process)",
                feature
            ),
        }
    }
    Ok(EventFilter::only(families))
}

fn on_off(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "on",
        Some(false) => "off",
        None => "unknown",
    }
}

fn print_status(status: &StatusInfo) {
    println!("High contrast: {}", on_off(status.high_contrast));
    println!("Color filters: {}", on_off(status.color_filters));
    println!("Night light: {}", on_off(status.night_light));
    match status.cursor_size {
        Some(size) => println!(
            "Cursor size: {}{}",
            size,
            if status.cursor_debounce_active {
                " (settling)"
            } else {
                ""
            }
        ),
        None => println!("Cursor size: unknown"),
    }
    for display in &status.displays {
        println!("Display {}: {}%", display.adapter, display.scale_percent);
    }
    if let Some(theme) = status.dark_theme.first() {
        println!(
            "Dark theme: apps {}, system {}",
            on_off(theme.apps_dark),
            on_off(theme.system_dark)
        );
    }
    println!("Watched keys: {}", status.watched_keys.len());
    if !status.running_processes.is_empty() {
        println!("Running: {}", status.running_processes.join(", "));
    }
}
