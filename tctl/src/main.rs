use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use twine::colour::color;
use twine::config::DEFAULT_CONTROL_ADDR;
use twine::ipc::{send_ipc_request, IpcCommand, IpcRequest, IpcResponse, ServiceSnapshot};

#[derive(Parser)]
#[command(name = "tctl")]
#[command(about = "Trellis Control CLI", long_about = None)]
struct Cli {
    /// Address of the trellisd control endpoint
    #[arg(long, default_value = DEFAULT_CONTROL_ADDR)]
    addr: String,

    /// Seconds to wait for a reply; 0 waits indefinitely
    #[arg(long, default_value_t = 0)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start services in start order (all when none are named)
    Start { names: Vec<String> },
    /// Stop services in stop order (all when none are named)
    Stop { names: Vec<String> },
    /// Stop, then start again
    Restart { names: Vec<String> },
    /// Show every monitored service
    Status,
    /// Stop the daemon; services are left as they are
    Shutdown,
}

fn main() {
    if let Err(e) = run(Cli::parse()) {
        eprintln!("tctl: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let command = match cli.command {
        Commands::Start { names } => IpcCommand::Start(names),
        Commands::Stop { names } => IpcCommand::Stop(names),
        Commands::Restart { names } => IpcCommand::Restart(names),
        Commands::Status => IpcCommand::Status,
        Commands::Shutdown => IpcCommand::Shutdown,
    };
    let is_status = command == IpcCommand::Status;

    let read_timeout = (cli.timeout > 0).then(|| Duration::from_secs(cli.timeout));
    let response = send_ipc_request(&cli.addr, &IpcRequest { command }, read_timeout)
        .with_context(|| format!("Failed to reach trellisd at {}", cli.addr))?;

    if !response.success {
        bail!("Command failed: {}", response.message);
    }

    if is_status {
        print_status(&response)?;
    } else {
        println!("Command succeeded: {}", response.message);
    }
    Ok(())
}

fn print_status(response: &IpcResponse) -> Result<()> {
    let rows: Vec<ServiceSnapshot> = match &response.data {
        Some(data) => serde_json::from_value(data.clone()).context("Malformed status reply")?,
        None => Vec::new(),
    };

    if rows.is_empty() {
        println!("No services are being monitored.");
        return Ok(());
    }

    let width = rows.iter().map(|r| r.name.len()).max().unwrap_or(0).max(4);
    println!(
        "{}",
        color::paint(color::BOLD, &format!("{:<width$}  {:<24}  STATUS", "NAME", "SERVICE"))
    );
    for row in rows {
        let mut flags = Vec::new();
        if row.is_restarting {
            flags.push("restarting");
        }
        if !row.can_toggle {
            flags.push("busy");
        }

        println!(
            "{:<width$}  {:<24}  {}{}",
            row.name,
            row.service_name,
            color::color_status(row.status),
            if flags.is_empty() {
                String::new()
            } else {
                color::paint(color::DIM, &format!(" ({})", flags.join(", ")))
            }
        );
    }
    Ok(())
}
