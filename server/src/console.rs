//! Line-oriented operator console on stdin.

use crate::network::ServerHandle;
use log::{error, info};
use std::io::BufRead;
use std::thread;
use tokio::runtime::Handle;

pub const HELP: &str = "\
Commands:
  start   begin the measurement window and notify all clients
  end     close the measurement window and notify all clients
  status  show session, POI and event counters
  exit    save the world state and shut down
  help, ? show this text";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start,
    End,
    Status,
    Exit,
    Help,
}

impl ConsoleCommand {
    /// `Ok(None)` for a blank line, `Err` with the input for anything unknown.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        match line.trim() {
            "" => Ok(None),
            "start" => Ok(Some(Self::Start)),
            "end" => Ok(Some(Self::End)),
            "status" => Ok(Some(Self::Status)),
            "exit" => Ok(Some(Self::Exit)),
            "help" | "?" => Ok(Some(Self::Help)),
            other => Err(other.to_string()),
        }
    }
}

/// Starts the console on its own thread.
///
/// Stdin is read with blocking I/O outside the runtime so a pending read
/// never holds up runtime shutdown; commands are executed on `runtime`.
pub fn spawn_console(
    runtime: Handle,
    handle: ServerHandle,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("console".to_string())
        .spawn(move || run_console(&runtime, &handle))
}

/// Reads commands until stdin closes, `exit` is entered or the server stops.
fn run_console(runtime: &Handle, handle: &ServerHandle) {
    println!("Type `help` for a list of commands.");

    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to read console input: {}", e);
                return;
            }
        };
        match ConsoleCommand::parse(&line) {
            Ok(Some(command)) => {
                if !runtime.block_on(execute(handle, command)) {
                    return;
                }
            }
            Ok(None) => {}
            Err(unknown) => println!("Unknown command `{}`, try `help`", unknown),
        }
    }
    info!("Console input closed");
}

/// Returns false once the console should stop reading.
async fn execute(handle: &ServerHandle, command: ConsoleCommand) -> bool {
    match command {
        ConsoleCommand::Start => match handle.start_measurement().await {
            Some(true) => println!("Measurement started"),
            Some(false) => println!("Measurement already active"),
            None => return false,
        },
        ConsoleCommand::End => match handle.end_measurement().await {
            Some(true) => println!("Measurement ended"),
            Some(false) => println!("Measurement already inactive"),
            None => return false,
        },
        ConsoleCommand::Status => match handle.stats().await {
            Some(stats) => println!(
                "sessions: {} ({} connected), pois: {}, events: {}, measuring: {}",
                stats.sessions, stats.connected, stats.pois, stats.events, stats.measuring
            ),
            None => return false,
        },
        ConsoleCommand::Exit => {
            handle.shutdown();
            return false;
        }
        ConsoleCommand::Help => println!("{}", HELP),
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ConsoleCommand::parse("start"), Ok(Some(ConsoleCommand::Start)));
        assert_eq!(ConsoleCommand::parse("  end \n"), Ok(Some(ConsoleCommand::End)));
        assert_eq!(ConsoleCommand::parse("status"), Ok(Some(ConsoleCommand::Status)));
        assert_eq!(ConsoleCommand::parse("exit"), Ok(Some(ConsoleCommand::Exit)));
        assert_eq!(ConsoleCommand::parse("help"), Ok(Some(ConsoleCommand::Help)));
        assert_eq!(ConsoleCommand::parse("?"), Ok(Some(ConsoleCommand::Help)));
    }

    #[test]
    fn test_parse_blank_and_unknown() {
        assert_eq!(ConsoleCommand::parse("   "), Ok(None));
        assert_eq!(ConsoleCommand::parse("START"), Err("START".to_string()));
        assert_eq!(ConsoleCommand::parse("restart now"), Err("restart now".to_string()));
    }
}
