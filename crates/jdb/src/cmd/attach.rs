// JDB - JVM Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! The `attach` command: attach to a JVM and drive the session from stdin.

use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use clap::Args;
use eyre::Result;
use jdb_common::{Command, Config, UnknownCommand};
use jdb_engine::{start_session, AttachOptions, Notifier, SessionHandle, SourceRoots};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::{
    notifier::{JsonNotifier, TextNotifier},
    OutputFormat,
};

/// How often the command loop checks whether the session ended.
const FINISH_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Arguments of `jdb attach`
#[derive(Debug, Clone, Args)]
pub struct AttachArgs {
    /// Host of the JDWP endpoint
    #[arg(long, env = "JDB_HOST")]
    pub host: Option<String>,

    /// Port of the JDWP endpoint
    #[arg(long, env = "JDB_PORT")]
    pub port: Option<u16>,

    /// Breakpoint as `Unit:line`, e.g. `com.example.Main:42` (repeatable)
    #[arg(short = 'b', long = "break", value_name = "UNIT:LINE")]
    pub breakpoints: Vec<String>,

    /// Directory to search for sources, before configured ones (repeatable)
    #[arg(short = 's', long = "source", value_name = "DIR")]
    pub source_roots: Vec<PathBuf>,

    /// Seconds to wait for the endpoint; 0 waits indefinitely
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Source lines shown around the current line in text output
    #[arg(long, default_value = "2")]
    pub context: usize,
}

impl AttachArgs {
    /// Layer the command-line values over `config`.
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(host) = &self.host {
            config = config.with_host(host.clone());
        }
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(secs) = self.connect_timeout {
            config = config.with_connect_timeout_secs(secs);
        }
        config
            .with_source_roots(self.source_roots.clone())
            .with_breakpoints(self.breakpoints.clone())
    }
}

/// A line typed by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// Send a command to the session
    Command(Command),
    /// Print the command reference
    Help,
    /// Leave the debugger
    Quit,
    /// Blank line
    Empty,
}

impl FromStr for Input {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Ok(Self::Empty),
            "help" | "h" | "?" => Ok(Self::Help),
            "quit" | "q" | "exit" => Ok(Self::Quit),
            other => other.parse().map(Self::Command),
        }
    }
}

struct HelpText;

impl fmt::Display for HelpText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Commands (only take effect while the target is stopped):")?;
        writeln!(f, "  step-into, si, s     step into the next line")?;
        writeln!(f, "  step-over, next, n   step over the next line")?;
        writeln!(f, "  step-out, finish, f  run until the current method returns")?;
        writeln!(f, "  continue, cont, c    run until the next breakpoint")?;
        writeln!(f, "  help, h, ?           show this help")?;
        write!(f, "  quit, q, exit        leave the debugger")
    }
}

/// Attach to the configured JVM and forward commands typed on stdin until
/// the session ends, the user quits, or Ctrl+C is pressed.
pub async fn attach(args: &AttachArgs, config: Config, output: OutputFormat) -> Result<()> {
    let config = args.apply(config);
    let breakpoints = config.breakpoint_specs()?;
    if breakpoints.is_empty() {
        warn!("No breakpoints declared, the target will run without stopping");
    }

    let options = AttachOptions::from_config(&config);
    let locator = SourceRoots::from_config(&config);
    let notifier: Box<dyn Notifier> = match output {
        OutputFormat::Text => Box::new(TextNotifier::stdout(args.context)),
        OutputFormat::Json => Box::new(JsonNotifier::stdout()),
    };

    let endpoint = format!("{}:{}", options.host, options.port);
    let session =
        tokio::task::spawn_blocking(move || start_session(&options, breakpoints, notifier, locator))
            .await??;

    info!(%endpoint, "Session started");
    if output == OutputFormat::Text {
        println!("Attached to {endpoint}. Type `help` for commands.");
    }

    command_loop(session).await
}

async fn command_loop(session: SessionHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(FINISH_POLL_INTERVAL);
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                return Ok(());
            }
            _ = ticker.tick() => {
                if session.is_finished() {
                    break;
                }
            }
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    debug!("stdin closed, waiting for the session to end");
                    stdin_open = false;
                    continue;
                };
                match line.parse::<Input>() {
                    Ok(Input::Command(command)) => {
                        if !session.is_stopped() {
                            info!(%command, "Target is running, command will apply at the next stop");
                        }
                        session.send_command(command);
                    }
                    Ok(Input::Help) => println!("{HelpText}"),
                    Ok(Input::Quit) => {
                        info!("Leaving the debugger");
                        return Ok(());
                    }
                    Ok(Input::Empty) => {}
                    Err(e) => eprintln!("{e}, type `help` for the list of commands"),
                }
            }
        }
    }

    tokio::task::spawn_blocking(move || session.join()).await??;
    info!("Target finished, session closed");
    Ok(())
}
