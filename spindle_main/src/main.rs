// Spindle: Protected Path Forwarding with Hierarchical SDN Controllers
// Copyright (C) 2022  Spindle Developers
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Controller launcher: `root` runs the inter-domain coordinator, `local`
//! runs one domain's protection controller. Both run until interrupted and
//! exit 0 on a graceful shutdown, non-zero after a logged fatal error.

use clap::{Parser, Subcommand};
use log::*;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use spindle::root::{RootConfig, RootController};
use spindle_runtime::{InProcBroker, LcConfig, LocalRuntime, LoggingSwitch, RootRuntime};
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};

#[derive(Parser)]
#[command(name = "spindle", about = "Hierarchical protection and TE SDN controllers")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the root controller
    Root {
        /// Log level (debug, info, warning, error, critical or a number)
        #[arg(long, default_value = "info")]
        loglevel: String,
        /// Also write the log to this file
        #[arg(long)]
        log_file: Option<PathBuf>,
        /// TE: sort candidates in descending (true, default) or ascending
        /// order (false)
        #[arg(long, default_value = "true")]
        te_candidate_sort_rev: String,
        /// TE: accept partial solutions (default false)
        #[arg(long, default_value = "false")]
        te_partial_accept: String,
        /// Directory for the human-readable state dumps
        #[arg(long)]
        dump_dir: Option<PathBuf>,
    },
    /// Run a local (domain) controller
    Local {
        /// Log level (debug, info, warning, error, critical or a number)
        #[arg(long, default_value = "info")]
        loglevel: String,
        /// Also write the log to this file
        #[arg(long)]
        log_file: Option<PathBuf>,
        /// Configuration file (JSON, grouped keys)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Map the textual level of the CLI onto a filter. Numbers use the classic
/// 10/20/30/40/50 scheme.
fn level_filter(loglevel: &str) -> LevelFilter {
    match loglevel {
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warning" => LevelFilter::Warn,
        "error" | "critical" => LevelFilter::Error,
        other => match other.parse::<u32>() {
            Ok(n) if n <= 10 => LevelFilter::Debug,
            Ok(n) if n <= 20 => LevelFilter::Info,
            Ok(n) if n <= 30 => LevelFilter::Warn,
            Ok(_) => LevelFilter::Error,
            Err(_) => LevelFilter::Info,
        },
    }
}

/// Lenient boolean flags: only the exact inverse keyword flips the default.
fn flag(value: &str, default: bool) -> bool {
    if default {
        !value.eq_ignore_ascii_case("false")
    } else {
        value.eq_ignore_ascii_case("true")
    }
}

fn init_logging(loglevel: &str, log_file: Option<&PathBuf>) -> Result<(), String> {
    let level = level_filter(loglevel);
    match log_file {
        None => {
            pretty_env_logger::formatted_builder().filter_level(level).init();
            Ok(())
        }
        Some(path) => {
            let pattern = "[{l:1.1}] {M:20.20} : {m}{n}";
            let console = ConsoleAppender::builder()
                .encoder(Box::new(PatternEncoder::new(pattern)))
                .build();
            let file = FileAppender::builder()
                .encoder(Box::new(PatternEncoder::new(pattern)))
                .build(path)
                .map_err(|e| format!("cannot open log file {}: {}", path.display(), e))?;
            let config = Config::builder()
                .appender(Appender::builder().build("console", Box::new(console)))
                .appender(Appender::builder().build("file", Box::new(file)))
                .build(Root::builder().appender("console").appender("file").build(level))
                .map_err(|e| format!("invalid logging config: {}", e))?;
            log4rs::init_config(config).map_err(|e| format!("cannot init logging: {}", e))?;
            Ok(())
        }
    }
}

async fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });
    rx
}

async fn run() -> Result<(), String> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Root { loglevel, log_file, te_candidate_sort_rev, te_partial_accept, dump_dir } => {
            init_logging(&loglevel, log_file.as_ref())?;
            let cfg = RootConfig {
                te_candidate_sort_rev: flag(&te_candidate_sort_rev, true),
                te_partial_accept: flag(&te_partial_accept, false),
                dump_dir,
                ..Default::default()
            };
            let runtime = RootRuntime::new(RootController::new(cfg));
            let shutdown = shutdown_signal().await;
            runtime.run(InProcBroker::new(), shutdown).await;
            info!("Root controller stopped");
            Ok(())
        }
        Command::Local { loglevel, log_file, config } => {
            init_logging(&loglevel, log_file.as_ref())?;
            let cfg = LcConfig::load(config.as_deref()).map_err(|e| e.to_string())?;
            let runtime = LocalRuntime::new(cfg, LoggingSwitch::new());

            // the switch protocol and election collaborators feed these
            // channels in a full deployment; standalone they stay idle
            let (_event_tx, event_rx) = mpsc::unbounded_channel();
            let (_role_tx, role_rx) = mpsc::unbounded_channel();
            let shutdown = shutdown_signal().await;
            runtime.run(InProcBroker::new(), event_rx, role_rx, shutdown).await;
            info!("Local controller stopped");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal: {}", e);
        eprintln!("Fatal: {}", e);
        std::process::exit(1);
    }
}
