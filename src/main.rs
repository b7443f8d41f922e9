// SPDX-License-Identifier: GPL-3.0-only

use anyhow::{bail, Result};
use clap_lex::RawArgs;
use std::{path::PathBuf, process};
use tracing::{error, info};

pub mod backend;
pub mod config;
mod logger;
pub mod utils;

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Help,
    Version,
    Run { device: Option<PathBuf> },
}

fn main() {
    let command = match parse_args(RawArgs::from_args()) {
        Ok(command) => command,
        Err(err) => {
            // no logger yet
            eprintln!("kms-flip: {}", err);
            eprintln!("Try 'kms-flip --help' for more information.");
            process::exit(1);
        }
    };

    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");
    let device = match command {
        Command::Help => {
            print_help(env!("CARGO_PKG_VERSION"), git_hash);
            return;
        }
        Command::Version => {
            println!(
                "kms-flip {} (git commit {})",
                env!("CARGO_PKG_VERSION"),
                git_hash
            );
            return;
        }
        Command::Run { device } => device,
    };

    if let Err(err) = main_inner(device) {
        error!("Error occured in main(): {:?}", err);
        process::exit(1);
    }
}

fn parse_args(raw_args: RawArgs) -> Result<Command> {
    let mut cursor = raw_args.cursor();
    // program name
    let _ = raw_args.next_os(&mut cursor);
    let mut device = None;

    while let Some(arg) = raw_args.next_os(&mut cursor) {
        match arg.to_str() {
            Some("--help") | Some("-h") => return Ok(Command::Help),
            Some("--version") | Some("-V") => return Ok(Command::Version),
            Some("--device") => match raw_args.next_os(&mut cursor) {
                Some(path) => device = Some(PathBuf::from(path)),
                None => bail!("--device requires a path"),
            },
            _ => bail!("Unknown argument: {}", arg.to_value_os().to_string_lossy()),
        }
    }

    Ok(Command::Run { device })
}

fn main_inner(device: Option<PathBuf>) -> Result<()> {
    // setup logger
    logger::init_logger()?;
    info!("kms-flip starting up!");

    let mut config = config::Config::load();
    if let Some(device) = device {
        config.static_conf.device = device;
    }

    backend::run(&config)?;
    info!("Outputs restored, exiting");
    Ok(())
}

fn print_help(version: &str, git_rev: &str) {
    println!(
        r#"kms-flip {version} (git commit {git_rev})

Renders an animated colour directly on every connected display using kernel
mode-setting, and restores the previous configuration on exit.

Stops on SIGINT, SIGTERM or any input on stdin.

Options:
  -h, --help           Show this message
  -V, --version        Show the version of kms-flip
      --device <PATH>  DRM device to use (default: /dev/dri/card0)"#
    );
}
