//! `meshgen` -- dispatch 3D generation, rendering and judging across a pool
//! of GPU endpoints.
//!
//! Progress goes to stderr through `tracing`. Stdout carries exactly one
//! JSON object, `{"success": bool, ...}`, once the command finishes.
//!
//! # Exit codes
//!
//! | Code  | Meaning                                        |
//! |-------|------------------------------------------------|
//! | `0`   | every item succeeded                           |
//! | `1`   | an item failed, or a fatal error               |
//! | `130` | interrupted by Ctrl-C; admitted items drained  |

mod args;
mod commands;
mod logging;

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use args::{Cli, Command};
use commands::CommandOutput;

const EXIT_FAILURE: u8 = 1;
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_json);

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let result = run(cli.command, &cancel).await;
    let (value, code) = match result {
        Ok(output) => {
            let code = exit_code(&output);
            (output.value, code)
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Command failed");
            let code = if cancel.is_cancelled() {
                EXIT_INTERRUPTED
            } else {
                EXIT_FAILURE
            };
            (serde_json::json!({ "success": false, "error": format!("{e:#}") }), code)
        }
    };

    println!("{value}");
    ExitCode::from(code)
}

async fn run(command: Command, cancel: &CancellationToken) -> anyhow::Result<CommandOutput> {
    match command {
        Command::Generate(args) => commands::generate(args, cancel).await,
        Command::Render(args) => commands::render(args, cancel).await,
        Command::Judge(args) => commands::judge(args, cancel).await,
        Command::Health(args) => commands::health(args, cancel).await,
        Command::Missing(args) => commands::missing(args).await,
        Command::Clean(args) => commands::clean(args).await,
    }
}

fn exit_code(output: &CommandOutput) -> u8 {
    if output.interrupted {
        EXIT_INTERRUPTED
    } else if output.success {
        0
    } else {
        EXIT_FAILURE
    }
}

/// Cancel `token` on the first Ctrl-C. Admission stops; items already
/// running finish and are reported.
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("Interrupted, draining admitted items");
                token.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });
}
