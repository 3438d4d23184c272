mod settings;
mod shell;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use parley_client::{ClientError, HttpChatBackend};
use parley_session::ChatCoordinator;
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::settings::{SettingsOverrides, SettingsStore};
use crate::shell::Shell;

#[derive(Debug, Parser)]
#[command(name = "parley")]
#[command(about = "Chat with a document- and search-grounded assistant", long_about = None)]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Service base URL
    #[arg(long)]
    base_url: Option<String>,
    /// Bearer credential
    #[arg(long)]
    token: Option<String>,
}

#[derive(Debug, Snafu)]
enum AppError {
    #[snafu(display("failed to build the service client on `{stage}`, {source}"))]
    BuildClient {
        stage: &'static str,
        source: ClientError,
    },
    #[snafu(display("failed to read input on `{stage}`, {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so stdout only carries the conversation.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "parley exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let overrides = SettingsOverrides {
        base_url: cli.base_url,
        token: cli.token,
    };
    let config_path = cli.config.unwrap_or_else(SettingsStore::default_config_path);
    let settings = SettingsStore::new(config_path, &overrides);
    let current = settings.settings();
    tracing::info!(
        base_url = %current.base_url,
        has_token = current.token.is_some(),
        config = ?settings.config_path(),
        "starting parley"
    );

    let backend = HttpChatBackend::new(current.to_client_config()).context(BuildClientSnafu {
        stage: "build-backend",
    })?;
    let coordinator =
        ChatCoordinator::new(Arc::new(backend)).with_default_title(&current.default_chat_title);

    let mut shell = Shell::new(coordinator, settings);
    shell.start().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context(ReadInputSnafu { stage: "read-line" })? else {
                    break;
                };
                if !shell.handle_line(&line).await {
                    break;
                }
            }
            // Dropping `next_update` here is safe; an interrupted fetch is redone.
            Some(update) = shell.coordinator_mut().next_update(), if shell.is_streaming() => {
                shell.render_update(update);
            }
        }
    }

    tracing::info!("bye");
    Ok(())
}
