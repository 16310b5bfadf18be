//! dbcomm - command-line client for MongoDB-compatible document stores.

mod cli;
mod commands;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use dbcomm_core::logging::{init_logging, log_dir, LogConfig};
use dbcomm_core::{
    ConnectionEstablisher, CredentialProvider, DbCommError, InteractiveCredentialProvider,
    KeyringCredentialProvider, StaticCredentialProvider,
};
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log_config = LogConfig::new(log_dir());
    if let Some(filter) = &cli.log_filter {
        log_config = log_config.with_filter(filter.clone());
    }
    let _logging_guard = init_logging(log_config);

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "Starting dbcomm");

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let spec = cli.connection.to_spec()?;
    let establisher = ConnectionEstablisher::new()
        .with_credentials(credential_provider(cli.no_prompt, cli.remember));

    let handle = establisher
        .establish(&spec)
        .with_context(|| format!("Could not connect to {}", spec.display_target()))?;
    if handle.fell_back_to_localhost() {
        eprintln!(
            "warning: {} was unreachable; connected to localhost instead",
            spec.display_target()
        );
    }

    let mut stdout = std::io::stdout().lock();
    let result = commands::execute(&handle, cli.command, &mut stdout);
    handle.close();
    result
}

/// Prompt on the terminal unless `--no-prompt`; optionally back it with the keychain.
fn credential_provider(no_prompt: bool, remember: bool) -> Arc<dyn CredentialProvider> {
    let base: Box<dyn CredentialProvider> = if no_prompt {
        Box::new(StaticCredentialProvider::new())
    } else {
        Box::new(InteractiveCredentialProvider::new())
    };
    if remember {
        Arc::new(KeyringCredentialProvider::new(base))
    } else {
        Arc::from(base)
    }
}

fn report(err: &anyhow::Error) {
    eprintln!("error: {err:#}");
    if let Some(db_err) = err.downcast_ref::<DbCommError>() {
        tracing::debug!(category = db_err.category(), "Command failed");
        if let Some(hint) = db_err.hint() {
            eprintln!("hint: {hint}");
        }
    }
}
