use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};

use crate::cli::{Cli, Command};
use crate::config::TransferConfig;
use crate::device::DeviceManager;
use crate::transfer::{LogProgress, Transfer, TransferSummary};

/// What a run will do once the link is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Upload(PathBuf),
    Download { names: Vec<String>, dest: PathBuf },
}

/// Decide the work before touching the port, so bad invocations fail fast.
pub fn plan(command: &Command, config: &TransferConfig) -> anyhow::Result<Plan> {
    match command {
        Command::Upload { file, .. } => Ok(Plan::Upload(file.clone())),
        Command::Download { .. } => {
            if config.download.files.is_empty() {
                bail!("No files to download: pass names or set download.files in the config");
            }
            Ok(Plan::Download {
                names: config.download.files.clone(),
                dest: config.download.destination_dir.clone(),
            })
        }
    }
}

pub async fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = cli.resolve_config().context("Invalid configuration")?;
    let plan = plan(&cli.command, &config)?;

    let port = config.link.port.clone();
    let mut manager = DeviceManager::connect(config)
        .await
        .with_context(|| format!("Could not start a session with the device on {}", port))?;
    log::info!(
        "Device on {} is ready at {} baud",
        manager.config().link.port,
        manager.config().link.baud_rate
    );

    let mut progress = LogProgress::default();
    let transfers = match &plan {
        Plan::Upload(file) => vec![manager.upload_file(file, &mut progress).await],
        Plan::Download { names, dest } => {
            manager
                .download_files(names.as_slice(), dest, &mut progress)
                .await
        }
    };
    manager.disconnect();

    if cli.summary_json {
        let summaries: Vec<TransferSummary> = transfers.iter().map(Transfer::summary).collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    }

    Ok(if all_succeeded(&transfers) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub fn all_succeeded(transfers: &[Transfer]) -> bool {
    transfers.iter().all(Transfer::is_success)
}
