//! BFT Connect CLI
//!
//! Runs the transfer coordinator against local collaborators: uploads go
//! to a directory, the server replays push notifications, and the printer
//! is a pair of flags.

mod config;
mod diagnostics;
mod local;

use anyhow::{bail, Context, Result};
use bft_connect_protocol::{
    Collaborators, ConfirmationPrompt, DeleteUploadPolicy, FixedPrompt, GuardDecision, PanelUpdate,
    Phase, SessionPhase, SettingsManager, TransferCoordinator, UploadFile,
};
use clap::Parser;
use config::{Config, TomlSettingsStore};
use diagnostics::{Cli, Command};
use local::{LocalDevice, LocalStorage, ScriptStep, ScriptedServer, TerminalPrompt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    diagnostics::init_logging(&cli)?;

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.ensure_directories()?;

    let store = Arc::new(TomlSettingsStore::new(&config.paths.settings_file));
    let settings = Arc::new(
        SettingsManager::load(store)
            .await
            .context("Failed to load transfer settings")?,
    );

    match cli.command {
        Command::ShowConfig => show_config(&config, &settings),
        Command::ToggleReconnect => {
            let enabled = settings.toggle_reconnect().await?;
            println!("Reconnect after success: {}", on_off(enabled));
            Ok(())
        }
        Command::TogglePostTransfer => {
            let enabled = settings.toggle_post_transfer().await?;
            println!("Post-transfer commands: {}", on_off(enabled));
            Ok(())
        }
        Command::SetDeletePolicy { policy } => {
            let policy: DeleteUploadPolicy = policy.parse()?;
            settings.set_delete_policy(policy).await?;
            println!("Delete uploaded file: {:?}", policy);
            Ok(())
        }
        Command::SetPostCommands { line } => {
            settings.set_post_commands_line(&line).await?;
            println!(
                "Post-transfer commands: {}",
                settings.current().post_commands_line()
            );
            Ok(())
        }
        Command::SetReconnectDelay { delay_ms } => {
            settings.set_reconnect_delay_ms(delay_ms).await?;
            println!("Reconnect delay: {} ms", delay_ms);
            Ok(())
        }
        Command::Send {
            file,
            events,
            fail,
            printing,
            assume_yes,
            assume_no,
            idle_timeout,
        } => {
            let prompt: Arc<dyn ConfirmationPrompt> = if assume_yes {
                Arc::new(FixedPrompt(GuardDecision::Allow))
            } else if assume_no {
                Arc::new(FixedPrompt(GuardDecision::Cancel))
            } else {
                Arc::new(TerminalPrompt)
            };
            let script = match events {
                Some(path) => load_script(&path)?,
                None if fail => ScriptStep::default_script(Phase::CompleteFail),
                None => ScriptStep::default_script(Phase::CompleteOk),
            };
            let options = SendOptions {
                file,
                script,
                printing,
                prompt,
                idle_timeout: Duration::from_secs(idle_timeout),
            };
            send(&config, settings, options).await
        }
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

fn show_config(config: &Config, settings: &SettingsManager) -> Result<()> {
    let current = settings.current();
    println!("Printer:          {}", config.endpoint());
    println!("Upload root:      {}", config.storage.root.display());
    println!("Settings file:    {}", config.paths.settings_file.display());
    println!();
    println!("Upload folder:    {}", current.upload_folder);
    println!("Accepted files:   {}", current.accept_extensions.join(", "));
    println!("Delete upload:    {:?}", current.delete_upload_policy);
    println!(
        "Reconnect:        {} after {} ms",
        on_off(current.reconnect_after_success),
        current.reconnect_delay_ms
    );
    println!(
        "Post-transfer:    {} ({})",
        on_off(current.post_transfer_enabled),
        current.post_commands_line()
    );
    Ok(())
}

fn load_script(path: &Path) -> Result<Vec<ScriptStep>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read event script {}", path.display()))?;
    ScriptStep::parse_script(&text)
        .with_context(|| format!("Invalid event script {}", path.display()))
}

struct SendOptions {
    file: PathBuf,
    script: Vec<ScriptStep>,
    printing: bool,
    prompt: Arc<dyn ConfirmationPrompt>,
    idle_timeout: Duration,
}

async fn send(
    config: &Config,
    settings: Arc<SettingsManager>,
    options: SendOptions,
) -> Result<()> {
    let file = UploadFile::from_path(&options.file)
        .await
        .with_context(|| format!("Cannot read {}", options.file.display()))?;

    let (push_tx, mut push_rx) = mpsc::unbounded_channel();
    let collaborators = Collaborators {
        storage: Arc::new(LocalStorage::new(&config.storage.root)),
        server: Arc::new(ScriptedServer::new(
            &config.storage.root,
            options.script,
            push_tx,
        )),
        device: Arc::new(LocalDevice::new(
            config.endpoint(),
            config.device.reports_capability,
            options.printing,
        )),
        prompt: options.prompt,
    };
    let coordinator = TransferCoordinator::start(collaborators, settings);
    let printer = tokio::spawn(print_updates(coordinator.subscribe()));

    if let Err(e) = coordinator.select_file(file).await {
        coordinator.shutdown().await;
        let _ = printer.await;
        bail!(e.user_message());
    }

    let mut snapshots = coordinator.watch();
    let mut reconciled = false;
    let outcome = loop {
        let (settled, phase) = {
            let snapshot = snapshots.borrow_and_update();
            (snapshot.settled, snapshot.phase)
        };
        if settled {
            break phase;
        }

        tokio::select! {
            Some(notification) = push_rx.recv() => {
                debug!("Push: {:?}", notification);
                coordinator.push(notification)?;
            }
            changed = timeout(options.idle_timeout, snapshots.changed()) => {
                match changed {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => bail!("Coordinator stopped unexpectedly"),
                    // The user may take their time answering the prompt
                    Err(_) if snapshots.borrow().awaiting_confirmation => {}
                    Err(_) if !reconciled => {
                        warn!("No progress for {:?}, asking the server", options.idle_timeout);
                        reconciled = true;
                        let phase = coordinator.reconcile().await?;
                        info!("Server reports {}", phase);
                    }
                    Err(_) => bail!("Transfer stalled with no word from the server"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, dismissing session");
                coordinator.dismiss().await?;
                break coordinator.snapshot().phase;
            }
        }
    };

    coordinator.shutdown().await;
    if let Err(e) = printer.await {
        warn!("Update printer failed: {}", e);
    }

    match outcome {
        SessionPhase::CompleteFail => bail!("Transfer failed"),
        _ => Ok(()),
    }
}

/// Print log lines and progress as the panel would show them
async fn print_updates(mut updates: broadcast::Receiver<PanelUpdate>) {
    let mut last_progress = None;
    loop {
        match updates.recv().await {
            Ok(update) => {
                if update.cleared {
                    println!("----");
                }
                if update.upload_progress != last_progress {
                    if let Some(pct) = update.upload_progress {
                        println!("Upload {:>3}%", pct);
                    }
                    last_progress = update.upload_progress;
                }
                for line in &update.lines {
                    println!("[{}] {}", line.timestamp.format("%H:%M:%S"), line.text);
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Skipped {} panel updates", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
