//! Process wiring: session, dispatcher, control plane, stdin and signals.

use crate::commands::{CommandName, Commands, Invocation};
use crate::config::Config;
use crate::delivery::Delivery;
use crate::dispatcher::EventDispatcher;
use crate::gateway::{ControlOptions, ControlPlane};
use crate::normalizer::{Normalizer, NormalizerOptions};
use crate::polls::PollStore;
use crate::session::{Session, SessionOptions};
use crate::shutdown::{ExitReason, Shutdown};
use crate::transport::{EventSink, Transport, WhatsAppWebOptions, WhatsAppWebTransport};
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio::time::Duration;

const STATUS_FLUSH_SECONDS: u64 = 5;

const PAIRING_HINT: &str = "Not logged in. Link this device first: scan the QR code shown by \
`waclaw run`, or use `waclaw run pair-phone <number>`";

pub async fn run(config: Config, command: Vec<String>) -> Result<i32> {
    let workspace = config.workspace();
    clear_tmp(&workspace)?;

    let transport: Arc<dyn Transport> = Arc::new(WhatsAppWebTransport::new(WhatsAppWebOptions {
        session_path: config.database.file_path().to_string(),
        pair_phone: config.transport.pair_phone.clone(),
        ws_url: config.transport.ws_url.clone(),
        display_name: config.transport.display_name.clone(),
        request_full_sync: config.sync.request_full_sync,
    }));
    tracing::info!(
        "Starting in {} mode (store: {} {})",
        config.mode,
        config.database.dialect,
        config.database.address
    );

    let daemon = Daemon::new(&config, workspace, transport);
    let state_writer = spawn_state_writer(state_file_path(&config));

    let code = daemon.drive(command).await;
    state_writer.abort();
    code
}

/// Clear `<workspace>/.tmp` wholesale and recreate it empty.
pub fn clear_tmp(workspace: &Path) -> Result<()> {
    let tmp = workspace.join(".tmp");
    if tmp.exists() {
        std::fs::remove_dir_all(&tmp)
            .with_context(|| format!("Failed to clear {}", tmp.display()))?;
    }
    std::fs::create_dir_all(&tmp).with_context(|| format!("Failed to create {}", tmp.display()))
}

pub fn state_file_path(config: &Config) -> PathBuf {
    config.config_dir().join("daemon_state.json")
}

/// Everything one process runs, wired together.
pub struct Daemon {
    session: Arc<Session>,
    dispatcher: Arc<EventDispatcher>,
    commands: Arc<Commands>,
    control: Option<Arc<ControlPlane>>,
    shutdown: Shutdown,
}

impl Daemon {
    pub fn new(config: &Config, workspace: PathBuf, transport: Arc<dyn Transport>) -> Self {
        let shutdown = Shutdown::new();
        let session = Session::new(
            transport,
            SessionOptions::from_config(config),
            shutdown.clone(),
        );
        let polls = Arc::new(PollStore::from_config(&config.polls, &workspace));

        let normalizer = config.mode.delivers_messages().then(|| {
            let delivery = Delivery::local(
                config.gateway.port,
                Duration::from_millis(config.reliability.delivery_timeout_millis),
            );
            Arc::new(Normalizer::new(
                Arc::clone(&session),
                Arc::clone(&polls),
                delivery,
                NormalizerOptions::from_config(config, workspace),
            ))
        });
        let dispatcher = EventDispatcher::new(Arc::clone(&session), normalizer);

        let commands = Arc::new(Commands::new(Arc::clone(&session), polls));
        let control = config.mode.serves_commands().then(|| {
            ControlPlane::new(
                ControlOptions::from_config(config),
                Arc::clone(&commands),
                shutdown.clone(),
            )
        });

        Self {
            session,
            dispatcher,
            commands,
            control,
            shutdown,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn shutdown_handle(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn control(&self) -> Option<&Arc<ControlPlane>> {
        self.control.as_ref()
    }

    /// Connect and open the control plane when the mode has one.
    pub async fn start(&self) -> Result<()> {
        self.session
            .start(Arc::clone(&self.dispatcher) as Arc<dyn EventSink>)
            .await
            .context("Failed to connect")?;
        if let Some(control) = &self.control {
            control.start().await?;
        }
        Ok(())
    }

    /// Start, run the one-shot command or the interactive loop, then tear down.
    pub async fn drive(self, command: Vec<String>) -> Result<i32> {
        if let Err(e) = self.start().await {
            tracing::error!("{e:#}");
            self.teardown().await;
            return Ok(1);
        }

        let signals = spawn_signal_listener(self.shutdown.clone());

        let interactive = tokio::select! {
            interactive = self.run_one_shot(Invocation::parse(command)) => interactive,
            _ = self.shutdown.wait() => false,
        };
        let stdin = interactive.then(|| {
            let daemon = self.handle();
            tokio::spawn(async move {
                daemon
                    .serve_lines(BufReader::new(tokio::io::stdin()))
                    .await;
            })
        });

        let reason = self.shutdown.wait().await;
        signals.abort();
        if let Some(stdin) = stdin {
            stdin.abort();
        }
        self.teardown().await;
        tracing::info!("Exiting ({})", reason.as_str());
        Ok(reason.exit_code())
    }

    /// Returns whether the process should continue into interactive mode.
    async fn run_one_shot(&self, invocation: Invocation) -> bool {
        match invocation {
            Invocation::Empty => true,
            Invocation::Unknown(name) => {
                tracing::error!("Unknown command: {name}");
                self.shutdown.request(ExitReason::Fatal);
                false
            }
            Invocation::Stop => {
                self.shutdown.request(ExitReason::StopCommand);
                false
            }
            Invocation::Restart => {
                tracing::warn!("restart only applies to a running control plane");
                self.shutdown.request(ExitReason::OneShotComplete);
                false
            }
            Invocation::Run { name, args } => {
                self.session.wait_ready().await;
                if name.requires_login() && !self.session.is_logged_in() {
                    tracing::error!("{PAIRING_HINT}");
                    self.shutdown.request(ExitReason::Fatal);
                    return false;
                }
                self.commands.run(name, &args).await;
                if name == CommandName::PairPhone {
                    return true;
                }
                self.shutdown.request(ExitReason::OneShotComplete);
                false
            }
        }
    }

    fn handle(&self) -> LineHandler {
        LineHandler {
            session: Arc::clone(&self.session),
            commands: Arc::clone(&self.commands),
            control: self.control.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Read command lines until EOF, then request shutdown.
    pub async fn serve_lines<R: AsyncBufRead + Unpin>(&self, reader: R) {
        self.handle().serve_lines(reader).await;
    }

    /// The one teardown sequence every exit path runs.
    pub async fn teardown(&self) {
        if let Some(control) = &self.control {
            control.stop().await;
        }
        self.session.disconnect().await;
    }
}

/// Owned view of the daemon for the stdin task.
#[derive(Clone)]
struct LineHandler {
    session: Arc<Session>,
    commands: Arc<Commands>,
    control: Option<Arc<ControlPlane>>,
    shutdown: Shutdown,
}

impl LineHandler {
    async fn serve_lines<R: AsyncBufRead + Unpin>(&self, reader: R) {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => self.handle_line(&line),
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Failed to read stdin: {e}");
                    break;
                }
            }
        }
        tracing::info!("stdin closed");
        self.shutdown.request(ExitReason::StdinClosed);
    }

    fn handle_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if line == "r" && self.session.pairing().is_pending() {
            if self.session.pairing().reject() {
                tracing::info!("Pairing rejected");
            }
            return;
        }

        match Invocation::parse_line(line) {
            Invocation::Empty => {}
            Invocation::Unknown(name) => tracing::error!("Unknown command: {name}"),
            Invocation::Stop => self.shutdown.request(ExitReason::StopCommand),
            Invocation::Restart => match &self.control {
                Some(control) => {
                    let control = Arc::clone(control);
                    tokio::spawn(async move {
                        if let Err(e) = control.restart().await {
                            tracing::error!("Failed to restart control plane: {e:#}");
                        }
                    });
                }
                None => tracing::warn!("No control plane to restart in this mode"),
            },
            Invocation::Run { name, args } => {
                let session = Arc::clone(&self.session);
                let commands = Arc::clone(&self.commands);
                tokio::spawn(async move {
                    session.wait_ready().await;
                    if name.requires_login() && !session.is_logged_in() {
                        tracing::error!("{PAIRING_HINT}");
                        return;
                    }
                    commands.run(name, &args).await;
                });
            }
        }
    }
}

fn spawn_signal_listener(shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.request(ExitReason::Signal);
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("Failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn spawn_state_writer(path: PathBuf) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        let mut interval = tokio::time::interval(Duration::from_secs(STATUS_FLUSH_SECONDS));
        loop {
            interval.tick().await;
            let mut json = crate::health::snapshot_json();
            if let Some(obj) = json.as_object_mut() {
                obj.insert(
                    "written_at".into(),
                    serde_json::json!(Utc::now().to_rfc3339()),
                );
            }
            let data = serde_json::to_vec_pretty(&json).unwrap_or_else(|_| b"{}".to_vec());
            if let Err(e) = tokio::fs::write(&path, data).await {
                tracing::debug!("Failed to write {}: {e}", path.display());
            }
        }
    })
}
