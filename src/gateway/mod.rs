//! Local HTTP control plane.
//!
//! `GET /` reports whether the session is usable; `POST /` takes a stream of
//! `{"args": [...]}` objects and answers with one acknowledgement per object
//! before any command has run. Commands run on their own tasks.
//!
//! `stop` and `restart` are acknowledged first and acted on after a short
//! grace delay so the acknowledgement reaches the caller.

use crate::commands::{Commands, Invocation};
use crate::config::Config;
use crate::health;
use crate::shutdown::{ExitReason, Shutdown};
use anyhow::Context;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const ACK_RECEIVED: &str = "command received";
pub const ACK_EXITING: &str = "exiting";
pub const ACK_RESTARTING: &str = "restarting";
pub const NOT_FOUND_BODY: &str = "404 not found.";
pub const METHOD_NOT_SUPPORTED_BODY: &str = "Method not supported";
pub const WAITING_FOR_RECONNECT: &str = "Bad network, server is waiting for reconnection";

#[derive(Debug, Clone)]
pub struct ControlOptions {
    pub host: String,
    pub port: u16,
    /// Delay between acknowledging `stop`/`restart` and acting on it.
    pub grace: Duration,
}

impl ControlOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.gateway.host.clone(),
            port: config.gateway.port,
            grace: Duration::from_millis(config.reliability.command_grace_millis),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommandRequest {
    #[serde(default)]
    args: Vec<String>,
}

struct Running {
    addr: SocketAddr,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ControlPlane {
    options: ControlOptions,
    commands: Arc<Commands>,
    shutdown: Shutdown,
    running: Mutex<Option<Running>>,
}

impl ControlPlane {
    pub fn new(options: ControlOptions, commands: Arc<Commands>, shutdown: Shutdown) -> Arc<Self> {
        Arc::new(Self {
            options,
            commands,
            shutdown,
            running: Mutex::new(None),
        })
    }

    /// Bind and serve. Calling it while already serving returns the bound address.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            return Ok(current.addr);
        }
        if self.shutdown.is_requested() {
            anyhow::bail!("Control plane not started: shutdown in progress");
        }

        let bind = format!("{}:{}", self.options.host, self.options.port);
        let listener = TcpListener::bind(&bind)
            .await
            .with_context(|| format!("Failed to bind control plane to {bind}"))?;
        let addr = listener.local_addr()?;

        let cancel = CancellationToken::new();
        let app = router(Arc::clone(self));
        let stop = cancel.clone();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await;
            if let Err(e) = served {
                tracing::error!("Control plane error: {e}");
                health::mark_component_error(health::GATEWAY, e);
            }
        });

        *running = Some(Running {
            addr,
            cancel,
            handle,
        });
        health::mark_component_ok(health::GATEWAY);
        tracing::info!("Control plane listening on http://{addr}");
        Ok(addr)
    }

    /// Stop serving and wait for the listener to close. No-op when stopped.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(current) = running.take() else {
            return;
        };
        current.cancel.cancel();
        if let Err(e) = current.handle.await {
            tracing::warn!("Control plane task ended abnormally: {e}");
        }
        health::mark_component_stopped(health::GATEWAY);
        tracing::info!("Control plane stopped");
    }

    pub async fn restart(self: &Arc<Self>) -> anyhow::Result<SocketAddr> {
        self.stop().await;
        health::bump_component_restart(health::GATEWAY);
        self.start().await
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.addr)
    }

    /// After the grace delay: ask the process to exit and close the listener.
    /// Shutdown is requested first so a pending restart cannot reopen it.
    pub fn schedule_stop(self: &Arc<Self>) {
        let plane = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(plane.options.grace).await;
            plane.shutdown.request(ExitReason::StopCommand);
            plane.stop().await;
        });
    }

    /// After the grace delay: restart the listener only.
    pub fn schedule_restart(self: &Arc<Self>) {
        let plane = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(plane.options.grace).await;
            if let Err(e) = plane.restart().await {
                tracing::error!("Failed to restart control plane: {e:#}");
                health::mark_component_error(health::GATEWAY, format!("{e:#}"));
            }
        });
    }

    fn status_text(&self) -> String {
        let session = self.commands.session();
        if session.is_available() {
            format!("Server is running in {} mode", session.mode())
        } else {
            WAITING_FOR_RECONNECT.to_string()
        }
    }

    /// Acknowledge each decoded object in order; stop/restart and decode
    /// errors end the body.
    fn accept_body(self: &Arc<Self>, body: &[u8]) -> String {
        let mut acks = String::new();
        let stream = serde_json::Deserializer::from_slice(body).into_iter::<CommandRequest>();
        for request in stream {
            let request = match request {
                Ok(request) => request,
                Err(e) => {
                    tracing::error!("Failed to decode command body: {e}");
                    break;
                }
            };
            match Invocation::parse(request.args) {
                Invocation::Stop => {
                    acks.push_str(ACK_EXITING);
                    self.schedule_stop();
                    break;
                }
                Invocation::Restart => {
                    acks.push_str(ACK_RESTARTING);
                    self.schedule_restart();
                    break;
                }
                Invocation::Empty => acks.push_str(ACK_RECEIVED),
                Invocation::Unknown(name) => {
                    tracing::warn!("Unknown command: {name}");
                    acks.push_str(ACK_RECEIVED);
                }
                Invocation::Run { name, args } => {
                    acks.push_str(ACK_RECEIVED);
                    if self.commands.session().mode().serves_commands() {
                        let commands = Arc::clone(&self.commands);
                        tokio::spawn(async move { commands.run(name, &args).await });
                    }
                }
            }
        }
        acks
    }
}

fn router(plane: Arc<ControlPlane>) -> Router {
    Router::new()
        .route(
            "/",
            get(handle_status)
                .post(handle_commands)
                .fallback(handle_method_not_supported),
        )
        .fallback(handle_not_found)
        .with_state(plane)
}

async fn handle_status(State(plane): State<Arc<ControlPlane>>) -> String {
    plane.status_text()
}

async fn handle_commands(State(plane): State<Arc<ControlPlane>>, body: Bytes) -> String {
    plane.accept_body(&body)
}

async fn handle_method_not_supported() -> (StatusCode, &'static str) {
    (StatusCode::METHOD_NOT_ALLOWED, METHOD_NOT_SUPPORTED_BODY)
}

async fn handle_not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, NOT_FOUND_BODY)
}
