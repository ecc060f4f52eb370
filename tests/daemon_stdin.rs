//! Interactive command lines fed to a daemon wired to a fake transport.

mod support;

use std::sync::Arc;
use std::time::Duration;
use support::{FakeTransport, eventually};
use tempfile::TempDir;
use waclaw::config::{Config, Mode};
use waclaw::daemon::Daemon;
use waclaw::jid::Jid;
use waclaw::shutdown::ExitReason;
use waclaw::transport::message::OutgoingMessage;
use waclaw::transport::{Event, Transport};

fn config(tmp: &TempDir, mode: Mode) -> Config {
    let mut config = Config {
        config_path: tmp.path().join("config.toml"),
        workspace_dir: Some(tmp.path().to_path_buf()),
        mode,
        ..Config::default()
    };
    config.gateway.port = 0;
    config.polls.mirror_to_disk = false;
    config
}

async fn running_daemon(tmp: &TempDir) -> (Daemon, Arc<FakeTransport>) {
    let transport = FakeTransport::paired("15550001111");
    transport.set_push_name("Agent");
    let daemon = Daemon::new(
        &config(tmp, Mode::None),
        tmp.path().to_path_buf(),
        Arc::clone(&transport) as Arc<dyn Transport>,
    );
    daemon.start().await.unwrap();
    transport.emit(Event::Connected).await;
    (daemon, transport)
}

#[tokio::test]
async fn lines_run_commands_and_eof_requests_shutdown() {
    let tmp = TempDir::new().unwrap();
    let (daemon, transport) = running_daemon(&tmp).await;

    daemon
        .serve_lines("\n   \nsend 15550003333 hello world\nnosuchcommand\n".as_bytes())
        .await;

    assert!(eventually(|| transport.sent().len() == 1).await);
    assert_eq!(
        transport.sent()[0],
        (
            Jid::user("15550003333"),
            OutgoingMessage::Text("hello world".into())
        )
    );
    assert_eq!(
        daemon.shutdown_handle().reason(),
        Some(ExitReason::StdinClosed)
    );
}

#[tokio::test]
async fn stop_line_requests_shutdown() {
    let tmp = TempDir::new().unwrap();
    let (daemon, _transport) = running_daemon(&tmp).await;

    daemon.serve_lines("stop\n".as_bytes()).await;

    assert_eq!(
        daemon.shutdown_handle().reason(),
        Some(ExitReason::StopCommand)
    );
}

#[tokio::test]
async fn bare_r_without_pending_pairing_is_just_an_unknown_command() {
    let tmp = TempDir::new().unwrap();
    let (daemon, transport) = running_daemon(&tmp).await;

    daemon.serve_lines("r\n".as_bytes()).await;

    assert!(transport.sent().is_empty());
    assert!(!daemon.session().pairing().is_pending());
}

#[tokio::test]
async fn teardown_disconnects_and_closes_the_control_plane() {
    let tmp = TempDir::new().unwrap();
    let transport = FakeTransport::paired("15550001111");
    let daemon = Daemon::new(
        &config(&tmp, Mode::Send),
        tmp.path().to_path_buf(),
        Arc::clone(&transport) as Arc<dyn Transport>,
    );
    daemon.start().await.unwrap();
    let control = Arc::clone(daemon.control().expect("send mode serves commands"));
    assert!(control.local_addr().await.is_some());

    daemon.teardown().await;

    assert!(control.local_addr().await.is_none());
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn none_mode_has_no_control_plane() {
    let tmp = TempDir::new().unwrap();
    let (daemon, _transport) = running_daemon(&tmp).await;
    assert!(daemon.control().is_none());
}

// ─────────────────────────────────────────────────────────────────────────────
// Unpaired device: the socket opens but `Connected` never arrives
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn one_shot_on_unpaired_device_exits_with_failure() {
    let tmp = TempDir::new().unwrap();
    let transport = FakeTransport::new();
    let daemon = Daemon::new(
        &config(&tmp, Mode::None),
        tmp.path().to_path_buf(),
        Arc::clone(&transport) as Arc<dyn Transport>,
    );
    let command = ["send", "15550003333", "hi"].map(String::from).to_vec();

    let code = tokio::time::timeout(Duration::from_secs(3), daemon.drive(command))
        .await
        .expect("one-shot returns without waiting for login")
        .unwrap();

    assert_eq!(code, 1);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn unpaired_device_skips_login_commands_but_pairs_by_phone() {
    let tmp = TempDir::new().unwrap();
    let transport = FakeTransport::new();
    let daemon = Daemon::new(
        &config(&tmp, Mode::None),
        tmp.path().to_path_buf(),
        Arc::clone(&transport) as Arc<dyn Transport>,
    );
    daemon.start().await.unwrap();
    transport
        .emit(Event::QrCode {
            code: "2@AQ1234567890,abcdef,ghijkl".into(),
        })
        .await;
    assert!(daemon.session().is_link_open());

    daemon
        .serve_lines("send 15550003333 hi\npair-phone +15550001111\n".as_bytes())
        .await;

    assert!(eventually(|| transport.pair_requests() == ["15550001111"]).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(transport.sent().is_empty());
}
