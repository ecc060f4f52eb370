//! Inbound messages from the transport through normalization to the local delivery sink.

mod support;

use chrono::{TimeZone, Utc};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use support::{FakeTransport, eventually};
use tempfile::TempDir;
use waclaw::config::Mode;
use waclaw::delivery::Delivery;
use waclaw::dispatcher::EventDispatcher;
use waclaw::jid::{GROUP_SERVER, Jid};
use waclaw::normalizer::{NormalizeError, Normalizer, NormalizerOptions};
use waclaw::polls::PollStore;
use waclaw::session::{Session, SessionOptions};
use waclaw::shutdown::Shutdown;
use waclaw::transport::message::{
    ExtendedText, GroupInfo, MessageContent, MessageEvent, MessageInfo, MessageKind, PollUpdate,
};
use waclaw::transport::{Event, EventSink, Transport};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OWN: &str = "15550001111";

struct Pipeline {
    transport: Arc<FakeTransport>,
    session: Arc<Session>,
    normalizer: Arc<Normalizer>,
    dispatcher: Arc<EventDispatcher>,
    polls: Arc<PollStore>,
    server: MockServer,
    workspace: TempDir,
}

impl Pipeline {
    async fn start() -> Self {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let workspace = TempDir::new().unwrap();
        let transport = FakeTransport::paired(OWN);
        transport.set_push_name("Agent");
        transport.set_groups(vec![GroupInfo {
            jid: Jid::new("120363001", GROUP_SERVER),
            name: "Family".into(),
            participants: Vec::new(),
        }]);

        let session = Session::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            SessionOptions {
                mode: Mode::Both,
                ..SessionOptions::default()
            },
            Shutdown::new(),
        );
        let polls = Arc::new(PollStore::new(16, Duration::from_secs(60), None));
        let normalizer = Arc::new(Normalizer::new(
            Arc::clone(&session),
            Arc::clone(&polls),
            Delivery::new(format!("{}/message", server.uri()), Duration::from_secs(1)),
            NormalizerOptions {
                port: 7774,
                workspace: workspace.path().to_path_buf(),
                save_media: false,
                auto_delete: None,
            },
        ));
        let dispatcher = EventDispatcher::new(Arc::clone(&session), Some(Arc::clone(&normalizer)));
        session
            .start(Arc::clone(&dispatcher) as Arc<dyn EventSink>)
            .await
            .unwrap();

        Self {
            transport,
            session,
            normalizer,
            dispatcher,
            polls,
            server,
            workspace,
        }
    }

    async fn delivered(&self) -> Vec<serde_json::Value> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|request| serde_json::from_slice(&request.body).unwrap())
            .collect()
    }

    async fn wait_for_deliveries(&self, n: usize) -> Vec<serde_json::Value> {
        for _ in 0..200 {
            let delivered = self.delivered().await;
            if delivered.len() >= n {
                return delivered;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.delivered().await
    }
}

fn message(id: &str, sender: Jid, chat: Jid, content: MessageContent) -> MessageEvent {
    MessageEvent {
        info: MessageInfo {
            id: id.into(),
            is_group: chat.is_group(),
            sender,
            chat,
            push_name: "Alice".into(),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            is_from_me: false,
            kind: MessageKind::Text,
        },
        message: content,
    }
}

fn files_under(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch and delivery
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_messages_are_counted_and_drain_after_delivery() {
    let pipeline = Pipeline::start().await;
    let sender = Jid::user("15550002222");

    for i in 0..5 {
        let event = message(
            &format!("MSG{i}"),
            sender.clone(),
            sender.clone(),
            MessageContent::text(format!("hello {i}")),
        );
        pipeline.transport.emit(Event::Message(Box::new(event))).await;
        assert_eq!(pipeline.session.inflight().count(), i + 1);
    }

    // Tasks wait for the group directory, which loads once the session is available.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(pipeline.delivered().await.is_empty());
    pipeline.transport.emit(Event::Connected).await;

    let delivered = pipeline.wait_for_deliveries(5).await;
    assert_eq!(delivered.len(), 5);
    let session = Arc::clone(&pipeline.session);
    assert!(eventually(|| session.inflight().count() == 0).await);

    let mut ids: Vec<_> = delivered
        .iter()
        .map(|record| record["message_id"].as_str().unwrap().to_string())
        .collect();
    ids.sort();
    assert_eq!(ids, ["MSG0", "MSG1", "MSG2", "MSG3", "MSG4"]);
}

#[tokio::test]
async fn offline_sync_settles_only_after_its_messages_are_handled() {
    let pipeline = Pipeline::start().await;
    let sender = Jid::user("15550002222");
    for i in 0..2 {
        let event = message(
            &format!("OFF{i}"),
            sender.clone(),
            sender.clone(),
            MessageContent::text("queued while offline"),
        );
        pipeline.transport.emit(Event::Message(Box::new(event))).await;
    }

    pipeline
        .transport
        .emit(Event::OfflineSyncCompleted { count: 2 })
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pipeline.dispatcher.is_offline_synced());

    pipeline.transport.emit(Event::Connected).await;
    let dispatcher = Arc::clone(&pipeline.dispatcher);
    assert!(eventually(|| dispatcher.is_offline_synced()).await);
    assert_eq!(pipeline.session.inflight().count(), 0);
    assert_eq!(pipeline.wait_for_deliveries(2).await.len(), 2);
}

#[tokio::test]
async fn self_chat_is_delivered_under_own_address() {
    let pipeline = Pipeline::start().await;
    pipeline.transport.emit(Event::Connected).await;

    let other = Jid::user("15550002222");
    let event = message("SELF1", other.clone(), other, MessageContent::text("note to self"));
    pipeline.transport.emit(Event::Message(Box::new(event))).await;

    let delivered = pipeline.wait_for_deliveries(1).await;
    assert_eq!(
        delivered[0],
        serde_json::json!({
            "port": "7774",
            "type": "text_message",
            "message": "note to self",
            "message_id": "SELF1",
            "sender_jid": "15550002222@s.whatsapp.net",
            "receiver_jid": format!("{OWN}@s.whatsapp.net"),
            "sender_pushname": "Alice",
            "is_from_myself": "false",
            "is_group": "false",
            "time_stamp": "1700000000",
        })
    );
}

#[tokio::test]
async fn group_messages_carry_the_group_name() {
    let pipeline = Pipeline::start().await;
    pipeline.transport.emit(Event::Connected).await;

    let event = message(
        "GRP1",
        Jid::user("15550002222"),
        Jid::new("120363001", GROUP_SERVER),
        MessageContent::text("dinner?"),
    );
    pipeline.transport.emit(Event::Message(Box::new(event))).await;

    let delivered = pipeline.wait_for_deliveries(1).await;
    assert_eq!(delivered[0]["is_group"], "true");
    assert_eq!(delivered[0]["group_name"], "Family");
    assert_eq!(delivered[0]["receiver_jid"], "120363001@g.us");
}

// ─────────────────────────────────────────────────────────────────────────────
// Status broadcast
// ─────────────────────────────────────────────────────────────────────────────

fn status_update(id: &str, kind: MessageKind, extended: ExtendedText) -> MessageEvent {
    let mut event = message(
        id,
        Jid::user("15550002222"),
        Jid::status_broadcast(),
        MessageContent {
            extended_text: Some(extended),
            ..MessageContent::default()
        },
    );
    event.info.kind = kind;
    event
}

#[tokio::test]
async fn status_text_is_filed_under_own_address() {
    let pipeline = Pipeline::start().await;
    pipeline.transport.emit(Event::Connected).await;

    let event = status_update(
        "STAT1",
        MessageKind::Text,
        ExtendedText {
            text: "out for lunch".into(),
            ..ExtendedText::default()
        },
    );
    pipeline.transport.emit(Event::Message(Box::new(event))).await;

    let delivered = pipeline.wait_for_deliveries(1).await;
    assert_eq!(delivered[0]["type"], "status_message");
    assert_eq!(delivered[0]["message"], "out for lunch");
    assert_eq!(delivered[0]["receiver_jid"], format!("{OWN}@s.whatsapp.net"));
    assert_eq!(delivered[0]["is_group"], "false");
    assert!(delivered[0].get("group_name").is_none());
}

#[tokio::test]
async fn status_link_keeps_link_fields_under_status_type() {
    let pipeline = Pipeline::start().await;
    pipeline.transport.emit(Event::Connected).await;

    let event = status_update(
        "STAT2",
        MessageKind::Media,
        ExtendedText {
            text: "read this https://example.com".into(),
            matched_text: "https://example.com".into(),
            canonical_url: "https://example.com/".into(),
            title: "Example".into(),
            jpeg_thumbnail: vec![0xFF, 0xD8, 0xFF],
            ..ExtendedText::default()
        },
    );
    pipeline.transport.emit(Event::Message(Box::new(event))).await;

    let delivered = pipeline.wait_for_deliveries(1).await;
    let record = &delivered[0];
    assert_eq!(record["type"], "status_message");
    assert_eq!(record["receiver_jid"], format!("{OWN}@s.whatsapp.net"));
    assert_eq!(record["link_title"], "Example");
    let saved = pipeline.workspace.path().join("media").join("link").join("STAT2.jpg");
    assert_eq!(record["path"], saved.to_string_lossy().as_ref());
}

// ─────────────────────────────────────────────────────────────────────────────
// Polls
// ─────────────────────────────────────────────────────────────────────────────

fn vote(id: &str, poll_id: &str) -> MessageEvent {
    let sender = Jid::user("15550002222");
    let mut event = message(
        id,
        sender.clone(),
        sender,
        MessageContent {
            poll_update: Some(PollUpdate {
                poll_creation_id: poll_id.into(),
                ..PollUpdate::default()
            }),
            ..MessageContent::default()
        },
    );
    event.info.kind = MessageKind::Poll;
    event
}

#[tokio::test]
async fn vote_for_known_poll_is_resolved_to_option_text() {
    let pipeline = Pipeline::start().await;
    pipeline.transport.emit(Event::Connected).await;
    pipeline
        .polls
        .record("POLL1", "Lunch?", &["Pizza".to_string(), "Sushi".to_string()]);
    pipeline
        .transport
        .set_poll_vote(vec![Sha256::digest(b"Sushi").to_vec()]);

    pipeline
        .transport
        .emit(Event::Message(Box::new(vote("VOTE1", "POLL1"))))
        .await;

    let delivered = pipeline.wait_for_deliveries(1).await;
    assert_eq!(delivered[0]["type"], "poll_response_message");
    assert_eq!(delivered[0]["message_id"], "POLL1");
    assert_eq!(delivered[0]["poll_question"], "Lunch?");
    assert_eq!(delivered[0]["poll_selected_options"], serde_json::json!(["Sushi"]));
}

#[tokio::test]
async fn vote_for_unknown_poll_is_not_delivered() {
    let pipeline = Pipeline::start().await;
    pipeline.transport.emit(Event::Connected).await;
    pipeline
        .transport
        .set_poll_vote(vec![Sha256::digest(b"Sushi").to_vec()]);

    let err = pipeline.normalizer.normalize(&vote("VOTE2", "MISSING")).await.unwrap_err();
    assert!(matches!(err, NormalizeError::UnknownPoll(ref id) if id == "MISSING"));

    pipeline
        .transport
        .emit(Event::Message(Box::new(vote("VOTE2", "MISSING"))))
        .await;
    let session = Arc::clone(&pipeline.session);
    assert!(eventually(|| session.inflight().count() == 0).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(pipeline.delivered().await.is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Link previews
// ─────────────────────────────────────────────────────────────────────────────

fn link(id: &str, thumbnail: Vec<u8>) -> MessageEvent {
    let sender = Jid::user("15550002222");
    let mut event = message(
        id,
        sender.clone(),
        sender,
        MessageContent {
            extended_text: Some(ExtendedText {
                text: "look https://example.com".into(),
                matched_text: "https://example.com".into(),
                canonical_url: "https://example.com/".into(),
                description: "An example".into(),
                title: "Example".into(),
                jpeg_thumbnail: thumbnail,
            }),
            ..MessageContent::default()
        },
    );
    event.info.kind = MessageKind::Media;
    event
}

#[tokio::test]
async fn link_with_empty_thumbnail_is_dropped_without_writing() {
    let pipeline = Pipeline::start().await;
    pipeline.transport.emit(Event::Connected).await;

    let err = pipeline.normalizer.normalize(&link("LINK0", Vec::new())).await.unwrap_err();
    assert!(matches!(err, NormalizeError::EmptyThumbnail(_)));

    pipeline
        .transport
        .emit(Event::Message(Box::new(link("LINK0", Vec::new()))))
        .await;
    let session = Arc::clone(&pipeline.session);
    assert!(eventually(|| session.inflight().count() == 0).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(pipeline.delivered().await.is_empty());
    assert_eq!(files_under(&pipeline.workspace.path().join("media").join("link")), 0);
}

#[tokio::test]
async fn link_with_thumbnail_is_saved_and_delivered() {
    let pipeline = Pipeline::start().await;
    pipeline.transport.emit(Event::Connected).await;

    pipeline
        .transport
        .emit(Event::Message(Box::new(link("LINK1", vec![0xFF, 0xD8, 0xFF]))))
        .await;

    let delivered = pipeline.wait_for_deliveries(1).await;
    let record = &delivered[0];
    assert_eq!(record["type"], "link_message");
    assert_eq!(record["link_title"], "Example");
    assert_eq!(record["link_canonical_url"], "https://example.com/");

    let saved = pipeline.workspace.path().join("media").join("link").join("LINK1.jpg");
    assert_eq!(record["path"], saved.to_string_lossy().as_ref());
    assert_eq!(std::fs::read(&saved).unwrap(), vec![0xFF, 0xD8, 0xFF]);
}
