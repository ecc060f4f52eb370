//! WhatsApp Web transport backed by wa-rs (native Rust implementation).
//!
//! # Feature Flag
//!
//! The adapter requires the `whatsapp-web` feature flag:
//! ```sh
//! cargo build --features whatsapp-web
//! ```
//!
//! Without it the binary still builds, but [`WhatsAppWebTransport::connect`]
//! fails with a hint to rebuild.
//!
//! The adapter covers the session lifecycle, inbound text and link messages,
//! device linking and plain text sends. Everything else reports
//! [`TransportError::Unsupported`].

#[cfg(feature = "whatsapp-web")]
use super::events::Event;
use super::message::{GroupInfo, MediaAttachment, MediaHandle, MediaKind, MessageEvent, OutgoingMessage, SendReceipt};
use super::traits::{EventSink, Presence, Transport, TransportError, TransportResult};
use crate::jid::Jid;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
#[cfg(feature = "whatsapp-web")]
use std::sync::atomic::{AtomicBool, Ordering};

/// Settings the adapter needs to open a session.
#[derive(Debug, Clone, Default)]
pub struct WhatsAppWebOptions {
    /// SQLite session database path.
    pub session_path: String,
    /// Phone number for pair-code linking instead of QR.
    pub pair_phone: Option<String>,
    /// Override for the WebSocket endpoint.
    pub ws_url: Option<String>,
    /// Name announced with presence updates.
    pub display_name: String,
    /// Ask for the full message history on first pairing.
    pub request_full_sync: bool,
}

#[cfg(feature = "whatsapp-web")]
pub struct WhatsAppWebTransport {
    options: WhatsAppWebOptions,
    sink: Mutex<Option<Arc<dyn EventSink>>>,
    bot_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    client: Arc<Mutex<Option<Arc<wa_rs::Client>>>>,
    connected: Arc<AtomicBool>,
    logged_in: Arc<AtomicBool>,
    own_jid: Arc<Mutex<Option<Jid>>>,
}

#[cfg(feature = "whatsapp-web")]
impl WhatsAppWebTransport {
    pub fn new(options: WhatsAppWebOptions) -> Self {
        Self {
            options,
            sink: Mutex::new(None),
            bot_handle: Mutex::new(None),
            client: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            logged_in: Arc::new(AtomicBool::new(false)),
            own_jid: Arc::new(Mutex::new(None)),
        }
    }

    fn client(&self) -> TransportResult<Arc<wa_rs::Client>> {
        self.client.lock().clone().ok_or(TransportError::NotConnected)
    }

    fn to_wa_jid(jid: &Jid) -> TransportResult<wa_rs_binary::jid::Jid> {
        jid.to_string()
            .parse::<wa_rs_binary::jid::Jid>()
            .map_err(|e| TransportError::Other(anyhow::anyhow!("invalid address {jid}: {e}")))
    }

    fn from_wa_jid(jid: &wa_rs_binary::jid::Jid) -> Jid {
        jid.to_string().parse().unwrap_or_default()
    }

    /// Rich text body. A preview with a canonical URL is a media-type message.
    fn extended_content(
        ext: &wa_rs_proto::whatsapp::message::ExtendedTextMessage,
    ) -> (super::message::MessageKind, super::message::MessageContent) {
        use super::message::{ExtendedText, MessageContent, MessageKind};

        let extended = ExtendedText {
            text: ext.text.clone().unwrap_or_default(),
            matched_text: ext.matched_text.clone().unwrap_or_default(),
            canonical_url: ext.canonical_url.clone().unwrap_or_default(),
            description: ext.description.clone().unwrap_or_default(),
            title: ext.title.clone().unwrap_or_default(),
            jpeg_thumbnail: ext.jpeg_thumbnail.clone().unwrap_or_default(),
        };
        let kind = if extended.canonical_url.is_empty() {
            MessageKind::Text
        } else {
            MessageKind::Media
        };
        (
            kind,
            MessageContent {
                extended_text: Some(extended),
                ..MessageContent::default()
            },
        )
    }
}

#[cfg(feature = "whatsapp-web")]
#[async_trait]
impl Transport for WhatsAppWebTransport {
    fn name(&self) -> &str {
        "whatsapp-web"
    }

    fn register_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.lock() = Some(sink);
    }

    async fn connect(&self) -> TransportResult<()> {
        use super::message::{MessageContent, MessageInfo, MessageKind};
        use wa_rs::bot::Bot;
        use wa_rs::pair_code::PairCodeOptions;
        use wa_rs_core::proto_helpers::MessageExt;
        use wa_rs_core::types::events::Event as WaEvent;
        use wa_rs_sqlite_storage::SqliteStore;
        use wa_rs_tokio_transport::TokioWebSocketTransportFactory;
        use wa_rs_ureq_http::UreqHttpClient;

        let Some(sink) = self.sink.lock().clone() else {
            return Err(TransportError::Other(anyhow::anyhow!(
                "no event sink registered before connect"
            )));
        };

        tracing::info!(
            "WhatsApp Web transport starting (session: {})",
            self.options.session_path
        );
        if self.options.request_full_sync {
            tracing::warn!("Full history sync cannot be requested with this transport; using the default history window");
        }

        let backend = Arc::new(
            SqliteStore::new(&self.options.session_path)
                .await
                .map_err(|e| anyhow::anyhow!("failed to open session store: {e}"))?,
        );

        let mut transport_factory = TokioWebSocketTransportFactory::new();
        if let Some(ws_url) = &self.options.ws_url {
            transport_factory = transport_factory.with_url(ws_url.clone());
        }

        let connected = Arc::clone(&self.connected);
        let logged_in = Arc::clone(&self.logged_in);
        let own_jid = Arc::clone(&self.own_jid);

        let mut builder = Bot::builder()
            .with_backend(backend)
            .with_transport_factory(transport_factory)
            .with_http_client(UreqHttpClient::new())
            .on_event(move |event, client| {
                let sink = Arc::clone(&sink);
                let connected = Arc::clone(&connected);
                let logged_in = Arc::clone(&logged_in);
                let own_jid = Arc::clone(&own_jid);
                async move {
                    let translated = match event {
                        WaEvent::Message(msg, info) => {
                            let (kind, message) = match msg.extended_text_message.as_ref() {
                                Some(ext) => Self::extended_content(ext),
                                None => (
                                    MessageKind::Text,
                                    MessageContent::text(msg.text_content().unwrap_or("").to_string()),
                                ),
                            };
                            Event::Message(Box::new(MessageEvent {
                                info: MessageInfo {
                                    id: info.id.to_string(),
                                    sender: Self::from_wa_jid(&info.source.sender),
                                    chat: Self::from_wa_jid(&info.source.chat),
                                    push_name: info.push_name.clone(),
                                    timestamp: info.timestamp,
                                    is_from_me: info.source.is_from_me,
                                    is_group: info.source.is_group,
                                    kind,
                                },
                                message,
                            }))
                        }
                        WaEvent::Connected(_) => {
                            // Own identity lives in the device store once pairing completed.
                            *own_jid.lock() = client.get_pn().await.map(|jid| Self::from_wa_jid(&jid));
                            connected.store(true, Ordering::SeqCst);
                            logged_in.store(true, Ordering::SeqCst);
                            Event::Connected
                        }
                        WaEvent::LoggedOut(_) => {
                            *own_jid.lock() = None;
                            connected.store(false, Ordering::SeqCst);
                            logged_in.store(false, Ordering::SeqCst);
                            Event::LoggedOut {
                                on_connect: false,
                                reason: "logged out".into(),
                            }
                        }
                        WaEvent::StreamError(stream_error) => {
                            tracing::error!("WhatsApp Web stream error: {:?}", stream_error);
                            connected.store(false, Ordering::SeqCst);
                            Event::Disconnected
                        }
                        WaEvent::PairingCode { code, .. } => Event::PairingCode { code },
                        WaEvent::PairingQrCode { code, .. } => Event::QrCode { code },
                        _ => return,
                    };
                    sink.handle_event(translated).await;
                }
            });

        if let Some(phone) = &self.options.pair_phone {
            tracing::info!("WhatsApp Web: pair-code flow enabled for configured phone number");
            builder = builder.with_pair_code(PairCodeOptions {
                phone_number: phone.clone(),
                ..Default::default()
            });
        }

        let mut bot = builder
            .build()
            .await
            .map_err(|e| anyhow::anyhow!("failed to build WhatsApp Web client: {e}"))?;
        *self.client.lock() = Some(bot.client());

        let handle = bot
            .run()
            .await
            .map_err(|e| anyhow::anyhow!("failed to start WhatsApp Web client: {e}"))?;
        *self.bot_handle.lock() = Some(handle);
        Ok(())
    }

    async fn disconnect(&self) {
        *self.client.lock() = None;
        if let Some(handle) = self.bot_handle.lock().take() {
            handle.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    fn own_jid(&self) -> Option<Jid> {
        self.own_jid.lock().clone()
    }

    fn push_name(&self) -> String {
        if self.is_logged_in() {
            self.options.display_name.clone()
        } else {
            String::new()
        }
    }

    async fn send_presence(&self, _presence: Presence) -> TransportResult<()> {
        // wa-rs announces availability on its own once the stream is up.
        self.client().map(|_| ())
    }

    async fn send_message(&self, to: &Jid, message: OutgoingMessage) -> TransportResult<SendReceipt> {
        let client = self.client()?;
        let text = match message {
            OutgoingMessage::Text(text) => text,
            OutgoingMessage::Link(link) => link.text,
            other => return Err(TransportError::Unsupported(other.label())),
        };
        let outgoing = wa_rs_proto::whatsapp::Message {
            conversation: Some(text),
            ..Default::default()
        };
        let id = client
            .send_message(Self::to_wa_jid(to)?, outgoing)
            .await
            .map_err(|e| anyhow::anyhow!("send failed: {e}"))?;
        Ok(SendReceipt {
            id: id.to_string(),
            timestamp: chrono::Utc::now(),
        })
    }

    async fn joined_groups(&self) -> TransportResult<Vec<GroupInfo>> {
        // Group metadata is not exposed by the adapter; names resolve as unknown.
        tracing::debug!("WhatsApp Web: group directory unavailable, using empty list");
        Ok(Vec::new())
    }

    async fn group_info(&self, _group: &Jid) -> TransportResult<GroupInfo> {
        Err(TransportError::Unsupported("getgroup"))
    }

    async fn upload(&self, _data: Vec<u8>, _kind: MediaKind) -> TransportResult<MediaHandle> {
        Err(TransportError::Unsupported("media upload"))
    }

    async fn download(&self, _media: &MediaAttachment) -> TransportResult<Vec<u8>> {
        Err(TransportError::Unsupported("media download"))
    }

    async fn decrypt_poll_vote(&self, _message: &MessageEvent) -> TransportResult<Vec<Vec<u8>>> {
        Err(TransportError::Unsupported("poll vote decryption"))
    }
}

// Stub implementation when feature is not enabled
#[cfg(not(feature = "whatsapp-web"))]
pub struct WhatsAppWebTransport {
    sink: Mutex<Option<Arc<dyn EventSink>>>,
}

#[cfg(not(feature = "whatsapp-web"))]
impl WhatsAppWebTransport {
    pub fn new(_options: WhatsAppWebOptions) -> Self {
        Self {
            sink: Mutex::new(None),
        }
    }
}

#[cfg(not(feature = "whatsapp-web"))]
const FEATURE_HINT: &str =
    "WhatsApp Web transport requires the 'whatsapp-web' feature. Enable with: cargo build --features whatsapp-web";

#[cfg(not(feature = "whatsapp-web"))]
#[async_trait]
impl Transport for WhatsAppWebTransport {
    fn name(&self) -> &str {
        "whatsapp-web"
    }

    fn register_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.lock() = Some(sink);
    }

    async fn connect(&self) -> TransportResult<()> {
        Err(TransportError::Other(anyhow::anyhow!(FEATURE_HINT)))
    }

    async fn disconnect(&self) {}

    fn is_connected(&self) -> bool {
        false
    }

    fn is_logged_in(&self) -> bool {
        false
    }

    fn own_jid(&self) -> Option<Jid> {
        None
    }

    fn push_name(&self) -> String {
        String::new()
    }

    async fn send_presence(&self, _presence: Presence) -> TransportResult<()> {
        Err(TransportError::NotConnected)
    }

    async fn send_message(&self, _to: &Jid, _message: OutgoingMessage) -> TransportResult<SendReceipt> {
        Err(TransportError::NotConnected)
    }

    async fn joined_groups(&self) -> TransportResult<Vec<GroupInfo>> {
        Err(TransportError::NotConnected)
    }

    async fn group_info(&self, _group: &Jid) -> TransportResult<GroupInfo> {
        Err(TransportError::NotConnected)
    }

    async fn upload(&self, _data: Vec<u8>, _kind: MediaKind) -> TransportResult<MediaHandle> {
        Err(TransportError::NotConnected)
    }

    async fn download(&self, _media: &MediaAttachment) -> TransportResult<Vec<u8>> {
        Err(TransportError::NotConnected)
    }

    async fn decrypt_poll_vote(&self, _message: &MessageEvent) -> TransportResult<Vec<Vec<u8>>> {
        Err(TransportError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "whatsapp-web"))]
    #[tokio::test]
    async fn stub_refuses_to_connect_with_rebuild_hint() {
        let transport = WhatsAppWebTransport::new(WhatsAppWebOptions::default());
        let err = transport.connect().await.unwrap_err();
        assert!(err.to_string().contains("--features whatsapp-web"));
        assert!(!transport.is_connected());
        assert!(!transport.is_logged_in());
    }

    #[cfg(feature = "whatsapp-web")]
    #[tokio::test]
    async fn adapter_is_offline_before_connect() {
        let transport = WhatsAppWebTransport::new(WhatsAppWebOptions {
            session_path: "/tmp/waclaw-test.db".into(),
            display_name: "waclaw".into(),
            ..WhatsAppWebOptions::default()
        });
        assert!(!transport.is_connected());
        assert!(transport.push_name().is_empty());
        assert!(matches!(
            transport.send_message(&Jid::user("1"), OutgoingMessage::Text("hi".into())).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[cfg(feature = "whatsapp-web")]
    #[test]
    fn link_preview_keeps_sdk_fields() {
        use crate::transport::message::MessageKind;
        use wa_rs_proto::whatsapp::message::ExtendedTextMessage;

        let ext = ExtendedTextMessage {
            text: Some("look https://example.com".into()),
            matched_text: Some("https://example.com".into()),
            canonical_url: Some("https://example.com/".into()),
            title: Some("Example".into()),
            jpeg_thumbnail: Some(vec![0xFF, 0xD8]),
            ..Default::default()
        };
        let (kind, content) = WhatsAppWebTransport::extended_content(&ext);
        assert_eq!(kind, MessageKind::Media);
        let extended = content.extended_text.unwrap();
        assert_eq!(extended.canonical_url, "https://example.com/");
        assert_eq!(extended.title, "Example");
        assert_eq!(extended.jpeg_thumbnail, vec![0xFF, 0xD8]);

        let plain = ExtendedTextMessage {
            text: Some("*bold*".into()),
            ..Default::default()
        };
        assert_eq!(WhatsAppWebTransport::extended_content(&plain).0, MessageKind::Text);
    }
}
