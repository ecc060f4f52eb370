//! Boundary to the messaging SDK.
//!
//! The rest of the agent talks to a [`Transport`] and receives [`Event`]s
//! through an [`EventSink`]. The message model in [`message`] is
//! transport-neutral so tests can drive the whole pipeline with a fake.

pub mod events;
pub mod message;
pub mod traits;
pub mod whatsapp_web;

pub use events::{Event, PairingRequest, CRITICAL_BLOCK};
pub use traits::{EventSink, Presence, Transport, TransportError, TransportResult};
pub use whatsapp_web::{WhatsAppWebOptions, WhatsAppWebTransport};
