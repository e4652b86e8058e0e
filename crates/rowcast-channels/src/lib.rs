//! # Rowcast Channels
//!
//! Message delivery: recipient classification, the per-token channel
//! dispatcher, and transports (WhatsApp HTTP bridge, recording dry-run).

pub mod destination;
pub mod dispatcher;
pub mod recording;
pub mod whatsapp;

pub use destination::Destination;
pub use dispatcher::{ChannelDispatcher, DeliveryKind, DeliveryOutcome};
pub use recording::{RecordingTransport, SentMessage};
pub use whatsapp::WhatsAppBridge;
