//! Adapter seams. The dispatch core only ever talks to these traits.

pub mod store;
pub mod transport;

pub use store::RecordStore;
pub use transport::MessageTransport;
