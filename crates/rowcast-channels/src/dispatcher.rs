//! Channel dispatcher — one recipient token, one message.
//!
//! Resolves the destination, tries the attachment first and falls back to
//! text. Only a failed text send is reported as a failure.

use rowcast_core::error::Result;
use rowcast_core::traits::MessageTransport;
use serde::Serialize;
use std::sync::Arc;

use crate::destination::Destination;

/// How a message was finally delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    WithAttachment,
    TextOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    pub address: String,
    pub kind: DeliveryKind,
}

/// Stateless sender over a shared transport session.
#[derive(Clone)]
pub struct ChannelDispatcher {
    transport: Arc<dyn MessageTransport>,
}

impl ChannelDispatcher {
    pub fn new(transport: Arc<dyn MessageTransport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn MessageTransport> {
        &self.transport
    }

    /// Resolve a raw token to a chat address. Joining a group the session
    /// is already in returns the existing group.
    pub async fn resolve(&self, destination: &str) -> Result<String> {
        match Destination::parse(destination)? {
            Destination::Direct(address) => Ok(address),
            Destination::GroupInvite { code } => {
                let address = self.transport.resolve_group_invite(&code).await?;
                tracing::info!("Joined group {destination} as {address}");
                Ok(address)
            }
        }
    }

    pub async fn send(
        &self,
        destination: &str,
        body: &str,
        attachment: Option<&str>,
    ) -> Result<DeliveryOutcome> {
        let address = self.resolve(destination).await?;

        if let Some(url) = attachment {
            match self.transport.send_media(&address, url, body).await {
                Ok(()) => {
                    tracing::debug!("Sent with attachment to {address}");
                    return Ok(DeliveryOutcome {
                        address,
                        kind: DeliveryKind::WithAttachment,
                    });
                }
                Err(e) => {
                    tracing::warn!("Attachment send failed to {address}, falling back to text: {e}");
                }
            }
        }

        self.transport.send_text(&address, body).await?;
        tracing::debug!("Sent text-only to {address}");
        Ok(DeliveryOutcome {
            address,
            kind: DeliveryKind::TextOnly,
        })
    }
}
