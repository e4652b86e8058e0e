//! Recipient token classification — direct numbers vs. group invites.

use regex::Regex;
use rowcast_core::error::{Result, RowcastError};
use std::sync::LazyLock;

/// Suffix of a canonical direct-chat address.
pub const DIRECT_SUFFIX: &str = "@c.us";

const INVITE_HOST: &str = "chat.whatsapp.com";

static INVITE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"chat\.whatsapp\.com/([a-zA-Z0-9]+)").expect("static regex"));

/// Where one recipient token points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Canonical `<digits>@c.us` address.
    Direct(String),
    /// Group reached through an invite link.
    GroupInvite { code: String },
}

impl Destination {
    /// Classify a raw token from the recipients cell.
    pub fn parse(raw: &str) -> Result<Self> {
        let token = raw.trim();

        if token.contains(INVITE_HOST) {
            return INVITE_CODE
                .captures(token)
                .and_then(|c| c.get(1))
                .map(|code| Destination::GroupInvite {
                    code: code.as_str().to_string(),
                })
                .ok_or_else(|| RowcastError::InvalidInvite(token.to_string()));
        }

        if token.contains(DIRECT_SUFFIX) {
            return Ok(Destination::Direct(token.to_string()));
        }

        let digits: String = token.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return Err(RowcastError::InvalidDestination(token.to_string()));
        }
        Ok(Destination::Direct(format!("{digits}{DIRECT_SUFFIX}")))
    }
}
