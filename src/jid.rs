//! WhatsApp address (JID) parsing.
//!
//! Operators type recipients in several shapes: a bare phone number with or
//! without a leading `+`, a full person address, a group address, or a
//! device-qualified address copied out of a log line. [`parse_recipient`]
//! folds all of them into a canonical [`Jid`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Server for regular user accounts.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
/// Server for group chats.
pub const GROUP_SERVER: &str = "g.us";
/// Server for broadcast lists and status updates.
pub const BROADCAST_SERVER: &str = "broadcast";
/// Server for channels (newsletters).
pub const NEWSLETTER_SERVER: &str = "newsletter";
/// Server for hidden user identifiers.
pub const HIDDEN_USER_SERVER: &str = "lid";
/// Address of the status broadcast pseudo-chat.
pub const STATUS_BROADCAST: &str = "status@broadcast";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JidError {
    #[error("empty address")]
    Empty,
    #[error("address {0:?} has an empty user part")]
    EmptyUser(String),
    #[error("address {0:?} has more than one '@'")]
    TooManySeparators(String),
    #[error("unexpected number of dots in {0:?}")]
    Dots(String),
    #[error("unexpected number of colons in {0:?}")]
    Colons(String),
    #[error("invalid agent or device number in {0:?}")]
    Number(String),
    #[error("input must be a group JID (@g.us), got {0:?}")]
    NotGroup(String),
}

/// Canonical address: `user[.agent][:device]@server`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Jid {
    pub user: String,
    pub raw_agent: u8,
    pub device: u16,
    pub server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            raw_agent: 0,
            device: 0,
            server: server.into(),
        }
    }

    /// Person address on the default server.
    pub fn user(phone: impl Into<String>) -> Self {
        Self::new(phone, DEFAULT_USER_SERVER)
    }

    pub fn status_broadcast() -> Self {
        Self::new("status", BROADCAST_SERVER)
    }

    /// Drops agent and device, leaving the account-level address.
    pub fn to_non_ad(&self) -> Self {
        Self::new(self.user.clone(), self.server.clone())
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    pub fn is_status_broadcast(&self) -> bool {
        self.user == "status" && self.server == BROADCAST_SERVER
    }

    pub fn is_empty(&self) -> bool {
        self.server.is_empty()
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw_agent > 0 {
            write!(
                f,
                "{}.{}:{}@{}",
                self.user, self.raw_agent, self.device, self.server
            )
        } else if self.device > 0 {
            write!(f, "{}:{}@{}", self.user, self.device, self.server)
        } else if self.user.is_empty() {
            f.write_str(&self.server)
        } else {
            write!(f, "{}@{}", self.user, self.server)
        }
    }
}

impl FromStr for Jid {
    type Err = JidError;

    /// Parses a full address. A string without `@` is a bare server name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('@');
        let head = parts.next().unwrap_or_default();
        let Some(server) = parts.next() else {
            return Ok(Self::new("", head));
        };
        if parts.next().is_some() {
            return Err(JidError::TooManySeparators(s.to_string()));
        }

        let mut jid = Self::new(head, server);
        if head.contains('.') {
            let (user, ad) = head
                .split_once('.')
                .ok_or_else(|| JidError::Dots(s.to_string()))?;
            if ad.contains('.') {
                return Err(JidError::Dots(s.to_string()));
            }
            let mut ad_parts = ad.split(':');
            let agent = ad_parts.next().unwrap_or_default();
            let device = ad_parts.next();
            if ad_parts.next().is_some() {
                return Err(JidError::Colons(s.to_string()));
            }
            jid.user = user.to_string();
            jid.raw_agent = agent
                .parse()
                .map_err(|_| JidError::Number(s.to_string()))?;
            if let Some(device) = device {
                jid.device = device
                    .parse()
                    .map_err(|_| JidError::Number(s.to_string()))?;
            }
        } else if head.contains(':') {
            let (user, device) = head
                .split_once(':')
                .ok_or_else(|| JidError::Colons(s.to_string()))?;
            if device.contains(':') {
                return Err(JidError::Colons(s.to_string()));
            }
            jid.user = user.to_string();
            jid.device = device
                .parse()
                .map_err(|_| JidError::Number(s.to_string()))?;
        }
        Ok(jid)
    }
}

impl Serialize for Jid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Jid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Normalize an operator-supplied recipient.
///
/// A leading `+` is stripped. Input without `@` is a phone number on the
/// default user server; anything else must parse as a full address with a
/// non-empty user part.
pub fn parse_recipient(raw: &str) -> Result<Jid, JidError> {
    let trimmed = raw.trim();
    let stripped = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if stripped.is_empty() {
        return Err(JidError::Empty);
    }
    if !stripped.contains('@') {
        return Ok(Jid::user(stripped));
    }
    let jid: Jid = stripped.parse()?;
    if jid.user.is_empty() {
        return Err(JidError::EmptyUser(raw.to_string()));
    }
    Ok(jid)
}

/// Like [`parse_recipient`] but additionally requires a group address.
pub fn parse_group(raw: &str) -> Result<Jid, JidError> {
    let jid = parse_recipient(raw)?;
    if !jid.is_group() {
        return Err(JidError::NotGroup(raw.to_string()));
    }
    Ok(jid)
}
