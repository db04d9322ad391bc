use tracing::debug;

use super::TelegramClient;
use crate::core::error::{CloneError, Result};

/// Locally parsed form of a user-supplied chat identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRef {
    /// Numeric id, passed through untouched.
    Id(i64),
    /// Public handle, resolved with a platform round-trip.
    Username(String),
    /// `t.me/c/<internal>/...` private link, already canonical.
    Private {
        chat_id: i64,
        message_id: Option<i64>,
    },
    /// `t.me/<name>[/<msg>]` public link.
    Public {
        username: String,
        message_id: Option<i64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedChat {
    pub chat_id: i64,
    pub message_id: Option<i64>,
}

fn is_valid_username(value: &str) -> bool {
    value.len() >= 4
        && value.len() <= 32
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn trailing_message_id<'a>(mut segments: impl Iterator<Item = &'a str>) -> Option<i64> {
    segments
        .next()
        .and_then(|segment| segment.split('?').next())
        .and_then(|segment| segment.parse().ok())
}

/// Parse an identifier without touching the network. Errors here mean the
/// input is locally unintelligible, as opposed to a chat we cannot access.
pub fn parse_identifier(input: &str) -> Result<ChatRef> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CloneError::Unresolvable("empty identifier".into()));
    }

    if let Ok(id) = trimmed.parse::<i64>() {
        return Ok(ChatRef::Id(id));
    }

    if let Some(handle) = trimmed.strip_prefix('@') {
        if is_valid_username(handle) {
            return Ok(ChatRef::Username(handle.to_string()));
        }
        return Err(CloneError::Unresolvable(input.to_string()));
    }

    // Private links carry the internal channel id: recover the -100 form.
    if let Some(rest) = trimmed.split_once("/c/").map(|(_, rest)| rest) {
        let mut segments = rest.split('/');
        let internal = segments
            .next()
            .and_then(|segment| segment.split('?').next())
            .filter(|segment| !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()))
            .ok_or_else(|| CloneError::Unresolvable(input.to_string()))?;
        let chat_id: i64 = format!("-100{internal}")
            .parse()
            .map_err(|_| CloneError::Unresolvable(input.to_string()))?;
        return Ok(ChatRef::Private {
            chat_id,
            message_id: trailing_message_id(segments),
        });
    }

    if let Some(pos) = trimmed.find("t.me/") {
        let mut segments = trimmed[pos + "t.me/".len()..].split('/');
        let handle = segments
            .next()
            .map(|segment| segment.split('?').next().unwrap_or(segment))
            .ok_or_else(|| CloneError::Unresolvable(input.to_string()))?;
        if !is_valid_username(handle) {
            return Err(CloneError::Unresolvable(input.to_string()));
        }
        return Ok(ChatRef::Public {
            username: handle.to_string(),
            message_id: trailing_message_id(segments),
        });
    }

    // Anything else is treated as a bare handle.
    if is_valid_username(trimmed) {
        return Ok(ChatRef::Username(trimmed.to_string()));
    }
    Err(CloneError::Unresolvable(input.to_string()))
}

/// Resolve an identifier to a canonical chat id, plus the message id when
/// the input was a message link. Handle look-ups go through the platform and
/// surface access failures as `Permanent`.
pub async fn resolve(client: &dyn TelegramClient, input: &str) -> Result<ResolvedChat> {
    match parse_identifier(input)? {
        ChatRef::Id(chat_id) => Ok(ResolvedChat {
            chat_id,
            message_id: None,
        }),
        ChatRef::Private {
            chat_id,
            message_id,
        } => Ok(ResolvedChat {
            chat_id,
            message_id,
        }),
        ChatRef::Username(username) => {
            debug!(username, "resolving handle via platform");
            let chat_id = client.resolve_username(&username).await?;
            Ok(ResolvedChat {
                chat_id,
                message_id: None,
            })
        }
        ChatRef::Public {
            username,
            message_id,
        } => {
            debug!(username, "resolving public link via platform");
            let chat_id = client.resolve_username(&username).await?;
            Ok(ResolvedChat {
                chat_id,
                message_id,
            })
        }
    }
}
