use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Nesting depth at which reply/renote chains stop being expanded in summaries
pub const MAX_SUMMARY_DEPTH: usize = 3;

const FALLBACK_ERROR_MESSAGE: &str = "API request failed";

/// The authenticated Misskey account, as returned by the `i` endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Option<String>,
    pub name: Option<String>,
    pub username: Option<String>,
    pub host: Option<String>,
    pub notes_count: Option<u64>,
    pub pinned_notes: Option<Vec<Note>>,
}

impl User {
    /// Display name, falling back to the username
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or(self.username.as_deref())
            .unwrap_or("unknown")
    }

    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or("unknown")
    }

    /// Total notes as reported by the server when the account was fetched
    pub fn notes_count(&self) -> u64 {
        self.notes_count.unwrap_or(0)
    }

    pub fn pinned_notes(&self) -> &[Note] {
        self.pinned_notes.as_deref().unwrap_or_default()
    }
}

/// A single note. Replies and renotes may embed the referenced note.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub cw: Option<String>,
    pub media_ids: Option<Vec<String>>,
    pub mentions: Option<Vec<String>>,
    pub reply_id: Option<String>,
    pub reply: Option<Box<Note>>,
    pub renote_id: Option<String>,
    pub renote: Option<Box<Note>>,
    pub user_id: Option<String>,
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| {
        DateTime::parse_from_rfc3339(&value)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }))
}

impl Note {
    /// One-line human readable rendering of the note
    pub fn summary(&self) -> String {
        self.summarize(MAX_SUMMARY_DEPTH)
    }

    fn summarize(&self, depth: usize) -> String {
        if depth == 0 {
            return "…".to_string();
        }

        let body = [self.cw.as_deref(), self.text.as_deref()]
            .into_iter()
            .flatten()
            .find(|value| !value.is_empty())
            .unwrap_or("(No text)");

        let mut summary = body.to_string();
        if let Some(renote) = &self.renote {
            summary.push_str(" RN: ");
            summary.push_str(&renote.summarize(depth - 1));
        }
        if let Some(reply) = &self.reply {
            summary.push_str(" RE: ");
            summary.push_str(&reply.summarize(depth - 1));
        }
        let media_count = self.media_ids.as_ref().map_or(0, Vec::len);
        if media_count > 0 {
            summary.push_str(&format!(" ({media_count} medias)"));
        }
        summary
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Rate limit details attached to a 429 error body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    /// Milliseconds until the limit resets
    pub reset_ms: Option<f64>,
    pub reset_sec: Option<f64>,
    pub remaining: Option<i64>,
    pub limit: Option<i64>,
}

/// Error payload returned by the API on non-success statuses
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorDetail {
    pub message: Option<String>,
    pub code: Option<String>,
    pub id: Option<String>,
    pub kind: Option<String>,
    pub info: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ApiErrorBody {
    Wrapped { error: ApiErrorDetail },
    Flat(ApiErrorDetail),
}

impl ApiErrorDetail {
    /// Parse an error body; anything unreadable yields an empty detail
    pub fn parse(body: &[u8]) -> Self {
        match serde_json::from_slice::<ApiErrorBody>(body) {
            Ok(ApiErrorBody::Wrapped { error }) => error,
            Ok(ApiErrorBody::Flat(detail)) => detail,
            Err(_) => Self::default(),
        }
    }

    /// Server supplied message, or a generic one
    pub fn message_or_default(&self) -> String {
        self.message
            .as_deref()
            .filter(|message| !message.is_empty())
            .unwrap_or(FALLBACK_ERROR_MESSAGE)
            .to_string()
    }

    pub fn rate_limit_info(&self) -> Option<RateLimitInfo> {
        self.info
            .as_ref()
            .and_then(|info| serde_json::from_value(info.clone()).ok())
    }
}
