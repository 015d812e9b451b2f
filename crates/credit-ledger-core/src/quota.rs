//! Anonymous (unauthenticated) free-generation quota.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of generation an anonymous caller is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationType {
    /// Image generation; the only type anonymous callers may use.
    Image,
    /// Video generation.
    Video,
    /// Narration / text-to-speech.
    Narration,
    /// Text suggestion.
    TextSuggestion,
    /// Chat.
    Chat,
}

impl GenerationType {
    /// The identifier used in storage and on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Narration => "narration",
            Self::TextSuggestion => "text_suggestion",
            Self::Chat => "chat",
        }
    }

    /// Whether anonymous callers may use this type at all.
    #[must_use]
    pub const fn allowed_anonymously(&self) -> bool {
        matches!(self, Self::Image)
    }
}

impl fmt::Display for GenerationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "narration" => Ok(Self::Narration),
            "text_suggestion" => Ok(Self::TextSuggestion),
            "chat" => Ok(Self::Chat),
            other => Err(format!("unknown generation type: {other}")),
        }
    }
}

/// One free generation by an anonymous caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymousQuotaEntry {
    /// Caller IP address.
    pub ip_address: String,
    /// Optional device fingerprint.
    pub fingerprint: Option<String>,
    /// What was generated.
    pub generation_type: GenerationType,
    /// When it was generated.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_images_are_anonymous() {
        assert!(GenerationType::Image.allowed_anonymously());
        assert!(!GenerationType::Video.allowed_anonymously());
        assert!(!GenerationType::Chat.allowed_anonymously());
    }

    #[test]
    fn parses_wire_names() {
        assert_eq!("text_suggestion".parse(), Ok(GenerationType::TextSuggestion));
        assert!("hologram".parse::<GenerationType>().is_err());
    }
}
