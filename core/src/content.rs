use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Kind of action a quota is computed for. Each has its own weight in
/// [`crate::config::ContentMultipliers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Post,
    Comment,
    Like,
    Report,
    Upload,
    Message,
    Follow,
}

impl ContentType {
    pub const ALL: [ContentType; 7] = [
        ContentType::Post,
        ContentType::Comment,
        ContentType::Like,
        ContentType::Report,
        ContentType::Upload,
        ContentType::Message,
        ContentType::Follow,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Post => "post",
            ContentType::Comment => "comment",
            ContentType::Like => "like",
            ContentType::Report => "report",
            ContentType::Upload => "upload",
            ContentType::Message => "message",
            ContentType::Follow => "follow",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown content type '{0}'")]
pub struct UnknownContentType(pub String);

impl FromStr for ContentType {
    type Err = UnknownContentType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        ContentType::ALL
            .into_iter()
            .find(|content_type| content_type.as_str() == normalized)
            .ok_or(UnknownContentType(value.to_string()))
    }
}
