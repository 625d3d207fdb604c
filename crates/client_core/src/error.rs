use shared::{
    domain::GroupId,
    error::{ApiException, ErrorCode},
};
use thiserror::Error;

use crate::types::ChannelKey;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("not connected: live connection is not open")]
    NotConnected,
    #[error("message is empty")]
    EmptyMessage,
    #[error("group {0} is not in the roster")]
    UnknownGroup(GroupId),
    #[error("failed to fetch {key}: {source}")]
    FetchFailed {
        key: ChannelKey,
        #[source]
        source: FetchError,
    },
    #[error("no longer a member of group {0}")]
    MembershipLost(GroupId),
    #[error("malformed event dropped: {0}")]
    MalformedEvent(String),
    #[error("transport error: {0}")]
    TransportError(String),
    #[error("transport closed")]
    TransportClosed,
    #[error("session is no longer valid")]
    SessionInvalid,
}

/// Failure of a directory/history request.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

impl From<ApiException> for FetchError {
    fn from(value: ApiException) -> Self {
        match value.code {
            ErrorCode::Unauthorized => Self::Unauthorized(value.message),
            ErrorCode::Forbidden => Self::Forbidden(value.message),
            _ => Self::Status {
                status: value.status,
                message: value.message,
            },
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else if let Some(status) = value.status() {
            Self::Status {
                status: status.as_u16(),
                message: value.to_string(),
            }
        } else {
            Self::Transport(value.to_string())
        }
    }
}
