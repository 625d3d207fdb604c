use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{GroupId, GroupRole, MessageId, UserId, Username};

/// Timestamp codec for the chat server.
///
/// The server writes `datetime.isoformat()` of naive UTC values, so offsets are
/// optional on the way in. Outgoing timestamps are RFC 3339 with millisecond
/// precision and a `Z` suffix.
pub mod wire_time {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        let raw = raw.trim();
        match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => Ok(ts.with_timezone(&Utc)),
            Err(_) => NaiveDateTime::parse_from_str(raw, NAIVE_FORMAT).map(|naive| naive.and_utc()),
        }
    }

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(de::Error::custom)
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{de, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            ts: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => super::serialize(ts, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) if !raw.trim().is_empty() => {
                    super::parse(&raw).map(Some).map_err(de::Error::custom)
                }
                _ => Ok(None),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupUpdateAction {
    AddedToGroup,
    RemovedFromGroup,
    UserLeftGroup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub id: GroupId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_members: Option<u32>,
    #[serde(default)]
    pub created_by: Option<UserId>,
    #[serde(
        default,
        with = "wire_time::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub member_count: u32,
}

impl GroupSummary {
    pub fn new(id: GroupId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            is_private: false,
            max_members: None,
            created_by: None,
            created_at: None,
            member_count: 0,
        }
    }
}

/// Group document carried by `group_update`; `user_left` is only present on
/// `user_left_group`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupUpdatePayload {
    #[serde(flatten)]
    pub group: GroupSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_left: Option<Username>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    UsersUpdate {
        users: Vec<Username>,
    },
    Message {
        content: String,
        sender: Username,
        #[serde(
            default,
            with = "wire_time::option",
            skip_serializing_if = "Option::is_none"
        )]
        timestamp: Option<DateTime<Utc>>,
    },
    PrivateMessage {
        content: String,
        sender: Username,
        recipient: Username,
        #[serde(
            default,
            with = "wire_time::option",
            skip_serializing_if = "Option::is_none"
        )]
        timestamp: Option<DateTime<Utc>>,
    },
    GroupMessage {
        content: String,
        sender: Username,
        group_id: GroupId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_name: Option<String>,
        #[serde(
            default,
            with = "wire_time::option",
            skip_serializing_if = "Option::is_none"
        )]
        timestamp: Option<DateTime<Utc>>,
    },
    GroupUpdate {
        action: GroupUpdateAction,
        group: GroupUpdatePayload,
    },
    GroupsRefresh {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<String>,
    },
}

impl ServerEvent {
    pub fn decode(frame: &str) -> serde_json::Result<Self> {
        serde_json::from_str(frame)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::UsersUpdate { .. } => "users_update",
            Self::Message { .. } => "message",
            Self::PrivateMessage { .. } => "private_message",
            Self::GroupMessage { .. } => "group_message",
            Self::GroupUpdate { .. } => "group_update",
            Self::GroupsRefresh { .. } => "groups_refresh",
        }
    }
}

/// Frames the client writes to the live connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Public {
        content: String,
        #[serde(with = "wire_time")]
        timestamp: DateTime<Utc>,
        recipient: Option<Username>,
    },
    Private {
        content: String,
        #[serde(with = "wire_time")]
        timestamp: DateTime<Utc>,
        recipient: Username,
    },
    Group {
        content: String,
        #[serde(with = "wire_time")]
        timestamp: DateTime<Utc>,
        group_id: GroupId,
    },
}

impl OutboundMessage {
    pub fn content(&self) -> &str {
        match self {
            Self::Public { content, .. }
            | Self::Private { content, .. }
            | Self::Group { content, .. } => content,
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    pub content: String,
    pub sender: Username,
    #[serde(with = "wire_time")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub room: String,
    #[serde(default, rename = "isPrivate")]
    pub is_private: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Username>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub id: UserId,
    pub username: Username,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(
        default,
        with = "wire_time::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(default = "default_member_role")]
    pub role: GroupRole,
}

fn default_member_role() -> GroupRole {
    GroupRole::Member
}

pub const DEFAULT_MAX_MEMBERS: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_private: bool,
    pub max_members: u32,
    #[serde(default)]
    pub members: Vec<Username>,
}

impl CreateGroupRequest {
    pub fn new(name: impl Into<String>, members: Vec<Username>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            is_private: false,
            max_members: DEFAULT_MAX_MEMBERS,
            members,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddMembersRequest {
    pub members: Vec<Username>,
}
