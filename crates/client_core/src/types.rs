use std::fmt;

use chrono::{DateTime, Utc};
use shared::{
    domain::{GroupId, Username},
    protocol::{GroupSummary, HistoryMessage},
};

/// Partition key for conversation history and routing key for live events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    Public,
    /// Keyed by the other party, never by the local user.
    Private(Username),
    Group(GroupId),
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => f.write_str("public"),
            Self::Private(peer) => write!(f, "private:{peer}"),
            Self::Group(group_id) => write!(f, "group:{group_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub content: String,
    pub sender: Username,
    pub timestamp: DateTime<Utc>,
    pub channel: ChannelKey,
}

impl Message {
    pub fn new(
        channel: ChannelKey,
        sender: impl Into<Username>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            content: content.into(),
            sender: sender.into(),
            timestamp,
            channel,
        }
    }

    pub fn from_history(channel: ChannelKey, item: HistoryMessage) -> Self {
        Self {
            content: item.content,
            sender: item.sender,
            timestamp: item.timestamp,
            channel,
        }
    }
}

/// The conversation the UI is showing and sending to. "Nothing selected" is
/// the public channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    Public,
    Peer(Username),
    Group(GroupId),
}

impl Selection {
    pub fn channel(&self) -> ChannelKey {
        match self {
            Self::Public => ChannelKey::Public,
            Self::Peer(peer) => ChannelKey::Private(peer.clone()),
            Self::Group(group_id) => ChannelKey::Group(*group_id),
        }
    }

    pub fn peer(&self) -> Option<&Username> {
        match self {
            Self::Peer(peer) => Some(peer),
            _ => None,
        }
    }

    pub fn group(&self) -> Option<GroupId> {
        match self {
            Self::Group(group_id) => Some(*group_id),
            _ => None,
        }
    }
}

impl From<ChannelKey> for Selection {
    fn from(value: ChannelKey) -> Self {
        match value {
            ChannelKey::Public => Self::Public,
            ChannelKey::Private(peer) => Self::Peer(peer),
            ChannelKey::Group(group_id) => Self::Group(group_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closed,
    Errored,
}

impl ConnectionStatus {
    pub fn is_open(self) -> bool {
        self == Self::Open
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }

    /// `Connecting -> Open -> Closed | Errored`, with `Connecting` allowed to
    /// fail straight into a terminal state. Nothing leaves `Closed` or `Errored`.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Open | Self::Closed | Self::Errored)
                | (Self::Open, Self::Closed | Self::Errored)
        )
    }
}

/// Read-only projection handed to the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelView {
    pub selection: Selection,
    pub messages: Vec<Message>,
    pub connection: ConnectionStatus,
    pub online_users: Vec<Username>,
    pub groups: Vec<GroupSummary>,
}
