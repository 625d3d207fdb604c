use client_core::{ChannelKey, ClientEvent, ConnectionStatus, Message, Selection};
use shared::{
    domain::GroupRole,
    protocol::{GroupMember, GroupSummary},
};

pub fn selection_label(selection: &Selection) -> String {
    match selection {
        Selection::Public => "#public".to_string(),
        Selection::Peer(peer) => format!("@{peer}"),
        Selection::Group(group_id) => format!("group {group_id}"),
    }
}

fn channel_label(channel: &ChannelKey) -> String {
    selection_label(&Selection::from(channel.clone()))
}

pub fn message_line(message: &Message) -> String {
    format!(
        "[{}] {} <{}> {}",
        message.timestamp.format("%H:%M:%S"),
        channel_label(&message.channel),
        message.sender,
        message.content
    )
}

pub fn group_lines(groups: &[GroupSummary]) -> Vec<String> {
    if groups.is_empty() {
        return vec!["no groups".to_string()];
    }
    groups
        .iter()
        .map(|group| {
            let privacy = if group.is_private { " (private)" } else { "" };
            format!(
                "{:>4}  {}{}  {} members",
                group.id.0, group.name, privacy, group.member_count
            )
        })
        .collect()
}

pub fn member_lines(members: &[GroupMember]) -> Vec<String> {
    members
        .iter()
        .map(|member| format!("{} ({})", member.username, role_label(member.role)))
        .collect()
}

fn role_label(role: GroupRole) -> &'static str {
    match role {
        GroupRole::Owner => "owner",
        GroupRole::Admin => "admin",
        GroupRole::Member => "member",
    }
}

/// One line for an engine event, or `None` when it is not worth printing.
pub fn event_line(event: &ClientEvent) -> Option<String> {
    match event {
        ClientEvent::ConnectionChanged(ConnectionStatus::Open) => Some("* connected".into()),
        ClientEvent::ConnectionChanged(ConnectionStatus::Closed) => {
            Some("* disconnected; restart to reconnect".into())
        }
        ClientEvent::ConnectionChanged(ConnectionStatus::Errored) => {
            Some("* connection failed; restart to reconnect".into())
        }
        ClientEvent::ConnectionChanged(ConnectionStatus::Connecting) => None,
        ClientEvent::OnlineUsersUpdated(users) => {
            let names: Vec<&str> = users.iter().map(|user| user.as_str()).collect();
            Some(format!("* online: {}", names.join(", ")))
        }
        ClientEvent::MessageAppended(message) => Some(message_line(message)),
        ClientEvent::HistoryLoaded { channel, messages } => Some(format!(
            "* {} history loaded ({messages} messages)",
            channel_label(channel)
        )),
        ClientEvent::SelectionChanged(selection) => {
            Some(format!("* now talking in {}", selection_label(selection)))
        }
        ClientEvent::MembershipLost { group_id } => {
            Some(format!("* you are no longer a member of group {group_id}"))
        }
        ClientEvent::RosterUpdated(_) => None,
        ClientEvent::MemberLeft {
            group_id,
            username: Some(username),
        } => Some(format!("* {username} left group {group_id}")),
        ClientEvent::MemberLeft { .. } => None,
        ClientEvent::Notice(notice) => Some(format!("! {notice}")),
        ClientEvent::SessionInvalid => Some("! session expired; log in again".into()),
    }
}
