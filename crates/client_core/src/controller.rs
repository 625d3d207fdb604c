use std::collections::HashSet;

use chrono::{DateTime, Utc};
use shared::{
    domain::{GroupId, Username},
    protocol::{GroupSummary, HistoryMessage, OutboundMessage, ServerEvent},
};
use tracing::{debug, info, warn};

use crate::{
    error::{FetchError, SyncError},
    membership::{MembershipChange, MembershipTracker},
    store::{BackfillOutcome, ChannelStateStore},
    types::{ChannelKey, ChannelView, ConnectionStatus, Message, Selection},
    ClientEvent,
};

#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    /// Load history for the channel and report back via `complete_history`.
    FetchHistory(ChannelKey),
    /// Reload the group roster and report back via `complete_roster`.
    RefreshRoster,
    Notify(ClientEvent),
}

/// Synchronous routing state. Anything that needs the network comes back as a
/// [`SyncAction`] and its result is fed in through `complete_*`.
pub struct SyncController {
    local_user: Username,
    store: ChannelStateStore,
    membership: MembershipTracker,
    selection: Selection,
    online_users: Vec<Username>,
    connection: ConnectionStatus,
    inflight_history: HashSet<ChannelKey>,
    roster_refresh_inflight: bool,
    roster_refresh_pending: bool,
    /// Membership generation when the outstanding roster request was issued.
    roster_requested_generation: u64,
    optimistic_group_echo: bool,
}

impl SyncController {
    pub fn new(local_user: Username) -> Self {
        Self {
            local_user,
            store: ChannelStateStore::new(),
            membership: MembershipTracker::new(),
            selection: Selection::Public,
            online_users: Vec::new(),
            connection: ConnectionStatus::Connecting,
            inflight_history: HashSet::new(),
            roster_refresh_inflight: false,
            roster_refresh_pending: false,
            roster_requested_generation: 0,
            optimistic_group_echo: false,
        }
    }

    pub fn with_optimistic_group_echo(mut self, enabled: bool) -> Self {
        self.optimistic_group_echo = enabled;
        self
    }

    pub fn local_user(&self) -> &Username {
        &self.local_user
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn connection(&self) -> ConnectionStatus {
        self.connection
    }

    pub fn online_users(&self) -> &[Username] {
        &self.online_users
    }

    pub fn roster(&self) -> &[GroupSummary] {
        self.membership.groups()
    }

    pub fn store(&self) -> &ChannelStateStore {
        &self.store
    }

    pub fn read(&self, key: &ChannelKey) -> &[Message] {
        self.store.read(key)
    }

    pub fn active_messages(&self) -> &[Message] {
        self.store.read(&self.selection.channel())
    }

    pub fn is_history_inflight(&self, key: &ChannelKey) -> bool {
        self.inflight_history.contains(key)
    }

    pub fn view(&self) -> ChannelView {
        ChannelView {
            selection: self.selection.clone(),
            messages: self.active_messages().to_vec(),
            connection: self.connection,
            online_users: self.online_users.clone(),
            groups: self.roster().to_vec(),
        }
    }

    /// Initial loads for a fresh session: public history and the group roster.
    pub fn begin_session(&mut self) -> Vec<SyncAction> {
        let mut actions = Vec::new();
        self.request_history(ChannelKey::Public, &mut actions);
        self.request_roster_refresh(&mut actions);
        actions
    }

    pub fn set_connection(&mut self, status: ConnectionStatus) -> Vec<SyncAction> {
        if !self.connection.can_transition_to(status) {
            return Vec::new();
        }
        info!(from = ?self.connection, to = ?status, "sync: connection status changed");
        self.connection = status;
        vec![SyncAction::Notify(ClientEvent::ConnectionChanged(status))]
    }

    /// Switches the active conversation. A group must be in the roster to be
    /// selected; otherwise the current selection is kept.
    pub fn select(&mut self, selection: Selection) -> Result<Vec<SyncAction>, SyncError> {
        if let Selection::Group(group_id) = selection {
            if !self.membership.contains(group_id) {
                warn!(group_id = group_id.0, "sync: refusing to select unknown group");
                return Err(SyncError::UnknownGroup(group_id));
            }
        }

        let mut actions = Vec::new();
        self.set_selection(selection, &mut actions);
        self.request_history(self.selection.channel(), &mut actions);
        Ok(actions)
    }

    pub fn request_roster(&mut self) -> Vec<SyncAction> {
        let mut actions = Vec::new();
        self.request_roster_refresh(&mut actions);
        actions
    }

    /// Decodes one inbound frame. Frames that fail to decode are logged and
    /// dropped without touching any state.
    pub fn handle_frame(&mut self, frame: &str) -> Vec<SyncAction> {
        match ServerEvent::decode(frame) {
            Ok(event) => self.handle_event(event),
            Err(err) => {
                let err = SyncError::MalformedEvent(err.to_string());
                warn!(error = %err, frame_len = frame.len(), "sync: dropping inbound frame");
                Vec::new()
            }
        }
    }

    pub fn handle_event(&mut self, event: ServerEvent) -> Vec<SyncAction> {
        let mut actions = Vec::new();
        match event {
            ServerEvent::UsersUpdate { users } => {
                let local_user = &self.local_user;
                self.online_users = users.into_iter().filter(|user| user != local_user).collect();
                actions.push(SyncAction::Notify(ClientEvent::OnlineUsersUpdated(
                    self.online_users.clone(),
                )));
            }
            ServerEvent::Message {
                content,
                sender,
                timestamp,
            } => {
                self.deliver(ChannelKey::Public, sender, content, timestamp, &mut actions);
            }
            ServerEvent::PrivateMessage {
                content,
                sender,
                recipient,
                timestamp,
            } => {
                let partner = if sender == self.local_user {
                    recipient
                } else {
                    sender.clone()
                };
                self.deliver(
                    ChannelKey::Private(partner),
                    sender,
                    content,
                    timestamp,
                    &mut actions,
                );
            }
            ServerEvent::GroupMessage {
                content,
                sender,
                group_id,
                timestamp,
                ..
            } => {
                self.deliver(
                    ChannelKey::Group(group_id),
                    sender,
                    content,
                    timestamp,
                    &mut actions,
                );
            }
            ServerEvent::GroupUpdate { action, group } => {
                let change = self.membership.apply(action, group, self.selection.group());
                self.apply_membership_change(change, &mut actions);
            }
            ServerEvent::GroupsRefresh { .. } => {
                self.request_roster_refresh(&mut actions);
            }
        }
        actions
    }

    /// Merges a history fetch for `key` into the store.
    pub fn complete_history(
        &mut self,
        key: ChannelKey,
        result: Result<Vec<HistoryMessage>, FetchError>,
    ) -> Vec<SyncAction> {
        self.inflight_history.remove(&key);
        let mut actions = Vec::new();

        match result {
            Ok(items) => {
                let messages = items
                    .into_iter()
                    .map(|item| Message::from_history(key.clone(), item))
                    .collect();
                match self.store.backfill(key.clone(), messages) {
                    BackfillOutcome::Installed {
                        backfilled,
                        live_kept,
                    } => {
                        info!(channel = %key, backfilled, live_kept, "sync: history installed");
                        let messages = self.store.read(&key).len();
                        actions.push(SyncAction::Notify(ClientEvent::HistoryLoaded {
                            channel: key,
                            messages,
                        }));
                    }
                    BackfillOutcome::AlreadyPopulated => {
                        debug!(channel = %key, "sync: history already installed; ignoring fetch result");
                    }
                }
            }
            Err(err) if err.is_forbidden() => match key {
                ChannelKey::Group(group_id) => {
                    warn!(group_id = group_id.0, "sync: group history forbidden; treating as removal");
                    let change = match self.membership.remove(group_id, self.selection.group()) {
                        Some(selection_invalidated) => MembershipChange::Removed {
                            group_id,
                            selection_invalidated,
                        },
                        None => MembershipChange::NotPresent(group_id),
                    };
                    self.apply_membership_change(change, &mut actions);
                }
                key => self.report_fetch_failure(key, err, &mut actions),
            },
            Err(err) if err.is_unauthorized() => {
                warn!(channel = %key, "sync: credential rejected while fetching history");
                actions.push(SyncAction::Notify(ClientEvent::SessionInvalid));
            }
            Err(err) => self.report_fetch_failure(key, err, &mut actions),
        }

        actions
    }

    /// Replaces the roster with a fresh snapshot from the directory.
    pub fn complete_roster(
        &mut self,
        result: Result<Vec<GroupSummary>, FetchError>,
    ) -> Vec<SyncAction> {
        self.roster_refresh_inflight = false;
        let mut actions = Vec::new();

        match result {
            Ok(_) if self.membership.generation() != self.roster_requested_generation => {
                debug!("sync: roster snapshot predates a membership delta; refetching");
                self.roster_refresh_pending = true;
            }
            Ok(groups) => {
                let invalidated = self.membership.replace(groups, self.selection.group());
                debug!(groups = self.roster().len(), "sync: roster refreshed");
                actions.push(SyncAction::Notify(ClientEvent::RosterUpdated(
                    self.roster().to_vec(),
                )));
                if let Some(group_id) = invalidated {
                    info!(group_id = group_id.0, "sync: selected group missing from refreshed roster");
                    actions.push(SyncAction::Notify(ClientEvent::MembershipLost { group_id }));
                    self.set_selection(Selection::Public, &mut actions);
                }
            }
            Err(err) if err.is_unauthorized() => {
                warn!("sync: credential rejected while refreshing roster");
                actions.push(SyncAction::Notify(ClientEvent::SessionInvalid));
            }
            Err(err) => {
                warn!(error = %err, "sync: roster refresh failed");
                actions.push(SyncAction::Notify(ClientEvent::Notice(format!(
                    "failed to refresh groups: {err}"
                ))));
            }
        }

        if std::mem::take(&mut self.roster_refresh_pending) {
            self.request_roster_refresh(&mut actions);
        }
        actions
    }

    /// A group the local user just created: add it, select it, and refresh the
    /// roster so member counts come from the server.
    pub fn group_created(&mut self, group: GroupSummary) -> Vec<SyncAction> {
        let group_id = group.id;
        let mut actions = Vec::new();
        if self.membership.insert(group) {
            actions.push(SyncAction::Notify(ClientEvent::RosterUpdated(
                self.roster().to_vec(),
            )));
        }
        self.set_selection(Selection::Group(group_id), &mut actions);
        self.request_history(ChannelKey::Group(group_id), &mut actions);
        self.request_roster_refresh(&mut actions);
        actions
    }

    /// Builds the outbound frame for `draft` addressed by the active selection.
    /// Nothing is queued when the connection is not open.
    pub fn compose(&self, draft: &str, now: DateTime<Utc>) -> Result<OutboundMessage, SyncError> {
        let content = draft.trim();
        if content.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        if !self.connection.is_open() {
            return Err(SyncError::NotConnected);
        }

        let content = content.to_string();
        Ok(match &self.selection {
            Selection::Public => OutboundMessage::Public {
                content,
                timestamp: now,
                recipient: None,
            },
            Selection::Peer(peer) => OutboundMessage::Private {
                content,
                timestamp: now,
                recipient: peer.clone(),
            },
            Selection::Group(group_id) => OutboundMessage::Group {
                content,
                timestamp: now,
                group_id: *group_id,
            },
        })
    }

    /// Called once `frame` was handed to the connection.
    pub fn record_sent(&mut self, frame: &OutboundMessage) -> Vec<SyncAction> {
        let mut actions = Vec::new();
        if let OutboundMessage::Group {
            content,
            timestamp,
            group_id,
        } = frame
        {
            if self.optimistic_group_echo {
                self.deliver(
                    ChannelKey::Group(*group_id),
                    self.local_user.clone(),
                    content.clone(),
                    Some(*timestamp),
                    &mut actions,
                );
            }
        }
        actions
    }

    fn deliver(
        &mut self,
        key: ChannelKey,
        sender: Username,
        content: String,
        timestamp: Option<DateTime<Utc>>,
        actions: &mut Vec<SyncAction>,
    ) {
        let message = Message::new(key.clone(), sender, content, timestamp.unwrap_or_else(Utc::now));
        if self.store.append(key.clone(), message.clone()) {
            actions.push(SyncAction::Notify(ClientEvent::MessageAppended(message)));
        } else {
            debug!(channel = %key, sender = %message.sender, "sync: duplicate message dropped");
        }
    }

    fn apply_membership_change(&mut self, change: MembershipChange, actions: &mut Vec<SyncAction>) {
        match change {
            MembershipChange::Added(_) => {
                actions.push(SyncAction::Notify(ClientEvent::RosterUpdated(
                    self.roster().to_vec(),
                )));
            }
            MembershipChange::AlreadyPresent(group_id) => {
                debug!(group_id = group_id.0, "sync: group already in roster");
            }
            MembershipChange::NotPresent(group_id) => {
                debug!(group_id = group_id.0, "sync: removed group was not in roster");
            }
            MembershipChange::Removed {
                group_id,
                selection_invalidated,
            } => {
                actions.push(SyncAction::Notify(ClientEvent::RosterUpdated(
                    self.roster().to_vec(),
                )));
                info!(error = %SyncError::MembershipLost(group_id), selection_invalidated, "sync: group removed");
                actions.push(SyncAction::Notify(ClientEvent::MembershipLost { group_id }));
                if selection_invalidated {
                    self.set_selection(Selection::Public, actions);
                }
            }
            MembershipChange::MemberLeft { group_id, username } => {
                actions.push(SyncAction::Notify(ClientEvent::MemberLeft {
                    group_id,
                    username,
                }));
                self.request_roster_refresh(actions);
            }
        }
    }

    fn set_selection(&mut self, selection: Selection, actions: &mut Vec<SyncAction>) {
        if self.selection == selection {
            return;
        }
        debug!(from = ?self.selection, to = ?selection, "sync: selection changed");
        self.selection = selection;
        actions.push(SyncAction::Notify(ClientEvent::SelectionChanged(
            self.selection.clone(),
        )));
    }

    fn request_history(&mut self, key: ChannelKey, actions: &mut Vec<SyncAction>) {
        if self.store.is_backfilled(&key) {
            return;
        }
        if !self.inflight_history.insert(key.clone()) {
            debug!(channel = %key, "sync: history fetch already in flight");
            return;
        }
        actions.push(SyncAction::FetchHistory(key));
    }

    fn request_roster_refresh(&mut self, actions: &mut Vec<SyncAction>) {
        if self.roster_refresh_inflight {
            self.roster_refresh_pending = true;
            return;
        }
        self.roster_refresh_inflight = true;
        self.roster_requested_generation = self.membership.generation();
        actions.push(SyncAction::RefreshRoster);
    }

    fn report_fetch_failure(&mut self, key: ChannelKey, err: FetchError, actions: &mut Vec<SyncAction>) {
        let err = SyncError::FetchFailed { key, source: err };
        warn!(error = %err, "sync: history fetch failed; will retry on next selection");
        actions.push(SyncAction::Notify(ClientEvent::Notice(err.to_string())));
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
