use chrono::{Duration, TimeZone};
use shared::protocol::{GroupUpdateAction, GroupUpdatePayload};

use super::*;

fn at(ms: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::milliseconds(ms)
}

fn user(name: &str) -> Username {
    Username::new(name)
}

fn history(sender: &str, content: &str, ms: i64) -> HistoryMessage {
    HistoryMessage {
        id: None,
        content: content.to_string(),
        sender: user(sender),
        timestamp: at(ms),
        room: String::new(),
        is_private: false,
        recipient: None,
    }
}

fn fetches(actions: &[SyncAction]) -> Vec<ChannelKey> {
    actions
        .iter()
        .filter_map(|action| match action {
            SyncAction::FetchHistory(key) => Some(key.clone()),
            _ => None,
        })
        .collect()
}

fn events(actions: &[SyncAction]) -> Vec<ClientEvent> {
    actions
        .iter()
        .filter_map(|action| match action {
            SyncAction::Notify(event) => Some(event.clone()),
            _ => None,
        })
        .collect()
}

fn requests_roster(actions: &[SyncAction]) -> bool {
    actions.contains(&SyncAction::RefreshRoster)
}

/// Open controller for `alice` with the session-start loads already answered.
fn session(groups: Vec<GroupSummary>) -> SyncController {
    let mut controller = SyncController::new(user("alice"));
    controller.set_connection(ConnectionStatus::Open);
    controller.begin_session();
    controller.complete_history(ChannelKey::Public, Ok(Vec::new()));
    controller.complete_roster(Ok(groups));
    controller
}

fn group_update(action: GroupUpdateAction, group_id: i64, name: &str) -> ServerEvent {
    ServerEvent::GroupUpdate {
        action,
        group: GroupUpdatePayload {
            group: GroupSummary::new(GroupId(group_id), name),
            user_left: None,
        },
    }
}

fn group_message(sender: &str, group_id: i64, content: &str, ms: i64) -> ServerEvent {
    ServerEvent::GroupMessage {
        content: content.to_string(),
        sender: user(sender),
        group_id: GroupId(group_id),
        group_name: None,
        timestamp: Some(at(ms)),
    }
}

#[test]
fn session_start_requests_public_history_and_roster() {
    let mut controller = SyncController::new(user("alice"));
    let actions = controller.begin_session();

    assert_eq!(fetches(&actions), vec![ChannelKey::Public]);
    assert!(requests_roster(&actions));
    assert!(controller.is_history_inflight(&ChannelKey::Public));
}

#[test]
fn selecting_peer_fetches_history_once() {
    let mut controller = session(Vec::new());
    let bob = ChannelKey::Private(user("bob"));

    let actions = controller.select(Selection::Peer(user("bob"))).unwrap();
    assert_eq!(fetches(&actions), vec![bob.clone()]);
    assert_eq!(
        events(&actions),
        vec![ClientEvent::SelectionChanged(Selection::Peer(user("bob")))]
    );

    // Still in flight: switching away and back must not issue a second fetch.
    controller.select(Selection::Public).unwrap();
    let actions = controller.select(Selection::Peer(user("bob"))).unwrap();
    assert!(fetches(&actions).is_empty());

    controller.complete_history(bob.clone(), Ok(vec![history("bob", "hey", 0)]));
    controller.select(Selection::Public).unwrap();
    let actions = controller.select(Selection::Peer(user("bob"))).unwrap();
    assert!(fetches(&actions).is_empty());
    assert_eq!(controller.active_messages().len(), 1);
}

#[test]
fn public_reselect_retries_only_after_failed_load() {
    let mut controller = SyncController::new(user("alice"));
    controller.set_connection(ConnectionStatus::Open);
    controller.begin_session();

    let actions = controller.complete_history(
        ChannelKey::Public,
        Err(FetchError::Status {
            status: 500,
            message: "boom".into(),
        }),
    );
    assert!(matches!(events(&actions).as_slice(), [ClientEvent::Notice(_)]));

    let actions = controller.select(Selection::Public).unwrap();
    assert_eq!(fetches(&actions), vec![ChannelKey::Public]);

    controller.complete_history(ChannelKey::Public, Ok(vec![history("bob", "hi", 0)]));
    let actions = controller.select(Selection::Public).unwrap();
    assert!(fetches(&actions).is_empty());
}

#[test]
fn selecting_unknown_group_keeps_previous_selection() {
    let mut controller = session(vec![GroupSummary::new(GroupId(1), "ops")]);
    controller.select(Selection::Peer(user("bob"))).unwrap();

    let err = controller.select(Selection::Group(GroupId(42))).unwrap_err();
    assert!(matches!(err, SyncError::UnknownGroup(GroupId(42))));
    assert_eq!(controller.selection(), &Selection::Peer(user("bob")));

    controller.select(Selection::Group(GroupId(1))).unwrap();
    assert_eq!(controller.selection(), &Selection::Group(GroupId(1)));
    assert_eq!(controller.selection().peer(), None);
}

#[test]
fn removal_of_selected_group_falls_back_to_public() {
    let mut controller = session(vec![GroupSummary::new(GroupId(5), "ops")]);
    controller.select(Selection::Group(GroupId(5))).unwrap();
    controller.complete_history(
        ChannelKey::Group(GroupId(5)),
        Ok(vec![history("bob", "standup at ten", 0)]),
    );

    let actions = controller.handle_event(group_update(
        GroupUpdateAction::RemovedFromGroup,
        5,
        "ops",
    ));

    assert_eq!(controller.selection(), &Selection::Public);
    let events = events(&actions);
    assert!(events.contains(&ClientEvent::MembershipLost {
        group_id: GroupId(5)
    }));
    assert!(events.contains(&ClientEvent::SelectionChanged(Selection::Public)));
    assert!(controller.roster().is_empty());
    // The cached conversation stays readable.
    assert_eq!(controller.read(&ChannelKey::Group(GroupId(5))).len(), 1);
}

#[test]
fn removal_of_unknown_group_is_ignored() {
    let mut controller = session(vec![GroupSummary::new(GroupId(5), "ops")]);
    controller.select(Selection::Group(GroupId(5))).unwrap();

    let actions = controller.handle_event(group_update(
        GroupUpdateAction::RemovedFromGroup,
        9,
        "elsewhere",
    ));

    assert!(events(&actions).is_empty());
    assert_eq!(controller.selection(), &Selection::Group(GroupId(5)));
    assert_eq!(controller.roster().len(), 1);
}

#[test]
fn stale_roster_snapshot_does_not_drop_pushed_group() {
    let mut controller = session(Vec::new());
    assert!(requests_roster(&controller.request_roster()));

    controller.handle_event(group_update(GroupUpdateAction::AddedToGroup, 8, "launch"));
    controller.select(Selection::Group(GroupId(8))).unwrap();

    // Snapshot taken before the server pushed the new group.
    let actions = controller.complete_roster(Ok(Vec::new()));
    assert_eq!(controller.selection(), &Selection::Group(GroupId(8)));
    assert!(controller.membership.contains(GroupId(8)));
    assert!(!events(&actions)
        .iter()
        .any(|event| matches!(event, ClientEvent::MembershipLost { .. })));
    assert!(requests_roster(&actions));

    let fresh = vec![GroupSummary::new(GroupId(8), "launch")];
    let actions = controller.complete_roster(Ok(fresh.clone()));
    assert!(events(&actions).contains(&ClientEvent::RosterUpdated(fresh)));
    assert_eq!(controller.selection(), &Selection::Group(GroupId(8)));
    assert!(!requests_roster(&actions));
}

#[test]
fn stale_roster_snapshot_does_not_restore_removed_group() {
    let mut controller = session(vec![GroupSummary::new(GroupId(5), "ops")]);
    assert!(requests_roster(&controller.request_roster()));

    controller.handle_event(group_update(GroupUpdateAction::RemovedFromGroup, 5, "ops"));
    let actions = controller.complete_roster(Ok(vec![GroupSummary::new(GroupId(5), "ops")]));

    assert!(!controller.membership.contains(GroupId(5)));
    assert!(requests_roster(&actions));
}

#[test]
fn forbidden_group_history_is_treated_as_removal() {
    let mut controller = session(vec![GroupSummary::new(GroupId(5), "ops")]);
    let actions = controller.select(Selection::Group(GroupId(5))).unwrap();
    assert_eq!(fetches(&actions), vec![ChannelKey::Group(GroupId(5))]);

    let actions = controller.complete_history(
        ChannelKey::Group(GroupId(5)),
        Err(FetchError::Forbidden("Not a member of this group".into())),
    );

    assert_eq!(controller.selection(), &Selection::Public);
    assert!(!controller.membership.contains(GroupId(5)));
    assert!(events(&actions).contains(&ClientEvent::MembershipLost {
        group_id: GroupId(5)
    }));
}

#[test]
fn refreshed_roster_without_selected_group_forces_public() {
    let mut controller = session(vec![
        GroupSummary::new(GroupId(1), "ops"),
        GroupSummary::new(GroupId(2), "dev"),
    ]);
    controller.select(Selection::Group(GroupId(2))).unwrap();

    let actions = controller.request_roster();
    assert!(requests_roster(&actions));
    let actions = controller.complete_roster(Ok(vec![GroupSummary::new(GroupId(1), "ops")]));

    assert_eq!(controller.selection(), &Selection::Public);
    assert!(events(&actions).contains(&ClientEvent::MembershipLost {
        group_id: GroupId(2)
    }));
}

#[test]
fn live_message_during_backfill_is_not_duplicated() {
    let mut controller = session(Vec::new());
    let bob = ChannelKey::Private(user("bob"));
    controller.select(Selection::Peer(user("bob"))).unwrap();

    let actions = controller.handle_event(ServerEvent::PrivateMessage {
        content: "X".into(),
        sender: user("bob"),
        recipient: user("alice"),
        timestamp: Some(at(100)),
    });
    assert_eq!(events(&actions).len(), 1);

    controller.complete_history(
        bob.clone(),
        Ok(vec![history("alice", "earlier", 0), history("bob", "X", 100)]),
    );

    let contents: Vec<_> = controller.read(&bob).iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["earlier", "X"]);
}

#[test]
fn private_echo_of_own_message_routes_to_recipient() {
    let mut controller = session(Vec::new());

    controller.handle_event(ServerEvent::PrivateMessage {
        content: "hi bob".into(),
        sender: user("alice"),
        recipient: user("bob"),
        timestamp: Some(at(0)),
    });
    controller.handle_event(ServerEvent::PrivateMessage {
        content: "hi alice".into(),
        sender: user("bob"),
        recipient: user("alice"),
        timestamp: Some(at(10)),
    });

    assert_eq!(controller.read(&ChannelKey::Private(user("bob"))).len(), 2);
    assert!(controller.read(&ChannelKey::Private(user("alice"))).is_empty());
}

#[test]
fn optimistic_group_echo_is_deduplicated_against_server_copy() {
    let mut controller = session(vec![GroupSummary::new(GroupId(5), "ops")])
        .with_optimistic_group_echo(true);
    controller.select(Selection::Group(GroupId(5))).unwrap();

    let frame = controller.compose("  ship it  ", at(0)).unwrap();
    assert_eq!(frame.content(), "ship it");
    let actions = controller.record_sent(&frame);
    assert_eq!(events(&actions).len(), 1);

    let actions = controller.handle_event(group_message("alice", 5, "ship it", 200));
    assert!(events(&actions).is_empty());
    assert_eq!(controller.read(&ChannelKey::Group(GroupId(5))).len(), 1);
}

#[test]
fn group_send_without_echo_waits_for_server_copy() {
    let mut controller = session(vec![GroupSummary::new(GroupId(5), "ops")]);
    controller.select(Selection::Group(GroupId(5))).unwrap();

    let frame = controller.compose("ship it", at(0)).unwrap();
    assert!(matches!(
        frame,
        OutboundMessage::Group {
            group_id: GroupId(5),
            ..
        }
    ));
    assert!(controller.record_sent(&frame).is_empty());
    assert!(controller.read(&ChannelKey::Group(GroupId(5))).is_empty());

    controller.handle_event(group_message("alice", 5, "ship it", 200));
    assert_eq!(controller.read(&ChannelKey::Group(GroupId(5))).len(), 1);
}

#[test]
fn compose_follows_selection() {
    let mut controller = session(Vec::new());

    let frame = controller.compose("hello", at(0)).unwrap();
    assert!(matches!(frame, OutboundMessage::Public { recipient: None, .. }));

    controller.select(Selection::Peer(user("bob"))).unwrap();
    let frame = controller.compose("hello", at(0)).unwrap();
    assert_eq!(
        frame,
        OutboundMessage::Private {
            content: "hello".into(),
            timestamp: at(0),
            recipient: user("bob"),
        }
    );
}

#[test]
fn compose_refuses_when_not_open() {
    let controller = SyncController::new(user("alice"));
    assert!(matches!(
        controller.compose("hello", at(0)),
        Err(SyncError::NotConnected)
    ));

    let mut controller = session(Vec::new());
    assert!(matches!(
        controller.compose("   ", at(0)),
        Err(SyncError::EmptyMessage)
    ));

    controller.set_connection(ConnectionStatus::Closed);
    assert!(matches!(
        controller.compose("hello", at(0)),
        Err(SyncError::NotConnected)
    ));
}

#[test]
fn closed_connection_never_reopens() {
    let mut controller = session(Vec::new());

    let actions = controller.set_connection(ConnectionStatus::Errored);
    assert_eq!(
        events(&actions),
        vec![ClientEvent::ConnectionChanged(ConnectionStatus::Errored)]
    );
    assert!(controller.set_connection(ConnectionStatus::Open).is_empty());
    assert!(controller.set_connection(ConnectionStatus::Closed).is_empty());
    assert_eq!(controller.connection(), ConnectionStatus::Errored);
}

#[test]
fn open_connection_never_returns_to_connecting() {
    let mut controller = session(Vec::new());

    assert!(controller.set_connection(ConnectionStatus::Connecting).is_empty());
    assert_eq!(controller.connection(), ConnectionStatus::Open);
    assert!(!ConnectionStatus::Errored.can_transition_to(ConnectionStatus::Closed));
    assert!(ConnectionStatus::Connecting.can_transition_to(ConnectionStatus::Errored));
}

#[test]
fn malformed_frame_is_dropped_without_desync() {
    let mut controller = session(Vec::new());

    assert!(controller.handle_frame("{not json").is_empty());
    assert!(controller
        .handle_frame(r#"{"type":"teleport","content":"?"}"#)
        .is_empty());
    assert!(controller.read(&ChannelKey::Public).is_empty());

    let actions = controller
        .handle_frame(r#"{"type":"message","content":"hi","sender":"bob","timestamp":"2024-05-01T12:00:00"}"#);
    assert_eq!(events(&actions).len(), 1);
    assert_eq!(controller.read(&ChannelKey::Public)[0].timestamp, at(0));
}

#[test]
fn missing_timestamp_uses_receive_time() {
    let mut controller = session(Vec::new());
    let before = Utc::now();

    controller.handle_event(ServerEvent::Message {
        content: "hi".into(),
        sender: user("bob"),
        timestamp: None,
    });

    let stored = &controller.read(&ChannelKey::Public)[0];
    assert!(stored.timestamp >= before);
    assert!(stored.timestamp <= Utc::now());
}

#[test]
fn users_update_excludes_local_user() {
    let mut controller = session(Vec::new());

    let actions = controller.handle_event(ServerEvent::UsersUpdate {
        users: vec![user("alice"), user("bob"), user("carol")],
    });

    assert_eq!(controller.online_users(), &[user("bob"), user("carol")]);
    assert_eq!(
        events(&actions),
        vec![ClientEvent::OnlineUsersUpdated(vec![user("bob"), user("carol")])]
    );
}

#[test]
fn roster_refreshes_are_coalesced() {
    let mut controller = session(Vec::new());

    assert!(requests_roster(&controller.request_roster()));
    assert!(controller.request_roster().is_empty());
    assert!(!requests_roster(&controller.handle_event(ServerEvent::GroupsRefresh {
        action: Some("refresh_groups".into()),
    })));

    // The pending request is issued once the outstanding one completes.
    let actions = controller.complete_roster(Ok(Vec::new()));
    assert!(requests_roster(&actions));
    let actions = controller.complete_roster(Ok(Vec::new()));
    assert!(!requests_roster(&actions));
}

#[test]
fn member_left_prompts_roster_refresh() {
    let mut controller = session(vec![GroupSummary::new(GroupId(4), "book club")]);

    let actions = controller.handle_event(ServerEvent::GroupUpdate {
        action: GroupUpdateAction::UserLeftGroup,
        group: GroupUpdatePayload {
            group: GroupSummary::new(GroupId(4), "book club"),
            user_left: Some(user("erin")),
        },
    });

    assert!(requests_roster(&actions));
    assert!(events(&actions).contains(&ClientEvent::MemberLeft {
        group_id: GroupId(4),
        username: Some(user("erin")),
    }));
    assert!(controller.membership.contains(GroupId(4)));
}

#[test]
fn created_group_is_inserted_and_selected() {
    let mut controller = session(Vec::new());

    let actions = controller.group_created(GroupSummary::new(GroupId(9), "new"));

    assert_eq!(controller.selection(), &Selection::Group(GroupId(9)));
    assert_eq!(fetches(&actions), vec![ChannelKey::Group(GroupId(9))]);
    assert!(requests_roster(&actions));
    assert_eq!(controller.roster().len(), 1);
}

#[test]
fn unauthorized_fetch_invalidates_session() {
    let mut controller = session(Vec::new());
    controller.select(Selection::Peer(user("bob"))).unwrap();

    let actions = controller.complete_history(
        ChannelKey::Private(user("bob")),
        Err(FetchError::Unauthorized("expired".into())),
    );
    assert_eq!(events(&actions), vec![ClientEvent::SessionInvalid]);

    controller.request_roster();
    let actions = controller.complete_roster(Err(FetchError::Unauthorized("expired".into())));
    assert_eq!(events(&actions), vec![ClientEvent::SessionInvalid]);
}
