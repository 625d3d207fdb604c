use shared::{
    domain::{GroupId, Username},
    protocol::{GroupSummary, GroupUpdateAction, GroupUpdatePayload},
};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
    Added(GroupId),
    AlreadyPresent(GroupId),
    Removed {
        group_id: GroupId,
        /// The removed group was the active selection and must be dropped.
        selection_invalidated: bool,
    },
    /// Removal of a group that was not in the roster.
    NotPresent(GroupId),
    /// Another member left; the roster itself is unchanged but member counts are
    /// stale and a refresh is due.
    MemberLeft {
        group_id: GroupId,
        username: Option<Username>,
    },
}

#[derive(Debug, Default)]
pub struct MembershipTracker {
    roster: Vec<GroupSummary>,
    /// Bumped by every pushed delta and local insert/remove; a roster snapshot
    /// requested before the bump is stale.
    generation: u64,
}

impl MembershipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups(&self) -> &[GroupSummary] {
        &self.roster
    }

    pub fn get(&self, group_id: GroupId) -> Option<&GroupSummary> {
        self.roster.iter().find(|group| group.id == group_id)
    }

    pub fn contains(&self, group_id: GroupId) -> bool {
        self.get(group_id).is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Applies one `group_update` delta. `active` is the group currently
    /// selected, if any.
    pub fn apply(
        &mut self,
        action: GroupUpdateAction,
        payload: GroupUpdatePayload,
        active: Option<GroupId>,
    ) -> MembershipChange {
        let group_id = payload.group.id;
        match action {
            GroupUpdateAction::AddedToGroup => {
                if self.insert(payload.group) {
                    info!(group_id = group_id.0, "membership: added to group");
                    MembershipChange::Added(group_id)
                } else {
                    self.generation += 1;
                    MembershipChange::AlreadyPresent(group_id)
                }
            }
            GroupUpdateAction::RemovedFromGroup => match self.remove(group_id, active) {
                Some(selection_invalidated) => {
                    info!(
                        group_id = group_id.0,
                        selection_invalidated, "membership: removed from group"
                    );
                    MembershipChange::Removed {
                        group_id,
                        selection_invalidated,
                    }
                }
                None => {
                    debug!(group_id = group_id.0, "membership: removal of unknown group ignored");
                    self.generation += 1;
                    MembershipChange::NotPresent(group_id)
                }
            },
            GroupUpdateAction::UserLeftGroup => {
                debug!(
                    group_id = group_id.0,
                    user_left = payload.user_left.as_ref().map(Username::as_str),
                    "membership: another member left"
                );
                MembershipChange::MemberLeft {
                    group_id,
                    username: payload.user_left,
                }
            }
        }
    }

    /// Inserts `group` if no group with its id is present.
    pub fn insert(&mut self, group: GroupSummary) -> bool {
        if self.contains(group.id) {
            return false;
        }
        self.roster.push(group);
        self.generation += 1;
        true
    }

    /// Removes `group_id` and reports whether the active selection pointed at
    /// it, or `None` when the group was not in the roster. A `403` on the
    /// group's history is handled through here as well.
    pub fn remove(&mut self, group_id: GroupId, active: Option<GroupId>) -> Option<bool> {
        let before = self.roster.len();
        self.roster.retain(|group| group.id != group_id);
        if self.roster.len() == before {
            return None;
        }
        self.generation += 1;
        Some(active == Some(group_id))
    }

    /// Replaces the whole roster. Returns the active group if the refreshed
    /// roster no longer contains it.
    pub fn replace(
        &mut self,
        groups: Vec<GroupSummary>,
        active: Option<GroupId>,
    ) -> Option<GroupId> {
        self.roster = groups;
        active.filter(|group_id| !self.contains(*group_id))
    }
}

#[cfg(test)]
#[path = "tests/membership_tests.rs"]
mod tests;
