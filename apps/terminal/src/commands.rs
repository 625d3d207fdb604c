use shared::domain::{GroupId, Username};
use thiserror::Error;

pub const HELP: &str = "\
commands:
  /public                     talk in the public channel
  /dm <user>                  talk privately with <user>
  /group <id>                 talk in group <id>
  /groups                     list your groups
  /members <id>               list members of group <id>
  /create <name> [users...]   create a group and add users
  /add <id> <users...>        add users to group <id>
  /leave <id>                 leave group <id>
  /refresh                    reload the group list
  /help                       show this help
  /quit                       log out and exit
anything else is sent to the active conversation";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Public,
    Dm(Username),
    Group(GroupId),
    Groups,
    Members(GroupId),
    Create { name: String, members: Vec<Username> },
    Add { group_id: GroupId, members: Vec<Username> },
    Leave(GroupId),
    Refresh,
    Help,
    Quit,
    Say(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("unknown command: /{0} (try /help)")]
    Unknown(String),
    #[error("invalid group id: {0}")]
    InvalidGroupId(String),
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Say(line.to_string())));
    };

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    let command = match (name, args.as_slice()) {
        ("public", []) => Command::Public,
        ("public", _) => return Err(CommandError::Usage("/public")),
        ("dm", [peer]) => Command::Dm(Username::new(*peer)),
        ("dm", _) => return Err(CommandError::Usage("/dm <user>")),
        ("group", [id]) => Command::Group(group_id(id)?),
        ("group", _) => return Err(CommandError::Usage("/group <id>")),
        ("groups", []) => Command::Groups,
        ("groups", _) => return Err(CommandError::Usage("/groups")),
        ("members", [id]) => Command::Members(group_id(id)?),
        ("members", _) => return Err(CommandError::Usage("/members <id>")),
        ("create", [name, members @ ..]) => Command::Create {
            name: name.to_string(),
            members: usernames(members),
        },
        ("create", _) => return Err(CommandError::Usage("/create <name> [users...]")),
        ("add", [id, members @ ..]) if !members.is_empty() => Command::Add {
            group_id: group_id(id)?,
            members: usernames(members),
        },
        ("add", _) => return Err(CommandError::Usage("/add <id> <users...>")),
        ("leave", [id]) => Command::Leave(group_id(id)?),
        ("leave", _) => return Err(CommandError::Usage("/leave <id>")),
        ("refresh", []) => Command::Refresh,
        ("refresh", _) => return Err(CommandError::Usage("/refresh")),
        ("help", _) => Command::Help,
        ("quit" | "exit", _) => Command::Quit,
        (other, _) => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn group_id(raw: &str) -> Result<GroupId, CommandError> {
    raw.parse::<i64>()
        .map(GroupId)
        .map_err(|_| CommandError::InvalidGroupId(raw.to_string()))
}

fn usernames(raw: &[&str]) -> Vec<Username> {
    raw.iter().map(|name| Username::new(*name)).collect()
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
