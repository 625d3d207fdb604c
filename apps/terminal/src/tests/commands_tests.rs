use super::*;

#[test]
fn plain_text_is_sent_trimmed() {
    assert_eq!(
        parse("  hello there  ").unwrap(),
        Some(Command::Say("hello there".into()))
    );
    assert_eq!(parse("   ").unwrap(), None);
}

#[test]
fn parses_selection_commands() {
    assert_eq!(parse("/public").unwrap(), Some(Command::Public));
    assert_eq!(
        parse("/dm bob").unwrap(),
        Some(Command::Dm(Username::new("bob")))
    );
    assert_eq!(parse("/group 12").unwrap(), Some(Command::Group(GroupId(12))));
}

#[test]
fn parses_group_management_commands() {
    assert_eq!(
        parse("/create launch bob carol").unwrap(),
        Some(Command::Create {
            name: "launch".into(),
            members: vec![Username::new("bob"), Username::new("carol")],
        })
    );
    assert_eq!(
        parse("/create solo").unwrap(),
        Some(Command::Create {
            name: "solo".into(),
            members: Vec::new(),
        })
    );
    assert_eq!(
        parse("/add 3 dave").unwrap(),
        Some(Command::Add {
            group_id: GroupId(3),
            members: vec![Username::new("dave")],
        })
    );
    assert_eq!(parse("/leave 3").unwrap(), Some(Command::Leave(GroupId(3))));
    assert_eq!(parse("/members 3").unwrap(), Some(Command::Members(GroupId(3))));
}

#[test]
fn rejects_bad_arguments() {
    assert_eq!(parse("/dm").unwrap_err(), CommandError::Usage("/dm <user>"));
    assert_eq!(
        parse("/add 3").unwrap_err(),
        CommandError::Usage("/add <id> <users...>")
    );
    assert_eq!(
        parse("/group ops").unwrap_err(),
        CommandError::InvalidGroupId("ops".into())
    );
    assert_eq!(
        parse("/teleport mars").unwrap_err(),
        CommandError::Unknown("teleport".into())
    );
}
