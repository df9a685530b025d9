use pbx_archive_sync::pbx::messages::{derive_chat_name, is_group_chat, ConversationMeta};

fn meta() -> ConversationMeta {
    ConversationMeta {
        conversation_id: "77".to_string(),
        public_name: None,
        generated_name: None,
        participants: Vec::new(),
        is_external: false,
    }
}

#[test]
fn test_public_name_wins() {
    let mut m = meta();
    m.public_name = Some("Support Team".to_string());
    m.generated_name = Some("104, 105".to_string());
    assert_eq!(derive_chat_name(&m).as_deref(), Some("Support Team"));
}

#[test]
fn test_generated_name_second() {
    let mut m = meta();
    m.generated_name = Some("104, 105".to_string());
    m.participants = vec!["104".to_string(), "105".to_string()];
    assert_eq!(derive_chat_name(&m).as_deref(), Some("104, 105"));
}

#[test]
fn test_name_synthesized_from_participants() {
    let mut m = meta();
    m.participants = vec!["104".to_string(), "15551234567".to_string()];
    assert_eq!(derive_chat_name(&m).as_deref(), Some("104, 15551234567"));
}

#[test]
fn test_blank_names_are_ignored() {
    let mut m = meta();
    m.public_name = Some("   ".to_string());
    m.generated_name = Some("".to_string());
    m.participants = vec!["104".to_string()];
    assert_eq!(derive_chat_name(&m).as_deref(), Some("104"));
}

#[test]
fn test_nameless_empty_conversation() {
    assert_eq!(derive_chat_name(&meta()), None);
}

#[test]
fn test_group_when_public_name_set() {
    let mut m = meta();
    m.public_name = Some("Announcements".to_string());
    m.participants = vec!["104".to_string()];
    assert!(is_group_chat(&m));
}

#[test]
fn test_group_when_more_than_two_participants() {
    let mut m = meta();
    m.participants = vec!["104".into(), "105".into(), "106".into()];
    assert!(is_group_chat(&m));
}

#[test]
fn test_one_to_one_is_not_a_group() {
    let mut m = meta();
    m.participants = vec!["104".into(), "15551234567".into()];
    assert!(!is_group_chat(&m));

    // A blank public name does not make it a group either.
    m.public_name = Some("  ".to_string());
    assert!(!is_group_chat(&m));
}
