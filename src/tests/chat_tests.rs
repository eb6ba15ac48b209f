use super::*;

#[test]
fn test_context_excludes_hidden_messages() {
    let mut log = ChatLog::new(10);
    log.push(Role::User, "hello", "r-1");
    log.push(Role::Hidden, "the user greeted me", "r-1");
    log.push(Role::Assistant, "hi there", "r-1");

    let context = log.context();
    assert_eq!(context.len(), 2);
    assert!(context.iter().all(|m| m.role != Role::Hidden));
    assert_eq!(log.messages().len(), 3);
}

#[test]
fn test_context_caps_to_most_recent() {
    let mut log = ChatLog::new(2);
    log.push(Role::User, "one", "r-1");
    log.push(Role::Assistant, "two", "r-1");
    log.push(Role::User, "three", "r-2");

    let context = log.context();
    let contents: Vec<&str> = context.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["two", "three"]);
}

#[test]
fn test_push_from_records_agent() {
    let mut log = ChatLog::new(10);
    log.push_from(Role::Tool, "{\"ok\":true}", "r-1", "groceries");
    assert_eq!(log.messages()[0].agent.as_deref(), Some("groceries"));
}

#[test]
fn test_split_think_blocks_extracts_and_strips() {
    let (thoughts, visible) =
        split_think_blocks("<think>the user wants eggs</think>Added eggs to the list.");
    assert_eq!(thoughts, vec!["the user wants eggs"]);
    assert_eq!(visible, "Added eggs to the list.");
}

#[test]
fn test_split_think_blocks_handles_multiline_and_multiple() {
    let text = "<think>first\nthought</think>between<think>second</think> after";
    let (thoughts, visible) = split_think_blocks(text);
    assert_eq!(thoughts, vec!["first\nthought", "second"]);
    assert_eq!(visible, "between after");
}

#[test]
fn test_split_think_blocks_without_tags_is_identity() {
    let (thoughts, visible) = split_think_blocks("plain answer");
    assert!(thoughts.is_empty());
    assert_eq!(visible, "plain answer");
}

#[test]
fn test_empty_think_block_is_dropped() {
    let (thoughts, visible) = split_think_blocks("<think>  </think>done");
    assert!(thoughts.is_empty());
    assert_eq!(visible, "done");
}
