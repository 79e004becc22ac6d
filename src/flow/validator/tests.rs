//! Tests for publish-time graph validation

use super::*;

// ============================================================================
// Helper Functions
// ============================================================================

/// Parse a JSON graph and validate it
fn validate(source: &str) -> Vec<ValidationError> {
    let graph = FlowGraph::from_json(source).expect("Parse should succeed");
    validate_graph(&graph)
}

/// Check if errors contain a specific rule
fn has_rule(errors: &[ValidationError], rule_id: &str) -> bool {
    errors.iter().any(|e| e.rule_id == rule_id)
}

/// Get errors for a specific rule
fn for_rule<'a>(errors: &'a [ValidationError], rule_id: &str) -> Vec<&'a ValidationError> {
    errors.iter().filter(|e| e.rule_id == rule_id).collect()
}

// ============================================================================
// Valid Graphs
// ============================================================================

#[test]
fn test_minimal_flow_is_valid() {
    let source = r#"{
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "hi", "type": "bubble_text", "text": "Hi"},
            {"id": "end", "type": "end_chat"}
        ],
        "edges": [
            {"from": "start", "to": "hi"},
            {"from": "hi", "to": "end"}
        ]
    }"#;

    let errors = validate(source);
    assert!(errors.is_empty(), "Unexpected errors: {:?}", errors);
}

#[test]
fn test_loop_back_to_input_is_valid() {
    let source = r#"{
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "ask", "type": "input_text", "prompt": "Name?", "variable": "name"},
            {"id": "check", "type": "condition", "rules": [
                {"variable": "name", "operator": "is_set", "label": "ok"}
            ]},
            {"id": "end", "type": "end_chat"}
        ],
        "edges": [
            {"from": "start", "to": "ask"},
            {"from": "ask", "to": "check"},
            {"from": "check", "to": "end", "branch_label": "ok"},
            {"from": "check", "to": "ask", "branch_label": "default"}
        ]
    }"#;

    let errors = validate(source);
    assert!(!errors.iter().any(|e| e.is_error()), "{:?}", errors);
}

// ============================================================================
// Entry Node Tests
// ============================================================================

#[test]
fn test_missing_start_node() {
    let source = r#"{
        "nodes": [{"id": "end", "type": "end_chat"}],
        "edges": []
    }"#;

    let errors = validate(source);
    assert!(has_rule(&errors, "entry-node"));
    assert!(for_rule(&errors, "entry-node")[0].node_id.is_none());
}

#[test]
fn test_two_start_nodes() {
    let source = r#"{
        "nodes": [
            {"id": "a", "type": "start"},
            {"id": "b", "type": "start"},
            {"id": "end", "type": "end_chat"}
        ],
        "edges": [
            {"from": "a", "to": "end"},
            {"from": "b", "to": "end"}
        ]
    }"#;

    let all = validate(source);
    let errors = for_rule(&all, "entry-node");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].node_id.as_deref(), Some("b"));
}

// ============================================================================
// Duplicate / Dangling Tests
// ============================================================================

#[test]
fn test_duplicate_node_id() {
    let source = r#"{
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "x", "type": "bubble_text", "text": "one"},
            {"id": "x", "type": "end_chat"}
        ],
        "edges": [
            {"from": "start", "to": "x"},
            {"from": "x", "to": "x"}
        ]
    }"#;

    let errors = validate(source);
    assert_eq!(for_rule(&errors, "duplicate-node").len(), 1);
}

#[test]
fn test_edge_to_unknown_node() {
    let source = r#"{
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "end", "type": "end_chat"}
        ],
        "edges": [
            {"from": "start", "to": "nowhere"}
        ]
    }"#;

    let errors = validate(source);
    let dangling = for_rule(&errors, "dangling-edge");
    assert_eq!(dangling.len(), 1);
    assert!(dangling[0].message.contains("'nowhere'"));
}

// ============================================================================
// Missing Edge Tests
// ============================================================================

#[test]
fn test_missing_outgoing_edge() {
    let source = r#"{
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "hi", "type": "bubble_text", "text": "Hi"}
        ],
        "edges": [{"from": "start", "to": "hi"}]
    }"#;

    let all = validate(source);
    let errors = for_rule(&all, "missing-edge");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].node_id.as_deref(), Some("hi"));
}

#[test]
fn test_terminal_and_jump_nodes_need_no_edge() {
    let source = r#"{
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "ask", "type": "input_text", "prompt": "?", "variable": "v"},
            {"id": "again", "type": "jump", "target_node_id": "ask"},
            {"id": "human", "type": "transfer"}
        ],
        "edges": [
            {"from": "start", "to": "ask"},
            {"from": "ask", "to": "again"}
        ]
    }"#;

    let errors = validate(source);
    assert!(!has_rule(&errors, "missing-edge"), "{:?}", errors);
    assert!(!has_rule(&errors, "jump-target"));
    // "human" is only unreachable
    assert!(has_rule(&errors, "unreachable-node"));
    assert!(!errors.iter().any(|e| e.is_error()));
}

#[test]
fn test_on_error_edge_alone_is_not_an_exit() {
    let source = r#"{
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "hook", "type": "webhook", "url": "https://example.com"},
            {"id": "end", "type": "end_chat"}
        ],
        "edges": [
            {"from": "start", "to": "hook"},
            {"from": "hook", "to": "end", "branch_label": "on_error"}
        ]
    }"#;

    let all = validate(source);
    let errors = for_rule(&all, "missing-edge");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].node_id.as_deref(), Some("hook"));
}

#[test]
fn test_single_output_fan_out_is_an_error() {
    let source = r#"{
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "hi", "type": "bubble_text", "text": "Hi"},
            {"id": "a", "type": "end_chat"},
            {"id": "b", "type": "transfer"}
        ],
        "edges": [
            {"from": "start", "to": "hi"},
            {"from": "hi", "to": "a"},
            {"from": "hi", "to": "b", "branch_label": "yes"}
        ]
    }"#;

    let all = validate(source);
    let findings = for_rule(&all, "single-output");
    assert_eq!(findings.len(), 2, "{:?}", findings);
    assert!(findings[0].is_error());
    assert_eq!(findings[0].node_id.as_deref(), Some("hi"));
    assert!(findings[0].message.contains("a, b"));
    assert_eq!(findings[1].severity, Severity::Warning);
    assert!(findings[1].message.contains("'yes'"));
}

#[test]
fn test_single_output_allows_default_and_error_edges() {
    let source = r#"{
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "hook", "type": "webhook", "url": "https://example.com"},
            {"id": "ok", "type": "end_chat"},
            {"id": "human", "type": "transfer"}
        ],
        "edges": [
            {"from": "start", "to": "hook", "branch_label": "default"},
            {"from": "hook", "to": "ok"},
            {"from": "hook", "to": "human", "branch_label": "on_error"}
        ]
    }"#;

    let errors = validate(source);
    assert!(!has_rule(&errors, "single-output"), "{:?}", errors);
}

#[test]
fn test_on_error_edge_on_bubble_is_flagged() {
    let source = r#"{
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "hi", "type": "bubble_text", "text": "Hi"},
            {"id": "end", "type": "end_chat"}
        ],
        "edges": [
            {"from": "start", "to": "hi"},
            {"from": "hi", "to": "end"},
            {"from": "hi", "to": "end", "branch_label": "on_error"}
        ]
    }"#;

    let all = validate(source);
    let findings = for_rule(&all, "single-output");
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].severity, Severity::Warning);
}

#[test]
fn test_callable_flow_may_end_on_return_point() {
    let source = r#"{
        "callable": true,
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "calc", "type": "set_variable", "variable": "result", "value": "42"}
        ],
        "edges": [{"from": "start", "to": "calc"}]
    }"#;

    let errors = validate(source);
    assert!(!has_rule(&errors, "missing-edge"), "{:?}", errors);
}

// ============================================================================
// Branch Label Tests
// ============================================================================

#[test]
fn test_condition_requires_default_edge() {
    let source = r#"{
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "check", "type": "condition", "rules": [
                {"variable": "age", "operator": "greater_than", "value": "17", "label": "adult"}
            ]},
            {"id": "end", "type": "end_chat"}
        ],
        "edges": [
            {"from": "start", "to": "check"},
            {"from": "check", "to": "end", "branch_label": "adult"}
        ]
    }"#;

    let all = validate(source);
    let errors = for_rule(&all, "branch-labels");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("'default'"));
}

#[test]
fn test_buttons_branch_without_edge() {
    let source = r#"{
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "menu", "type": "input_buttons", "prompt": "Pick", "variable": "pick",
             "choices": [{"id": "a", "label": "A"}, {"id": "b", "label": "B"}]},
            {"id": "end", "type": "end_chat"}
        ],
        "edges": [
            {"from": "start", "to": "menu"},
            {"from": "menu", "to": "end", "branch_label": "a"},
            {"from": "menu", "to": "end", "branch_label": "default"}
        ]
    }"#;

    let all = validate(source);
    let errors = for_rule(&all, "branch-labels");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("'b'"));
}

#[test]
fn test_duplicate_branch_labels() {
    let source = r#"{
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "check", "type": "condition", "rules": [
                {"variable": "x", "operator": "equals", "value": "1", "label": "same"},
                {"variable": "x", "operator": "equals", "value": "2", "label": "same"}
            ]},
            {"id": "end", "type": "end_chat"}
        ],
        "edges": [
            {"from": "start", "to": "check"},
            {"from": "check", "to": "end", "branch_label": "same"},
            {"from": "check", "to": "end", "branch_label": "default"}
        ]
    }"#;

    let all = validate(source);
    let errors = for_rule(&all, "branch-labels");
    assert!(errors.iter().any(|e| e.message.contains("more than once")));
}

#[test]
fn test_unknown_edge_label_and_unlabeled_edge() {
    let source = r#"{
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "split", "type": "ab_test", "branches": [
                {"label": "a", "weight": 50}, {"label": "b", "weight": 50}
            ]},
            {"id": "end", "type": "end_chat"}
        ],
        "edges": [
            {"from": "start", "to": "split"},
            {"from": "split", "to": "end", "branch_label": "a"},
            {"from": "split", "to": "end", "branch_label": "b"},
            {"from": "split", "to": "end", "branch_label": "c"},
            {"from": "split", "to": "end"}
        ]
    }"#;

    let all = validate(source);
    let errors = for_rule(&all, "branch-labels");
    assert_eq!(errors.len(), 2, "{:?}", errors);
    assert!(errors.iter().any(|e| e.message.contains("'c'")));
}

#[test]
fn test_ab_test_needs_no_default() {
    let source = r#"{
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "split", "type": "ab_test", "branches": [
                {"label": "a", "weight": 1}, {"label": "b", "weight": 3}
            ]},
            {"id": "end", "type": "end_chat"}
        ],
        "edges": [
            {"from": "start", "to": "split"},
            {"from": "split", "to": "end", "branch_label": "a"},
            {"from": "split", "to": "end", "branch_label": "b"}
        ]
    }"#;

    assert!(!has_rule(&validate(source), "branch-labels"));
}

// ============================================================================
// Jump / Config / Reachability Tests
// ============================================================================

#[test]
fn test_jump_to_unknown_node() {
    let source = r#"{
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "j", "type": "jump", "target_node_id": "ghost"}
        ],
        "edges": [{"from": "start", "to": "j"}]
    }"#;

    let all = validate(source);
    let errors = for_rule(&all, "jump-target");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("'ghost'"));
}

#[test]
fn test_whatsapp_button_limit() {
    let source = r#"{
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "wa", "type": "whatsapp_buttons", "body": "Pick", "variable": "v", "buttons": [
                {"id": "1", "label": "One"}, {"id": "2", "label": "Two"},
                {"id": "3", "label": "Three"}, {"id": "4", "label": "Four"}
            ]},
            {"id": "end", "type": "end_chat"}
        ],
        "edges": [
            {"from": "start", "to": "wa"},
            {"from": "wa", "to": "end", "branch_label": "1"},
            {"from": "wa", "to": "end", "branch_label": "2"},
            {"from": "wa", "to": "end", "branch_label": "3"},
            {"from": "wa", "to": "end", "branch_label": "4"},
            {"from": "wa", "to": "end", "branch_label": "default"}
        ]
    }"#;

    let errors = validate(source);
    assert_eq!(for_rule(&errors, "node-config").len(), 1);
    assert!(!has_rule(&errors, "branch-labels"));
}

#[test]
fn test_number_input_bounds() {
    let source = r#"{
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "n", "type": "input_number", "prompt": "?", "variable": "", "min": 10, "max": 1},
            {"id": "end", "type": "end_chat"}
        ],
        "edges": [
            {"from": "start", "to": "n"},
            {"from": "n", "to": "end"}
        ]
    }"#;

    let all = validate(source);
    let errors = for_rule(&all, "node-config");
    assert_eq!(errors.len(), 2);
}

#[test]
fn test_unreachable_node_is_warning() {
    let source = r#"{
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "end", "type": "end_chat"},
            {"id": "orphan", "type": "bubble_text", "text": "lost"}
        ],
        "edges": [
            {"from": "start", "to": "end"},
            {"from": "orphan", "to": "end"}
        ]
    }"#;

    let errors = validate(source);
    let unreachable = for_rule(&errors, "unreachable-node");
    assert_eq!(unreachable.len(), 1);
    assert_eq!(unreachable[0].severity, Severity::Warning);

    let graph = FlowGraph::from_json(source).unwrap();
    assert!(!has_errors(&graph));
}

#[test]
fn test_validator_lists_rules() {
    let ids: Vec<&str> = Validator::new().rules().map(|(id, _)| id).collect();
    assert_eq!(ids.len(), 9);
    assert!(ids.contains(&"missing-edge"));
    assert!(ids.contains(&"single-output"));
}
