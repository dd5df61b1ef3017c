//! Tests for `src/kernel/message_policy.rs`.

use armitage::kernel::message_policy::{
    message_disables_memory_usage, message_requests_memory_lookup, sanitize_user_response,
};

#[test]
fn disable_markers_are_detected() {
    for message in [
        "Don't use memory for this",
        "please DO NOT USE MEMORY",
        "dont use memory ok",
        "answer without memory",
        "ignore memory this time",
        "skip memory please",
        "no memory",
    ] {
        assert!(
            message_disables_memory_usage(message),
            "should disable: {message}"
        );
    }
    assert!(!message_disables_memory_usage("what is the aws bill?"));
}

#[test]
fn lookup_markers_are_detected() {
    for message in [
        "check memory first",
        "answer from memory",
        "search memory for my settings",
        "What do you remember about me?",
        "based on my preference",
        "use my preference",
        "what you remembered",
        "recall my last report",
    ] {
        assert!(
            message_requests_memory_lookup(message),
            "should request lookup: {message}"
        );
    }
    assert!(!message_requests_memory_lookup("what is the aws bill?"));
}

#[test]
fn backticked_internal_getters_are_rewritten() {
    let input = "Use `get_cost_and_usage` for this and `get_savings_plans_coverage` for that.";
    let output = sanitize_user_response(input);
    assert_eq!(
        output,
        "Use the requested comparison for this and the requested comparison for that."
    );
}

#[test]
fn the_internal_constraint_sentence_is_replaced() {
    let input = "Sorry. The `get_cost_and_usage_comparisons` tool requires both the baseline \
and comparison periods to be exactly one month long and to start on the first day of the month.";
    let output = sanitize_user_response(input);
    assert!(output.contains(
        "The requested period-over-period comparison is not available for this exact date range."
    ));
    assert!(!output.contains("get_cost_and_usage_comparisons"));
}

#[test]
fn clean_responses_pass_through() {
    let input = "Your AWS bill for yesterday was $42.";
    assert_eq!(sanitize_user_response(input), input);
}
