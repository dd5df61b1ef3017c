//! Message-level heuristics and response cleanup.
//!
//! Keeps phrase lists and sanitization rules out of the runtime flow so
//! wording changes stay contained.

use std::sync::OnceLock;

use regex::Regex;

/// Phrases that disable memory for the current request.
const DISABLE_MARKERS: [&str; 7] = [
    "don't use memory",
    "do not use memory",
    "dont use memory",
    "without memory",
    "ignore memory",
    "skip memory",
    "no memory",
];

/// Phrases that request a memory lookup on a non-first turn.
const LOOKUP_MARKERS: [&str; 8] = [
    "check memory",
    "from memory",
    "search memory",
    "what do you remember",
    "based on my preference",
    "my preference",
    "remembered",
    "recall",
];

/// Internal constraint sentence that must never reach the user verbatim.
const INTERNAL_CONSTRAINT_SENTENCE: &str = "The `get_cost_and_usage_comparisons` tool requires \
both the baseline and comparison periods to be exactly one month long and to start on the first \
day of the month.";

/// Generic phrasing substituted for the internal constraint sentence.
const GENERIC_CONSTRAINT_SENTENCE: &str = "The requested period-over-period comparison is not \
available for this exact date range.";

/// Whether the user opted out of memory for this request.
pub fn message_disables_memory_usage(message: &str) -> bool {
    let lowered = message.to_lowercase();
    DISABLE_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Whether the user explicitly asked for a memory lookup.
pub fn message_requests_memory_lookup(message: &str) -> bool {
    let lowered = message.to_lowercase();
    LOOKUP_MARKERS.iter().any(|marker| lowered.contains(marker))
}

fn backticked_getter_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"`get_[A-Za-z0-9_]+`").expect("literal pattern compiles"))
}

/// Strip internal tool names and constraints from user-facing prose.
pub fn sanitize_user_response(response: &str) -> String {
    let replaced = response.replace(INTERNAL_CONSTRAINT_SENTENCE, GENERIC_CONSTRAINT_SENTENCE);
    backticked_getter_pattern()
        .replace_all(&replaced, "the requested comparison")
        .into_owned()
}
