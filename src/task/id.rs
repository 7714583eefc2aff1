//! Task id generation and validation.
//!
//! Ids take the form `task-YYYYMMDD-HHMMSS` (UTC), optionally suffixed with
//! milliseconds or a counter when the base form collides.

use std::collections::HashSet;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

static TASK_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^task-\d{8}-\d{6}(-\d+)?$").expect("task id regex is valid"));

/// Generate a task id from the current UTC time
pub fn generate_task_id() -> String {
    format!("task-{}", Utc::now().format("%Y%m%d-%H%M%S"))
}

/// Generate a task id guaranteed not to collide with `existing`.
///
/// Starts from the base form, then appends milliseconds, then increments a
/// counter from there until the id is free.
pub fn generate_unique_task_id(existing: &HashSet<String>) -> String {
    let base = generate_task_id();
    if !existing.contains(&base) {
        return base;
    }

    let millis = Utc::now().timestamp_subsec_millis();
    let mut suffix = u64::from(millis);
    loop {
        let candidate = format!("{base}-{suffix}");
        if !existing.contains(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

/// Check whether a string is a well-formed task id
pub fn is_valid_task_id(id: &str) -> bool {
    TASK_ID_RE.is_match(id)
}
