// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent output interpretation.

/// Output length above which question mode is never assumed.
const QUESTION_MAX_LEN: usize = 500;

/// Heuristic: short output containing a question mark and no code fences
/// is a question back to the client rather than a finished run.
///
/// Known to be fragile; a structured sentinel from the agent would be a
/// better signal. Kept in one place so a smarter detector swaps in
/// cleanly.
pub(super) fn looks_like_question(output: &str) -> bool {
    let trimmed = output.trim();
    !trimmed.is_empty()
        && trimmed.len() < QUESTION_MAX_LEN
        && trimmed.contains('?')
        && !trimmed.contains("```")
}
