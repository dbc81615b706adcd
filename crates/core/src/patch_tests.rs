// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    added = { 'A', Some(FileChangeKind::Added) },
    copied = { 'C', Some(FileChangeKind::Added) },
    modified = { 'M', Some(FileChangeKind::Modified) },
    type_change = { 'T', Some(FileChangeKind::Modified) },
    deleted = { 'D', Some(FileChangeKind::Deleted) },
    renamed = { 'R', Some(FileChangeKind::Renamed) },
    unmerged = { 'U', None },
)]
fn status_letter_mapping(letter: char, expected: Option<FileChangeKind>) {
    assert_eq!(FileChangeKind::from_status_letter(letter), expected);
}

#[test]
fn empty_patch_has_no_changes() {
    let patch = crate::test_support::patch().build();
    assert!(!patch.has_changes());
    assert_eq!(patch.stats, DiffStats::default());
}

#[test]
fn patch_status_round_trips() {
    for status in [PatchStatus::Pending, PatchStatus::Applied, PatchStatus::Rejected] {
        assert_eq!(PatchStatus::parse(status.as_str()), Some(status));
    }
    assert_eq!(PatchStatus::parse("reverted"), None);
}

#[test]
fn revision_entry_serde() {
    let entry = RevisionEntry {
        at_ms: 42,
        feedback: "use tabs".into(),
        successor: DiffId::from_string("diff-next"),
        revision: 1,
    };
    let json = serde_json::to_value(&entry).unwrap();
    assert_eq!(json["successor"], "diff-next");
    assert_eq!(json["revision"], 1);
}
