// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn new_ids_carry_prefix_and_are_unique() {
    let a = JobId::new();
    let b = JobId::new();
    assert!(a.as_str().starts_with("job-"));
    assert_ne!(a, b);
}

#[test]
fn suffix_strips_prefix() {
    let id = DiffId::from_string("diff-abc123");
    assert_eq!(id.suffix(), "abc123");
    // Foreign strings pass through untouched
    let id = DiffId::from_string("legacy");
    assert_eq!(id.suffix(), "legacy");
}

#[test]
fn short_truncates() {
    let id = BoxId::from_string("box-0123456789ab");
    assert_eq!(id.short(4), "0123");
    assert_eq!(id.short(100), "0123456789ab");
    assert_eq!(short("abc", 2), "ab");
    assert_eq!(short("abc", 5), "abc");
}

#[test]
fn serde_is_transparent() {
    let id = SessionId::from_string("sess-xyz");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"sess-xyz\"");
    let back: SessionId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn map_lookup_by_str_borrow() {
    let mut map = std::collections::HashMap::new();
    let id = JobId::new();
    map.insert(id.clone(), 1);
    assert_eq!(map.get(id.as_str()), Some(&1));
}
