// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use qm_core::EngineError;
use serde_json::json;

#[test]
fn request_round_trips() {
    let line = r#"{"id": 7, "tool": "task_worker", "args": {"task": "x", "workFolder": "/w"}}"#;
    let request: Request = serde_json::from_str(line).unwrap();
    assert_eq!(request.tool, "task_worker");
    assert_eq!(request.id, json!(7));

    let args: TaskWorkerArgs = request.parse_args().unwrap();
    assert_eq!(args.task, "x");
    assert_eq!(args.work_folder, std::path::PathBuf::from("/w"));
    assert!(args.task_id.is_none());
}

#[test]
fn missing_required_arg_is_invalid_params() {
    let request = Request { id: json!(1), tool: "task_worker".into(), args: json!({}) };
    let err = request.parse_args::<TaskWorkerArgs>().unwrap_err();
    assert_eq!(err.kind, qm_core::ErrorKind::InvalidParams);
}

#[test]
fn id_defaults_to_null() {
    let request: Request = serde_json::from_str(r#"{"tool": "system_status"}"#).unwrap();
    assert!(request.id.is_null());
    assert!(request.args.is_null());
}

#[test]
fn response_serialization_omits_absent_sides() {
    let ok = Response::ok(json!(3), ToolResult::text("done"));
    let line = serde_json::to_string(&ok).unwrap();
    assert!(line.contains("\"result\""));
    assert!(!line.contains("\"error\""));

    let fail = Response::fail(json!(4), &EngineError::not_found("no such patch"));
    let value = serde_json::to_value(&fail).unwrap();
    assert_eq!(value["error"]["kind"], "not_found");
    assert_eq!(value["error"]["message"], "no such patch");
    assert!(value.get("result").is_none());
}

#[test]
fn tool_result_with_data() {
    let result = ToolResult::with_data("2 patches", json!([{"diffId": "diff-1"}]));
    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["data"][0]["diffId"], "diff-1");
}

#[test]
fn camel_case_arg_fields() {
    let args: SetTaskStatusArgs = serde_json::from_value(json!({
        "ids": "a, b.1",
        "status": "done",
        "workFolder": "/w"
    }))
    .unwrap();
    assert_eq!(args.ids, "a, b.1");

    let args: RequestRevisionArgs = serde_json::from_value(json!({
        "diffId": "diff-9",
        "feedback": "use tabs",
        "preserveCorrectParts": true
    }))
    .unwrap();
    assert!(args.preserve_correct_parts);
}
