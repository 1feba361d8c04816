use serde::{Deserialize, Serialize};

use crate::engine::ExecutionResult;
use crate::extractor::TestCase;

/// Message from the core to the presentation surface
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum ViewMessage {
    #[serde(rename_all = "camelCase")]
    UpdateTestCases { test_cases: Vec<TestCase> },
    TestResults { results: Vec<ExecutionResult> },
}

/// Message from the presentation surface to the core
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum ViewRequest {
    #[serde(rename_all = "camelCase")]
    AddTestCase { test_case: TestCase },
    #[serde(rename_all = "camelCase")]
    SaveTestCases { test_cases: Vec<TestCase> },
    RunTestCases,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

/// The panel showing test cases and results, plus the host's notifications
pub trait Presenter: Send + Sync {
    fn post(&self, message: ViewMessage);

    fn notify(&self, severity: Severity, text: &str);
}

/// Prints every view message as one JSON line on stdout
pub struct JsonLinesPresenter;

impl Presenter for JsonLinesPresenter {
    fn post(&self, message: ViewMessage) {
        match serde_json::to_string(&message) {
            Ok(line) => println!("{line}"),
            Err(e) => log::error!("Failed to serialize view message: {e}"),
        }
    }

    fn notify(&self, severity: Severity, text: &str) {
        match severity {
            Severity::Info => log::info!("{text}"),
            Severity::Error => log::error!("{text}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let message = ViewMessage::TestResults { results: vec![] };
        assert_json_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"command": "testResults", "results": []})
        );

        let message = ViewMessage::UpdateTestCases { test_cases: vec![] };
        assert_json_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"command": "updateTestCases", "testCases": []})
        );

        let request: ViewRequest = serde_json::from_value(json!({"command": "runTestCases"})).unwrap();
        assert_eq!(request, ViewRequest::RunTestCases);

        let request: ViewRequest = serde_json::from_value(json!({
            "command": "addTestCase",
            "testCase": {"input": {"n": "3"}, "output": "6", "inputFormat": "3\n"}
        }))
        .unwrap();
        match request {
            ViewRequest::AddTestCase { test_case } => {
                assert_eq!(test_case.input.get("n"), Some("3"));
                assert_eq!(test_case.input_format, "3\n");
            }
            other => panic!("unexpected request {other:?}"),
        }
    }
}
