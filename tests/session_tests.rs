#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use assert_json_diff::assert_json_eq;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;

use cph::config::LanguageConfig;
use cph::engine::Engine;
use cph::extractor::TestCase;
use cph::languages::LanguageRegistry;
use cph::persistence::JsonFilePersistence;
use cph::provider::{CodeSnippet, ProblemRecord};
use cph::scaffold::FsEditorHost;
use cph::session::{HostEvent, Session, SessionError};
use cph::store::TestCaseStore;
use cph::view::{Presenter, Severity, ViewMessage, ViewRequest};

const TWO_SUM_CONTENT: &str = "<p>Given an array of integers <code>nums</code>...</p>\n\
<pre>\n\
<strong>Input:</strong> nums = [2,7,11,15], target = 9\n\
<strong>Output:</strong> [0,1]\n\
</pre>\n\
<pre>\n\
<strong>Input:</strong> nums = [3,2,4], target = 6\n\
<strong>Output:</strong> [1,2]\n\
</pre>\n";

const TWO_SUM_META: &str = r#"{
  "name": "twoSum",
  "params": [
    {"name": "nums", "type": "integer[]"},
    {"name": "target", "type": "integer"}
  ],
  "return": {"type": "integer[]", "size": 2}
}"#;

/// Prints "<count> <target>" for the two-sum input layout
const SHELL_SOLUTION: &str = "read n\nread nums\nread target\necho \"$n $target\"\n";

#[derive(Default)]
struct Recorder {
    posted: Mutex<Vec<ViewMessage>>,
    notes: Mutex<Vec<(Severity, String)>>,
}

impl Presenter for Recorder {
    fn post(&self, message: ViewMessage) {
        self.posted.lock().push(message);
    }

    fn notify(&self, severity: Severity, text: &str) {
        self.notes.lock().push((severity, text.to_string()));
    }
}

fn two_sum() -> ProblemRecord {
    ProblemRecord {
        content: TWO_SUM_CONTENT.to_string(),
        meta_data: TWO_SUM_META.to_string(),
        code_snippets: vec![
            CodeSnippet {
                lang: "C++".to_string(),
                code: "class Solution {};\n".to_string(),
            },
            CodeSnippet {
                lang: "Python3".to_string(),
                code: SHELL_SOLUTION.to_string(),
            },
        ],
    }
}

/// Python sources run through `/bin/sh` so no interpreter is needed
fn session(root: &Path, storage: &Path) -> (Session, Arc<Recorder>) {
    let persistence = Arc::new(JsonFilePersistence::open(storage).unwrap());
    let store = Arc::new(TestCaseStore::load(persistence).unwrap());
    let registry = LanguageRegistry::with_overrides(&[LanguageConfig {
        name: "py".to_string(),
        command: vec!["/bin/sh".to_string(), "%FILE%".to_string()],
        compile: None,
    }]);
    let recorder = Arc::new(Recorder::default());
    let session = Session::new(store, Engine::local(registry, root), recorder.clone());
    (session, recorder)
}

#[tokio::test]
async fn test_fetch_then_run() {
    let dir = tempfile::tempdir().unwrap();
    let storage = dir.path().join("state").join("storage.json");
    let (session, recorder) = session(dir.path(), &storage);
    let host = FsEditorHost::new(dir.path());

    let path = session
        .open_problem(&host, "two-sum", &two_sum(), "Python3")
        .unwrap();
    assert_eq!(path, dir.path().join("two-sum.py"));
    assert_eq!(session.active_file(), Some(path.clone()));

    let stored = session.store().get(&path).unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].input_format, "4\n2 7 11 15\n9\n");
    assert_eq!(stored[1].output, "[1,2]");

    let results = session
        .handle_request(ViewRequest::RunTestCases)
        .await
        .unwrap()
        .unwrap();

    assert_json_eq!(
        serde_json::to_value(&results).unwrap(),
        json!([
            {"input": {"nums": "[2,7,11,15]", "target": "9"}, "output": "4 9"},
            {"input": {"nums": "[3,2,4]", "target": "6"}, "output": "3 6"}
        ])
    );

    let posted = recorder.posted.lock();
    assert!(matches!(posted.first(), Some(ViewMessage::UpdateTestCases { test_cases }) if test_cases.len() == 2));
    assert_eq!(
        posted.last(),
        Some(&ViewMessage::TestResults { results })
    );
}

#[tokio::test]
async fn test_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let storage = dir.path().join("storage.json");
    let path = {
        let (session, _) = session(dir.path(), &storage);
        let host = FsEditorHost::new(dir.path());
        session
            .open_problem(&host, "two-sum", &two_sum(), "Python3")
            .unwrap()
    };

    let (session, _) = session(dir.path(), &storage);
    let restored = session.store().get(&path).unwrap();
    assert_eq!(restored.len(), 2);
    assert_eq!(restored[0].input.get("target"), Some("9"));

    let on_disk: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&storage).unwrap()).unwrap();
    assert_json_eq!(
        on_disk["testCaseStorage"][path.to_string_lossy().as_ref()][1],
        json!({
            "input": {"nums": "[3,2,4]", "target": "6"},
            "output": "[1,2]",
            "inputFormat": "3\n3 2 4\n6\n",
            "types": [
                {"name": "nums", "type": "integer[]"},
                {"name": "target", "type": "integer"}
            ]
        })
    );
}

#[tokio::test]
async fn test_malformed_metadata_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (session, _) = session(dir.path(), &dir.path().join("storage.json"));
    let host = FsEditorHost::new(dir.path());
    let mut problem = two_sum();
    problem.meta_data = "{not json".to_string();

    let err = session
        .open_problem(&host, "two-sum", &problem, "Python3")
        .unwrap_err();

    assert!(matches!(err, SessionError::Extract(_)));
    assert!(!dir.path().join("two-sum.py").exists());
    assert!(session.store().paths().is_empty());
}

#[tokio::test]
async fn test_unknown_language_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (session, _) = session(dir.path(), &dir.path().join("storage.json"));
    let host = FsEditorHost::new(dir.path());

    let err = session
        .open_problem(&host, "two-sum", &two_sum(), "Go")
        .unwrap_err();
    assert!(matches!(err, SessionError::UnknownLanguage(ref lang) if lang == "Go"));
}

#[tokio::test]
async fn test_added_case_gets_input_format() {
    let dir = tempfile::tempdir().unwrap();
    let (session, recorder) = session(dir.path(), &dir.path().join("storage.json"));
    let path = dir.path().join("sum.py");
    fs::write(&path, "read n\nread xs\necho \"$xs\"\n").unwrap();
    session.handle_event(HostEvent::FileCreated(path.clone())).unwrap();

    let test_case: TestCase = serde_json::from_value(json!({
        "input": {"xs": "[1,2,3]"},
        "output": "6"
    }))
    .unwrap();
    session
        .handle_request(ViewRequest::AddTestCase { test_case })
        .await
        .unwrap();

    let stored = session.store().get(&path).unwrap();
    assert_eq!(stored[0].input_format, "3\n1 2 3\n");
    assert!(matches!(
        recorder.posted.lock().last(),
        Some(ViewMessage::UpdateTestCases { test_cases }) if test_cases.len() == 1
    ));

    let results = session.run_active().await.unwrap();
    assert_eq!(results[0].output, "1 2 3");
}

#[tokio::test]
async fn test_save_replaces_cases() {
    let dir = tempfile::tempdir().unwrap();
    let (session, recorder) = session(dir.path(), &dir.path().join("storage.json"));
    let path = dir.path().join("a.py");
    session.on_active_file_changed(path.clone()).unwrap();

    let test_cases: Vec<TestCase> = serde_json::from_value(json!([
        {"input": {"n": "1"}, "output": "1", "inputFormat": "1\n"},
        {"input": {"n": "2"}, "output": "2", "inputFormat": "custom\n"}
    ]))
    .unwrap();
    session
        .handle_request(ViewRequest::SaveTestCases { test_cases })
        .await
        .unwrap();

    let stored = session.store().get(&path).unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].input_format, "custom\n");
    assert_eq!(recorder.notes.lock()[0].0, Severity::Info);
}

#[tokio::test]
async fn test_deleted_file_is_never_run() {
    let dir = tempfile::tempdir().unwrap();
    let (session, recorder) = session(dir.path(), &dir.path().join("storage.json"));
    let host = FsEditorHost::new(dir.path());
    let path = session
        .open_problem(&host, "two-sum", &two_sum(), "Python3")
        .unwrap();

    fs::remove_file(&path).unwrap();
    session.handle_event(HostEvent::FileDeleted(path.clone())).unwrap();
    assert!(!session.store().contains(&path));
    assert_eq!(session.active_file(), None);

    let err = session.handle_request(ViewRequest::RunTestCases).await.unwrap_err();
    assert!(matches!(err, SessionError::NoActiveFile));

    let results = session.run_file(&path).await.unwrap();
    assert!(results.is_empty());
    assert!(!dir.path().join("test_inputs").exists());
    assert_eq!(
        recorder.notes.lock().last(),
        Some(&(Severity::Error, "No active file selected.".to_string()))
    );
}
