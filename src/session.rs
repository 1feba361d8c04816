use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::engine::{Engine, ExecutionResult, LocalRunner, ProcessRunner, TerminationPolicy};
use crate::extractor::{ExtractError, TestCase, extract_test_cases};
use crate::provider::ProblemRecord;
use crate::scaffold::{EditorHost, scaffold};
use crate::store::TestCaseStore;
use crate::view::{Presenter, Severity, ViewMessage, ViewRequest};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No active file selected.")]
    NoActiveFile,
    #[error("Test cases for {} are already running", .0.display())]
    RunInProgress(PathBuf),
    #[error("Language {0} is not available for this problem")]
    UnknownLanguage(String),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Notification from the editor host, each carrying the affected path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    ActiveFileChanged(PathBuf),
    FileClosed(PathBuf),
    FileSaved(PathBuf),
    FileDeleted(PathBuf),
    FileCreated(PathBuf),
}

/// Ties the store, the engine and the presentation surface to one editor
pub struct Session<R = LocalRunner> {
    store: Arc<TestCaseStore>,
    engine: Engine<R>,
    presenter: Arc<dyn Presenter>,
    termination: Box<dyn TerminationPolicy>,
    active: Mutex<Option<PathBuf>>,
    running: Mutex<HashSet<PathBuf>>,
}

/// Marks a file as running until dropped
struct RunGuard<'a> {
    running: &'a Mutex<HashSet<PathBuf>>,
    path: PathBuf,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a Mutex<HashSet<PathBuf>>, path: &Path) -> Result<Self, SessionError> {
        if !running.lock().insert(path.to_path_buf()) {
            return Err(SessionError::RunInProgress(path.to_path_buf()));
        }
        Ok(Self {
            running,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.lock().remove(&self.path);
    }
}

impl<R: ProcessRunner> Session<R> {
    /// Session whose cases are never terminated from outside
    pub fn new(store: Arc<TestCaseStore>, engine: Engine<R>, presenter: Arc<dyn Presenter>) -> Self {
        Self::with_termination(store, engine, presenter, Box::new(CancellationToken::new()))
    }

    pub fn with_termination(
        store: Arc<TestCaseStore>,
        engine: Engine<R>,
        presenter: Arc<dyn Presenter>,
        termination: Box<dyn TerminationPolicy>,
    ) -> Self {
        Self {
            store,
            engine,
            presenter,
            termination,
            active: Mutex::new(None),
            running: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &TestCaseStore {
        &self.store
    }

    pub fn engine(&self) -> &Engine<R> {
        &self.engine
    }

    pub fn active_file(&self) -> Option<PathBuf> {
        self.active.lock().clone()
    }

    fn require_active(&self) -> Result<PathBuf, SessionError> {
        self.active_file().ok_or(SessionError::NoActiveFile)
    }

    pub fn set_active_file(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        log::debug!("Active file is now {}", path.display());
        *self.active.lock() = Some(path);
        self.refresh_view();
    }

    /// Pushes the active file's test cases to the surface
    pub fn refresh_view(&self) {
        if let Some(path) = self.active_file() {
            let test_cases = self.store.get(&path).unwrap_or_default();
            self.presenter.post(ViewMessage::UpdateTestCases { test_cases });
        }
    }

    fn report(&self, err: &SessionError) {
        log::error!("{err:#}");
        self.presenter.notify(Severity::Error, &err.to_string());
    }

    /// Dispatches a host notification; failures are also shown to the user
    pub fn handle_event(&self, event: HostEvent) -> Result<(), SessionError> {
        let result = match event {
            HostEvent::ActiveFileChanged(path) => self.on_active_file_changed(path),
            HostEvent::FileClosed(path) => self.on_file_closed(&path),
            HostEvent::FileSaved(path) => self.on_file_saved(&path),
            HostEvent::FileDeleted(path) => self.on_file_deleted(&path),
            HostEvent::FileCreated(path) => self.on_file_created(path),
        };
        if let Err(e) = &result {
            self.report(e);
        }
        result
    }

    pub fn on_active_file_changed(&self, path: impl Into<PathBuf>) -> Result<(), SessionError> {
        self.set_active_file(path);
        self.store.flush()?;
        Ok(())
    }

    pub fn on_file_closed(&self, path: &Path) -> Result<(), SessionError> {
        log::debug!("Closed {}", path.display());
        self.store.flush()?;
        Ok(())
    }

    pub fn on_file_saved(&self, path: &Path) -> Result<(), SessionError> {
        log::debug!("Saved {}", path.display());
        self.store.flush()?;
        Ok(())
    }

    /// Forgets the test cases of a deleted file
    pub fn on_file_deleted(&self, path: &Path) -> Result<(), SessionError> {
        self.store.remove(path)?;
        let mut active = self.active.lock();
        if active.as_deref() == Some(path) {
            log::info!("Active file {} was deleted", path.display());
            *active = None;
        }
        Ok(())
    }

    pub fn on_file_created(&self, path: impl Into<PathBuf>) -> Result<(), SessionError> {
        let path = path.into();
        self.store.ensure(&path)?;
        self.set_active_file(path);
        Ok(())
    }

    /// Scaffolds the solution file for `lang` and stores the problem's samples
    ///
    /// Nothing is created when the metadata cannot be parsed.
    pub fn open_problem(
        &self,
        host: &dyn EditorHost,
        slug: &str,
        problem: &ProblemRecord,
        lang: &str,
    ) -> Result<PathBuf, SessionError> {
        let snippet = problem
            .snippet(lang)
            .ok_or_else(|| SessionError::UnknownLanguage(lang.to_string()))?;
        let test_cases = extract_test_cases(&problem.content, &problem.meta_data)?;
        log::info!("Extracted {} test cases for {slug}", test_cases.len());

        let path = scaffold(host, slug, snippet)?;
        self.store.replace(&path, test_cases)?;
        self.set_active_file(path.clone());
        Ok(path)
    }

    /// Applies a request from the surface; failures are also shown to the user
    pub async fn handle_request(
        &self,
        request: ViewRequest,
    ) -> Result<Option<Vec<ExecutionResult>>, SessionError> {
        let result = match request {
            ViewRequest::AddTestCase { test_case } => self.add_test_case(test_case).map(|_| None),
            ViewRequest::SaveTestCases { test_cases } => {
                self.save_test_cases(test_cases).map(|_| None)
            }
            ViewRequest::RunTestCases => self.run_active().await.map(Some),
        };
        if let Err(e) = &result {
            self.report(e);
        }
        result
    }

    /// Appends a case to the active file and returns the new count
    pub fn add_test_case(&self, mut test_case: TestCase) -> Result<usize, SessionError> {
        let path = self.require_active()?;
        if test_case.input_format.is_empty() {
            test_case.rederive_input_format()?;
        }
        let count = self.store.append(&path, test_case)?;
        self.refresh_view();
        Ok(count)
    }

    /// Replaces every case of the active file
    pub fn save_test_cases(&self, mut test_cases: Vec<TestCase>) -> Result<(), SessionError> {
        let path = self.require_active()?;
        for case in test_cases.iter_mut().filter(|c| c.input_format.is_empty()) {
            case.rederive_input_format()?;
        }
        self.store.replace(&path, test_cases)?;
        self.presenter.notify(
            Severity::Info,
            &format!("Test cases saved for {}", path.display()),
        );
        Ok(())
    }

    pub async fn run_active(&self) -> Result<Vec<ExecutionResult>, SessionError> {
        let path = self.require_active()?;
        self.run_file(&path).await
    }

    /// Runs the stored cases of `path` and posts the results
    ///
    /// A file without stored cases never reaches the engine.
    pub async fn run_file(&self, path: &Path) -> Result<Vec<ExecutionResult>, SessionError> {
        let _guard = RunGuard::acquire(&self.running, path)?;

        let cases = self.store.get(path).unwrap_or_default();
        let results = if cases.is_empty() {
            log::info!("No test cases stored for {}", path.display());
            Vec::new()
        } else {
            self.engine
                .run_all(path, &cases, self.termination.as_ref())
                .await?
        };

        self.presenter.post(ViewMessage::TestResults {
            results: results.clone(),
        });
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::LanguageRegistry;
    use crate::persistence::MemoryPersistence;

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

    fn session(root: &Path) -> (Session, Arc<Recorder>) {
        let store = Arc::new(TestCaseStore::load(Arc::new(MemoryPersistence::new())).unwrap());
        let recorder = Arc::new(Recorder::default());
        let engine = Engine::local(LanguageRegistry::new(), root);
        (Session::new(store, engine, recorder.clone()), recorder)
    }

    #[tokio::test]
    async fn test_run_without_active_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (session, recorder) = session(dir.path());

        let err = session.handle_request(ViewRequest::RunTestCases).await.unwrap_err();
        assert!(matches!(err, SessionError::NoActiveFile));
        assert_eq!(
            recorder.notes.lock().as_slice(),
            &[(Severity::Error, "No active file selected.".to_string())]
        );
        assert!(recorder.posted.lock().is_empty());
    }

    #[test]
    fn test_created_then_deleted_file() {
        let dir = tempfile::tempdir().unwrap();
        let (session, recorder) = session(dir.path());
        let path = dir.path().join("a.py");

        session.handle_event(HostEvent::FileCreated(path.clone())).unwrap();
        assert_eq!(session.active_file(), Some(path.clone()));
        assert_eq!(session.store().get(&path), Some(vec![]));
        assert_eq!(
            recorder.posted.lock().last(),
            Some(&ViewMessage::UpdateTestCases { test_cases: vec![] })
        );

        session.handle_event(HostEvent::FileDeleted(path.clone())).unwrap();
        assert_eq!(session.active_file(), None);
        assert!(!session.store().contains(&path));
    }

    #[test]
    fn test_run_guard_rejects_second_run() {
        let running = Mutex::new(HashSet::new());
        let path = Path::new("/ws/a.py");

        let guard = RunGuard::acquire(&running, path).unwrap();
        assert!(matches!(
            RunGuard::acquire(&running, path),
            Err(SessionError::RunInProgress(_))
        ));
        assert!(RunGuard::acquire(&running, Path::new("/ws/b.py")).is_ok());

        drop(guard);
        assert!(RunGuard::acquire(&running, path).is_ok());
    }
}
