use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use cph::config::{CliArgs, CliCommand};
use cph::engine::{Deadline, Engine, TerminationPolicy};
use cph::extractor::TestCase;
use cph::languages::{LanguageRegistry, resolve_extension};
use cph::persistence::{JsonFilePersistence, default_storage_path};
use cph::provider::{FileProblemProvider, ProblemProvider, code_languages, problem_slug};
use cph::scaffold::FsEditorHost;
use cph::session::{HostEvent, Session, SessionError};
use cph::store::TestCaseStore;
use cph::view::{JsonLinesPresenter, ViewRequest};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let config = cli.to_config().context("Failed to load configuration")?;
    let root = std::path::absolute(config.workspace_root()?)?;

    let storage_path = match &config.storage_path {
        Some(path) => path.clone(),
        None => default_storage_path()?,
    };
    let persistence = Arc::new(JsonFilePersistence::open(&storage_path)?);
    let store = Arc::new(TestCaseStore::load(persistence)?);
    let registry = LanguageRegistry::with_overrides(&config.languages);
    let engine = Engine::local(registry, &root);

    let shutdown_token = CancellationToken::new();
    let termination: Box<dyn TerminationPolicy> = match config.timeout() {
        Some(limit) => Box::new(Deadline::new(limit, shutdown_token.clone())),
        None => Box::new(shutdown_token.clone()),
    };
    let ctrl_c_token = shutdown_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Ctrl-c received, terminating running test case...");
            ctrl_c_token.cancel();
        }
    });

    let session = Session::with_termination(store, engine, Arc::new(JsonLinesPresenter), termination);

    match cli.command {
        CliCommand::Languages { problem } => {
            let slug = problem_slug(&problem)?;
            let provider = FileProblemProvider::new(config.problems_dir()?);
            let record = provider.fetch_problem(&slug)?;
            for lang in code_languages(&record.code_snippets) {
                println!("{lang}\t{}", resolve_extension(lang));
            }
        }
        CliCommand::Fetch { problem, language } => {
            let slug = problem_slug(&problem)?;
            let provider = FileProblemProvider::new(config.problems_dir()?);
            let record = provider.fetch_problem(&slug)?;
            let host = FsEditorHost::new(&root);
            let path = session.open_problem(&host, &slug, &record, &language)?;
            log::info!("Solution file ready at {}", path.display());
        }
        CliCommand::Show { file } => {
            session.set_active_file(source_path(&root, &file)?);
        }
        CliCommand::Add { file, test_case } => {
            let test_case: TestCase =
                serde_json::from_str(&test_case).context("Invalid test case JSON")?;
            activate(&session, &root, &file)?;
            exit_on_error(session.handle_request(ViewRequest::AddTestCase { test_case }).await);
        }
        CliCommand::Save { file, test_cases } => {
            let test_cases: Vec<TestCase> =
                serde_json::from_str(&test_cases).context("Invalid test cases JSON")?;
            activate(&session, &root, &file)?;
            exit_on_error(session.handle_request(ViewRequest::SaveTestCases { test_cases }).await);
        }
        CliCommand::Run { file } => {
            activate(&session, &root, &file)?;
            exit_on_error(session.handle_request(ViewRequest::RunTestCases).await);
        }
        CliCommand::Delete { file } => {
            let path = source_path(&root, &file)?;
            exit_on_error(session.handle_event(HostEvent::FileDeleted(path)));
        }
    }

    Ok(())
}

/// Store keys are absolute; relative arguments resolve against the workspace
fn source_path(root: &Path, file: &Path) -> Result<PathBuf> {
    Ok(std::path::absolute(root.join(file))?)
}

fn activate(session: &Session, root: &Path, file: &Path) -> Result<()> {
    session.on_active_file_changed(source_path(root, file)?)?;
    Ok(())
}

/// The session already reported the failure to the user
fn exit_on_error<T>(result: Result<T, SessionError>) {
    if result.is_err() {
        std::process::exit(1);
    }
}
