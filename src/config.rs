use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "cph", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Workspace root holding sources and scratch directories
    #[arg(long = "workspace", short = 'w')]
    pub workspace_root: Option<PathBuf>,

    /// Path of the persisted test case storage
    #[arg(long = "storage")]
    pub storage_path: Option<PathBuf>,

    /// Terminate a running test case after this many milliseconds
    #[arg(long = "timeout-ms")]
    pub timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// List the languages a problem offers code snippets for
    Languages {
        /// Problem URL or slug
        problem: String,
    },
    /// Scaffold a source file for a problem and extract its sample test cases
    Fetch {
        /// Problem URL or slug
        problem: String,
        /// Language label as shown by `languages`, e.g. "Python3"
        #[arg(long, short = 'l')]
        language: String,
    },
    /// Print the test cases stored for a source file
    Show { file: PathBuf },
    /// Append a test case, given as JSON, to a source file
    Add { file: PathBuf, test_case: String },
    /// Replace the test cases of a source file with a JSON array
    Save { file: PathBuf, test_cases: String },
    /// Run the stored test cases against a source file
    Run { file: PathBuf },
    /// Forget a deleted source file
    Delete { file: PathBuf },
}

impl CliArgs {
    /// Load the configuration file if given, then apply command line overrides
    pub fn to_config(&self) -> std::io::Result<Config> {
        let mut config = match &self.config_path {
            Some(path) => {
                let file = std::fs::File::open(path)?;
                let reader = std::io::BufReader::new(file);
                serde_json::from_reader(reader)?
            }
            None => Config::default(),
        };

        if let Some(root) = &self.workspace_root {
            config.workspace_root = Some(root.clone());
        }
        if let Some(storage) = &self.storage_path {
            config.storage_path = Some(storage.clone());
        }
        if let Some(timeout) = self.timeout_ms {
            config.timeout_ms = Some(timeout);
        }

        Ok(config)
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    pub workspace_root: Option<PathBuf>,
    pub storage_path: Option<PathBuf>,
    pub problems_dir: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub languages: Vec<LanguageConfig>,
}

impl Config {
    pub fn workspace_root(&self) -> std::io::Result<PathBuf> {
        match &self.workspace_root {
            Some(root) => Ok(root.clone()),
            None => std::env::current_dir(),
        }
    }

    /// Cached problem records live next to the workspace unless configured
    pub fn problems_dir(&self) -> std::io::Result<PathBuf> {
        match &self.problems_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(self.workspace_root()?.join("problems")),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Overrides the toolchain of one language tag
///
/// `command` is the run step, `compile` the optional steps before it. Both use
/// the `%FILE%`, `%BINARY%`, `%DIR%`, `%STEM%`, `%JAR%` and `%SCRIPT%`
/// placeholders.
#[derive(Deserialize, Debug, Clone)]
pub struct LanguageConfig {
    pub name: String,
    pub command: Vec<String>,
    pub compile: Option<Vec<Vec<String>>>,
}
