use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Raw problem as returned by the content provider
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProblemRecord {
    /// HTML statement containing the "Input:"/"Output:" examples
    pub content: String,
    /// JSON string describing the parameters, `{"params": [{"name", "type"}]}`
    pub meta_data: String,
    #[serde(default)]
    pub code_snippets: Vec<CodeSnippet>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CodeSnippet {
    pub lang: String,
    pub code: String,
}

impl ProblemRecord {
    pub fn snippet(&self, lang: &str) -> Option<&CodeSnippet> {
        self.code_snippets.iter().find(|s| s.lang == lang)
    }
}

/// Source of problem records
pub trait ProblemProvider: Send + Sync {
    fn fetch_problem(&self, slug: &str) -> Result<ProblemRecord>;
}

/// Reads problem records cached as `<dir>/<slug>.json`
pub struct FileProblemProvider {
    dir: PathBuf,
}

impl FileProblemProvider {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl ProblemProvider for FileProblemProvider {
    fn fetch_problem(&self, slug: &str) -> Result<ProblemRecord> {
        let path = self.dir.join(format!("{slug}.json"));
        log::info!("Fetching problem {slug} from {}", path.display());

        let file = fs::File::open(&path)
            .with_context(|| format!("Problem {slug} not found at {}", path.display()))?;
        let record = serde_json::from_reader(file)
            .with_context(|| format!("Invalid problem record {}", path.display()))?;
        Ok(record)
    }
}

/// Problem identifier from a problem URL or a bare slug
///
/// `https://leetcode.com/problems/two-sum/description/` gives `two-sum`.
pub fn problem_slug(url: &str) -> Result<String> {
    let url = url.trim();
    let segments: Vec<&str> = url.split('/').collect();

    let slug = match segments.iter().position(|s| *s == "problems") {
        Some(pos) => segments.get(pos + 1).copied().unwrap_or_default(),
        None if segments.len() == 1 => url,
        None => "",
    };

    if slug.is_empty() || slug.contains(char::is_whitespace) {
        bail!("Not a valid problem URL: {url}");
    }
    Ok(slug.to_string())
}

/// Snippet languages in provider order
pub fn code_languages(snippets: &[CodeSnippet]) -> Vec<&str> {
    snippets.iter().map(|s| s.lang.as_str()).collect()
}
