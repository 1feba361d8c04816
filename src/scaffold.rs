use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::languages::{comment_prefix, resolve_extension};
use crate::provider::CodeSnippet;

/// File primitives of the editor the core is embedded in
pub trait EditorHost: Send + Sync {
    fn workspace_root(&self) -> &Path;

    /// Creates `path` with `content` unless it exists, then opens it
    ///
    /// Returns whether the file was created. An existing file is left as is.
    fn create_or_open(&self, path: &Path, content: &str) -> Result<bool>;
}

/// Host backed by the local filesystem, "opening" is a no-op
pub struct FsEditorHost {
    root: PathBuf,
}

impl FsEditorHost {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl EditorHost for FsEditorHost {
    fn workspace_root(&self) -> &Path {
        &self.root
    }

    fn create_or_open(&self, path: &Path, content: &str) -> Result<bool> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => {
                fs::write(path, content)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                log::info!("Created {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                log::info!("Opened existing {}", path.display());
                Ok(false)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to create {}", path.display())),
        }
    }
}

/// Source file for `slug` in the chosen language, `<root>/<slug>.<tag>`
pub fn scaffold_path(root: &Path, slug: &str, tag: &str) -> PathBuf {
    root.join(format!("{slug}.{tag}"))
}

pub fn scaffold_content(tag: &str, code: &str) -> String {
    format!("{}{code}", comment_prefix(tag))
}

/// Creates (or reopens) the solution file for a snippet and returns its path
pub fn scaffold(host: &dyn EditorHost, slug: &str, snippet: &CodeSnippet) -> Result<PathBuf> {
    let tag = resolve_extension(&snippet.lang);
    let path = scaffold_path(host.workspace_root(), slug, tag);
    host.create_or_open(&path, &scaffold_content(tag, &snippet.code))?;
    Ok(path)
}
