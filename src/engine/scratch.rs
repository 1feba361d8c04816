use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const INPUT_DIR: &str = "test_inputs";
const OUTPUT_DIR: &str = "test_outputs";

/// Per-case scratch files under the workspace root
///
/// Files are named after the source file and the 1-based case index, and are
/// overwritten on every run.
#[derive(Debug, Clone)]
pub struct ScratchDirs {
    inputs: PathBuf,
    outputs: PathBuf,
}

/// File name of `source` including its extension
pub fn base_name(source: &Path) -> String {
    source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source".to_string())
}

impl ScratchDirs {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            inputs: root.join(INPUT_DIR),
            outputs: root.join(OUTPUT_DIR),
        }
    }

    pub async fn ensure(&self) -> Result<()> {
        for dir in [&self.inputs, &self.outputs] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn input_path(&self, base: &str, case_idx: usize) -> PathBuf {
        self.inputs.join(format!("{base}_input_{case_idx}.txt"))
    }

    pub fn output_path(&self, base: &str, case_idx: usize) -> PathBuf {
        self.outputs.join(format!("{base}_output_{case_idx}.txt"))
    }
}
