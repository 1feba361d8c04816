use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;

use crate::extractor::TestCase;
use crate::persistence::{Persistence, load_or};

/// Key under which the whole file-to-test-cases map is persisted
pub const STORAGE_KEY: &str = "testCaseStorage";

pub type TestCaseMap = BTreeMap<String, Vec<TestCase>>;

/// Test cases per source file, mirrored to persistence on every mutation
///
/// A path present in the map always has a (possibly empty) list.
pub struct TestCaseStore {
    cases: RwLock<TestCaseMap>,
    persistence: Arc<dyn Persistence>,
}

pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

impl TestCaseStore {
    /// Restores the map previously flushed to `persistence`
    pub fn load(persistence: Arc<dyn Persistence>) -> Result<Self> {
        let cases: TestCaseMap = load_or(persistence.as_ref(), STORAGE_KEY, TestCaseMap::new())?;
        log::info!("Loaded test cases for {} files", cases.len());
        Ok(Self {
            cases: RwLock::new(cases),
            persistence,
        })
    }

    /// Writes the whole map to persistence as one blob
    pub fn flush(&self) -> Result<()> {
        let blob = serde_json::to_value(&*self.cases.read())?;
        self.persistence.save(STORAGE_KEY, blob)?;
        Ok(())
    }

    pub fn get(&self, path: &Path) -> Option<Vec<TestCase>> {
        self.cases.read().get(&path_key(path)).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.cases.read().contains_key(&path_key(path))
    }

    pub fn paths(&self) -> Vec<String> {
        self.cases.read().keys().cloned().collect()
    }

    pub fn snapshot(&self) -> TestCaseMap {
        self.cases.read().clone()
    }

    /// Applies `apply` to the entry of `path` and flushes
    ///
    /// When the flush fails the entry is restored, so the map never holds
    /// state that persistence rejected.
    fn mutate<T>(
        &self,
        path: &Path,
        apply: impl FnOnce(&mut TestCaseMap, &str) -> T,
    ) -> Result<T> {
        let key = path_key(path);
        let mut cases = self.cases.write();
        let previous = cases.get(&key).cloned();
        let out = apply(&mut cases, &key);

        let flushed = serde_json::to_value(&*cases)
            .map_err(anyhow::Error::from)
            .and_then(|blob| self.persistence.save(STORAGE_KEY, blob));
        if let Err(e) = flushed {
            match previous {
                Some(list) => cases.insert(key, list),
                None => cases.remove(&key),
            };
            return Err(e.context(format!("Failed to persist test cases for {}", path.display())));
        }
        Ok(out)
    }

    /// Replaces every test case of `path`
    pub fn replace(&self, path: &Path, cases: Vec<TestCase>) -> Result<()> {
        log::debug!("Storing {} test cases for {}", cases.len(), path.display());
        self.mutate(path, |map, key| {
            map.insert(key.to_string(), cases);
        })
    }

    /// Appends one test case and returns the new count for `path`
    pub fn append(&self, path: &Path, case: TestCase) -> Result<usize> {
        self.mutate(path, |map, key| {
            let list = map.entry(key.to_string()).or_default();
            list.push(case);
            list.len()
        })
    }

    /// Registers `path` with an empty list unless it already has one
    pub fn ensure(&self, path: &Path) -> Result<bool> {
        if self.contains(path) {
            return Ok(false);
        }
        self.mutate(path, |map, key| {
            map.insert(key.to_string(), Vec::new()).is_none()
        })
    }

    /// Drops the entry of a deleted file
    pub fn remove(&self, path: &Path) -> Result<Option<Vec<TestCase>>> {
        if !self.contains(path) {
            return Ok(None);
        }
        log::debug!("Removed test cases for {}", path.display());
        self.mutate(path, |map, key| map.remove(key))
    }
}
