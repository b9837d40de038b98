//! Assertion helpers for the gateway's cross-cutting storage invariants:
//! every accepted payload lands in exactly one byte-exact file, every
//! rejected one lands in none, and names never collide or go missing.
//!
//! Each end-to-end scenario test produces a directory of `.dat` files and a
//! set of metric counters; these helpers turn that checking into reusable
//! calls instead of re-deriving the same `read_dir` walk in every test.

#![allow(clippy::expect_used, reason = "test-harness fixtures should fail loudly, not propagate")]

use std::{collections::HashSet, path::Path};

/// A snapshot of every file currently in a storage directory, split into
/// finalized (`.dat`) and leftover temporary (`.dat.tmp`) names.
#[derive(Debug, Clone)]
pub struct StorageSnapshot {
    /// Finalized file names (no directory component), e.g.
    /// `data_1700000000000_42_4444.dat`.
    pub finalized: Vec<String>,
    /// Leftover temporary file names that were never renamed.
    pub temporary: Vec<String>,
}

impl StorageSnapshot {
    /// Reads the current contents of `data_dir`.
    ///
    /// # Panics
    ///
    /// Panics if `data_dir` cannot be read; this is a test-harness helper,
    /// not production code, so a broken fixture should fail loudly.
    #[must_use]
    pub fn read(data_dir: &Path) -> Self {
        let mut finalized = Vec::new();
        let mut temporary = Vec::new();

        for entry in std::fs::read_dir(data_dir).expect("storage directory should be readable") {
            let entry = entry.expect("directory entry should be readable");
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".dat.tmp") {
                temporary.push(name);
            } else if name.ends_with(".dat") {
                finalized.push(name);
            }
        }

        Self { finalized, temporary }
    }

    /// Every finalized file name must be unique. Returns the duplicate (if
    /// any) so a failing assertion can name it.
    #[must_use]
    pub fn first_duplicate(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        for name in &self.finalized {
            if !seen.insert(name.as_str()) {
                return Some(name.as_str());
            }
        }
        None
    }

    /// Parses `data_<wall_ms>_<unique>_<src_port>.dat`, returning
    /// `(wall_ms, unique, src_port)`. `None` if `name` doesn't match the
    /// storage layer's naming convention.
    #[must_use]
    pub fn parse_file_name(name: &str) -> Option<(u64, u64, u16)> {
        let stem = name.strip_prefix("data_")?.strip_suffix(".dat")?;
        let mut parts = stem.split('_');
        let wall_ms: u64 = parts.next()?.parse().ok()?;
        let unique: u64 = parts.next()?.parse().ok()?;
        let src_port: u16 = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some((wall_ms, unique, src_port))
    }

    /// Checks every finalized name parses and every `unique` component is
    /// itself unique (a stronger check than
    /// [`StorageSnapshot::first_duplicate`], which only compares whole
    /// names). Returns the offending name, if any.
    #[must_use]
    pub fn first_non_conforming_name(&self) -> Option<&str> {
        self.finalized.iter().find(|name| Self::parse_file_name(name).is_none()).map(String::as_str)
    }

    /// Number of finalized files whose contents exactly equal `payload`.
    #[must_use]
    pub fn count_files_with_contents(&self, data_dir: &Path, payload: &[u8]) -> usize {
        self.finalized
            .iter()
            .filter(|name| std::fs::read(data_dir.join(name)).as_deref() == Ok(payload))
            .count()
    }
}

/// Asserts every finalized file under `data_dir` whose name ends in
/// `_<src_port>.dat` for the given port contains exactly `expected` bytes,
/// and that there is exactly one such file.
pub fn assert_exactly_one_file_with_payload(data_dir: &Path, src_port: u16, expected: &[u8]) {
    let snapshot = StorageSnapshot::read(data_dir);
    let matching: Vec<&String> = snapshot
        .finalized
        .iter()
        .filter(|name| StorageSnapshot::parse_file_name(name).is_some_and(|(_, _, port)| port == src_port))
        .collect();

    assert_eq!(
        matching.len(),
        1,
        "expected exactly one file for src_port {src_port}, found {matching:?} (all files: {:?})",
        snapshot.finalized
    );

    let contents = std::fs::read(data_dir.join(matching[0])).expect("matching file should be readable");
    assert_eq!(contents, expected, "stored payload must be byte-exact to the original");
}

/// Asserts storage is empty — a rejected frame (limiter, DPI, oversize,
/// malformed, bad CRC) must never reach storage.
pub fn assert_storage_is_empty(data_dir: &Path) {
    let snapshot = StorageSnapshot::read(data_dir);
    assert!(snapshot.finalized.is_empty(), "expected no stored files, found {:?}", snapshot.finalized);
}

/// Crash-recovery invariant: a `.tmp` file is never durable under its final
/// name; any left behind by an injected mid-write failure must not also
/// have a corresponding finalized `.dat` with the same stem (partial and
/// complete can't coexist for one logical write).
pub fn assert_no_tmp_file_has_a_matching_finalized_sibling(data_dir: &Path) {
    let snapshot = StorageSnapshot::read(data_dir);
    let finalized: HashSet<&str> = snapshot.finalized.iter().map(String::as_str).collect();

    for tmp in &snapshot.temporary {
        let stem = tmp.strip_suffix(".dat.tmp").unwrap_or(tmp);
        let sibling = format!("{stem}.dat");
        assert!(
            !finalized.contains(sibling.as_str()),
            "{tmp} has a finalized sibling {sibling}; a write must be either all-tmp or all-final, never both"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_name() {
        assert_eq!(
            StorageSnapshot::parse_file_name("data_1700000000000_42_4444.dat"),
            Some((1_700_000_000_000, 42, 4444))
        );
    }

    #[test]
    fn rejects_a_name_missing_a_component() {
        assert_eq!(StorageSnapshot::parse_file_name("data_1700000000000_42.dat"), None);
    }

    #[test]
    fn detects_a_duplicate_name() {
        let snapshot = StorageSnapshot {
            finalized: vec!["data_1_1_1.dat".to_string(), "data_1_1_1.dat".to_string()],
            temporary: vec![],
        };
        assert_eq!(snapshot.first_duplicate(), Some("data_1_1_1.dat"));
    }

    #[test]
    fn empty_storage_passes_the_empty_assertion() {
        let dir = tempfile::tempdir().unwrap();
        assert_storage_is_empty(dir.path());
    }

    #[test]
    #[should_panic(expected = "expected no stored files")]
    fn non_empty_storage_fails_the_empty_assertion() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data_1_1_1.dat"), b"x").unwrap();
        assert_storage_is_empty(dir.path());
    }

    #[test]
    fn tmp_with_no_finalized_sibling_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data_1_1_1.dat.tmp"), b"partial").unwrap();
        assert_no_tmp_file_has_a_matching_finalized_sibling(dir.path());
    }
}
