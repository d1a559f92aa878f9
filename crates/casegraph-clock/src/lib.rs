#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! **casegraph-clock** – injected time source and filesystem path
//! resolution for the CaseGraph workspace.
//!
//! Kept as its own leaf crate (`spec.md §2`, first component row) so the
//! store, vault, and job runner can all depend on a single, test-friendly
//! notion of "now" and "where" without importing each other.

use std::env;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// Environment variable that overrides the default workspace root
/// (`spec.md §6`).
pub const WORKSPACE_ROOT_ENV_VAR: &str = "CASEGRAPH_WORKSPACE_ROOT";

/// Environment variable consumed by an external shell's `tracing-subscriber`
/// filter; defined here so the shell and the tests agree on the name.
pub const LOG_FILTER_ENV_VAR: &str = "CASEGRAPH_LOG";

/// Default `tracing-subscriber` `EnvFilter` directive when
/// [`LOG_FILTER_ENV_VAR`] and `RUST_LOG` are both unset.
pub const DEFAULT_LOG_FILTER: &str = "info,casegraph=debug";

/// An injectable source of wall-clock time.
///
/// Production code uses [`SystemClock`]; tests can supply a fixed or
/// stepping implementation to make timestamp-dependent assertions
/// deterministic.
pub trait Clock: Send + Sync {
    /// The current UTC time.
    fn now_utc(&self) -> DateTime<Utc>;
}

/// A [`Clock`] backed by the operating system's wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A [`Clock`] that always returns the same instant, for deterministic
/// tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Resolved filesystem layout for one workspace (`spec.md §6`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    root: PathBuf,
}

impl WorkspacePaths {
    /// Resolve the workspace root from [`WORKSPACE_ROOT_ENV_VAR`] if set,
    /// otherwise from the OS local-app-data directory joined with
    /// `CaseGraphOffline`.
    pub fn resolve() -> Self {
        match env::var_os(WORKSPACE_ROOT_ENV_VAR) {
            Some(root) => Self::at(PathBuf::from(root)),
            None => Self::at(default_local_app_data().join("CaseGraphOffline")),
        }
    }

    /// Build a [`WorkspacePaths`] rooted at an explicit directory, bypassing
    /// environment resolution. Primarily for tests.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The workspace root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/workspace.db`.
    pub fn db_path(&self) -> PathBuf {
        self.root.join("workspace.db")
    }

    /// `<root>/cases`.
    pub fn cases_root(&self) -> PathBuf {
        self.root.join("cases")
    }

    /// `<root>/cases/<case_id>`.
    pub fn case_dir(&self, case_id: uuid::Uuid) -> PathBuf {
        self.cases_root().join(case_id.as_hyphenated().to_string())
    }

    /// `<root>/cases/<case_id>/case.json`.
    pub fn case_snapshot_path(&self, case_id: uuid::Uuid) -> PathBuf {
        self.case_dir(case_id).join("case.json")
    }

    /// `<root>/cases/<case_id>/vault`.
    pub fn vault_dir(&self, case_id: uuid::Uuid) -> PathBuf {
        self.case_dir(case_id).join("vault")
    }

    /// `<root>/cases/<case_id>/vault/<evidence_item_id>`.
    pub fn evidence_dir(&self, case_id: uuid::Uuid, evidence_item_id: uuid::Uuid) -> PathBuf {
        self.vault_dir(case_id)
            .join(evidence_item_id.as_hyphenated().to_string())
    }

    /// `<root>/cases/<case_id>/vault/<evidence_item_id>/manifest.json`.
    pub fn manifest_path(&self, case_id: uuid::Uuid, evidence_item_id: uuid::Uuid) -> PathBuf {
        self.evidence_dir(case_id, evidence_item_id).join("manifest.json")
    }

    /// `<root>/cases/<case_id>/vault/<evidence_item_id>/original`.
    pub fn evidence_original_dir(&self, case_id: uuid::Uuid, evidence_item_id: uuid::Uuid) -> PathBuf {
        self.evidence_dir(case_id, evidence_item_id).join("original")
    }

    /// `<root>/session/exports`.
    pub fn session_exports_dir(&self) -> PathBuf {
        self.root.join("session").join("exports")
    }

    /// A quarantine path for a broken database file, formatted
    /// `workspace.broken.<yyyymmdd-HHmmss>[.N].db` as required by
    /// `spec.md §4.1`.
    pub fn broken_db_path(&self, at: DateTime<Utc>, disambiguator: Option<u32>) -> PathBuf {
        let stamp = at.format("%Y%m%d-%H%M%S");
        let name = match disambiguator {
            Some(n) => format!("workspace.broken.{stamp}.{n}.db"),
            None => format!("workspace.broken.{stamp}.db"),
        };
        self.root.join(name)
    }
}

fn default_local_app_data() -> PathBuf {
    // Mirrors the platform conventions a desktop shell would use, without
    // pulling in a directories crate for one lookup: Windows' LOCALAPPDATA,
    // then XDG_DATA_HOME, then a `.local/share` fallback under HOME.
    if let Some(local_app_data) = env::var_os("LOCALAPPDATA") {
        return PathBuf::from(local_app_data);
    }
    if let Some(xdg_data_home) = env::var_os("XDG_DATA_HOME") {
        return PathBuf::from(xdg_data_home);
    }
    let home = env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    home.join(".local").join("share")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_paths_under_root() {
        let paths = WorkspacePaths::at("/tmp/workspace-test");
        assert_eq!(paths.db_path(), PathBuf::from("/tmp/workspace-test/workspace.db"));
        assert_eq!(paths.cases_root(), PathBuf::from("/tmp/workspace-test/cases"));
    }

    #[test]
    fn broken_db_path_embeds_timestamp_and_disambiguator() {
        let paths = WorkspacePaths::at("/tmp/workspace-test");
        let at = DateTime::parse_from_rfc3339("2026-07-28T10:30:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(
            paths.broken_db_path(at, None),
            PathBuf::from("/tmp/workspace-test/workspace.broken.20260728-103000.db")
        );
        assert_eq!(
            paths.broken_db_path(at, Some(1)),
            PathBuf::from("/tmp/workspace-test/workspace.broken.20260728-103000.1.db")
        );
    }

    #[test]
    fn fixed_clock_is_stable() {
        let at = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let clock = FixedClock(at);
        assert_eq!(clock.now_utc(), at);
        assert_eq!(clock.now_utc(), at);
    }
}
