// src/metadata.rs

//! Persistent metadata journal for the mirror store.
//!
//! The journal (`.tf-mirror-metadata.json` at the store root) records which
//! provider `(version, platform)` tuples and which tool binaries are
//! present. Updates use set semantics, so re-recording an existing tuple is
//! a no-op, and the whole document is re-serialized atomically on flush.

use crate::error::Result;
use crate::fsutil::{self, parse_archive_name};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Journal filename at the store root
pub const METADATA_FILENAME: &str = ".tf-mirror-metadata.json";

/// Journal entry for one provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub versions: Vec<String>,
    #[serde(default)]
    pub platforms: Vec<String>,
}

/// Journal entry for one tool from the releases site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryInfo {
    #[serde(default)]
    pub versions: Vec<String>,
    #[serde(default)]
    pub platforms: Vec<String>,
    pub downloaded: DateTime<Utc>,
}

/// On-disk journal document
#[derive(Debug, Default, Serialize, Deserialize)]
struct JournalDoc {
    #[serde(default)]
    providers: BTreeMap<String, ProviderInfo>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    binaries: BTreeMap<String, BinaryInfo>,
    #[serde(default)]
    last_check: Option<DateTime<Utc>>,
}

/// Concurrency-safe journal handle rooted at the download path
#[derive(Debug)]
pub struct MirrorMetadata {
    root: PathBuf,
    doc: RwLock<JournalDoc>,
}

fn insert_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
        list.sort();
    }
}

impl MirrorMetadata {
    /// Open the journal under `root`, loading an existing document when one
    /// is present. A corrupt or unreadable journal logs the problem and
    /// starts fresh rather than failing the service.
    pub fn load(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let path = root.join(METADATA_FILENAME);

        let doc = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<JournalDoc>(&bytes) {
                Ok(doc) => {
                    debug!("loaded journal with {} providers", doc.providers.len());
                    doc
                }
                Err(e) => {
                    tracing::error!("failed to parse journal {}, starting fresh: {e}", path.display());
                    JournalDoc::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => JournalDoc::default(),
            Err(e) => {
                tracing::error!("failed to read journal {}, starting fresh: {e}", path.display());
                JournalDoc::default()
            }
        };

        Self {
            root,
            doc: RwLock::new(doc),
        }
    }

    /// Path of the journal file
    pub fn path(&self) -> PathBuf {
        self.root.join(METADATA_FILENAME)
    }

    /// Record a provider `(version, platform)` tuple. Idempotent.
    pub fn record_provider(&self, namespace: &str, name: &str, version: &str, os: &str, arch: &str) {
        let mut doc = self.doc.write().expect("journal lock poisoned");
        let entry = doc
            .providers
            .entry(format!("{namespace}/{name}"))
            .or_default();
        entry.namespace = namespace.to_string();
        entry.name = name.to_string();
        insert_unique(&mut entry.versions, version);
        insert_unique(&mut entry.platforms, &format!("{os}_{arch}"));
    }

    /// Merge versions and platforms into a tool's binaries entry
    pub fn record_binary(
        &self,
        tool: &str,
        versions: &[String],
        platforms: &[String],
        downloaded: DateTime<Utc>,
    ) {
        let mut doc = self.doc.write().expect("journal lock poisoned");
        let entry = doc
            .binaries
            .entry(tool.to_string())
            .or_insert_with(|| BinaryInfo {
                versions: Vec::new(),
                platforms: Vec::new(),
                downloaded,
            });
        for v in versions {
            insert_unique(&mut entry.versions, v);
        }
        for p in platforms {
            insert_unique(&mut entry.platforms, p);
        }
        if downloaded > entry.downloaded {
            entry.downloaded = downloaded;
        }
    }

    /// Whether the journal already lists `version` for a provider
    pub fn provider_has_version(&self, namespace: &str, name: &str, version: &str) -> bool {
        let doc = self.doc.read().expect("journal lock poisoned");
        doc.providers
            .get(&format!("{namespace}/{name}"))
            .map(|info| info.versions.iter().any(|v| v == version))
            .unwrap_or(false)
    }

    /// Snapshot of one provider's journal entry
    pub fn provider(&self, namespace: &str, name: &str) -> Option<ProviderInfo> {
        let doc = self.doc.read().expect("journal lock poisoned");
        doc.providers.get(&format!("{namespace}/{name}")).cloned()
    }

    /// Snapshot of one tool's journal entry
    pub fn binary(&self, tool: &str) -> Option<BinaryInfo> {
        let doc = self.doc.read().expect("journal lock poisoned");
        doc.binaries.get(tool).cloned()
    }

    /// Timestamp of the most recent completed acquisition cycle
    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        self.doc.read().expect("journal lock poisoned").last_check
    }

    /// Stamp the journal with the current time
    pub fn touch_last_check(&self) {
        self.doc.write().expect("journal lock poisoned").last_check = Some(Utc::now());
    }

    /// Serialize the journal to disk atomically
    pub fn flush(&self) -> Result<()> {
        let bytes = {
            let doc = self.doc.read().expect("journal lock poisoned");
            serde_json::to_vec_pretty(&*doc)?
        };
        fsutil::write_atomic(&self.path(), &bytes)
    }

    /// Rebuild the providers map from the files actually on disk.
    ///
    /// Walks the store, parses archive filenames, derives the namespace from
    /// the path, and replaces the providers map wholesale before flushing.
    /// Binaries entries are left untouched. Idempotent.
    pub fn rescan(&self) -> Result<()> {
        info!("regenerating journal from disk in {}", self.root.display());

        {
            let mut doc = self.doc.write().expect("journal lock poisoned");
            doc.providers.clear();
        }

        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(filename) = entry.file_name().to_str() else {
                continue;
            };
            let Some((name, version, os, arch)) = parse_archive_name(filename) else {
                continue;
            };
            // namespace sits three levels up: registry.terraform.io/<ns>/<name>/<file>
            let Some(namespace) = entry
                .path()
                .parent()
                .and_then(Path::parent)
                .and_then(Path::file_name)
                .and_then(|n| n.to_str())
            else {
                continue;
            };
            self.record_provider(namespace, &name, &version, &os, &arch);
        }

        self.flush()
    }
}
