// src/indexgen.rs

//! Network Mirror index document generation.
//!
//! After a cycle completes, each provider directory gets an `index.json`
//! enumerating the versions present on disk and one `<version>.json` per
//! version mapping `os_arch` to the archive filename and its content hash.
//! The hash is the upstream-compatible `h1:` scheme: a SHA-256 over a
//! manifest of sorted zip entries, where each manifest line is the entry's
//! content hash and path.

use crate::error::{Error, Result};
use crate::fsutil::{self, parse_archive_name};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::debug;

/// `index.json`: the set of versions with at least one archive on disk
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IndexDoc {
    pub versions: BTreeMap<String, EmptyObject>,
}

/// Serializes as `{}`
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct EmptyObject {}

/// `<version>.json`: per-platform archive locations and hashes
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct VersionDoc {
    #[serde(default)]
    pub archives: BTreeMap<String, ArchiveEntry>,
}

/// One platform's archive within a [`VersionDoc`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub hashes: Vec<String>,
    pub url: String,
}

/// Compute the `h1:` content hash of a zip archive.
///
/// Entries are sorted by name; for each entry the manifest gets a line
/// `<sha256-hex>  <name>\n`, and the result is the base64 SHA-256 of that
/// manifest prefixed with the scheme identifier.
pub fn hash_zip(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| Error::Parse(format!("zip archive {}: {e}", path.display())))?;

    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();

    let mut manifest_hasher = Sha256::new();
    for name in &names {
        if name.contains('\n') {
            return Err(Error::Parse(format!(
                "zip archive {} contains newline in entry name",
                path.display()
            )));
        }
        let mut entry = archive
            .by_name(name)
            .map_err(|e| Error::Parse(format!("zip entry {name} in {}: {e}", path.display())))?;
        let mut entry_hasher = Sha256::new();
        io::copy(&mut entry, &mut entry_hasher)?;
        manifest_hasher.update(format!("{:x}  {}\n", entry_hasher.finalize(), name));
    }

    Ok(format!("h1:{}", BASE64.encode(manifest_hasher.finalize())))
}

/// Regenerate `index.json` and the per-version documents for one provider
/// directory (`.../registry.terraform.io/<namespace>/<name>`).
///
/// Existing `<version>.json` documents are merged so platforms fetched in
/// earlier cycles are preserved; `index.json` is rebuilt from scratch. All
/// writes are atomic, so readers never observe a document referencing an
/// archive that is not on disk.
pub fn generate_provider_index(provider_dir: &Path) -> Result<()> {
    let entries = fs::read_dir(provider_dir)?;

    let mut index = IndexDoc::default();
    let mut per_version: BTreeMap<String, BTreeMap<String, ArchiveEntry>> = BTreeMap::new();

    for entry in entries.flatten() {
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
            continue;
        }
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some((_, version, os, arch)) = parse_archive_name(file_name) else {
            continue;
        };

        let hash = hash_zip(&entry.path())?;
        debug!("hashed {file_name}: {hash}");

        index.versions.insert(version.clone(), EmptyObject {});
        per_version.entry(version).or_default().insert(
            format!("{os}_{arch}"),
            ArchiveEntry {
                hashes: vec![hash],
                url: file_name.to_string(),
            },
        );
    }

    for (version, archives) in per_version {
        let doc_path = provider_dir.join(format!("{version}.json"));

        let mut doc = match fs::read(&doc_path) {
            Ok(bytes) => serde_json::from_slice::<VersionDoc>(&bytes).unwrap_or_default(),
            Err(_) => VersionDoc::default(),
        };
        for (platform, archive) in archives {
            doc.archives.insert(platform, archive);
        }

        fsutil::write_atomic(&doc_path, &serde_json::to_vec_pretty(&doc)?)?;
    }

    let index_path = provider_dir.join("index.json");
    fsutil::write_atomic(&index_path, &serde_json::to_vec_pretty(&index)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, contents) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn zip_hash_is_deterministic_and_order_independent() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.zip");
        let b = dir.path().join("b.zip");

        write_zip(&a, &[("one.txt", b"one"), ("two.txt", b"two")]);
        write_zip(&b, &[("two.txt", b"two"), ("one.txt", b"one")]);

        let hash_a = hash_zip(&a).unwrap();
        let hash_b = hash_zip(&b).unwrap();
        assert!(hash_a.starts_with("h1:"));
        assert_eq!(hash_a, hash_b);

        let c = dir.path().join("c.zip");
        write_zip(&c, &[("one.txt", b"one"), ("two.txt", b"changed")]);
        assert_ne!(hash_a, hash_zip(&c).unwrap());
    }

    #[test]
    fn index_covers_exactly_the_archives_on_disk() {
        let dir = tempdir().unwrap();
        write_zip(
            &dir.path().join("terraform-provider-thing_1.0.0_linux_amd64.zip"),
            &[("terraform-provider-thing", b"bin")],
        );
        write_zip(
            &dir.path().join("terraform-provider-thing_1.0.0_darwin_arm64.zip"),
            &[("terraform-provider-thing", b"bin")],
        );
        write_zip(
            &dir.path().join("terraform-provider-thing_1.1.0_linux_amd64.zip"),
            &[("terraform-provider-thing", b"bin2")],
        );
        // Files the generator must ignore.
        fs::write(dir.path().join("terraform-provider-thing_1.0.0_SHA256SUMS"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        generate_provider_index(dir.path()).unwrap();

        let index: IndexDoc =
            serde_json::from_slice(&fs::read(dir.path().join("index.json")).unwrap()).unwrap();
        assert_eq!(
            index.versions.keys().collect::<Vec<_>>(),
            vec!["1.0.0", "1.1.0"]
        );

        let doc: VersionDoc =
            serde_json::from_slice(&fs::read(dir.path().join("1.0.0.json")).unwrap()).unwrap();
        assert_eq!(
            doc.archives.keys().collect::<Vec<_>>(),
            vec!["darwin_arm64", "linux_amd64"]
        );
        let linux = &doc.archives["linux_amd64"];
        assert_eq!(linux.url, "terraform-provider-thing_1.0.0_linux_amd64.zip");
        assert_eq!(linux.hashes.len(), 1);
        assert!(linux.hashes[0].starts_with("h1:"));
    }

    #[test]
    fn regeneration_merges_existing_version_documents() {
        let dir = tempdir().unwrap();
        write_zip(
            &dir.path().join("terraform-provider-thing_1.0.0_linux_amd64.zip"),
            &[("terraform-provider-thing", b"bin")],
        );

        // A document from an earlier cycle with a platform whose archive
        // was since hand-removed: the entry must survive the merge.
        fs::write(
            dir.path().join("1.0.0.json"),
            serde_json::to_vec(&VersionDoc {
                archives: BTreeMap::from([(
                    "windows_amd64".to_string(),
                    ArchiveEntry {
                        hashes: vec!["h1:old".to_string()],
                        url: "terraform-provider-thing_1.0.0_windows_amd64.zip".to_string(),
                    },
                )]),
            })
            .unwrap(),
        )
        .unwrap();

        generate_provider_index(dir.path()).unwrap();

        let doc: VersionDoc =
            serde_json::from_slice(&fs::read(dir.path().join("1.0.0.json")).unwrap()).unwrap();
        assert!(doc.archives.contains_key("linux_amd64"));
        assert!(doc.archives.contains_key("windows_amd64"));
    }
}
