use super::ast::DecisionProgram;
use crate::types::{now_ms, Timestamp};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Metadata persisted next to each compiled artifact.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub hash: String,
    pub choice_name: String,
    pub cache_file: PathBuf,
    pub jsonpath_params: BTreeMap<String, String>,
    pub created_at: Timestamp,
}

/// Hash-keyed disk cache for compiled decision programs.
///
/// Layout: `{safe(choice)}_{hash8}.json` holds the serialized program,
/// `{safe(choice)}_metadata.json` records the active hash. All writes
/// go through write-temp-then-rename so a concurrent reader never
/// observes a partial file; saving purges artifacts of the same choice
/// whose hash prefix differs.
#[derive(Clone, Debug)]
pub struct CompileCache {
    dir: PathBuf,
}

/// Field order is the canonical serialization the content hash covers.
#[derive(Serialize)]
struct HashInput<'a> {
    choice_name: &'a str,
    statements: &'a [String],
}

impl CompileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// SHA-256 hex over the canonical serialization of
    /// `(choice_name, statements)`. Statements must already be
    /// normalized so whitespace variants share a hash.
    pub fn content_hash(choice_name: &str, statements: &[String]) -> String {
        let input = HashInput {
            choice_name,
            statements,
        };
        let json = serde_json::to_string(&input).expect("hash input serializes");
        hex(&Sha256::digest(json.as_bytes()))
    }

    /// Cache hit: stored hash equals `hash` AND the referenced artifact
    /// exists and deserializes.
    pub fn load(&self, choice_name: &str, hash: &str) -> Option<DecisionProgram> {
        let metadata = self.read_metadata(choice_name)?;
        if metadata.hash != hash {
            return None;
        }
        let text = fs::read_to_string(&metadata.cache_file).ok()?;
        serde_json::from_str(&text).ok()
    }

    pub fn read_metadata(&self, choice_name: &str) -> Option<CacheMetadata> {
        let text = fs::read_to_string(self.metadata_path(choice_name)).ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Persist a compiled program under its content hash; purge stale
    /// artifacts of the same choice. Returns the artifact path.
    pub fn save(&self, program: &DecisionProgram, hash: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating cache dir {}", self.dir.display()))?;

        let artifact = self.artifact_path(&program.choice_name, hash);
        self.purge_stale(&program.choice_name, &hash[..8]);

        write_atomic(&artifact, &serde_json::to_vec_pretty(program)?)?;

        let metadata = CacheMetadata {
            hash: hash.to_string(),
            choice_name: program.choice_name.clone(),
            cache_file: artifact.clone(),
            jsonpath_params: program.params.clone(),
            created_at: now_ms(),
        };
        write_atomic(
            &self.metadata_path(&program.choice_name),
            &serde_json::to_vec_pretty(&metadata)?,
        )?;

        tracing::info!(
            choice = %program.choice_name,
            hash = &hash[..8],
            artifact = %artifact.display(),
            "compiled decision program cached"
        );
        Ok(artifact)
    }

    /// Drop the whole cache directory.
    pub fn clear_all(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)
                .with_context(|| format!("removing cache dir {}", self.dir.display()))?;
        }
        Ok(())
    }

    fn artifact_path(&self, choice_name: &str, hash: &str) -> PathBuf {
        self.dir
            .join(format!("{}_{}.json", safe_name(choice_name), &hash[..8]))
    }

    fn metadata_path(&self, choice_name: &str) -> PathBuf {
        self.dir
            .join(format!("{}_metadata.json", safe_name(choice_name)))
    }

    /// Remove artifacts of this choice whose hash prefix differs.
    /// Only names shaped `{safe}_{8 hex}.json` are candidates, so the
    /// metadata file and same-prefix choice names survive.
    fn purge_stale(&self, choice_name: &str, keep_prefix: &str) {
        let safe = safe_name(choice_name);
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(rest) = name
                .strip_prefix(&format!("{safe}_"))
                .and_then(|r| r.strip_suffix(".json"))
            else {
                continue;
            };
            let is_artifact = rest.len() == 8 && rest.chars().all(|c| c.is_ascii_hexdigit());
            if is_artifact && rest != keep_prefix && fs::remove_file(entry.path()).is_ok() {
                tracing::info!(artifact = %name, "removed stale cache artifact");
            }
        }
    }
}

fn safe_name(choice_name: &str) -> String {
    choice_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(
        String::with_capacity(bytes.len() * 2),
        |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn program(choice_name: &str, default: &str) -> DecisionProgram {
        DecisionProgram {
            choice_name: choice_name.to_string(),
            statements: vec![super::super::ast::Statement::Branch(
                super::super::ast::Term::Literal(json!(default)),
            )],
            params: BTreeMap::from([("value".to_string(), "$.value".to_string())]),
            targets: vec![],
        }
    }

    #[test]
    fn content_hash_is_stable_and_input_sensitive() {
        let statements = vec!["when $.v gt 1 then #a else #b".to_string()];
        let a = CompileCache::content_hash("router", &statements);
        let b = CompileCache::content_hash("router", &statements);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let different =
            CompileCache::content_hash("router", &["'other'".to_string()]);
        assert_ne!(a, different);

        let renamed = CompileCache::content_hash("router2", &statements);
        assert_ne!(a, renamed);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompileCache::new(dir.path());
        let program = program("my-choice", "fallback");
        let hash = CompileCache::content_hash("my-choice", &["'fallback'".to_string()]);

        let artifact = cache.save(&program, &hash).unwrap();
        assert!(artifact.exists());
        // Hyphens in the choice name are sanitized in filenames.
        assert!(artifact
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("my_choice_"));

        let loaded = cache.load("my-choice", &hash).unwrap();
        assert_eq!(loaded, program);

        let metadata = cache.read_metadata("my-choice").unwrap();
        assert_eq!(metadata.hash, hash);
        assert_eq!(metadata.jsonpath_params["value"], "$.value");
        assert!(metadata.created_at > 0);
    }

    #[test]
    fn hash_mismatch_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompileCache::new(dir.path());
        let program = program("router", "a");
        let hash = CompileCache::content_hash("router", &["'a'".to_string()]);
        cache.save(&program, &hash).unwrap();

        let other = CompileCache::content_hash("router", &["'b'".to_string()]);
        assert!(cache.load("router", &other).is_none());
    }

    #[test]
    fn missing_artifact_is_a_miss_even_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompileCache::new(dir.path());
        let program = program("router", "a");
        let hash = CompileCache::content_hash("router", &["'a'".to_string()]);
        let artifact = cache.save(&program, &hash).unwrap();

        fs::remove_file(&artifact).unwrap();
        assert!(cache.load("router", &hash).is_none());
    }

    #[test]
    fn save_purges_stale_artifacts_of_the_same_choice() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompileCache::new(dir.path());

        let first = program("router", "a");
        let first_hash = CompileCache::content_hash("router", &["'a'".to_string()]);
        let first_artifact = cache.save(&first, &first_hash).unwrap();

        // Another choice sharing a name prefix must survive the purge.
        let sibling = program("router-extra", "c");
        let sibling_hash =
            CompileCache::content_hash("router-extra", &["'c'".to_string()]);
        let sibling_artifact = cache.save(&sibling, &sibling_hash).unwrap();

        let second = program("router", "b");
        let second_hash = CompileCache::content_hash("router", &["'b'".to_string()]);
        let second_artifact = cache.save(&second, &second_hash).unwrap();

        assert!(!first_artifact.exists(), "old artifact should be purged");
        assert!(second_artifact.exists());
        assert!(sibling_artifact.exists());
        assert!(cache.read_metadata("router").is_some());
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompileCache::new(dir.path());
        let program = program("router", "a");
        let hash = CompileCache::content_hash("router", &["'a'".to_string()]);
        cache.save(&program, &hash).unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn clear_all_removes_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("conditions_cache");
        let cache = CompileCache::new(&cache_dir);
        let program = program("router", "a");
        let hash = CompileCache::content_hash("router", &["'a'".to_string()]);
        cache.save(&program, &hash).unwrap();
        assert!(cache_dir.exists());

        cache.clear_all().unwrap();
        assert!(!cache_dir.exists());
    }
}
