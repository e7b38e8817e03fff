//! The choice compiler: statement text → lowered decision program →
//! pure decision function, with a hash-keyed disk cache in the middle.
//!
//! Pipeline: [`parser`] turns normalized statement text into a tree,
//! [`lowering`] rewrites successor tags and selectors into a cacheable
//! [`DecisionProgram`], [`cache`] persists programs keyed by content
//! hash, and [`eval`] walks a loaded program against a document.

pub mod ast;
pub mod cache;
pub mod eval;
pub mod lowering;
pub mod parser;
pub mod path;

pub use ast::{CompareOp, Condition, DecisionProgram, Statement, Term};
pub use cache::{CacheMetadata, CompileCache};
pub use eval::{DecisionFn, DecisionValue};
pub use lowering::CompileOptions;
pub use path::JsonPath;

use crate::errors::{BuildError, CompileError};
use std::collections::BTreeMap;

/// Compile statements straight to a decision program, no cache
/// involvement. `state_refs` maps `#tag` names to successor state
/// names.
pub fn compile(
    choice_name: &str,
    statements: &[String],
    state_refs: &BTreeMap<String, String>,
    options: &CompileOptions,
) -> Result<DecisionProgram, CompileError> {
    let mut parsed = Vec::with_capacity(statements.len());
    for raw in statements {
        let normalized = parser::normalize(raw);
        let statement = parser::parse_statement(&normalized)?;
        parsed.push((normalized, statement));
    }
    lowering::lower(choice_name, parsed, state_refs, options)
}

/// The choice-construction entry point: recompute the content hash,
/// load the cached program on a hit, otherwise compile, save, and load
/// back. A program that still fails to load after a save is a
/// [`BuildError::ChoiceInitialization`].
pub fn load_or_compile(
    cache: &CompileCache,
    choice_name: &str,
    statements: &[String],
    state_refs: &BTreeMap<String, String>,
    options: &CompileOptions,
) -> Result<DecisionFn, BuildError> {
    let normalized: Vec<String> = statements.iter().map(|s| parser::normalize(s)).collect();
    let hash = CompileCache::content_hash(choice_name, &normalized);

    if let Some(program) = cache.load(choice_name, &hash) {
        tracing::info!(choice = %choice_name, hash = &hash[..8], "using cached decision function");
        return DecisionFn::new(program).map_err(BuildError::Compile);
    }

    let program = compile(choice_name, &normalized, state_refs, options)?;
    cache
        .save(&program, &hash)
        .map_err(|source| BuildError::ChoiceInitialization {
            choice: choice_name.to_string(),
            source: source.into(),
        })?;

    let program = cache.load(choice_name, &hash).ok_or_else(|| {
        BuildError::ChoiceInitialization {
            choice: choice_name.to_string(),
            source: anyhow::anyhow!("artifact failed to load back after save").into(),
        }
    })?;
    DecisionFn::new(program).map_err(BuildError::Compile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn refs() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("X".to_string(), "x_state".to_string()),
            ("Y".to_string(), "y_state".to_string()),
        ])
    }

    fn json_artifacts(dir: &std::path::Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".json") && !n.ends_with("_metadata.json"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn identical_statements_load_without_recompiling() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompileCache::new(dir.path());
        let statements = vec!["when $.value gt 10 then #X else #Y".to_string()];
        let options = CompileOptions::default();

        let first = load_or_compile(&cache, "router", &statements, &refs(), &options).unwrap();
        assert_eq!(
            first.decide(&json!({"value": 11})),
            DecisionValue::Value(json!("x_state"))
        );

        // Tamper with the cached artifact. A second build with the same
        // statements must load it as-is instead of recompiling.
        let metadata = cache.read_metadata("router").unwrap();
        let mut program: DecisionProgram =
            serde_json::from_str(&fs::read_to_string(&metadata.cache_file).unwrap()).unwrap();
        program.statements = vec![Statement::Branch(Term::Literal(json!("tampered")))];
        fs::write(
            &metadata.cache_file,
            serde_json::to_vec(&program).unwrap(),
        )
        .unwrap();

        let second = load_or_compile(&cache, "router", &statements, &refs(), &options).unwrap();
        assert_eq!(
            second.decide(&json!({"value": 11})),
            DecisionValue::Value(json!("tampered"))
        );
    }

    #[test]
    fn whitespace_variants_share_the_cached_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompileCache::new(dir.path());
        let options = CompileOptions::default();

        let compact = vec!["when $.value gt 10 then #X else #Y".to_string()];
        let sprawling = vec!["  when   $.value gt 10   then #X   else #Y ".to_string()];

        load_or_compile(&cache, "router", &compact, &refs(), &options).unwrap();
        let after_first = json_artifacts(dir.path());

        load_or_compile(&cache, "router", &sprawling, &refs(), &options).unwrap();
        let after_second = json_artifacts(dir.path());

        assert_eq!(after_first, after_second);
        assert_eq!(after_first.len(), 1);
    }

    #[test]
    fn changed_statements_produce_a_new_artifact_and_purge_the_old() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompileCache::new(dir.path());
        let options = CompileOptions::default();

        let original = vec!["when $.value gt 10 then #X else #Y".to_string()];
        load_or_compile(&cache, "router", &original, &refs(), &options).unwrap();
        let before = json_artifacts(dir.path());

        let changed = vec!["when $.value gt 99 then #X else #Y".to_string()];
        load_or_compile(&cache, "router", &changed, &refs(), &options).unwrap();
        let after = json_artifacts(dir.path());

        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 1);
        assert_ne!(before, after);
    }

    #[test]
    fn compile_errors_are_never_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompileCache::new(dir.path());
        let options = CompileOptions::default();

        let bad = vec!["when $.value like 10 then #X else #Y".to_string()];
        let err = load_or_compile(&cache, "router", &bad, &refs(), &options).unwrap_err();
        assert!(matches!(
            err,
            BuildError::Compile(crate::errors::CompileError::InvalidOperator(_))
        ));
        assert!(!dir.path().join("router_metadata.json").exists());
        assert!(json_artifacts(dir.path()).is_empty());
    }

    #[test]
    fn round_trip_matches_direct_compilation() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompileCache::new(dir.path());
        let options = CompileOptions::default();
        let statements = vec![
            "when $.user.age gt 36 then 'senior' else when $.user.age lt 10 then 'children' else 'young'"
                .to_string(),
        ];

        let direct = compile("ages", &statements, &BTreeMap::new(), &options).unwrap();
        let direct = DecisionFn::new(direct).unwrap();
        let cached = load_or_compile(&cache, "ages", &statements, &BTreeMap::new(), &options)
            .unwrap();

        for age in [5, 20, 40] {
            let doc = json!({"user": {"age": age}});
            assert_eq!(direct.decide(&doc), cached.decide(&doc));
        }
    }
}
