use super::State;
use crate::compiler::{self, CompileCache, CompileOptions, DecisionFn, DecisionValue};
use crate::context::ExecutionContext;
use crate::errors::BuildError;
use crate::types::{Document, StateKind, StateOutcome, TimeoutSecs, Transition};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// Choices evaluate in-process and never block.
const CHOICE_TIMEOUT: TimeoutSecs = 1;

/// A state whose `handle` computes a successor name from a compiled
/// decision function and leaves the event unchanged.
///
/// Construction goes through the compile cache: hash the statements,
/// load the cached program on a hit, otherwise compile, save, and load
/// back.
#[derive(Debug)]
pub struct ChoiceState {
    name: String,
    decision: DecisionFn,
}

impl ChoiceState {
    pub fn new(
        name: &str,
        statements: &[String],
        state_refs: &BTreeMap<String, String>,
        cache: &CompileCache,
        options: &CompileOptions,
    ) -> Result<Self, BuildError> {
        let decision = compiler::load_or_compile(cache, name, statements, state_refs, options)?;
        Ok(Self {
            name: name.to_string(),
            decision,
        })
    }

    /// Evaluate the decision function directly, without routing.
    pub fn decide(&self, doc: &Document) -> DecisionValue {
        self.decision.decide(doc)
    }
}

#[async_trait]
impl State for ChoiceState {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StateKind {
        StateKind::Choice
    }

    fn timeout(&self) -> TimeoutSecs {
        CHOICE_TIMEOUT
    }

    /// The successor is computed per invocation.
    fn next_state(&self) -> Option<&str> {
        None
    }

    fn successors(&self) -> Vec<String> {
        self.decision.program().targets.clone()
    }

    async fn handle(&self, event: Document, ctx: &mut ExecutionContext) -> Result<StateOutcome> {
        ctx.touch();
        let next = match self.decision.decide(&event) {
            DecisionValue::Absent | DecisionValue::Value(Value::Null) => Transition::Unset,
            DecisionValue::Value(Value::String(name)) => Transition::Goto(name),
            // A non-string decision can only route if the registry holds
            // a state under its rendering; otherwise the driver fails
            // with StateNotFound.
            DecisionValue::Value(other) => Transition::Goto(other.to_string()),
        };
        Ok(StateOutcome { event, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx() -> ExecutionContext {
        let machine_id = Uuid::new_v5(&Uuid::NAMESPACE_URL, b"m");
        ExecutionContext::new("m".into(), machine_id, "s".into(), None)
    }

    fn refs() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("X".to_string(), "x_state".to_string()),
            ("Y".to_string(), "y_state".to_string()),
        ])
    }

    #[tokio::test]
    async fn routes_without_transforming_the_event() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompileCache::new(dir.path());
        let choice = ChoiceState::new(
            "router",
            &["when $.value gt 10 and $.value lt 53 then #X else #Y".to_string()],
            &refs(),
            &cache,
            &CompileOptions::default(),
        )
        .unwrap();

        assert_eq!(choice.kind(), StateKind::Choice);
        assert_eq!(choice.timeout(), CHOICE_TIMEOUT);
        assert_eq!(choice.next_state(), None);
        let mut successors = choice.successors();
        successors.sort();
        assert_eq!(successors, vec!["x_state".to_string(), "y_state".to_string()]);

        let input = json!({"value": 50, "untouched": true});
        let outcome = choice.handle(input.clone(), &mut ctx()).await.unwrap();
        assert_eq!(outcome.event, input);
        assert_eq!(outcome.next, Transition::Goto("x_state".into()));

        let outcome = choice.handle(json!({"value": 5}), &mut ctx()).await.unwrap();
        assert_eq!(outcome.next, Transition::Goto("y_state".into()));
    }

    #[tokio::test]
    async fn absent_decision_unsets_the_successor() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompileCache::new(dir.path());
        let choice = ChoiceState::new(
            "loose",
            &["when $.v gt 10 then #X".to_string()],
            &refs(),
            &cache,
            &CompileOptions {
                allow_no_default: true,
            },
        )
        .unwrap();

        let outcome = choice.handle(json!({"v": 1}), &mut ctx()).await.unwrap();
        assert_eq!(outcome.next, Transition::Unset);
    }

    #[test]
    fn rebuild_reuses_the_cached_program() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompileCache::new(dir.path());
        let statements = vec!["when $.value gt 10 then #X else #Y".to_string()];

        let first = ChoiceState::new(
            "router",
            &statements,
            &refs(),
            &cache,
            &CompileOptions::default(),
        )
        .unwrap();
        let second = ChoiceState::new(
            "router",
            &statements,
            &refs(),
            &cache,
            &CompileOptions::default(),
        )
        .unwrap();

        let doc = json!({"value": 20});
        assert_eq!(first.decide(&doc), second.decide(&doc));
    }

    #[test]
    fn compile_failure_surfaces_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompileCache::new(dir.path());
        let err = ChoiceState::new(
            "broken",
            &["when $.v gt 10 then #missing else #Y".to_string()],
            &refs(),
            &cache,
            &CompileOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::Compile(_)));
    }
}
