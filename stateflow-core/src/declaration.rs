use crate::compiler::{CompileCache, CompileOptions};
use crate::errors::BuildError;
use crate::events::EventSink;
use crate::handler::HandlerRegistry;
use crate::machine::StateMachine;
use crate::state::{ChoiceState, ParallelState, State, TaskState};
use crate::types::{StateKind, TimeoutSecs};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Top-level declaration document: `entry` names the machine to build;
/// every other key describes one machine.
#[derive(Clone, Debug, Deserialize)]
pub struct WorkflowDeclaration {
    pub entry: String,
    #[serde(flatten)]
    pub machines: BTreeMap<String, MachineDecl>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MachineDecl {
    pub name: String,
    pub lambda_dir: String,
    #[serde(default)]
    pub timeout: Option<TimeoutSecs>,
    /// Ordered transition edges; the first entry is the head state.
    pub tree: Vec<TreeStep>,
    pub states: BTreeMap<String, StateDecl>,
    /// Statement lists for choices, keyed by the choice's next-key.
    #[serde(default)]
    pub vars: BTreeMap<String, Vec<String>>,
}

/// One edge of the tree: `state` runs, then `next` (absent = terminal).
/// For a choice, `next` names its statement list in `vars` instead.
#[derive(Clone, Debug, Deserialize)]
pub struct TreeStep {
    pub state: String,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StateDecl {
    pub name: String,
    pub kind: StateKind,
    #[serde(default)]
    pub timeout: Option<TimeoutSecs>,
    /// Sub-machine keys for parallel states, resolved against the
    /// top-level document.
    #[serde(default)]
    pub workflows: Vec<String>,
}

impl WorkflowDeclaration {
    pub fn from_yaml(text: &str) -> Result<Self, BuildError> {
        serde_yaml::from_str(text).map_err(|e| BuildError::Declaration(e.to_string()))
    }
}

/// Builds executable machines out of a declaration: handlers come from
/// the registry, choice programs go through the compile cache, and
/// parallel states recurse into the same document.
pub struct MachineBuilder<'a> {
    registry: &'a HandlerRegistry,
    cache: &'a CompileCache,
    options: CompileOptions,
    sink: Arc<dyn EventSink>,
}

impl<'a> MachineBuilder<'a> {
    pub fn new(
        registry: &'a HandlerRegistry,
        cache: &'a CompileCache,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            cache,
            options: CompileOptions::default(),
            sink,
        }
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the declaration's entry machine.
    pub fn build(&self, decl: &WorkflowDeclaration) -> Result<StateMachine, BuildError> {
        self.build_machine_by_key(decl, &decl.entry, &mut Vec::new())
    }

    fn build_machine_by_key(
        &self,
        decl: &WorkflowDeclaration,
        key: &str,
        stack: &mut Vec<String>,
    ) -> Result<StateMachine, BuildError> {
        if stack.iter().any(|k| k == key) {
            return Err(BuildError::Declaration(format!(
                "machine '{key}' is part of a workflow cycle: {stack:?}"
            )));
        }
        let machine = decl.machines.get(key).ok_or_else(|| {
            BuildError::Declaration(format!("declaration has no machine '{key}'"))
        })?;
        stack.push(key.to_string());
        let built = self.build_machine(decl, machine, stack);
        stack.pop();
        built
    }

    fn build_machine(
        &self,
        decl: &WorkflowDeclaration,
        machine: &MachineDecl,
        stack: &mut Vec<String>,
    ) -> Result<StateMachine, BuildError> {
        // `#tag` references index the states map by key.
        let state_refs: BTreeMap<String, String> = machine
            .states
            .iter()
            .map(|(key, state)| (key.clone(), state.name.clone()))
            .collect();

        let mut states: Vec<Arc<dyn State>> = Vec::with_capacity(machine.tree.len());
        for step in &machine.tree {
            let this = machine.states.get(&step.state).ok_or_else(|| {
                BuildError::Declaration(format!(
                    "machine '{}': tree references unknown state key '{}'",
                    machine.name, step.state
                ))
            })?;

            let next_name = match &step.next {
                // A choice's next-key selects its statements, not a
                // successor; skip the lookup below.
                Some(_) if this.kind == StateKind::Choice => None,
                Some(next_key) => Some(
                    machine
                        .states
                        .get(next_key)
                        .ok_or_else(|| {
                            BuildError::Declaration(format!(
                                "machine '{}': tree references unknown next key '{}'",
                                machine.name, next_key
                            ))
                        })?
                        .name
                        .clone(),
                ),
                None => None,
            };

            let state: Arc<dyn State> = match this.kind {
                StateKind::Task => Arc::new(TaskState::new(
                    &this.name,
                    next_name,
                    &machine.lambda_dir,
                    this.timeout,
                    self.registry,
                )?),
                StateKind::Choice => {
                    let vars_key = step.next.as_deref().ok_or_else(|| {
                        BuildError::Declaration(format!(
                            "choice '{}' has no next-key naming its statements",
                            this.name
                        ))
                    })?;
                    let statements = machine.vars.get(vars_key).ok_or_else(|| {
                        BuildError::Declaration(format!(
                            "statements for choice '{}' do not exist (vars key '{}')",
                            this.name, vars_key
                        ))
                    })?;
                    Arc::new(ChoiceState::new(
                        &this.name,
                        statements,
                        &state_refs,
                        self.cache,
                        &self.options,
                    )?)
                }
                StateKind::Parallel => {
                    let mut branches = Vec::with_capacity(this.workflows.len());
                    for workflow_key in &this.workflows {
                        branches.push(Arc::new(self.build_machine_by_key(
                            decl,
                            workflow_key,
                            stack,
                        )?));
                    }
                    Arc::new(ParallelState::new(
                        &this.name,
                        next_name,
                        this.timeout,
                        branches,
                    ))
                }
            };
            states.push(state);
        }

        StateMachine::new(&machine.name, states, machine.timeout, self.sink.clone())
    }
}
