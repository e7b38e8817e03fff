use crate::state::State;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::HashMap;
use std::sync::Arc;

/// A successor pointer that does not resolve in the registry.
#[derive(Debug, Clone)]
pub struct VerifyError {
    pub state: String,
    pub successor: String,
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "state '{}' points at unknown successor '{}'",
            self.state, self.successor
        )
    }
}

/// Verify the transition graph at build time.
///
/// Every successor a state can route to — the configured `next_state`
/// plus a choice's tag targets — must resolve to a member of the state
/// list; violations are returned as errors. States unreachable from the
/// head are legal but suspicious, so they are logged as warnings.
pub fn verify(machine_name: &str, head: &str, states: &[Arc<dyn State>]) -> Vec<VerifyError> {
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut nodes: HashMap<String, NodeIndex> = HashMap::new();

    for state in states {
        let idx = graph.add_node(state.name().to_string());
        nodes.insert(state.name().to_string(), idx);
    }

    let mut errors = Vec::new();
    for state in states {
        let from = nodes[state.name()];
        for successor in state.successors() {
            match nodes.get(&successor) {
                Some(&to) => {
                    graph.add_edge(from, to, ());
                }
                None => errors.push(VerifyError {
                    state: state.name().to_string(),
                    successor,
                }),
            }
        }
    }

    if let Some(&start) = nodes.get(head) {
        let mut reachable = std::collections::HashSet::new();
        let mut dfs = Dfs::new(&graph, start);
        while let Some(nx) = dfs.next(&graph) {
            reachable.insert(nx);
        }
        for (name, idx) in &nodes {
            if !reachable.contains(idx) {
                tracing::warn!(
                    machine = %machine_name,
                    state = %name,
                    "state is unreachable from the head"
                );
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::types::{Document, StateKind, StateOutcome, TimeoutSecs};
    use async_trait::async_trait;

    struct Stub {
        name: String,
        next: Option<String>,
        extra: Vec<String>,
    }

    #[async_trait]
    impl State for Stub {
        fn name(&self) -> &str {
            &self.name
        }
        fn kind(&self) -> StateKind {
            StateKind::Task
        }
        fn timeout(&self) -> TimeoutSecs {
            1
        }
        fn next_state(&self) -> Option<&str> {
            self.next.as_deref()
        }
        fn successors(&self) -> Vec<String> {
            let mut all: Vec<String> = self.next.iter().cloned().collect();
            all.extend(self.extra.iter().cloned());
            all
        }
        async fn handle(
            &self,
            event: Document,
            _ctx: &mut ExecutionContext,
        ) -> anyhow::Result<StateOutcome> {
            Ok(StateOutcome::configured(event))
        }
    }

    fn stub(name: &str, next: Option<&str>, extra: &[&str]) -> Arc<dyn State> {
        Arc::new(Stub {
            name: name.to_string(),
            next: next.map(str::to_string),
            extra: extra.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn resolved_graph_passes() {
        let states = vec![
            stub("a", Some("b"), &[]),
            stub("b", None, &["a"]),
        ];
        assert!(verify("m", "a", &states).is_empty());
    }

    #[test]
    fn dangling_successor_is_reported() {
        let states = vec![stub("a", Some("ghost"), &[])];
        let errors = verify("m", "a", &states);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].state, "a");
        assert_eq!(errors[0].successor, "ghost");
    }

    #[test]
    fn choice_targets_are_checked_too() {
        let states = vec![
            stub("router", None, &["x", "ghost"]),
            stub("x", None, &[]),
        ];
        let errors = verify("m", "router", &states);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].successor, "ghost");
    }
}
