use super::ast::{Condition, DecisionProgram, Statement, Term};
use crate::errors::CompileError;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Compilation switches.
#[derive(Clone, Debug, Default)]
pub struct CompileOptions {
    /// Permit programs whose last statement is conditional. Such a
    /// program may yield no successor at runtime, which ends the run.
    pub allow_no_default: bool,
}

/// Rewrite parsed statements into a cacheable program: `#tag` terms
/// become the referenced state names as string literals, `$.path` terms
/// become parameters with an extraction table, and the trailing-default
/// rule is enforced.
pub fn lower(
    choice_name: &str,
    statements: Vec<(String, Statement)>,
    state_refs: &BTreeMap<String, String>,
    options: &CompileOptions,
) -> Result<DecisionProgram, CompileError> {
    if statements.is_empty() {
        return Err(CompileError::MalformedStatement(format!(
            "choice '{choice_name}' has no statements"
        )));
    }

    let mut params: BTreeMap<String, String> = BTreeMap::new();
    let mut targets: BTreeSet<String> = BTreeSet::new();
    let mut lowered = Vec::with_capacity(statements.len());

    for (text, statement) in statements {
        lowered.push(lower_statement(
            statement,
            &text,
            state_refs,
            &mut params,
            &mut targets,
        )?);
    }

    if !options.allow_no_default {
        let total = lowered.last().map(Statement::is_total).unwrap_or(false);
        if !total {
            return Err(CompileError::MissingDefault {
                choice: choice_name.to_string(),
            });
        }
    }

    Ok(DecisionProgram {
        choice_name: choice_name.to_string(),
        statements: lowered,
        params,
        targets: targets.into_iter().collect(),
    })
}

fn lower_statement(
    statement: Statement,
    text: &str,
    state_refs: &BTreeMap<String, String>,
    params: &mut BTreeMap<String, String>,
    targets: &mut BTreeSet<String>,
) -> Result<Statement, CompileError> {
    match statement {
        Statement::Branch(term) => Ok(Statement::Branch(lower_term(
            term, text, state_refs, params, targets,
        )?)),
        Statement::When {
            condition,
            then,
            otherwise,
        } => Ok(Statement::When {
            condition: lower_condition(condition, text, state_refs, params, targets)?,
            then: Box::new(lower_statement(*then, text, state_refs, params, targets)?),
            otherwise: match otherwise {
                Some(otherwise) => Some(Box::new(lower_statement(
                    *otherwise, text, state_refs, params, targets,
                )?)),
                None => None,
            },
        }),
    }
}

fn lower_condition(
    condition: Condition,
    text: &str,
    state_refs: &BTreeMap<String, String>,
    params: &mut BTreeMap<String, String>,
    targets: &mut BTreeSet<String>,
) -> Result<Condition, CompileError> {
    Ok(match condition {
        Condition::Compare { left, op, right } => Condition::Compare {
            left: lower_term(left, text, state_refs, params, targets)?,
            op,
            right: lower_term(right, text, state_refs, params, targets)?,
        },
        Condition::And(l, r) => Condition::And(
            Box::new(lower_condition(*l, text, state_refs, params, targets)?),
            Box::new(lower_condition(*r, text, state_refs, params, targets)?),
        ),
        Condition::Or(l, r) => Condition::Or(
            Box::new(lower_condition(*l, text, state_refs, params, targets)?),
            Box::new(lower_condition(*r, text, state_refs, params, targets)?),
        ),
        Condition::Not(inner) => Condition::Not(Box::new(lower_condition(
            *inner, text, state_refs, params, targets,
        )?)),
        Condition::Exist(term) => {
            Condition::Exist(lower_term(term, text, state_refs, params, targets)?)
        }
    })
}

fn lower_term(
    term: Term,
    text: &str,
    state_refs: &BTreeMap<String, String>,
    params: &mut BTreeMap<String, String>,
    targets: &mut BTreeSet<String>,
) -> Result<Term, CompileError> {
    match term {
        Term::Path(path) => {
            let name = path.param_name();
            if let Some(existing) = params.get(&name) {
                if existing != path.raw() {
                    return Err(CompileError::InvalidPath {
                        path: path.raw().to_string(),
                        reason: format!(
                            "parameter '{name}' collides with selector '{existing}'"
                        ),
                    });
                }
            } else {
                params.insert(name.clone(), path.raw().to_string());
            }
            Ok(Term::Param(name))
        }
        Term::StateRef(tag) => {
            let state = state_refs.get(&tag).ok_or_else(|| CompileError::UnknownTag {
                tag: tag.clone(),
                statement: text.to_string(),
            })?;
            targets.insert(state.clone());
            Ok(Term::Literal(Value::String(state.clone())))
        }
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse_statement;

    fn refs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn parse_all(texts: &[&str]) -> Vec<(String, Statement)> {
        texts
            .iter()
            .map(|t| (t.to_string(), parse_statement(t).unwrap()))
            .collect()
    }

    #[test]
    fn rewrites_tags_to_state_names_and_collects_targets() {
        let statements = parse_all(&["when $.value gt 10 then #X else #Y"]);
        let program = lower(
            "router",
            statements,
            &refs(&[("X", "x_state"), ("Y", "y_state")]),
            &CompileOptions::default(),
        )
        .unwrap();

        assert_eq!(program.targets, vec!["x_state", "y_state"]);
        let Statement::When { then, .. } = &program.statements[0] else {
            panic!("expected when");
        };
        assert_eq!(
            **then,
            Statement::Branch(Term::Literal(Value::String("x_state".into())))
        );
    }

    #[test]
    fn collects_sorted_unique_params() {
        let statements = parse_all(&[
            "when $.user.age gt 18 and $.user.name starts_with 'a' then #A",
            "when $.user.age lt 5 then #B",
            "#A",
        ]);
        let program = lower(
            "router",
            statements,
            &refs(&[("A", "a_state"), ("B", "b_state")]),
            &CompileOptions::default(),
        )
        .unwrap();

        let keys: Vec<&String> = program.params.keys().collect();
        assert_eq!(keys, ["user_age", "user_name"]);
        assert_eq!(program.params["user_age"], "$.user.age");
    }

    #[test]
    fn unknown_tag_is_a_compile_error() {
        let statements = parse_all(&["when $.v gt 1 then #missing else #A"]);
        let err = lower(
            "router",
            statements,
            &refs(&[("A", "a_state")]),
            &CompileOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::UnknownTag { tag, .. } if tag == "missing"));
    }

    #[test]
    fn missing_default_is_rejected_unless_opted_in() {
        let make = || parse_all(&["when $.v gt 1 then #A"]);
        let state_refs = refs(&[("A", "a_state")]);

        let err = lower("router", make(), &state_refs, &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::MissingDefault { choice } if choice == "router"));

        let relaxed = CompileOptions {
            allow_no_default: true,
        };
        assert!(lower("router", make(), &state_refs, &relaxed).is_ok());
    }

    #[test]
    fn else_chain_counts_as_default() {
        let statements = parse_all(&["when $.v gt 1 then #A else #B"]);
        let program = lower(
            "router",
            statements,
            &refs(&[("A", "a_state"), ("B", "b_state")]),
            &CompileOptions::default(),
        );
        assert!(program.is_ok());
    }

    #[test]
    fn param_collision_is_rejected() {
        let statements = parse_all(&["when $.a.b eq 1 and $.a_b eq 2 then #A else #A"]);
        let err = lower(
            "router",
            statements,
            &refs(&[("A", "a_state")]),
            &CompileOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::InvalidPath { .. }));
    }
}
