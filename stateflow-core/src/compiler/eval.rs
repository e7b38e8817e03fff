use super::ast::{CompareOp, Condition, DecisionProgram, Statement, Term};
use super::path::JsonPath;
use crate::errors::CompileError;
use serde_json::Value;
use std::collections::BTreeMap;

/// Value produced by a decision program. `Absent` is the sentinel for
/// "no statement yielded a value" and for selectors with no match; it
/// is distinct from JSON `null` so `exist` can tell them apart.
#[derive(Clone, Debug, PartialEq)]
pub enum DecisionValue {
    Absent,
    Value(Value),
}

/// The loaded decision function: a lowered program plus its parsed
/// extraction table. Pure — the same document always yields the same
/// decision.
#[derive(Clone, Debug)]
pub struct DecisionFn {
    program: DecisionProgram,
    paths: BTreeMap<String, JsonPath>,
}

/// Statement-level evaluation fault (type mismatch, absent operand).
/// Faults are contained: evaluation skips to the next statement.
#[derive(Debug)]
struct EvalFault(String);

impl DecisionFn {
    pub fn new(program: DecisionProgram) -> Result<Self, CompileError> {
        let mut paths = BTreeMap::new();
        for (param, raw) in &program.params {
            paths.insert(param.clone(), JsonPath::parse(raw)?);
        }
        Ok(Self { program, paths })
    }

    pub fn program(&self) -> &DecisionProgram {
        &self.program
    }

    /// Evaluate against a document. Statements run strictly in order;
    /// the first satisfied one wins. A statement that faults is skipped
    /// so a later default can still apply.
    pub fn decide(&self, doc: &Value) -> DecisionValue {
        let env = self.extract(doc);
        for statement in &self.program.statements {
            match eval_statement(statement, &env) {
                Ok(DecisionValue::Value(v)) => return DecisionValue::Value(v),
                Ok(DecisionValue::Absent) => continue,
                Err(fault) => {
                    tracing::debug!(
                        choice = %self.program.choice_name,
                        "statement skipped: {}",
                        fault.0
                    );
                    continue;
                }
            }
        }
        DecisionValue::Absent
    }

    /// The extraction shim: apply each selector to the document exactly
    /// once. Zero matches bind the absent sentinel; one match binds the
    /// value; many bind the ordered list.
    fn extract(&self, doc: &Value) -> BTreeMap<&str, DecisionValue> {
        self.paths
            .iter()
            .map(|(param, path)| {
                let mut matches = path.resolve(doc);
                let bound = if matches.is_empty() {
                    DecisionValue::Absent
                } else if matches.len() == 1 {
                    DecisionValue::Value(matches.remove(0))
                } else {
                    DecisionValue::Value(Value::Array(matches))
                };
                (param.as_str(), bound)
            })
            .collect()
    }
}

fn eval_statement(
    statement: &Statement,
    env: &BTreeMap<&str, DecisionValue>,
) -> Result<DecisionValue, EvalFault> {
    match statement {
        Statement::Branch(term) => match term {
            Term::Literal(v) => Ok(DecisionValue::Value(v.clone())),
            Term::Param(p) => Ok(env
                .get(p.as_str())
                .cloned()
                .unwrap_or(DecisionValue::Absent)),
            other => Err(EvalFault(format!("unlowered branch term: {other:?}"))),
        },
        Statement::When {
            condition,
            then,
            otherwise,
        } => {
            if eval_condition(condition, env)? {
                eval_statement(then, env)
            } else {
                match otherwise {
                    Some(otherwise) => eval_statement(otherwise, env),
                    None => Ok(DecisionValue::Absent),
                }
            }
        }
    }
}

fn eval_condition(
    condition: &Condition,
    env: &BTreeMap<&str, DecisionValue>,
) -> Result<bool, EvalFault> {
    match condition {
        Condition::And(l, r) => {
            if !eval_condition(l, env)? {
                return Ok(false);
            }
            eval_condition(r, env)
        }
        Condition::Or(l, r) => {
            if eval_condition(l, env)? {
                return Ok(true);
            }
            eval_condition(r, env)
        }
        Condition::Not(inner) => Ok(!eval_condition(inner, env)?),
        Condition::Exist(term) => match term {
            Term::Param(p) => Ok(!matches!(
                env.get(p.as_str()),
                None | Some(DecisionValue::Absent)
            )),
            other => Err(EvalFault(format!("unlowered exist term: {other:?}"))),
        },
        Condition::Compare { left, op, right } => {
            let left = resolve_term(left, env)?;
            let right = resolve_term(right, env)?;
            compare(&left, *op, &right)
        }
    }
}

fn resolve_term(
    term: &Term,
    env: &BTreeMap<&str, DecisionValue>,
) -> Result<Value, EvalFault> {
    match term {
        Term::Literal(v) => Ok(v.clone()),
        Term::Param(p) => match env.get(p.as_str()) {
            Some(DecisionValue::Value(v)) => Ok(v.clone()),
            _ => Err(EvalFault(format!("selector for '{p}' had no match"))),
        },
        other => Err(EvalFault(format!("unlowered term: {other:?}"))),
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> Result<bool, EvalFault> {
    let fault = || {
        EvalFault(format!(
            "operator '{}' cannot compare {left} with {right}",
            op.as_str()
        ))
    };

    match op {
        CompareOp::Eq => Ok(values_equal(left, right)),
        CompareOp::Neq => Ok(!values_equal(left, right)),
        CompareOp::Gt | CompareOp::Lt | CompareOp::Gte | CompareOp::Lte => {
            let ordering = if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
                l.partial_cmp(&r)
            } else if let (Some(l), Some(r)) = (left.as_str(), right.as_str()) {
                Some(l.cmp(r))
            } else {
                None
            };
            let ordering = ordering.ok_or_else(fault)?;
            Ok(match op {
                CompareOp::Gt => ordering.is_gt(),
                CompareOp::Lt => ordering.is_lt(),
                CompareOp::Gte => ordering.is_ge(),
                CompareOp::Lte => ordering.is_le(),
                _ => unreachable!(),
            })
        }
        // Right-in-left membership.
        CompareOp::Contains => match (left, right) {
            (Value::String(l), Value::String(r)) => Ok(l.contains(r.as_str())),
            (Value::Array(items), needle) => {
                Ok(items.iter().any(|item| values_equal(item, needle)))
            }
            (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
            _ => Err(fault()),
        },
        CompareOp::StartsWith => match (left.as_str(), right.as_str()) {
            (Some(l), Some(r)) => Ok(l.starts_with(r)),
            _ => Err(fault()),
        },
        CompareOp::EndsWith => match (left.as_str(), right.as_str()) {
            (Some(l), Some(r)) => Ok(l.ends_with(r)),
            _ => Err(fault()),
        },
    }
}

/// Structural equality with numeric widening, so `1 eq 1.0` holds.
fn values_equal(left: &Value, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return l == r;
    }
    left == right
}
