use super::path::JsonPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Comparison operators of the statement language.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Gt,
    Lt,
    Eq,
    Neq,
    Gte,
    Lte,
    /// Right-in-left membership.
    Contains,
    StartsWith,
    EndsWith,
}

impl CompareOp {
    pub fn parse(word: &str) -> Option<Self> {
        Some(match word {
            "gt" => CompareOp::Gt,
            "lt" => CompareOp::Lt,
            "eq" => CompareOp::Eq,
            "neq" => CompareOp::Neq,
            "gte" => CompareOp::Gte,
            "lte" => CompareOp::Lte,
            "contains" => CompareOp::Contains,
            "starts_with" => CompareOp::StartsWith,
            "ends_with" => CompareOp::EndsWith,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Gt => "gt",
            CompareOp::Lt => "lt",
            CompareOp::Eq => "eq",
            CompareOp::Neq => "neq",
            CompareOp::Gte => "gte",
            CompareOp::Lte => "lte",
            CompareOp::Contains => "contains",
            CompareOp::StartsWith => "starts_with",
            CompareOp::EndsWith => "ends_with",
        }
    }
}

/// A term: something that evaluates to a value.
///
/// `Path` and `StateRef` only exist between parsing and lowering;
/// lowering rewrites them to `Param` and `Literal` respectively, so a
/// cached program contains neither.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Term {
    /// `$.path` selector (pre-lowering).
    Path(JsonPath),
    /// Extracted path parameter (post-lowering).
    Param(String),
    /// `#tag` successor reference (pre-lowering).
    StateRef(String),
    /// Quoted string, number, `true`/`false`/`null`, list, or map.
    Literal(Value),
}

/// A boolean condition tree. Grouping parentheses are preserved as tree
/// structure, so precedence survives the round trip through the cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    Compare {
        left: Term,
        op: CompareOp,
        right: Term,
    },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
    /// `exist $.path` — true iff the selector resolves to at least one
    /// value.
    Exist(Term),
}

/// One statement: an unconditional branch or a `when … then … [else …]`
/// with arbitrary nesting. An `else` binds to the innermost `when`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// Unconditional successor (a `#tag` or a literal).
    Branch(Term),
    When {
        condition: Condition,
        then: Box<Statement>,
        otherwise: Option<Box<Statement>>,
    },
}

impl Statement {
    /// True when every evaluation path through this statement yields a
    /// value — the structural "has a default" property.
    pub fn is_total(&self) -> bool {
        match self {
            Statement::Branch(_) => true,
            Statement::When {
                then, otherwise, ..
            } => match otherwise {
                Some(otherwise) => then.is_total() && otherwise.is_total(),
                None => false,
            },
        }
    }
}

/// A lowered, ordered statement program — the cached artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionProgram {
    pub choice_name: String,
    pub statements: Vec<Statement>,
    /// Parameter name → original JSONPath. The evaluation shim extracts
    /// each path exactly once per document.
    pub params: BTreeMap<String, String>,
    /// Successor state names referenced via `#tag`, sorted unique.
    /// Consumed by the build-time verifier.
    pub targets: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn branch(value: Value) -> Statement {
        Statement::Branch(Term::Literal(value))
    }

    #[test]
    fn compare_op_round_trips_through_words() {
        for word in [
            "gt",
            "lt",
            "eq",
            "neq",
            "gte",
            "lte",
            "contains",
            "starts_with",
            "ends_with",
        ] {
            let op = CompareOp::parse(word).unwrap();
            assert_eq!(op.as_str(), word);
        }
        assert!(CompareOp::parse("like").is_none());
    }

    #[test]
    fn totality_requires_an_else_on_every_path() {
        assert!(branch(json!("default")).is_total());

        let open = Statement::When {
            condition: Condition::Exist(Term::Param("p".into())),
            then: Box::new(branch(json!("a"))),
            otherwise: None,
        };
        assert!(!open.is_total());

        let closed = Statement::When {
            condition: Condition::Exist(Term::Param("p".into())),
            then: Box::new(branch(json!("a"))),
            otherwise: Some(Box::new(branch(json!("b")))),
        };
        assert!(closed.is_total());

        // An else whose then-branch is itself open is still open.
        let nested_open = Statement::When {
            condition: Condition::Exist(Term::Param("p".into())),
            then: Box::new(open),
            otherwise: Some(Box::new(branch(json!("b")))),
        };
        assert!(!nested_open.is_total());
    }

    #[test]
    fn program_serializes_and_reloads() {
        let program = DecisionProgram {
            choice_name: "router".into(),
            statements: vec![Statement::When {
                condition: Condition::Compare {
                    left: Term::Param("value".into()),
                    op: CompareOp::Gt,
                    right: Term::Literal(json!(10)),
                },
                then: Box::new(branch(json!("x_state"))),
                otherwise: Some(Box::new(branch(json!("y_state")))),
            }],
            params: BTreeMap::from([("value".to_string(), "$.value".to_string())]),
            targets: vec!["x_state".into(), "y_state".into()],
        };
        let text = serde_json::to_string(&program).unwrap();
        let reloaded: DecisionProgram = serde_json::from_str(&text).unwrap();
        assert_eq!(reloaded, program);
    }
}
