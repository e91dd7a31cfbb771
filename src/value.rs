// ABOUTME: The tagged value universe every runtime term belongs to

use std::fmt;
use std::rc::Rc;

use crate::error::EvalError;
use crate::frame::Frame;
use crate::lambda::LambdaValue;
use crate::scope::Scope;

/// Every runtime term is a `Value`. The variant itself is the "Kind" tag;
/// Rust's enum discriminant replaces the source's separate `Kind` enum.
#[derive(Clone)]
pub enum Value {
    Number(f64),
    Boolean(bool),
    Char(char),
    /// The sole data-level collection. Strings are lists of `Char`.
    List(Rc<Vec<Value>>),
    /// An identifier held as data: produced by `quote`, consumed by macros.
    QuotedName(String),
    Unit,
    /// A list of values interpreted as code. Never appears as an ordinary
    /// data value outside of evaluation.
    SExpression(Rc<Vec<Value>>),
    /// A name awaiting lookup.
    Reference(String),
    Lambda(Rc<dyn LambdaValue>),
    ContinueStop {
        is_continue: bool,
        return_value: Box<Value>,
        new_state: Box<Value>,
    },
    /// Placeholder occupying a parent frame's slot until its child completes.
    StackReturnValue,
    /// Placeholder for a `handle` block whose body hasn't finished.
    HandleReturnValue(usize),
    /// The sentinel interposed between a `handle` invocation and its body.
    HandleBranchPoint {
        handler_id: usize,
        continue_branch: Option<Rc<Frame>>,
    },
    Scope(Scope),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "Number",
            Value::Boolean(_) => "Boolean",
            Value::Char(_) => "Char",
            Value::List(_) => "List",
            Value::QuotedName(_) => "QuotedName",
            Value::Unit => "Unit",
            Value::SExpression(_) => "sExpression",
            Value::Reference(_) => "Reference",
            Value::Lambda(_) => "Lambda",
            Value::ContinueStop { .. } => "ContinueStop",
            Value::StackReturnValue => "StackReturnValue",
            Value::HandleReturnValue(_) => "HandleReturnValue",
            Value::HandleBranchPoint { .. } => "HandleBranchPoint",
            Value::Scope(_) => "Scope",
        }
    }

    /// Reference, StackReturnValue and HandleReturnValue all resolve to a
    /// concrete value via dereference.
    pub fn is_indirection(&self) -> bool {
        matches!(
            self,
            Value::Reference(_) | Value::StackReturnValue | Value::HandleReturnValue(_)
        )
    }

    /// Whether this value, sitting as a frame's `execution_state`, still has
    /// work to do rather than being a finished result. `HandleBranchPoint`
    /// is handled separately from plain dereference since resolving it
    /// means dispatching `continue`/`stop`, not just substituting a value.
    pub fn needs_evaluation(&self) -> bool {
        matches!(
            self,
            Value::Reference(_)
                | Value::SExpression(_)
                | Value::StackReturnValue
                | Value::HandleReturnValue(_)
                | Value::HandleBranchPoint { .. }
        )
    }

    pub fn is_data_level(&self) -> bool {
        matches!(
            self,
            Value::Number(_)
                | Value::Boolean(_)
                | Value::Char(_)
                | Value::List(_)
                | Value::QuotedName(_)
                | Value::Unit
        )
    }

    pub fn as_list(&self) -> Option<&Rc<Vec<Value>>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_sexpression(&self) -> Option<&Rc<Vec<Value>>> {
        match self {
            Value::SExpression(items) => Some(items),
            _ => None,
        }
    }

    /// A list whose every element is a `Char`.
    pub fn is_string(&self) -> bool {
        match self {
            Value::List(items) => items.iter().all(|v| matches!(v, Value::Char(_))),
            _ => false,
        }
    }

    pub fn string_from_chars(items: &[Value]) -> Result<String, EvalError> {
        let mut s = String::with_capacity(items.len());
        for item in items {
            match item {
                Value::Char(c) => s.push(*c),
                other => {
                    return Err(EvalError::kind_mismatch(
                        "string extraction",
                        "Char",
                        other.kind_name(),
                    ))
                }
            }
        }
        Ok(s)
    }

    pub fn string_literal(s: &str) -> Value {
        Value::List(Rc::new(s.chars().map(Value::Char).collect()))
    }

    /// Structural equality on data-level values. Interpreter-only kinds have
    /// no defined equality and produce a fatal error, matching the source's
    /// `equals()` raising for non-data kinds.
    pub fn structural_eq(&self, other: &Value) -> Result<bool, EvalError> {
        if !self.is_data_level() {
            return Err(EvalError::UndefinedEquality(self.kind_name().to_string()));
        }
        if !other.is_data_level() {
            return Err(EvalError::UndefinedEquality(other.kind_name().to_string()));
        }
        Ok(match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Unit, Value::Unit) => true,
            (Value::QuotedName(a), Value::QuotedName(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                if a.len() != b.len() {
                    false
                } else {
                    let mut all_eq = true;
                    for (x, y) in a.iter().zip(b.iter()) {
                        if !x.structural_eq(y)? {
                            all_eq = false;
                            break;
                        }
                    }
                    all_eq
                }
            }
            _ => false,
        })
    }

    /// Canonical text form for data-level values: a List of Chars serializes
    /// as a string literal, everything else data-level as `[ x y z ]` or a
    /// bare literal.
    pub fn serialize(&self) -> Result<String, EvalError> {
        match self {
            Value::Number(n) => {
                if *n == n.trunc() && n.is_finite() {
                    Ok(format!("{n:.1}"))
                } else {
                    Ok(n.to_string())
                }
            }
            Value::Boolean(b) => Ok(if *b { "true".to_string() } else { "false".to_string() }),
            Value::Char(c) => Ok(format!("c\"{c}\"")),
            Value::Unit => Ok("unit".to_string()),
            Value::QuotedName(name) => Ok(name.clone()),
            Value::List(items) => {
                if self.is_string() {
                    let mut out = String::from("\"");
                    for item in items.iter() {
                        if let Value::Char(c) = item {
                            match c {
                                '"' => out.push_str("\\\""),
                                '\\' => out.push_str("\\\\"),
                                '\n' => out.push_str("\\n"),
                                '\t' => out.push_str("\\t"),
                                '\r' => out.push_str("\\r"),
                                other => out.push(*other),
                            }
                        }
                    }
                    out.push('"');
                    Ok(out)
                } else {
                    let parts: Result<Vec<String>, EvalError> =
                        items.iter().map(Value::serialize).collect();
                    Ok(format!("[ {} ]", parts?.join(" ")))
                }
            }
            other => Err(EvalError::NotSerializable(other.kind_name().to_string())),
        }
    }

    /// A short representation usable inside an error stack trace dump even
    /// for interpreter-only kinds that cannot be serialized.
    pub fn error_dump(&self) -> String {
        match self {
            Value::Reference(name) => format!("<reference {name}>"),
            Value::SExpression(items) => format!("<sexpr of {} items>", items.len()),
            Value::StackReturnValue => "<stack-return-value>".to_string(),
            Value::HandleReturnValue(id) => format!("<handle-return-value #{id}>"),
            Value::HandleBranchPoint { handler_id, .. } => {
                format!("<handle-branch-point #{handler_id}>")
            }
            Value::Lambda(l) => format!("<lambda {}>", l.describe()),
            Value::Scope(_) => "<scope>".to_string(),
            _ => self.serialize().unwrap_or_else(|_| self.kind_name().to_string()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error_dump())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error_dump())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_serializes_with_trailing_dot_zero() {
        assert_eq!(Value::Number(3.0).serialize().unwrap(), "3.0");
        assert_eq!(Value::Number(3.5).serialize().unwrap(), "3.5");
    }

    #[test]
    fn string_round_trips_as_a_list_of_chars() {
        let v = Value::string_literal("hi");
        assert_eq!(v.serialize().unwrap(), "\"hi\"");
    }

    #[test]
    fn non_string_list_serializes_bracketed() {
        let v = Value::List(Rc::new(vec![Value::Number(1.0), Value::Number(2.0)]));
        assert_eq!(v.serialize().unwrap(), "[ 1.0 2.0 ]");
    }

    #[test]
    fn equality_is_undefined_on_interpreter_only_kinds() {
        let a = Value::StackReturnValue;
        let b = Value::StackReturnValue;
        assert!(a.structural_eq(&b).is_err());
    }

    #[test]
    fn equality_across_kinds_is_false_not_error() {
        let a = Value::Number(1.0);
        let b = Value::Boolean(true);
        assert_eq!(a.structural_eq(&b).unwrap(), false);
    }

    #[test]
    fn is_string_requires_every_element_to_be_char() {
        let mixed = Value::List(Rc::new(vec![Value::Char('a'), Value::Number(1.0)]));
        assert!(!mixed.is_string());
    }
}
