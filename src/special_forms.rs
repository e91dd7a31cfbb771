// ABOUTME: Dispatch and desugaring for the language's fixed set of special forms

use std::rc::Rc;

use crate::error::EvalError;
use crate::eval::{Evaluator, Step};
use crate::frame::{Frame, Pending};
use crate::lambda::{SystemFunction, UserLambda};
use crate::scope::check_not_reserved;
use crate::value::Value;

pub const KEYWORDS: &[&str] = &[
    "lambda", "let", "cond", "quote", "list", "macro", "ignore", "handle", "import",
];

pub fn is_special_form(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

/// Dispatches a special form invocation. `rest` is the sExpression's items
/// after the head keyword. Every form consumes a fixed-length prefix of
/// `rest`; anything past it is an optional trailing sequence of
/// expressions evaluated afterward, in order, with the last one's value
/// winning (`sequence`).
pub fn dispatch(
    evaluator: &mut Evaluator,
    name: &str,
    frame: Frame,
    rest: Vec<Value>,
) -> Result<Step, EvalError> {
    match name {
        "lambda" => lambda(frame, rest),
        "let" => let_form(frame, rest),
        "ignore" => ignore(frame, rest),
        "quote" => quote_form(frame, rest),
        "list" => list_form(frame, rest),
        "import" => import_form(evaluator, frame, rest),
        "macro" => Err(EvalError::Internal(
            "macro definitions must be eliminated by the demacro pass before evaluation"
                .to_string(),
        )),
        "cond" => cond(frame, rest),
        "handle" => handle(frame, rest),
        other => Err(EvalError::UnknownSpecialForm(other.to_string())),
    }
}

/// Extracts a binding name from a Reference/QuotedName and rejects it up
/// front if it's one of the language's reserved words (§3.2/§6.3):
/// `currentScope`, `true`, `false`, `unit` can never be rebound, in any
/// namespace, by any of the forms that call this (`lambda` parameters,
/// `let`'s name, `import`'s alias).
fn extract_name(value: &Value) -> Result<String, EvalError> {
    let name = match value {
        Value::Reference(name) => name.clone(),
        Value::QuotedName(name) => name.clone(),
        other => {
            return Err(EvalError::kind_mismatch(
                "binding name",
                "Reference",
                other.kind_name(),
            ))
        }
    };
    check_not_reserved(&name)?;
    Ok(name)
}

fn extract_param_names(value: &Value) -> Result<Vec<String>, EvalError> {
    let items = value
        .as_sexpression()
        .or_else(|| value.as_list())
        .ok_or_else(|| EvalError::kind_mismatch("lambda parameter list", "sExpression", value.kind_name()))?;
    items.iter().map(extract_name).collect()
}

/// Builds the code for "evaluate each of `items` in order, discarding every
/// result but the last". Empty is `unit`; a single item is itself, used
/// directly rather than wrapped. Longer sequences recurse through `ignore`,
/// which supplies the discard-then-continue behavior at evaluation time.
pub fn sequence(items: &[Value]) -> Value {
    match items {
        [] => Value::Unit,
        [only] => only.clone(),
        [first, rest @ ..] => Value::SExpression(Rc::new(vec![
            Value::Reference("ignore".to_string()),
            first.clone(),
            sequence(rest),
        ])),
    }
}

/// Runs `code`, and if `rest` is non-empty, discards its result and
/// continues with `sequence(rest)`; otherwise `code` is the final value.
fn then_sequence(code: Value, rest: &[Value]) -> Value {
    if rest.is_empty() {
        code
    } else {
        Value::SExpression(Rc::new(vec![
            Value::Reference("ignore".to_string()),
            code,
            sequence(rest),
        ]))
    }
}

fn lambda(frame: Frame, rest: Vec<Value>) -> Result<Step, EvalError> {
    if rest.len() != 2 {
        return Err(EvalError::malformed_special_form("lambda", 3, rest.len() + 1));
    }
    let params = extract_param_names(&rest[0])?;
    let body = rest[1].clone();
    let produced = Value::Lambda(Rc::new(UserLambda::new(params, body, frame.current_scope.clone())));
    Ok(Step::Continue(frame.with_execution_state(produced)))
}

/// `(let name value rest...)`. `value` is evaluated in a scope that already
/// binds `name` to a placeholder, then that same binding is patched to the
/// real value once known (see `Pending::LetAwaitingValue`) before `rest` is
/// evaluated against it. This is what lets a named, self-recursive lambda
/// call itself by `name`: the lambda's closure is the placeholder scope
/// itself, not a copy, so the patch is visible the moment the lambda is
/// actually invoked, however many bindings away that happens.
fn let_form(frame: Frame, rest: Vec<Value>) -> Result<Step, EvalError> {
    if rest.len() < 2 {
        return Err(EvalError::malformed_special_form("let", 3, rest.len() + 1));
    }
    let name = extract_name(&rest[0])?;
    let value_expr = rest[1].clone();
    let tail = sequence(&rest[2..]);
    let extended = frame.current_scope.extend_regular_placeholder(name);
    let frame = frame
        .with_pending(Pending::LetAwaitingValue {
            scope: extended.clone(),
            tail,
        })
        .with_scope(extended);
    Ok(Step::Continue(frame.create_child(value_expr)))
}

fn ignore(frame: Frame, rest: Vec<Value>) -> Result<Step, EvalError> {
    if rest.is_empty() {
        return Err(EvalError::malformed_special_form("ignore", 2, 1));
    }
    let discarded = rest[0].clone();
    let tail = sequence(&rest[1..]);
    let lambda_value = Value::Lambda(Rc::new(UserLambda::new(
        vec!["_ignored".to_string()],
        tail,
        frame.current_scope.clone(),
    )));
    let application = Value::SExpression(Rc::new(vec![lambda_value, discarded]));
    Ok(Step::Continue(frame.with_execution_state(application)))
}

/// Converts code to data: sExpressions become Lists, References become
/// QuotedNames, data-level literals pass through unchanged. Lambdas and
/// Scopes have no data representation.
fn quote_value(value: &Value) -> Result<Value, EvalError> {
    match value {
        Value::SExpression(items) => {
            let converted: Result<Vec<Value>, EvalError> = items.iter().map(quote_value).collect();
            Ok(Value::List(Rc::new(converted?)))
        }
        Value::Reference(name) => Ok(Value::QuotedName(name.clone())),
        Value::Number(_)
        | Value::Boolean(_)
        | Value::Char(_)
        | Value::List(_)
        | Value::QuotedName(_)
        | Value::Unit => Ok(value.clone()),
        other => Err(EvalError::CannotQuote(other.kind_name().to_string())),
    }
}

fn quote_form(frame: Frame, rest: Vec<Value>) -> Result<Step, EvalError> {
    if rest.is_empty() {
        return Err(EvalError::malformed_special_form("quote", 2, 1));
    }
    let quoted = quote_value(&rest[0])?;
    let result = if rest.len() == 1 {
        quoted
    } else {
        sequence(&rest[1..])
    };
    Ok(Step::Continue(frame.with_execution_state(result)))
}

fn list_form(frame: Frame, rest: Vec<Value>) -> Result<Step, EvalError> {
    if rest.is_empty() {
        return Err(EvalError::malformed_special_form("list", 2, 1));
    }
    let children: Vec<Value> = match &rest[0] {
        Value::SExpression(items) => (**items).clone(),
        Value::List(items) => (**items).clone(),
        other => {
            return Err(EvalError::kind_mismatch(
                "list payload",
                "sExpression",
                other.kind_name(),
            ))
        }
    };
    let application = if children.is_empty() {
        Value::List(Rc::new(Vec::new()))
    } else {
        let n = children.len();
        let collector: Rc<dyn Fn(&[Value]) -> Result<Value, EvalError>> =
            Rc::new(|args: &[Value]| Ok(Value::List(Rc::new(args.to_vec()))));
        let collector_lambda = Value::Lambda(Rc::new(SystemFunction::new("list", n, collector)));
        let mut call = vec![collector_lambda];
        call.extend(children);
        Value::SExpression(Rc::new(call))
    };
    let result = then_sequence(application, &rest[1..]);
    Ok(Step::Continue(frame.with_execution_state(result)))
}

fn path_value_to_string(value: &Value) -> Result<String, EvalError> {
    let segments = value
        .as_list()
        .ok_or_else(|| EvalError::kind_mismatch("import path", "List", value.kind_name()))?;
    let mut parts = Vec::with_capacity(segments.len());
    for segment in segments.iter() {
        let chars = segment.as_list().ok_or_else(|| {
            EvalError::kind_mismatch("import path segment", "List of Char", segment.kind_name())
        })?;
        parts.push(Value::string_from_chars(chars)?);
    }
    Ok(parts.join("."))
}

fn import_form(evaluator: &mut Evaluator, frame: Frame, rest: Vec<Value>) -> Result<Step, EvalError> {
    if rest.len() < 2 {
        return Err(EvalError::malformed_special_form("import", 3, rest.len() + 1));
    }
    let path_expr = rest[0].clone();
    let alias = extract_name(&rest[1])?;
    let tail = sequence(&rest[2..]);

    let importer = Rc::clone(&evaluator.importer);
    let resolver: Rc<dyn Fn(&[Value]) -> Result<Value, EvalError>> = Rc::new(move |args: &[Value]| {
        let path = path_value_to_string(&args[0])?;
        let value = importer.load(&path)?;
        importer.finish(&path);
        Ok(value)
    });
    let resolver_lambda = Value::Lambda(Rc::new(SystemFunction::new("import", 1, resolver)));
    let resolved = Value::SExpression(Rc::new(vec![resolver_lambda, path_expr]));

    let lambda_value = Value::Lambda(Rc::new(UserLambda::new(
        vec![alias],
        tail,
        frame.current_scope.clone(),
    )));
    let application = Value::SExpression(Rc::new(vec![lambda_value, resolved]));
    Ok(Step::Continue(frame.with_execution_state(application)))
}

fn cond(frame: Frame, rest: Vec<Value>) -> Result<Step, EvalError> {
    if rest.len() < 3 {
        return Err(EvalError::malformed_special_form("cond", 4, rest.len() + 1));
    }
    let test = rest[0].clone();
    let on_true = rest[1].clone();
    let remaining = rest[2..].to_vec();
    let frame = frame.with_pending(Pending::CondDecision { on_true, remaining });
    Ok(Step::Continue(frame.create_child(test)))
}

/// `pairs` must be a List of `[QuotedName, Lambda]` 2-element Lists.
pub fn parse_handler_pairs(pairs: &Value) -> Result<Vec<(String, Value)>, EvalError> {
    let items = pairs
        .as_list()
        .ok_or_else(|| EvalError::kind_mismatch("handler pairs", "List", pairs.kind_name()))?;
    items
        .iter()
        .map(|pair| {
            let entry = pair
                .as_list()
                .ok_or_else(|| EvalError::kind_mismatch("handler pair", "List", pair.kind_name()))?;
            if entry.len() != 2 {
                return Err(EvalError::kind_mismatch(
                    "handler pair",
                    "2-element List",
                    "List of a different length",
                ));
            }
            let name = match &entry[0] {
                Value::QuotedName(name) => name.clone(),
                other => {
                    return Err(EvalError::kind_mismatch(
                        "handler pair name",
                        "QuotedName",
                        other.kind_name(),
                    ))
                }
            };
            match &entry[1] {
                Value::Lambda(_) => Ok((name, entry[1].clone())),
                other => Err(EvalError::kind_mismatch(
                    "handler pair body",
                    "Lambda",
                    other.kind_name(),
                )),
            }
        })
        .collect()
}

fn handle(frame: Frame, rest: Vec<Value>) -> Result<Step, EvalError> {
    if rest.len() < 3 {
        return Err(EvalError::malformed_special_form("handle", 4, rest.len() + 1));
    }
    let code = rest[0].clone();
    let pairs_expr = rest[1].clone();
    let state_expr = rest[2].clone();
    let tail = rest[3..].to_vec();
    let frame = frame.with_pending(Pending::HandleAwaitingPairs {
        code,
        state_expr,
        rest: tail,
    });
    Ok(Step::Continue(frame.create_child(pairs_expr)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_of_no_items_is_unit() {
        assert!(matches!(sequence(&[]), Value::Unit));
    }

    #[test]
    fn sequence_of_one_item_is_that_item() {
        let v = sequence(&[Value::Number(1.0)]);
        assert!(matches!(v, Value::Number(n) if n == 1.0));
    }

    #[test]
    fn sequence_of_many_chains_through_ignore() {
        let v = sequence(&[Value::Number(1.0), Value::Number(2.0)]);
        match v {
            Value::SExpression(items) => {
                assert!(matches!(&items[0], Value::Reference(n) if n == "ignore"));
                assert_eq!(items.len(), 3);
            }
            _ => panic!("expected an sExpression"),
        }
    }

    #[test]
    fn quote_converts_sexpression_to_list_and_reference_to_quoted_name() {
        let code = Value::SExpression(Rc::new(vec![Value::Reference("x".to_string())]));
        let data = quote_value(&code).unwrap();
        match data {
            Value::List(items) => {
                assert!(matches!(&items[0], Value::QuotedName(n) if n == "x"));
            }
            _ => panic!("expected a List"),
        }
    }

    #[test]
    fn quote_rejects_lambdas() {
        use crate::lambda::UserLambda;
        use crate::scope::Scope;
        let file: Rc<dyn crate::import::Searchable> = Rc::new(crate::import::Folder::new("root"));
        let scope = Scope::root(file);
        let l = Value::Lambda(Rc::new(UserLambda::new(vec![], Value::Unit, scope)));
        assert!(matches!(quote_value(&l), Err(EvalError::CannotQuote(_))));
    }
}
