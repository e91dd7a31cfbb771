// ABOUTME: Macro pre-pass: rewrites an LLQ tree until no macro invocations remain

use std::rc::Rc;

use crate::error::EvalError;
use crate::eval::Evaluator;
use crate::parser::llq_to_ast;
use crate::scope::{check_not_reserved, Scope};
use crate::value::Value;

/// Expands every macro invocation in `tree` against `scope`, returning an
/// LLQ tree (still Lists and QuotedNames) with no macro calls left. The
/// result is what `parser::llq_to_ast` then turns into executable code.
pub fn expand(evaluator: &mut Evaluator, tree: &Value, scope: &Scope) -> Result<Value, EvalError> {
    match tree {
        Value::QuotedName(name) => {
            if scope.get_macro(name).is_some() {
                return Err(EvalError::MalformedSpecialForm {
                    form: name.clone(),
                    required: 1,
                    actual: 0,
                });
            }
            Ok(tree.clone())
        }
        Value::List(items) if items.is_empty() => Ok(tree.clone()),
        Value::List(items) => expand_list(evaluator, items, scope),
        other => Ok(other.clone()),
    }
}

fn expand_list(
    evaluator: &mut Evaluator,
    items: &Rc<Vec<Value>>,
    scope: &Scope,
) -> Result<Value, EvalError> {
    let head_name = match items.first() {
        Some(Value::QuotedName(name)) => Some(name.clone()),
        _ => None,
    };

    if let Some(name) = &head_name {
        if scope.get_macro(name).is_some() {
            let macro_lambda = scope.get_macro(name).unwrap();
            let tail = items[1..].to_vec();
            let expanded = invoke_macro(evaluator, macro_lambda, scope, tail)?;
            return expand(evaluator, &expanded, scope);
        }
        if scope.get_regular(name).is_some() {
            return expand_children(evaluator, items, scope);
        }
        match name.as_str() {
            "let" => return expand_let(evaluator, items, scope),
            "macro" => return expand_macro_definition(evaluator, items, scope).map(|(value, _)| value),
            "quote" => return Ok(Value::List(Rc::clone(items))),
            _ => return expand_children(evaluator, items, scope),
        }
    }

    expand_children(evaluator, items, scope)
}

fn expand_children(
    evaluator: &mut Evaluator,
    items: &Rc<Vec<Value>>,
    scope: &Scope,
) -> Result<Value, EvalError> {
    let expanded: Result<Vec<Value>, EvalError> =
        items.iter().map(|item| expand(evaluator, item, scope)).collect();
    Ok(Value::List(Rc::new(expanded?)))
}

/// Binds the macro's UserLambda to `(callingScope, List(remainingSiblings))`
/// and evaluates it; its result must be a List, which replaces the whole
/// invocation site.
fn invoke_macro(
    evaluator: &mut Evaluator,
    macro_lambda: Value,
    scope: &Scope,
    tail: Vec<Value>,
) -> Result<Value, EvalError> {
    let calling_scope = Value::Scope(scope.clone());
    let input = Value::List(Rc::new(tail));
    let call = Value::SExpression(Rc::new(vec![macro_lambda, calling_scope, input]));
    let result = evaluator.eval(call, scope.clone())?;
    match result {
        Value::List(_) => Ok(result),
        other => Err(EvalError::kind_mismatch(
            "macro expansion result",
            "List",
            other.kind_name(),
        )),
    }
}

/// `(let name value rest...)`: the bound value is actually evaluated here
/// (not just demacroed) so that later macro invocations in `rest` can read
/// it back out of `callingScope`; the reconstructed `let` form still carries
/// its own (demacroed) value expression, to be evaluated again for real at
/// runtime.
fn expand_let(evaluator: &mut Evaluator, items: &Rc<Vec<Value>>, scope: &Scope) -> Result<Value, EvalError> {
    if items.len() < 3 {
        return Err(EvalError::malformed_special_form("let", 3, items.len()));
    }
    let name = match &items[1] {
        Value::QuotedName(n) => n.clone(),
        other => return Err(EvalError::kind_mismatch("let binding name", "QuotedName", other.kind_name())),
    };
    check_not_reserved(&name)?;
    let value_expr = expand(evaluator, &items[2], scope)?;
    let evaluated = evaluator.eval(llq_to_ast(&value_expr), scope.clone())?;
    let extended = scope.extend_regular(name.clone(), evaluated);

    let mut rewritten = vec![items[0].clone(), items[1].clone(), value_expr];
    for rest_item in &items[3..] {
        rewritten.push(expand(evaluator, rest_item, &extended)?);
    }
    Ok(Value::List(Rc::new(rewritten)))
}

/// Builds an LLQ-level equivalent of `special_forms::sequence`: nested
/// `ignore` calls chaining through `items`, discarding every result but the
/// last. A demacro step sometimes needs to replace a whole form with "run
/// these, keep the last" but can only emit Lists/QuotedNames, not the AST
/// nodes `special_forms::sequence` builds.
fn llq_sequence(items: &[Value]) -> Value {
    match items {
        [] => Value::Unit,
        [only] => only.clone(),
        [first, rest @ ..] => Value::List(Rc::new(vec![
            Value::QuotedName("ignore".to_string()),
            first.clone(),
            llq_sequence(rest),
        ])),
    }
}

/// `(macro name callingScopeArg inputArg body rest...)`: the body is
/// demacroed first (its own nested macro calls are expanded in the
/// definition-time scope), bound as a UserLambda, and registered as a macro
/// binding so later siblings can invoke it. The macro's body is only ever
/// evaluated when the macro is invoked, never at the definition site, so
/// unlike `let` the whole form is replaced by whatever `rest` evaluates to
/// (`unit` if there is none) — the `macro` keyword and body never reach
/// evaluation. Returns the scope extended with the new binding so a caller
/// sequencing further siblings (in the same List, or further top-level
/// forms) can see it.
fn expand_macro_definition(
    evaluator: &mut Evaluator,
    items: &Rc<Vec<Value>>,
    scope: &Scope,
) -> Result<(Value, Scope), EvalError> {
    if items.len() < 5 {
        return Err(EvalError::malformed_special_form("macro", 5, items.len()));
    }
    let name = match &items[1] {
        Value::QuotedName(n) => n.clone(),
        other => return Err(EvalError::kind_mismatch("macro name", "QuotedName", other.kind_name())),
    };
    check_not_reserved(&name)?;
    let calling_scope_arg = match &items[2] {
        Value::QuotedName(n) => n.clone(),
        other => {
            return Err(EvalError::kind_mismatch(
                "macro calling-scope parameter",
                "QuotedName",
                other.kind_name(),
            ))
        }
    };
    check_not_reserved(&calling_scope_arg)?;
    let input_arg = match &items[3] {
        Value::QuotedName(n) => n.clone(),
        other => return Err(EvalError::kind_mismatch("macro input parameter", "QuotedName", other.kind_name())),
    };
    check_not_reserved(&input_arg)?;
    let body = expand(evaluator, &items[4], scope)?;
    let body_ast = llq_to_ast(&body);

    let macro_lambda = Value::Lambda(Rc::new(crate::lambda::UserLambda::new(
        vec![calling_scope_arg, input_arg],
        body_ast,
        scope.clone(),
    )));
    let extended = scope.extend_macro(name, macro_lambda);

    let expanded_rest: Result<Vec<Value>, EvalError> = items[5..]
        .iter()
        .map(|item| expand(evaluator, item, &extended))
        .collect();
    Ok((llq_sequence(&expanded_rest?), extended))
}

/// Expands one top-level form, additionally returning the scope later
/// top-level forms should see. Only a top-level macro definition changes
/// it — the program as a whole is the sibling list its own trailing
/// expressions would otherwise be embedded in, so a macro bound by an
/// earlier form must stay visible to every later one.
fn expand_top_level(
    evaluator: &mut Evaluator,
    form: &Value,
    scope: &Scope,
) -> Result<(Value, Scope), EvalError> {
    if let Value::List(items) = form {
        if let Some(Value::QuotedName(name)) = items.first() {
            if name == "macro" && scope.get_macro(name).is_none() && scope.get_regular(name).is_none() {
                return expand_macro_definition(evaluator, items, scope);
            }
        }
    }
    Ok((expand(evaluator, form, scope)?, scope.clone()))
}

/// Expands every top-level form of a program in order, threading scope so
/// macro definitions made by one form are visible to every form after it.
pub fn expand_program(
    evaluator: &mut Evaluator,
    forms: &[Value],
    scope: &Scope,
) -> Result<Vec<Value>, EvalError> {
    let mut out = Vec::with_capacity(forms.len());
    let mut current_scope = scope.clone();
    for form in forms {
        let (expanded, next_scope) = expand_top_level(evaluator, form, &current_scope)?;
        out.push(expanded);
        current_scope = next_scope;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::{Folder, Searchable};
    use crate::parser::parse_one;

    fn root_scope() -> Scope {
        let file: Rc<dyn Searchable> = Rc::new(Folder::new("root"));
        Scope::root(file)
    }

    fn evaluator() -> Evaluator {
        let file: Rc<dyn Searchable> = Rc::new(Folder::new("root"));
        Evaluator::new(Rc::new(crate::import::Importer::new(file)))
    }

    #[test]
    fn expanding_is_a_no_op_on_macro_free_code() {
        let mut ev = evaluator();
        let scope = root_scope();
        let tree = parse_one("[ sum 1 2 ]").unwrap();
        let expanded = expand(&mut ev, &tree, &scope).unwrap();
        match expanded {
            Value::List(items) => assert_eq!(items.len(), 3),
            _ => panic!("expected a list"),
        }
    }

    #[test]
    fn expanding_twice_is_idempotent_on_macro_free_code() {
        let mut ev = evaluator();
        let scope = root_scope();
        let tree = parse_one("[ quote [ a b c ] ]").unwrap();
        let once = expand(&mut ev, &tree, &scope).unwrap();
        let twice = expand(&mut ev, &once, &scope).unwrap();
        match (once, twice) {
            (Value::List(a), Value::List(b)) => assert_eq!(a.len(), b.len()),
            _ => panic!("expected lists"),
        }
    }

    #[test]
    fn macro_definition_never_appears_headed_by_macro_in_its_own_expansion() {
        let mut ev = evaluator();
        let scope = root_scope();
        let tree = parse_one("[ macro id cs inp [ head inp ] ]").unwrap();
        let expanded = expand(&mut ev, &tree, &scope).unwrap();
        assert!(!matches!(&expanded, Value::List(items) if matches!(items.first(), Some(Value::QuotedName(n)) if n == "macro")));
    }

    #[test]
    fn macro_bound_by_one_top_level_form_is_visible_to_a_later_one() {
        let mut ev = evaluator();
        let scope = root_scope();
        let forms = vec![
            parse_one("[ macro id cs inp [ head inp ] ]").unwrap(),
            parse_one("[ id [ sum 1 2 ] ]").unwrap(),
        ];
        let expanded = expand_program(&mut ev, &forms, &scope).unwrap();
        assert_eq!(expanded.len(), 2);
        match &expanded[1] {
            Value::List(items) => {
                assert!(matches!(&items[0], Value::QuotedName(n) if n == "sum"));
            }
            other => panic!("expected the macro invocation to expand to its body, got {other:?}"),
        }
    }

    #[test]
    fn quote_payload_is_left_unexpanded() {
        let mut ev = evaluator();
        let scope = root_scope();
        let tree = parse_one("[ quote [ anyMacroLikeName 1 2 ] ]").unwrap();
        let expanded = expand(&mut ev, &tree, &scope).unwrap();
        match expanded {
            Value::List(items) => {
                assert!(matches!(&items[0], Value::QuotedName(n) if n == "quote"));
            }
            _ => panic!("expected a list"),
        }
    }
}
