// ABOUTME: Host-provided primitives, wired into a root scope and handler frame

use std::cell::Cell;
use std::rc::Rc;

use log::debug;

use crate::error::EvalError;
use crate::frame::{HandlerFrame, SystemHandlerFrame};
use crate::lambda::{SystemFunction, UnfinishedHandlerInvocation};
use crate::scope::Scope;
use crate::value::Value;

fn as_number(v: &Value, context: &str) -> Result<f64, EvalError> {
    match v {
        Value::Number(n) => Ok(*n),
        other => Err(EvalError::kind_mismatch(context, "Number", other.kind_name())),
    }
}

fn as_list<'a>(v: &'a Value, context: &str) -> Result<&'a Rc<Vec<Value>>, EvalError> {
    v.as_list()
        .ok_or_else(|| EvalError::kind_mismatch(context, "List", v.kind_name()))
}

fn head(args: &[Value]) -> Result<Value, EvalError> {
    let items = as_list(&args[0], "head")?;
    items
        .first()
        .cloned()
        .ok_or_else(|| EvalError::kind_mismatch("head", "non-empty List", "empty List"))
}

fn tail(args: &[Value]) -> Result<Value, EvalError> {
    let items = as_list(&args[0], "tail")?;
    if items.is_empty() {
        return Err(EvalError::kind_mismatch("tail", "non-empty List", "empty List"));
    }
    Ok(Value::List(Rc::new(items[1..].to_vec())))
}

fn concat(args: &[Value]) -> Result<Value, EvalError> {
    let a = as_list(&args[0], "concat")?;
    let b = as_list(&args[1], "concat")?;
    let mut combined = (**a).clone();
    combined.extend(b.iter().cloned());
    Ok(Value::List(Rc::new(combined)))
}

fn equals(args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Boolean(args[0].structural_eq(&args[1])?))
}

fn sum(args: &[Value]) -> Result<Value, EvalError> {
    let a = as_number(&args[0], "sum")?;
    let b = as_number(&args[1], "sum")?;
    Ok(Value::Number(a + b))
}

fn continue_fn(args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::ContinueStop {
        is_continue: true,
        return_value: Box::new(args[0].clone()),
        new_state: Box::new(args[1].clone()),
    })
}

fn stop_fn(args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::ContinueStop {
        is_continue: false,
        return_value: Box::new(args[0].clone()),
        new_state: Box::new(args[1].clone()),
    })
}

fn declare_effectful_function(args: &[Value]) -> Result<Value, EvalError> {
    let name = match &args[0] {
        Value::QuotedName(name) => name.clone(),
        other => {
            return Err(EvalError::kind_mismatch(
                "declareEffectfulFunction",
                "QuotedName",
                other.kind_name(),
            ))
        }
    };
    let arity = as_number(&args[1], "declareEffectfulFunction")?;
    if arity < 1.0 || arity.trunc() != arity {
        return Err(EvalError::kind_mismatch(
            "declareEffectfulFunction arity",
            "integral Number >= 1",
            "non-integral or sub-1 Number",
        ));
    }
    Ok(Value::Lambda(Rc::new(UnfinishedHandlerInvocation::new(
        name,
        arity as usize,
    ))))
}

fn is_string(args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Boolean(args[0].is_string()))
}

/// Extends `scope` with every required primitive from the built-ins table,
/// and returns the root handler frame providing the two host-implemented
/// effects (`print`, `gensym`) so they resolve without any user `handle`.
pub fn install(scope: Scope) -> (Scope, Rc<HandlerFrame>) {
    let mut scope = scope;
    scope = bind_system(scope, "head", 1, Rc::new(head));
    scope = bind_system(scope, "tail", 1, Rc::new(tail));
    scope = bind_system(scope, "concat", 2, Rc::new(concat));
    scope = bind_system(scope, "equals", 2, Rc::new(equals));
    scope = bind_system(scope, "sum", 2, Rc::new(sum));
    scope = bind_system(scope, "continue", 2, Rc::new(continue_fn));
    scope = bind_system(scope, "stop", 2, Rc::new(stop_fn));
    scope = bind_system(
        scope,
        "declareEffectfulFunction",
        2,
        Rc::new(declare_effectful_function),
    );
    scope = bind_system(scope, "isString", 1, Rc::new(is_string));

    scope = scope.extend_regular(
        "print",
        Value::Lambda(Rc::new(UnfinishedHandlerInvocation::new("print", 1))),
    );
    scope = scope.extend_regular(
        "gensym",
        Value::Lambda(Rc::new(UnfinishedHandlerInvocation::new("gensym", 1))),
    );

    let gensym_counter = Rc::new(Cell::new(0usize));
    let gensym_handler: Rc<dyn Fn(&[Value]) -> Result<Value, EvalError>> = Rc::new(move |args| {
        let prefix = match &args[0] {
            Value::List(items) if args[0].is_string() => Value::string_from_chars(items.as_slice())?,
            other => other.kind_name().to_string(),
        };
        let n = gensym_counter.get();
        gensym_counter.set(n + 1);
        Ok(Value::QuotedName(format!("{prefix}#{n}")))
    });
    let print_handler: Rc<dyn Fn(&[Value]) -> Result<Value, EvalError>> = Rc::new(|args| {
        let text = match args[0].serialize() {
            Ok(s) => s,
            Err(_) => args[0].error_dump(),
        };
        debug!("print: {text}");
        println!("{text}");
        Ok(Value::Unit)
    });

    let root_handler = Rc::new(HandlerFrame::System(SystemHandlerFrame {
        handlers: vec![
            ("print".to_string(), print_handler),
            ("gensym".to_string(), gensym_handler),
        ],
    }));

    (scope, root_handler)
}

fn bind_system(
    scope: Scope,
    name: &str,
    arity: usize,
    func: Rc<dyn Fn(&[Value]) -> Result<Value, EvalError>>,
) -> Scope {
    scope.extend_regular(name, Value::Lambda(Rc::new(SystemFunction::new(name, arity, func))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::{Folder, Searchable};

    fn root_scope() -> Scope {
        let file: Rc<dyn Searchable> = Rc::new(Folder::new("root"));
        Scope::root(file)
    }

    #[test]
    fn head_and_tail_split_a_list() {
        let items = Value::List(Rc::new(vec![Value::Number(1.0), Value::Number(2.0)]));
        assert!(matches!(head(&[items.clone()]).unwrap(), Value::Number(n) if n == 1.0));
        match tail(&[items]).unwrap() {
            Value::List(rest) => assert_eq!(rest.len(), 1),
            _ => panic!("expected a List"),
        }
    }

    #[test]
    fn head_of_empty_list_is_fatal() {
        assert!(head(&[Value::List(Rc::new(Vec::new()))]).is_err());
    }

    #[test]
    fn sum_adds_two_numbers() {
        assert!(matches!(
            sum(&[Value::Number(2.0), Value::Number(3.0)]).unwrap(),
            Value::Number(n) if n == 5.0
        ));
    }

    #[test]
    fn declare_effectful_function_rejects_non_integral_arity() {
        assert!(declare_effectful_function(&[Value::QuotedName("ask".to_string()), Value::Number(1.5)]).is_err());
    }

    #[test]
    fn install_binds_every_required_primitive() {
        let (scope, handler) = install(root_scope());
        for name in [
            "head",
            "tail",
            "concat",
            "equals",
            "sum",
            "continue",
            "stop",
            "declareEffectfulFunction",
            "isString",
            "print",
            "gensym",
        ] {
            assert!(scope.get_regular(name).is_some(), "missing binding for {name}");
        }
        assert!(HandlerFrame::find(&Some(handler), "print").is_some());
    }
}
