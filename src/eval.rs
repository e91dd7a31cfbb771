// ABOUTME: The trampolined evaluator loop: special forms, application, effects

use std::rc::Rc;

use crate::error::EvalError;
use crate::frame::{Frame, HandlerFrame, HandlerStateRegistry, Pending, UserHandlerFrame};
use crate::import::Importer;
use crate::lambda::LambdaValue;
use crate::scope::Scope;
use crate::special_forms;
use crate::value::Value;

/// One trampoline step: either there's more to do (`Continue`, with the next
/// frame to run) or evaluation has produced a final value (`Done`).
pub enum Step {
    Continue(Frame),
    Done(Value),
}

/// Everything an evaluation needs beyond the expression and scope: the
/// mutable state cells `handle` blocks allocate, and the resolver for
/// `import`. Constructed once per program/session and threaded through
/// every call to `eval`.
pub struct Evaluator {
    pub handler_states: HandlerStateRegistry,
    pub importer: Rc<Importer>,
}

impl Evaluator {
    pub fn new(importer: Rc<Importer>) -> Evaluator {
        Evaluator {
            handler_states: HandlerStateRegistry::new(),
            importer,
        }
    }

    /// Runs `expression` to completion, looping over `step` rather than
    /// recursing, so tail-recursive user code does not grow the native
    /// Rust stack no matter how many evaluation steps it takes.
    pub fn eval(&mut self, expression: Value, scope: Scope) -> Result<Value, EvalError> {
        self.eval_in(expression, scope, None)
    }

    /// As `eval`, but seeded with a handler chain already active — how the
    /// host installs its `print`/`gensym` handlers at the base of every
    /// top-level evaluation.
    pub fn eval_in(
        &mut self,
        expression: Value,
        scope: Scope,
        closest_handler_frame: Option<Rc<HandlerFrame>>,
    ) -> Result<Value, EvalError> {
        let mut frame = Frame::new(expression, scope).with_closest_handler_frame(closest_handler_frame);
        loop {
            match self.step(frame)? {
                Step::Continue(next) => frame = next,
                Step::Done(value) => return Ok(value),
            }
        }
    }

    fn step(&mut self, mut frame: Frame) -> Result<Step, EvalError> {
        if let Some(pending) = frame.pending.take() {
            let child_value = frame.child_return_value.take().ok_or_else(|| {
                EvalError::Internal("pending special form resumed with no child result".to_string())
            })?;
            return self.resume_pending(frame, pending, child_value);
        }

        match frame.execution_state.clone() {
            Value::SExpression(items) => self.step_sexpression(frame, items),
            Value::HandleBranchPoint {
                handler_id,
                continue_branch,
            } => self.resolve_branch_point(frame, handler_id, continue_branch),
            state if state.needs_evaluation() => self.dereference(frame, state),
            state => Ok(complete(frame, state)),
        }
    }

    fn step_sexpression(&mut self, mut frame: Frame, items: Rc<Vec<Value>>) -> Result<Step, EvalError> {
        let mut items: Vec<Value> = (*items).clone();

        // A resume: the previous step spawned a child to evaluate one slot,
        // parked behind a StackReturnValue placeholder. Splice its result in.
        if let Some(child_value) = frame.child_return_value.take() {
            let slot = items
                .iter()
                .position(|v| matches!(v, Value::StackReturnValue))
                .ok_or_else(|| {
                    EvalError::Internal("sExpression resumed with no pending slot".to_string())
                })?;
            items[slot] = child_value;
        }

        if items.is_empty() {
            return Err(EvalError::EmptySExpression);
        }
        if items.len() == 1 {
            return Ok(Step::Continue(frame.with_execution_state(items.into_iter().next().unwrap())));
        }

        // Special forms are recognized only at the head, and only when the
        // name isn't locally shadowed by a regular or macro binding — this
        // lets user code shadow a keyword like `list` if it chooses to.
        if let Value::Reference(name) = &items[0] {
            let shadowed = frame.current_scope.get_regular(name).is_some()
                || frame.current_scope.get_macro(name).is_some();
            if !shadowed && special_forms::is_special_form(name) {
                let name = name.clone();
                let rest = items[1..].to_vec();
                return special_forms::dispatch(self, &name, frame, rest);
            }
        }

        for index in 0..items.len() {
            match &items[index] {
                Value::Reference(name) => {
                    let resolved = if name == "currentScope" {
                        Value::Scope(frame.current_scope.clone())
                    } else if let Some(value) = frame.current_scope.get_regular(name) {
                        value
                    } else if frame.current_scope.get_macro(name).is_some() {
                        return Err(EvalError::MacroReferenceAtRuntime(name.clone()));
                    } else {
                        return Err(EvalError::UndefinedReference(name.clone()));
                    };
                    items[index] = resolved;
                }
                Value::SExpression(_) => {
                    let pending = items[index].clone();
                    items[index] = Value::StackReturnValue;
                    frame.execution_state = Value::SExpression(Rc::new(items));
                    return Ok(Step::Continue(frame.create_child(pending)));
                }
                _ => {}
            }
        }

        match items[0].clone() {
            Value::Lambda(lambda) => self.apply_lambda(frame, items, lambda),
            other => Err(EvalError::NotApplicable(other.kind_name().to_string())),
        }
    }

    /// Applies one argument at a time, letting a single sExpression apply a
    /// curried lambda across more arguments than its own arity in one go
    /// (`((lambda (x) (lambda (y) ...)) 3 4)`).
    fn apply_lambda(
        &mut self,
        mut frame: Frame,
        items: Vec<Value>,
        lambda: Rc<dyn LambdaValue>,
    ) -> Result<Step, EvalError> {
        let arg = items[1].clone();
        let bound = lambda.bind(arg)?;
        let bound_lambda = match &bound {
            Value::Lambda(l) => Rc::clone(l),
            _ => {
                return Err(EvalError::Internal(
                    "lambda binding did not produce a Lambda value".to_string(),
                ))
            }
        };
        let trailing = &items[2..];

        if !bound_lambda.can_run() {
            let mut new_items = vec![bound];
            new_items.extend(trailing.iter().cloned());
            let collapsed = if new_items.len() == 1 {
                new_items.into_iter().next().unwrap()
            } else {
                Value::SExpression(Rc::new(new_items))
            };
            frame.execution_state = collapsed;
            return Ok(Step::Continue(frame));
        }

        // Mark the calling frame's own slot with a placeholder before
        // handing it to create_evaluation_frame as the new parent, so that
        // when the callee later completes, this frame resumes with the
        // result substituted in rather than re-seeing the stale application.
        if trailing.is_empty() {
            frame.execution_state = Value::StackReturnValue;
        } else {
            let mut remaining = vec![Value::StackReturnValue];
            remaining.extend(trailing.iter().cloned());
            frame.execution_state = Value::SExpression(Rc::new(remaining));
        }

        let body_frame = bound_lambda.create_evaluation_frame(frame, &self.handler_states)?;
        Ok(Step::Continue(body_frame))
    }

    /// Substitutes a resolved child value into a top-level placeholder
    /// execution state (as opposed to one nested inside an sExpression,
    /// which `step_sexpression` handles directly).
    fn dereference(&mut self, mut frame: Frame, state: Value) -> Result<Step, EvalError> {
        match state {
            Value::Reference(name) => {
                let resolved = if name == "currentScope" {
                    Value::Scope(frame.current_scope.clone())
                } else if let Some(value) = frame.current_scope.get_regular(&name) {
                    value
                } else if frame.current_scope.get_macro(&name).is_some() {
                    return Err(EvalError::MacroReferenceAtRuntime(name));
                } else {
                    return Err(EvalError::UndefinedReference(name));
                };
                frame.execution_state = resolved;
                Ok(Step::Continue(frame))
            }
            Value::StackReturnValue | Value::HandleReturnValue(_) => {
                let child_value = frame.child_return_value.take().ok_or_else(|| {
                    EvalError::Internal("placeholder dereferenced with no child result".to_string())
                })?;
                frame.execution_state = child_value;
                Ok(Step::Continue(frame))
            }
            other => Err(EvalError::Internal(format!(
                "dereference called on a value that does not need it: {}",
                other.kind_name()
            ))),
        }
    }

    fn resume_pending(
        &mut self,
        frame: Frame,
        pending: Pending,
        child_value: Value,
    ) -> Result<Step, EvalError> {
        match pending {
            Pending::CondDecision { on_true, remaining } => {
                resume_cond(frame, on_true, remaining, child_value)
            }
            Pending::HandleAwaitingPairs {
                code,
                state_expr,
                rest,
            } => {
                let frame = frame.with_pending(Pending::HandleAwaitingState {
                    code,
                    pairs: child_value,
                    rest,
                });
                Ok(Step::Continue(frame.create_child(state_expr)))
            }
            Pending::HandleAwaitingState { code, pairs, rest } => {
                self.begin_handle(frame, code, pairs, child_value, rest)
            }
            Pending::HandleResolved { handler_id, rest } => {
                self.handler_states.pop(handler_id)?;
                if rest.is_empty() {
                    Ok(complete(frame, child_value))
                } else {
                    let frame = frame.with_execution_state(special_forms::sequence(&rest));
                    Ok(Step::Continue(frame))
                }
            }
            Pending::LetAwaitingValue { scope, tail } => {
                scope.resolve_placeholder(child_value);
                let frame = frame.with_scope(scope).with_execution_state(tail);
                Ok(Step::Continue(frame))
            }
        }
    }

    fn begin_handle(
        &mut self,
        frame: Frame,
        code: Value,
        pairs: Value,
        initial_state: Value,
        rest: Vec<Value>,
    ) -> Result<Step, EvalError> {
        let handlers = special_forms::parse_handler_pairs(&pairs)?;
        let handler_id = self.handler_states.push(initial_state);
        let outer_chain = frame.closest_handler_frame.clone();
        let scope = frame.current_scope.clone();

        // The execution_state here is never read by step() (pending is
        // checked first and always present), but carries the same
        // placeholder tag the spec describes, so a stack-trace dump of a
        // frame still waiting on its handle block reads as `<handle-return-
        // value #n>` rather than the stale pre-handle expression.
        let waiting_frame = frame
            .with_execution_state(Value::HandleReturnValue(handler_id))
            .with_pending(Pending::HandleResolved { handler_id, rest });

        let branch_point = Rc::new(
            Frame::new(
                Value::HandleBranchPoint {
                    handler_id,
                    continue_branch: None,
                },
                scope.clone(),
            )
            .with_closest_handler_frame(outer_chain.clone())
            .also_parent(waiting_frame),
        );

        let user_handler_frame = Rc::new(HandlerFrame::User(UserHandlerFrame {
            handler_id,
            branch_point_frame: Rc::clone(&branch_point),
            parent: outer_chain,
            handlers,
        }));

        let code_frame = Frame {
            execution_state: code,
            parent: Some(branch_point),
            current_scope: scope,
            closest_handler_frame: Some(user_handler_frame),
            child_return_value: None,
            pending: None,
        };
        Ok(Step::Continue(code_frame))
    }

    /// Resolves a `HandleBranchPoint` once its child has a return value: a
    /// `continue`/`stop` from the handler body the operation dispatched
    /// into, or (only on the original, never-cloned branch point) the
    /// handled code's own natural completion without ever invoking the
    /// effect.
    fn resolve_branch_point(
        &mut self,
        mut frame: Frame,
        handler_id: usize,
        continue_branch: Option<Rc<Frame>>,
    ) -> Result<Step, EvalError> {
        let child_value = frame.child_return_value.take().ok_or_else(|| {
            EvalError::Internal("branch point resolved with no child result".to_string())
        })?;

        match child_value {
            Value::ContinueStop {
                is_continue,
                return_value,
                new_state,
            } => {
                self.handler_states.set(handler_id, *new_state)?;
                if is_continue {
                    let continue_branch = continue_branch.ok_or_else(|| {
                        EvalError::Internal("continue with no saved call site to resume".to_string())
                    })?;
                    let resumed = Rc::try_unwrap(continue_branch).unwrap_or_else(|rc| (*rc).clone());
                    let resumed = resumed.with_child_return_value(*return_value);
                    Ok(Step::Continue(resumed))
                } else {
                    let state = self.handler_states.get(handler_id)?.clone();
                    let result = Value::List(Rc::new(vec![*return_value, state]));
                    Ok(unwind(frame, result))
                }
            }
            other => {
                let state = self.handler_states.get(handler_id)?.clone();
                let result = Value::List(Rc::new(vec![other, state]));
                Ok(unwind(frame, result))
            }
        }
    }
}

fn resume_cond(
    frame: Frame,
    on_true: Value,
    remaining: Vec<Value>,
    test_value: Value,
) -> Result<Step, EvalError> {
    let truthy = match test_value {
        Value::Boolean(b) => b,
        other => {
            return Err(EvalError::kind_mismatch(
                "cond test",
                "Boolean",
                other.kind_name(),
            ))
        }
    };
    if truthy {
        return Ok(Step::Continue(frame.with_execution_state(on_true)));
    }
    if remaining.is_empty() {
        return Err(EvalError::malformed_special_form("cond", 4, 2));
    }
    let f_branch = remaining[0].clone();
    let more = &remaining[1..];
    if more.is_empty() {
        return Ok(Step::Continue(frame.with_execution_state(f_branch)));
    }
    if more.len() == 1 {
        return Err(EvalError::malformed_special_form("cond", 4, remaining.len() + 2));
    }
    let next_test = more[0].clone();
    let next_on_true = more[1].clone();
    let next_remaining = more[2..].to_vec();
    let frame = frame.with_pending(Pending::CondDecision {
        on_true: next_on_true,
        remaining: next_remaining,
    });
    Ok(Step::Continue(frame.create_child(next_test)))
}

fn complete(frame: Frame, value: Value) -> Step {
    unwind(frame, value)
}

fn unwind(frame: Frame, value: Value) -> Step {
    match frame.return_to_parent(value.clone()) {
        Some(parent) => Step::Continue(parent),
        None => Step::Done(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::{Folder, Searchable};
    use crate::lambda::{SystemFunction, UserLambda};

    fn root_scope() -> Scope {
        let file: Rc<dyn Searchable> = Rc::new(Folder::new("root"));
        Scope::root(file)
    }

    fn evaluator() -> Evaluator {
        let file: Rc<dyn Searchable> = Rc::new(Folder::new("root"));
        Evaluator::new(Rc::new(Importer::new(file)))
    }

    #[test]
    fn evaluates_a_literal_to_itself() {
        let mut ev = evaluator();
        let result = ev.eval(Value::Number(42.0), root_scope()).unwrap();
        assert!(matches!(result, Value::Number(n) if n == 42.0));
    }

    #[test]
    fn applies_a_lambda_to_an_argument() {
        let mut ev = evaluator();
        let scope = root_scope();
        let lambda = Value::Lambda(Rc::new(UserLambda::new(
            vec!["x".to_string()],
            Value::Reference("x".to_string()),
            scope.clone(),
        )));
        let expr = Value::SExpression(Rc::new(vec![lambda, Value::Number(7.0)]));
        let result = ev.eval(expr, scope).unwrap();
        assert!(matches!(result, Value::Number(n) if n == 7.0));
    }

    #[test]
    fn curries_a_multi_arg_lambda_across_one_sexpression() {
        let mut ev = evaluator();
        let scope = root_scope();
        let sum: Rc<dyn Fn(&[Value]) -> Result<Value, EvalError>> = Rc::new(|args: &[Value]| {
            let a = match &args[0] {
                Value::Number(n) => *n,
                _ => unreachable!(),
            };
            let b = match &args[1] {
                Value::Number(n) => *n,
                _ => unreachable!(),
            };
            Ok(Value::Number(a + b))
        });
        let body = Value::SExpression(Rc::new(vec![
            Value::Lambda(Rc::new(SystemFunction::new("sum", 2, sum))),
            Value::Reference("x".to_string()),
            Value::Reference("y".to_string()),
        ]));
        let inner = Value::Lambda(Rc::new(UserLambda::new(vec!["y".to_string()], body, scope.clone())));
        let outer = Value::Lambda(Rc::new(UserLambda::new(
            vec!["x".to_string()],
            inner,
            scope.clone(),
        )));
        let expr = Value::SExpression(Rc::new(vec![outer, Value::Number(3.0), Value::Number(4.0)]));
        let result = ev.eval(expr, scope).unwrap();
        assert!(matches!(result, Value::Number(n) if n == 7.0));
    }

    #[test]
    fn cond_picks_the_true_branch_without_evaluating_the_false_one() {
        let mut ev = evaluator();
        let scope = root_scope();
        let expr = Value::SExpression(Rc::new(vec![
            Value::Reference("cond".to_string()),
            Value::Boolean(true),
            Value::Number(1.0),
            Value::Reference("undefined_blows_up".to_string()),
        ]));
        let result = ev.eval(expr, scope).unwrap();
        assert!(matches!(result, Value::Number(n) if n == 1.0));
    }

    #[test]
    fn deeply_nested_ignore_chains_do_not_grow_the_call_stack() {
        let mut ev = evaluator();
        let scope = root_scope();
        let mut code = Value::Number(0.0);
        for _ in 0..2000 {
            code = Value::SExpression(Rc::new(vec![
                Value::Reference("ignore".to_string()),
                Value::Number(1.0),
                code,
            ]));
        }
        let result = ev.eval(code, scope).unwrap();
        assert!(matches!(result, Value::Number(n) if n == 0.0));
    }
}
