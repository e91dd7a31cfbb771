// ABOUTME: Callable values: user lambdas, host-provided functions, effect operations

use std::rc::Rc;

use crate::error::EvalError;
use crate::frame::{Frame, HandlerFrame, HandlerStateRegistry, UserHandlerFrame};
use crate::scope::Scope;
use crate::value::Value;

/// Everything that can sit behind `Value::Lambda`. All three implementors
/// are curried: `bind` accepts one argument at a time and `can_run` reports
/// when enough have accumulated to actually evaluate.
pub trait LambdaValue {
    fn bind(&self, arg: Value) -> Result<Value, EvalError>;
    fn can_run(&self) -> bool;
    fn arity(&self) -> usize;

    /// Produces the frame that evaluates this call. Takes the calling frame
    /// by value so it can be threaded into the new frame as its parent (the
    /// ordinary case) or captured as a suspended continuation (the effect
    /// case, when an operation call has to pause for its handler to run).
    fn create_evaluation_frame(
        &self,
        calling_frame: Frame,
        handler_states: &HandlerStateRegistry,
    ) -> Result<Frame, EvalError>;

    fn describe(&self) -> String;
}

/// A lambda closed over the scope it was defined in.
pub struct UserLambda {
    pub params: Vec<String>,
    pub body: Value,
    pub closure: Scope,
    pub bound_args: Vec<Value>,
    pub name: Option<String>,
}

impl UserLambda {
    pub fn new(params: Vec<String>, body: Value, closure: Scope) -> UserLambda {
        UserLambda {
            params,
            body,
            closure,
            bound_args: Vec::new(),
            name: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> UserLambda {
        self.name = Some(name.into());
        self
    }
}

impl LambdaValue for UserLambda {
    fn bind(&self, arg: Value) -> Result<Value, EvalError> {
        if self.bound_args.len() >= self.params.len() {
            return Err(EvalError::arity_error(
                self.name.as_deref().unwrap_or("lambda"),
                self.params.len().to_string(),
                self.bound_args.len() + 1,
            ));
        }
        let mut bound_args = self.bound_args.clone();
        bound_args.push(arg);
        Ok(Value::Lambda(Rc::new(UserLambda {
            params: self.params.clone(),
            body: self.body.clone(),
            closure: self.closure.clone(),
            bound_args,
            name: self.name.clone(),
        })))
    }

    fn can_run(&self) -> bool {
        self.bound_args.len() == self.params.len()
    }

    fn arity(&self) -> usize {
        self.params.len()
    }

    fn create_evaluation_frame(
        &self,
        calling_frame: Frame,
        _handler_states: &HandlerStateRegistry,
    ) -> Result<Frame, EvalError> {
        let mut scope = self.closure.clone();
        for (name, value) in self.params.iter().zip(self.bound_args.iter()) {
            scope = scope.extend_regular(name.clone(), value.clone());
        }
        // The closure carries its lexical scope but not its definition-time
        // handler chain: effects raised in the body resolve through the
        // caller's dynamic chain, not the one active where the lambda was built.
        let closest_handler_frame = calling_frame.closest_handler_frame.clone();
        Ok(Frame::new(self.body.clone(), scope)
            .with_closest_handler_frame(closest_handler_frame)
            .also_parent(calling_frame))
    }

    fn describe(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("anonymous/{}", self.params.len()),
        }
    }
}

/// A host-provided primitive. Its body is a plain Rust closure rather than
/// an s-expression, so `create_evaluation_frame` runs it to completion
/// immediately and wraps the result as an already-evaluated frame.
pub struct SystemFunction {
    pub name: String,
    pub func: Rc<dyn Fn(&[Value]) -> Result<Value, EvalError>>,
    pub declared_arity: usize,
    pub bound_args: Vec<Value>,
}

impl SystemFunction {
    pub fn new(
        name: impl Into<String>,
        declared_arity: usize,
        func: Rc<dyn Fn(&[Value]) -> Result<Value, EvalError>>,
    ) -> SystemFunction {
        SystemFunction {
            name: name.into(),
            func,
            declared_arity,
            bound_args: Vec::new(),
        }
    }
}

impl LambdaValue for SystemFunction {
    fn bind(&self, arg: Value) -> Result<Value, EvalError> {
        if self.bound_args.len() >= self.declared_arity {
            return Err(EvalError::arity_error(
                &self.name,
                self.declared_arity.to_string(),
                self.bound_args.len() + 1,
            ));
        }
        let mut bound_args = self.bound_args.clone();
        bound_args.push(arg);
        Ok(Value::Lambda(Rc::new(SystemFunction {
            name: self.name.clone(),
            func: Rc::clone(&self.func),
            declared_arity: self.declared_arity,
            bound_args,
        })))
    }

    fn can_run(&self) -> bool {
        self.bound_args.len() == self.declared_arity
    }

    fn arity(&self) -> usize {
        self.declared_arity
    }

    fn create_evaluation_frame(
        &self,
        calling_frame: Frame,
        _handler_states: &HandlerStateRegistry,
    ) -> Result<Frame, EvalError> {
        let result = (self.func)(&self.bound_args)?;
        let scope = calling_frame.current_scope.clone();
        let closest_handler_frame = calling_frame.closest_handler_frame.clone();
        Ok(Frame::new(result, scope)
            .with_closest_handler_frame(closest_handler_frame)
            .also_parent(calling_frame))
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// An effect operation mid-invocation: accumulating arguments until its
/// declared arity is reached, at which point invoking it means dispatching
/// to the nearest enclosing handler bound to `effect_name`.
pub struct UnfinishedHandlerInvocation {
    pub effect_name: String,
    pub declared_arity: usize,
    pub bound_args: Vec<Value>,
}

impl UnfinishedHandlerInvocation {
    pub fn new(effect_name: impl Into<String>, declared_arity: usize) -> UnfinishedHandlerInvocation {
        UnfinishedHandlerInvocation {
            effect_name: effect_name.into(),
            declared_arity,
            bound_args: Vec::new(),
        }
    }
}

impl LambdaValue for UnfinishedHandlerInvocation {
    fn bind(&self, arg: Value) -> Result<Value, EvalError> {
        if self.bound_args.len() >= self.declared_arity {
            return Err(EvalError::arity_error(
                &self.effect_name,
                self.declared_arity.to_string(),
                self.bound_args.len() + 1,
            ));
        }
        let mut bound_args = self.bound_args.clone();
        bound_args.push(arg);
        Ok(Value::Lambda(Rc::new(UnfinishedHandlerInvocation {
            effect_name: self.effect_name.clone(),
            declared_arity: self.declared_arity,
            bound_args,
        })))
    }

    fn can_run(&self) -> bool {
        self.bound_args.len() == self.declared_arity
    }

    fn arity(&self) -> usize {
        self.declared_arity
    }

    fn create_evaluation_frame(
        &self,
        calling_frame: Frame,
        handler_states: &HandlerStateRegistry,
    ) -> Result<Frame, EvalError> {
        let found = HandlerFrame::find(&calling_frame.closest_handler_frame, &self.effect_name)
            .ok_or_else(|| EvalError::HandlerNotFound(self.effect_name.clone()))?;

        if let HandlerFrame::System(system) = found.as_ref() {
            let host_fn = system
                .handlers
                .iter()
                .find(|(name, _)| name == &self.effect_name)
                .map(|(_, f)| Rc::clone(f))
                .ok_or_else(|| EvalError::HandlerNotFound(self.effect_name.clone()))?;
            let result = host_fn(&self.bound_args)?;
            let scope = calling_frame.current_scope.clone();
            let closest_handler_frame = calling_frame.closest_handler_frame.clone();
            return Ok(Frame::new(result, scope)
                .with_closest_handler_frame(closest_handler_frame)
                .also_parent(calling_frame));
        }

        let HandlerFrame::User(UserHandlerFrame {
            handler_id,
            branch_point_frame,
            parent,
            handlers,
        }) = found.as_ref()
        else {
            return Err(EvalError::Internal(
                "handler lookup returned neither a system nor user frame".to_string(),
            ));
        };
        let handler_fn = handlers
            .iter()
            .find(|(name, _)| name == &self.effect_name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| EvalError::HandlerNotFound(self.effect_name.clone()))?;
        let state = handler_states.get(*handler_id)?.clone();

        // Each invocation gets its own branch-point clone, carrying the
        // caller's frame as the continuation `continue` resumes. The
        // original template (with no continue branch yet) stays untouched
        // so later invocations of the same handler start fresh.
        let branch_point = Frame {
            execution_state: branch_point_frame.execution_state.clone(),
            parent: branch_point_frame.parent.clone(),
            current_scope: branch_point_frame.current_scope.clone(),
            closest_handler_frame: branch_point_frame.closest_handler_frame.clone(),
            child_return_value: None,
            pending: None,
        }
        .with_execution_state(Value::HandleBranchPoint {
            handler_id: *handler_id,
            continue_branch: Some(Rc::new(calling_frame)),
        });
        let branch_point = Rc::new(branch_point);

        // The handler body is invoked as an ordinary application of the
        // bound handler function to the current state followed by the
        // operation's arguments; it resolves its own effects through the
        // chain active where `handle` was written, not through itself.
        let mut call = vec![handler_fn, state];
        call.extend(self.bound_args.iter().cloned());

        Ok(Frame {
            execution_state: Value::SExpression(Rc::new(call)),
            parent: Some(branch_point),
            current_scope: branch_point_frame.current_scope.clone(),
            closest_handler_frame: parent.clone(),
            child_return_value: None,
            pending: None,
        })
    }

    fn describe(&self) -> String {
        format!("effect {}", self.effect_name)
    }
}
