// ABOUTME: Evaluation frames and the handler chain threaded through them

use std::rc::Rc;

use crate::error::EvalError;
use crate::scope::Scope;
use crate::value::Value;

/// What a suspended special form still has left to do once the child it
/// just spawned delivers a result. `cond` and `handle` are the only forms
/// that need this: every other form desugars into a plain application and
/// rides the generic left-to-right argument evaluation instead.
#[derive(Clone)]
pub enum Pending {
    /// Waiting on a test's boolean result; `on_true` is the branch to take
    /// if it's true, `remaining` is `[false-branch, test2, branch2, ...]`.
    CondDecision {
        on_true: Value,
        remaining: Vec<Value>,
    },
    /// Waiting on the evaluated handler-pairs list before evaluating the
    /// initial state expression.
    HandleAwaitingPairs {
        code: Value,
        state_expr: Value,
        rest: Vec<Value>,
    },
    /// Waiting on the evaluated initial state before registering the
    /// handler and entering its body.
    HandleAwaitingState {
        code: Value,
        pairs: Value,
        rest: Vec<Value>,
    },
    /// Waiting on the handled block's `[result, finalState]` pair. `rest`
    /// is evaluated afterward, in sequence, if non-empty.
    HandleResolved {
        handler_id: usize,
        rest: Vec<Value>,
    },
    /// Waiting on `let`'s value expression, which was evaluated in `scope` --
    /// a scope already extending the enclosing one with `name` bound to a
    /// placeholder. Once the value is known it patches that same binding in
    /// place, so a lambda the value expression built (and which may have
    /// captured `scope` as its closure) can call itself by `name`.
    LetAwaitingValue {
        scope: Scope,
        tail: Value,
    },
}

/// One step of evaluation in progress. Frames form a tree via `parent`
/// rather than a growing Rust call stack, which is what lets the evaluator
/// in `eval.rs` run as a flat trampoline instead of recursing per sub-term.
pub struct Frame {
    pub execution_state: Value,
    pub parent: Option<Rc<Frame>>,
    pub current_scope: Scope,
    pub closest_handler_frame: Option<Rc<HandlerFrame>>,
    pub child_return_value: Option<Value>,
    /// A special form's own continuation, for the handful of forms (`cond`,
    /// `handle`) that can't be desugared into a plain application and so
    /// need to remember what to do once their current child returns.
    pub pending: Option<Pending>,
}

impl Clone for Frame {
    fn clone(&self) -> Frame {
        Frame {
            execution_state: self.execution_state.clone(),
            parent: self.parent.clone(),
            current_scope: self.current_scope.clone(),
            closest_handler_frame: self.closest_handler_frame.clone(),
            child_return_value: self.child_return_value.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl Frame {
    pub fn new(execution_state: Value, current_scope: Scope) -> Frame {
        Frame {
            execution_state,
            parent: None,
            current_scope,
            closest_handler_frame: None,
            child_return_value: None,
            pending: None,
        }
    }

    pub fn with_execution_state(mut self, execution_state: Value) -> Frame {
        self.execution_state = execution_state;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Frame {
        self.current_scope = scope;
        self
    }

    pub fn with_child_return_value(mut self, value: Value) -> Frame {
        self.child_return_value = Some(value);
        self
    }

    pub fn with_closest_handler_frame(mut self, handler_frame: Option<Rc<HandlerFrame>>) -> Frame {
        self.closest_handler_frame = handler_frame;
        self
    }

    pub fn with_pending(mut self, pending: Pending) -> Frame {
        self.pending = Some(pending);
        self
    }

    /// Sets `parent` to an existing, already-built frame rather than `self`
    /// (the caller's frame, not the callee's), used when a lambda call
    /// produces a fresh evaluation frame whose parent is the call site.
    pub fn also_parent(mut self, parent: Frame) -> Frame {
        self.parent = Some(Rc::new(parent));
        self
    }

    /// Descends into a sub-evaluation that inherits this frame's lexical
    /// scope and handler chain: the ordinary case of evaluating a head or
    /// an argument inside an s-expression.
    pub fn create_child(self, new_state: Value) -> Frame {
        let current_scope = self.current_scope.clone();
        let closest_handler_frame = self.closest_handler_frame.clone();
        Frame {
            execution_state: new_state,
            current_scope,
            closest_handler_frame,
            child_return_value: None,
            pending: None,
            parent: Some(Rc::new(self)),
        }
    }

    /// Unwinds one level back to the parent, handing it `result` as its
    /// child's return value. Reclaims the parent frame without cloning when
    /// this is the only reference to it.
    pub fn return_to_parent(self, result: Value) -> Option<Frame> {
        self.parent.map(|rc| {
            let parent = Rc::try_unwrap(rc).unwrap_or_else(|rc| (*rc).clone());
            parent.with_child_return_value(result)
        })
    }
}

/// The handler chain active at a point in evaluation. `System` entries are
/// host-provided effects with no interpreter-visible state; `User` entries
/// come from a `handle` form and carry the frame suspended at its branch
/// point so `continue` can resume it.
pub enum HandlerFrame {
    System(SystemHandlerFrame),
    User(UserHandlerFrame),
}

/// Host-provided effects have no interpreter-visible state or branch point:
/// invoking one just runs a Rust closure over the bound arguments.
pub struct SystemHandlerFrame {
    pub handlers: Vec<(String, Rc<dyn Fn(&[Value]) -> Result<Value, EvalError>>)>,
}

pub struct UserHandlerFrame {
    pub handler_id: usize,
    pub branch_point_frame: Rc<Frame>,
    pub parent: Option<Rc<HandlerFrame>>,
    pub handlers: Vec<(String, Value)>,
}

impl HandlerFrame {
    fn parent(&self) -> Option<Rc<HandlerFrame>> {
        match self {
            HandlerFrame::System(_) => None,
            HandlerFrame::User(u) => u.parent.clone(),
        }
    }

    fn provides(&self, name: &str) -> bool {
        match self {
            HandlerFrame::System(s) => s.handlers.iter().any(|(n, _)| n == name),
            HandlerFrame::User(u) => u.handlers.iter().any(|(n, _)| n == name),
        }
    }

    /// Walks a handler chain outward looking for the nearest handler bound
    /// to `name`, per the dynamic (not lexical) discovery rule.
    pub fn find(
        chain: &Option<Rc<HandlerFrame>>,
        name: &str,
    ) -> Option<Rc<HandlerFrame>> {
        let mut current = chain.clone();
        while let Some(frame) = current {
            if frame.provides(name) {
                return Some(frame);
            }
            current = frame.parent();
        }
        None
    }
}

/// Owned by the evaluator, not a global: each `handle` block allocates a
/// slot here for its mutable state and must deallocate it, in strict LIFO
/// order, before the block completes. IDs are checked `< len`, fixing a
/// permissive off-by-one bounds check in the system this was modeled on.
#[derive(Default)]
pub struct HandlerStateRegistry {
    states: Vec<Value>,
}

impl HandlerStateRegistry {
    pub fn new() -> HandlerStateRegistry {
        HandlerStateRegistry { states: Vec::new() }
    }

    pub fn push(&mut self, initial_state: Value) -> usize {
        let id = self.states.len();
        self.states.push(initial_state);
        id
    }

    pub fn get(&self, id: usize) -> Result<&Value, EvalError> {
        self.states
            .get(id)
            .ok_or_else(|| EvalError::Internal(format!("handler state #{id} does not exist")))
    }

    pub fn set(&mut self, id: usize, value: Value) -> Result<(), EvalError> {
        if id >= self.states.len() {
            return Err(EvalError::Internal(format!(
                "handler state #{id} does not exist"
            )));
        }
        self.states[id] = value;
        Ok(())
    }

    /// Removes the slot for `id`. Must be the most recently pushed, still
    /// live slot, matching `handle`'s strict nesting of allocation and
    /// deallocation.
    pub fn pop(&mut self, id: usize) -> Result<(), EvalError> {
        if self.states.is_empty() || id != self.states.len() - 1 {
            return Err(EvalError::Internal(format!(
                "handler state #{id} popped out of LIFO order"
            )));
        }
        self.states.pop();
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
