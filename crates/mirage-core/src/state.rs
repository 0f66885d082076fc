//! Per-resource-kind lifecycle tables.
//!
//! Each resource kind declares its finite state set and a table of
//! (current state, operation) -> outcome. Whether an illegal transition
//! rejects or is an idempotent no-op is a property of the kind's table,
//! never a global rule; backends go through [`TransitionTable::apply`]
//! instead of scattering conditionals across operations.

use std::collections::HashMap;
use std::hash::Hash;

use crate::error::ServiceError;

/// Outcome of attempting one operation in one state.
#[derive(Debug, Clone)]
pub enum Transition<S> {
    /// Move to the next state.
    To(S),
    /// Documented idempotent no-op: state unchanged, call succeeds.
    Noop,
    /// Illegal for this kind: reject with the given wire code.
    Reject {
        code: &'static str,
        message: &'static str,
    },
}

/// Declarative transition table for one resource kind.
///
/// Rules are keyed per state so `apply` can look operations up by any
/// borrowed name, not just the `'static` literals the table was built
/// from.
pub struct TransitionTable<S> {
    kind: &'static str,
    rules: HashMap<S, HashMap<&'static str, Transition<S>>>,
}

/// What `apply` decided; `Unchanged` covers the no-op rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied<S> {
    Changed(S),
    Unchanged,
}

impl<S: Copy + Eq + Hash> TransitionTable<S> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            rules: HashMap::new(),
        }
    }

    pub fn allow(mut self, from: S, operation: &'static str, to: S) -> Self {
        self.rules
            .entry(from)
            .or_default()
            .insert(operation, Transition::To(to));
        self
    }

    pub fn noop(mut self, from: S, operation: &'static str) -> Self {
        self.rules
            .entry(from)
            .or_default()
            .insert(operation, Transition::Noop);
        self
    }

    pub fn reject(
        mut self,
        from: S,
        operation: &'static str,
        code: &'static str,
        message: &'static str,
    ) -> Self {
        self.rules
            .entry(from)
            .or_default()
            .insert(operation, Transition::Reject { code, message });
        self
    }

    /// Apply one operation to one resource's current state.
    ///
    /// A (state, operation) pair absent from the table is an undeclared
    /// transition and rejects as an internal defect: tables must be
    /// exhaustive for the operations routed through them.
    pub fn apply(&self, current: S, operation: &str) -> Result<Applied<S>, ServiceError> {
        match self
            .rules
            .get(&current)
            .and_then(|by_operation| by_operation.get(operation))
        {
            Some(Transition::To(next)) => Ok(Applied::Changed(*next)),
            Some(Transition::Noop) => Ok(Applied::Unchanged),
            Some(Transition::Reject { code, message }) => {
                Err(ServiceError::invalid_state(*code, *message))
            }
            None => Err(ServiceError::internal(format!(
                "undeclared transition for {}: {operation} from current state",
                self.kind
            ))),
        }
    }
}
