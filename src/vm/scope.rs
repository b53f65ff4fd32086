// src/vm/scope.rs

use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScopeError {
    #[error("Identifier already taken: '{0}'")]
    Duplicate(String),
    #[error("Too many variables in one function")]
    TooManySlots,
}

/// Where an identifier lives, as seen from the function being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Slot in the global array (a variable of the top-level function).
    TopLevel(u16),
    /// Slot in the current activation.
    Local(u16),
    /// Index into the current closure's upvalues.
    Captured(u16),
    Undefined,
}

#[derive(Debug, Default)]
struct Scope {
    symbols: HashMap<String, u16>,
    /// First slot owned by this scope.
    start: u16,
    /// Next free slot.
    next: u16,
}

/// The nested block scopes of one function. Slots are numbered across the whole function;
/// a popped scope hands its slots back so that a sibling block can reuse them.
#[derive(Debug)]
pub struct ScopeChain {
    scopes: Vec<Scope>,
    max_slots: u16,
    /// Slots some nested function refers to. Their numbers are never handed out twice.
    captured: HashSet<u16>,
}

impl Default for ScopeChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeChain {
    pub fn new() -> Self {
        ScopeChain { scopes: vec![Scope::default()], max_slots: 0, captured: HashSet::new() }
    }

    pub fn push(&mut self) {
        let next = self.innermost().next;
        self.scopes.push(Scope { symbols: HashMap::new(), start: next, next });
    }

    pub fn pop(&mut self) {
        if self.scopes.len() <= 1 {
            return;
        }
        if let Some(child) = self.scopes.pop() {
            let keeps_slots = (child.start..child.next).any(|slot| self.captured.contains(&slot));
            if keeps_slots {
                self.innermost_mut().next = child.next;
            }
        }
    }

    /// Declares `name` in the innermost scope.
    pub fn define(&mut self, name: &str) -> Result<u16, ScopeError> {
        let scope = self.innermost_mut();
        if scope.symbols.contains_key(name) {
            return Err(ScopeError::Duplicate(name.to_string()));
        }
        let slot = scope.next;
        scope.next = slot.checked_add(1).ok_or(ScopeError::TooManySlots)?;
        scope.symbols.insert(name.to_string(), slot);
        self.max_slots = self.max_slots.max(slot + 1);
        Ok(slot)
    }

    /// Innermost-to-outermost lookup within this function only.
    pub fn lookup(&self, name: &str) -> Option<u16> {
        self.scopes.iter().rev().find_map(|scope| scope.symbols.get(name).copied())
    }

    pub fn mark_captured(&mut self, slot: u16) {
        self.captured.insert(slot);
    }

    /// Slot count an activation of this function needs.
    pub fn num_locals(&self) -> usize {
        self.max_slots as usize
    }

    fn innermost(&self) -> &Scope {
        // `scopes` always holds the function scope.
        &self.scopes[self.scopes.len() - 1]
    }

    fn innermost_mut(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }
}
