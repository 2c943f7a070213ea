//! Lifetime scopes
//!
//! Scopes form a strict stack on a [`HandleRegistry`]. Owned handles acquired
//! while a scope is on top belong to it and are released in reverse
//! acquisition order when it ends. Borrowed handles are invalidated without a
//! native call.

use gdbridge_sdk::{BridgeError, BridgeResult};

use crate::handle::{Handle, HandleKind, HandleRegistry, Ownership, ScopeId};

/// RAII guard for one scope. Ending is idempotent; dropping ends it.
#[must_use = "dropping a scope ends it immediately"]
pub struct Scope<'r> {
    registry: &'r HandleRegistry,
    id: ScopeId,
}

impl HandleRegistry {
    /// Push a new scope on top of the stack.
    pub fn enter_scope(&self) -> Scope<'_> {
        let id = self.push_scope();
        tracing::trace!(target: "gdbridge::scope", scope = id.0, "Entered scope");
        Scope { registry: self, id }
    }

    /// Run `f` inside a fresh scope that ends when `f` returns or unwinds.
    pub fn with_scope<T>(&self, f: impl FnOnce(&Scope<'_>) -> T) -> T {
        let scope = self.enter_scope();
        f(&scope)
    }
}

impl<'r> Scope<'r> {
    /// Scope id.
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// True until the scope (or a scope below it) has ended.
    pub fn is_open(&self) -> bool {
        self.registry.scope_is_open(self.id)
    }

    /// Move an owned handle into this scope. It leaves the scope it was in.
    ///
    /// Borrowed and parent-bound handles cannot move: `NotOwned`.
    pub fn register<K: HandleKind>(&self, handle: &Handle<K>) -> BridgeResult<()> {
        self.registry.move_to_scope(handle.id(), self.id)
    }

    /// Move a handle to the enclosing scope so it outlives this one.
    ///
    /// On the root scope this is a no-op for owned handles. Borrowed and
    /// parent-bound handles never escape: `NotOwned`.
    pub fn escape<K: HandleKind>(&self, handle: &Handle<K>) -> BridgeResult<()> {
        match self.registry.enclosing_scope(self.id) {
            Some(outer) => self.registry.move_to_scope(handle.id(), outer),
            None if self.is_open() => match handle.ownership() {
                Ownership::Owned => Ok(()),
                _ => Err(BridgeError::NotOwned),
            },
            None => Err(BridgeError::ScopeClosed),
        }
    }

    /// End the scope, first ending any scope above it.
    ///
    /// Returns the number of native releases issued; `0` when already ended.
    pub fn end(&self) -> usize {
        let released = self.registry.end_scope(self.id);
        if released > 0 {
            tracing::trace!(target: "gdbridge::scope", scope = self.id.0, released, "Ended scope");
        }
        released
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        self.end();
    }
}

impl std::fmt::Debug for Scope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}
