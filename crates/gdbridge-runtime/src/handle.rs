//! Ownership-tracked handles
//!
//! Every engine value the host touches is registered here and represented by
//! a typed, generation-checked [`Handle`]. A handle records how it was
//! obtained:
//!
//! - [`Ownership::Owned`]: the host must release it exactly once. Owned
//!   handles belong to a scope and are released when it ends.
//! - [`Ownership::Borrowed`]: valid for the current scope only. Never
//!   released, only invalidated.
//! - [`Ownership::ParentBound`]: valid while its parent handle is live.
//!   Never released on its own; invalidated with the parent.
//!
//! The registry is confined to one thread. Native release calls are issued
//! after the registry's internal borrow ends, so the engine may call back in.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use gdbridge_sdk::{
    BridgeError, BridgeResult, EngineInterface, InstanceId, Kind, RawArray, RawCallable,
    RawDictionary, RawObject, RawPackedArray, RawString, RawStringName, RawVariant, SlotWords,
    Variant, Wire, Word,
};

use crate::config::BridgeConfig;

// ============================================================================
// Kinds
// ============================================================================

mod sealed {
    pub trait Sealed {}
}

/// Marker type naming a handle category and its raw representation.
pub trait HandleKind: sealed::Sealed + 'static {
    /// Category passed to the engine on release
    const KIND: Kind;
    /// Raw handle type
    type Raw: Wire + fmt::Debug + PartialEq;
}

macro_rules! handle_kinds {
    ($($(#[$doc:meta])* $name:ident => $kind:ident, $raw:ty;)*) => {$(
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {}

        impl sealed::Sealed for $name {}

        impl HandleKind for $name {
            const KIND: Kind = Kind::$kind;
            type Raw = $raw;
        }

        const _: () = assert!(<$raw as Wire>::WIDTH == Kind::$kind.words());
    )*};
}

handle_kinds! {
    /// Object or resource
    ObjectKind => Object, RawObject;
    /// Engine string
    StringKind => String, RawString;
    /// String name
    StringNameKind => StringName, RawStringName;
    /// Array
    ArrayKind => Array, RawArray;
    /// Dictionary
    DictionaryKind => Dictionary, RawDictionary;
    /// Packed array
    PackedArrayKind => PackedArray, RawPackedArray;
    /// Callable
    CallableKind => Callable, RawCallable;
    /// Variant
    VariantKind => Variant, RawVariant;
}

// ============================================================================
// Handles
// ============================================================================

/// Registry slot index plus generation. Stale once the generation moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId {
    index: u32,
    generation: u32,
}

/// Identifier of a scope. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub(crate) u64);

/// How a handle was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// Host releases it exactly once
    Owned,
    /// Valid for the current scope, never released
    Borrowed,
    /// Valid while `parent` is live, never released on its own
    ParentBound {
        /// Parent handle
        parent: HandleId,
    },
}

/// Typed token for a registered engine value.
///
/// Handles are deliberately not `Clone`: releasing or detaching consumes the
/// token. They are also `!Send`, matching the thread-confined registry.
pub struct Handle<K: HandleKind> {
    id: HandleId,
    raw: K::Raw,
    ownership: Ownership,
    _kind: PhantomData<(K, *const ())>,
}

impl<K: HandleKind> Handle<K> {
    /// Registry id.
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Ownership recorded at acquisition.
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// Raw value without a liveness check. Prefer [`HandleRegistry::get`].
    pub fn raw_unchecked(&self) -> K::Raw {
        self.raw
    }
}

impl<K: HandleKind> fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &K::KIND)
            .field("id", &self.id)
            .field("raw", &self.raw)
            .field("ownership", &self.ownership)
            .finish()
    }
}

// ============================================================================
// Arena
// ============================================================================

struct Entry {
    kind: Kind,
    words: [Word; 3],
    ownership: Ownership,
    scope: Option<ScopeId>,
    children: Vec<HandleId>,
}

impl Entry {
    fn raw_words(&self) -> &[Word] {
        &self.words[..self.kind.words()]
    }
}

#[derive(Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

struct ScopeFrame {
    id: ScopeId,
    members: Vec<HandleId>,
}

/// A native release to issue once the arena borrow has ended.
struct PendingRelease {
    kind: Kind,
    words: [Word; 3],
}

struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    scopes: Vec<ScopeFrame>,
    next_scope: u64,
    live: usize,
}

impl Arena {
    fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
            scopes: vec![ScopeFrame {
                id: ScopeId(0),
                members: Vec::new(),
            }],
            next_scope: 1,
            live: 0,
        }
    }

    fn entry(&self, id: HandleId) -> Option<&Entry> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    fn entry_mut(&mut self, id: HandleId) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    fn insert(&mut self, entry: Entry) -> HandleId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return HandleId {
                index,
                generation: slot.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        HandleId {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    /// Remove an entry and every parent-bound descendant.
    fn remove(&mut self, id: HandleId) -> Option<Entry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;

        if let Ownership::ParentBound { parent } = entry.ownership {
            if let Some(parent) = self.entry_mut(parent) {
                parent.children.retain(|child| *child != id);
            }
        }
        for child in &entry.children {
            self.remove(*child);
        }
        Some(entry)
    }

    fn top_scope(&self) -> ScopeId {
        self.scopes.last().map(|s| s.id).unwrap_or(ScopeId(0))
    }

    fn frame_mut(&mut self, scope: ScopeId) -> Option<&mut ScopeFrame> {
        self.scopes.iter_mut().find(|s| s.id == scope)
    }

    fn attach(&mut self, id: HandleId, scope: ScopeId) {
        if let Some(frame) = self.frame_mut(scope) {
            frame.members.push(id);
        }
        if let Some(entry) = self.entry_mut(id) {
            entry.scope = Some(scope);
        }
    }

    fn detach_from_scope(&mut self, id: HandleId) {
        let Some(scope) = self.entry(id).and_then(|e| e.scope) else {
            return;
        };
        if let Some(frame) = self.frame_mut(scope) {
            frame.members.retain(|member| *member != id);
        }
    }

    /// Pop one scope frame, releasing owned members in reverse order.
    fn close_frame(&mut self, frame: ScopeFrame, pending: &mut Vec<PendingRelease>) {
        for id in frame.members.into_iter().rev() {
            let owned = matches!(self.entry(id), Some(e) if e.ownership == Ownership::Owned);
            if let Some(entry) = self.remove(id) {
                if owned {
                    pending.push(PendingRelease {
                        kind: entry.kind,
                        words: entry.words,
                    });
                }
            }
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Thread-confined table of every handle the host holds.
pub struct HandleRegistry {
    engine: Arc<dyn EngineInterface>,
    arena: RefCell<Arena>,
    leak_check: bool,
}

impl HandleRegistry {
    /// Create a registry with default configuration.
    pub fn new(engine: Arc<dyn EngineInterface>) -> Self {
        Self::with_config(engine, &BridgeConfig::default())
    }

    /// Create a registry.
    pub fn with_config(engine: Arc<dyn EngineInterface>, config: &BridgeConfig) -> Self {
        HandleRegistry {
            engine,
            arena: RefCell::new(Arena::new()),
            leak_check: config.leak_check,
        }
    }

    /// The engine this registry releases into.
    pub fn engine(&self) -> &Arc<dyn EngineInterface> {
        &self.engine
    }

    /// Number of live handles of any ownership.
    pub fn live_count(&self) -> usize {
        self.arena.borrow().live
    }

    fn register<K: HandleKind>(&self, raw: K::Raw, ownership: Ownership, scoped: bool) -> Handle<K> {
        let mut words = [0; 3];
        let slot = raw.to_slot();
        let raw_words = slot.as_words();
        words[..raw_words.len()].copy_from_slice(raw_words);

        let mut arena = self.arena.borrow_mut();
        let id = arena.insert(Entry {
            kind: K::KIND,
            words,
            ownership,
            scope: None,
            children: Vec::new(),
        });
        if scoped {
            let scope = arena.top_scope();
            arena.attach(id, scope);
        }
        tracing::trace!(
            target: "gdbridge::handles",
            kind = %K::KIND,
            ?ownership,
            index = id.index,
            "Registered handle"
        );
        Handle {
            id,
            raw,
            ownership,
            _kind: PhantomData,
        }
    }

    /// Register a host-owned value in the current scope.
    pub fn acquire_owned<K: HandleKind>(&self, raw: K::Raw) -> Handle<K> {
        self.register(raw, Ownership::Owned, true)
    }

    /// Wrap a value the engine keeps ownership of, valid for the current scope.
    pub fn borrow<K: HandleKind>(&self, raw: K::Raw) -> Handle<K> {
        self.register(raw, Ownership::Borrowed, true)
    }

    /// Wrap a value whose validity is tied to `parent`.
    pub fn bind_to_parent<K: HandleKind, P: HandleKind>(
        &self,
        raw: K::Raw,
        parent: &Handle<P>,
    ) -> BridgeResult<Handle<K>> {
        if !self.is_live(parent) {
            return Err(BridgeError::Released);
        }
        let child = self.register(raw, Ownership::ParentBound { parent: parent.id }, false);
        if let Some(entry) = self.arena.borrow_mut().entry_mut(parent.id) {
            entry.children.push(child.id);
        }
        Ok(child)
    }

    /// Release an owned value: exactly one native release call.
    ///
    /// Parent-bound children are invalidated without native calls.
    pub fn release<K: HandleKind>(&self, handle: Handle<K>) -> BridgeResult<()> {
        let entry = {
            let mut arena = self.arena.borrow_mut();
            match arena.entry(handle.id) {
                None => return Err(BridgeError::Released),
                Some(entry) if entry.ownership != Ownership::Owned => {
                    return Err(BridgeError::NotOwned)
                }
                Some(_) => {}
            }
            arena.detach_from_scope(handle.id);
            arena.remove(handle.id)
        };
        if let Some(entry) = entry {
            self.release_native(entry.kind, entry.raw_words());
        }
        Ok(())
    }

    /// Validate an instance id against the engine's live-instance table.
    ///
    /// The returned handle is borrowed for the current scope.
    pub fn assert_live(&self, raw: RawObject, id: InstanceId) -> BridgeResult<Handle<ObjectKind>> {
        if !id.is_valid() {
            return Err(BridgeError::StaleInstance { id });
        }
        match self.engine.object_from_instance_id(id) {
            Some(live) if raw.is_null() || live == raw => Ok(self.borrow(live)),
            _ => {
                tracing::debug!(target: "gdbridge::handles", %id, "Rejected stale instance");
                Err(BridgeError::StaleInstance { id })
            }
        }
    }

    /// Raw value of a live handle.
    pub fn get<K: HandleKind>(&self, handle: &Handle<K>) -> BridgeResult<K::Raw> {
        if self.is_live(handle) {
            Ok(handle.raw)
        } else {
            Err(BridgeError::Released)
        }
    }

    /// True while the handle has been neither released nor invalidated.
    pub fn is_live<K: HandleKind>(&self, handle: &Handle<K>) -> bool {
        self.arena.borrow().entry(handle.id).is_some()
    }

    /// Hand an owned value to the engine without releasing it.
    pub fn detach<K: HandleKind>(&self, handle: Handle<K>) -> BridgeResult<K::Raw> {
        let mut arena = self.arena.borrow_mut();
        match arena.entry(handle.id) {
            None => return Err(BridgeError::Released),
            Some(entry) if entry.ownership != Ownership::Owned => return Err(BridgeError::NotOwned),
            Some(_) => {}
        }
        arena.detach_from_scope(handle.id);
        arena.remove(handle.id);
        Ok(handle.raw)
    }

    /// Create an owned engine string.
    pub fn new_string(&self, text: &str) -> Handle<StringKind> {
        let raw = self.engine.string_new(text);
        self.acquire_owned(raw)
    }

    /// Copy a string handle's contents.
    pub fn read_string(&self, handle: &Handle<StringKind>) -> BridgeResult<String> {
        let raw = self.get(handle)?;
        Ok(self.engine.string_read(raw))
    }

    /// Decode a variant handle.
    pub fn variant(&self, handle: &Handle<VariantKind>) -> BridgeResult<Variant> {
        self.get(handle).map(|raw| Variant::from_slot(raw.words()))
    }

    /// Returns the number of native releases issued.
    fn flush(&self, pending: Vec<PendingRelease>) -> usize {
        pending
            .into_iter()
            .filter(|release| {
                self.release_native(release.kind, &release.words[..release.kind.words()])
            })
            .count()
    }

    /// Null objects are skipped; returns whether the engine was called.
    fn release_native(&self, kind: Kind, words: &[Word]) -> bool {
        if kind == Kind::Object && words.iter().all(|&w| w == 0) {
            return false;
        }
        tracing::trace!(target: "gdbridge::handles", %kind, "Native release");
        self.engine.release(kind, words);
        true
    }

    // ========================================================================
    // Scope plumbing (see `scope.rs`)
    // ========================================================================

    pub(crate) fn push_scope(&self) -> ScopeId {
        let mut arena = self.arena.borrow_mut();
        let id = ScopeId(arena.next_scope);
        arena.next_scope += 1;
        arena.scopes.push(ScopeFrame {
            id,
            members: Vec::new(),
        });
        id
    }

    pub(crate) fn scope_is_open(&self, scope: ScopeId) -> bool {
        self.arena.borrow().scopes.iter().any(|s| s.id == scope)
    }

    #[cfg(test)]
    pub(crate) fn current_scope(&self) -> ScopeId {
        self.arena.borrow().top_scope()
    }

    /// End `scope` and every scope above it. No-op when already ended.
    pub(crate) fn end_scope(&self, scope: ScopeId) -> usize {
        let pending = {
            let mut arena = self.arena.borrow_mut();
            let Some(position) = arena.scopes.iter().position(|s| s.id == scope) else {
                return 0;
            };
            let mut pending = Vec::new();
            while arena.scopes.len() > position {
                let Some(frame) = arena.scopes.pop() else {
                    break;
                };
                arena.close_frame(frame, &mut pending);
            }
            pending
        };
        self.flush(pending)
    }

    /// Move a handle's scope membership to `scope`.
    pub(crate) fn move_to_scope(&self, id: HandleId, scope: ScopeId) -> BridgeResult<()> {
        let mut arena = self.arena.borrow_mut();
        if !arena.scopes.iter().any(|s| s.id == scope) {
            return Err(BridgeError::ScopeClosed);
        }
        match arena.entry(id) {
            None => return Err(BridgeError::Released),
            Some(entry) if entry.ownership != Ownership::Owned => {
                return Err(BridgeError::NotOwned)
            }
            Some(_) => {}
        }
        arena.detach_from_scope(id);
        arena.attach(id, scope);
        Ok(())
    }

    /// Scope directly below `scope` on the stack.
    pub(crate) fn enclosing_scope(&self, scope: ScopeId) -> Option<ScopeId> {
        let arena = self.arena.borrow();
        let position = arena.scopes.iter().position(|s| s.id == scope)?;
        position.checked_sub(1).map(|p| arena.scopes[p].id)
    }
}

impl Drop for HandleRegistry {
    fn drop(&mut self) {
        let pending = {
            let arena = self.arena.get_mut();
            let mut pending = Vec::new();
            while let Some(frame) = arena.scopes.pop() {
                arena.close_frame(frame, &mut pending);
            }
            pending
        };
        if self.leak_check && !pending.is_empty() {
            tracing::warn!(
                target: "gdbridge::handles",
                count = pending.len(),
                "Owned handles still alive at registry teardown; releasing"
            );
        }
        self.flush(pending);
    }
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arena = self.arena.borrow();
        f.debug_struct("HandleRegistry")
            .field("live", &arena.live)
            .field("scopes", &arena.scopes.len())
            .finish()
    }
}
