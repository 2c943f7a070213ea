//! Class registry
//!
//! Records the engine classes the extension derives from and the extension
//! classes it registers, each with its parent and its table of virtual
//! methods. The registry is assembled once by [`ClassRegistryBuilder`] and is
//! read-only afterwards, so lookups need no locking.

use std::any::Any;
use std::collections::hash_map::Entry;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use gdbridge_sdk::{BridgeError, BridgeResult, EngineInterface, Kind, RawObject};
use rustc_hash::FxHashMap;

use crate::convert::{IntoVirtualRet, VirtualArgs};
use crate::trampoline::{panic_message, VirtualEntry, VirtualSignature, VirtualTable};

/// Default bound on ancestor walks.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Where a class is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassOrigin {
    /// Built into the engine
    Engine,
    /// Registered by this extension
    Extension,
}

/// Builds the host data for a new instance of an extension class.
pub type Factory = fn(RawObject) -> Box<dyn Any>;

/// One registered class.
pub struct ClassEntry {
    name: String,
    parent: Option<String>,
    origin: ClassOrigin,
    factory: Option<Factory>,
    virtuals: VirtualTable,
}

impl ClassEntry {
    fn new(name: &str, parent: Option<&str>, origin: ClassOrigin, factory: Option<Factory>) -> Self {
        ClassEntry {
            name: name.to_string(),
            parent: parent.map(str::to_string),
            origin,
            factory,
            virtuals: VirtualTable::new(),
        }
    }

    /// Class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent class name; `None` for a root class.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Whether the engine or the host defines the class.
    pub fn origin(&self) -> ClassOrigin {
        self.origin
    }

    /// Virtual methods this class implements or declares.
    pub fn virtuals(&self) -> &VirtualTable {
        &self.virtuals
    }

    /// Register a virtual method implemented by the host.
    pub fn virtual_fn<T, A, R>(&mut self, name: &str, f: fn(&mut T, A) -> R) -> &mut Self
    where
        T: 'static,
        A: VirtualArgs + 'static,
        R: IntoVirtualRet + 'static,
    {
        self.virtuals.register(name, f);
        self
    }

    /// Declare a virtual method the engine implements itself.
    pub fn declare_virtual(&mut self, name: &str, args: &[usize], ret: usize) -> &mut Self {
        self.virtuals.declare(name, VirtualSignature::new(args, ret));
        self
    }

    /// Replace the instance factory.
    pub fn with_factory(&mut self, factory: Factory) -> &mut Self {
        self.factory = Some(factory);
        self
    }
}

impl fmt::Debug for ClassEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassEntry")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("origin", &self.origin)
            .field("virtuals", &self.virtuals.len())
            .finish()
    }
}

/// Host side of one engine object: the class it was created as, the engine
/// object, and the host data built by the class factory.
pub struct InstanceCell {
    class: String,
    object: RawObject,
    data: Box<dyn Any>,
}

impl InstanceCell {
    /// Pair an engine object with its host data.
    pub fn new(class: impl Into<String>, object: RawObject, data: Box<dyn Any>) -> Self {
        InstanceCell {
            class: class.into(),
            object,
            data,
        }
    }

    /// Class the instance was created as.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Engine object.
    pub fn object(&self) -> RawObject {
        self.object
    }

    /// True when the host data is a `T`.
    pub fn holds<T: 'static>(&self) -> bool {
        self.data.is::<T>()
    }

    /// Host data, when it is a `T`.
    pub fn data<T: 'static>(&self) -> Option<&T> {
        self.data.downcast_ref()
    }

    /// Mutable host data, when it is a `T`.
    pub fn data_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.data.downcast_mut()
    }
}

impl fmt::Debug for InstanceCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceCell")
            .field("class", &self.class)
            .field("object", &self.object)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Collects classes before the registry is frozen.
#[derive(Default)]
pub struct ClassRegistryBuilder {
    classes: FxHashMap<String, ClassEntry>,
    max_depth: Option<usize>,
}

impl ClassRegistryBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound ancestor walks to `depth` hops (default: 32).
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Describe a built-in engine class.
    pub fn engine_class(&mut self, name: &str, parent: Option<&str>) -> BridgeResult<&mut ClassEntry> {
        self.insert(ClassEntry::new(name, parent, ClassOrigin::Engine, None))
    }

    /// Register an extension class deriving from `parent`.
    pub fn register(&mut self, name: &str, parent: &str, factory: Factory) -> BridgeResult<&mut ClassEntry> {
        self.insert(ClassEntry::new(
            name,
            Some(parent),
            ClassOrigin::Extension,
            Some(factory),
        ))
    }

    fn insert(&mut self, entry: ClassEntry) -> BridgeResult<&mut ClassEntry> {
        match self.classes.entry(entry.name.clone()) {
            Entry::Occupied(_) => Err(BridgeError::DuplicateClass(entry.name)),
            Entry::Vacant(slot) => Ok(slot.insert(entry)),
        }
    }

    /// Validate parents and freeze the registry.
    pub fn build(self) -> BridgeResult<ClassRegistry> {
        for entry in self.classes.values() {
            if let Some(parent) = &entry.parent {
                if !self.classes.contains_key(parent) {
                    return Err(BridgeError::UnknownClass(parent.clone()));
                }
            }
        }

        // Any chain longer than the class count revisits a class.
        for name in self.classes.keys() {
            let mut current = self.classes.get(name).and_then(|e| e.parent.as_deref());
            let mut hops = 0;
            while let Some(parent) = current {
                hops += 1;
                if hops > self.classes.len() {
                    return Err(BridgeError::ArgumentError(format!(
                        "Inheritance cycle through {}",
                        name
                    )));
                }
                current = self.classes.get(parent).and_then(|e| e.parent.as_deref());
            }
        }

        tracing::debug!(
            target: "gdbridge::classes",
            classes = self.classes.len(),
            "Class registry built"
        );
        Ok(ClassRegistry {
            classes: self.classes,
            max_depth: self.max_depth.unwrap_or(DEFAULT_MAX_DEPTH),
        })
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Frozen class table.
pub struct ClassRegistry {
    classes: FxHashMap<String, ClassEntry>,
    max_depth: usize,
}

impl ClassRegistry {
    /// Start collecting classes.
    pub fn builder() -> ClassRegistryBuilder {
        ClassRegistryBuilder::new()
    }

    /// Look up a class by name.
    pub fn get(&self, name: &str) -> Option<&ClassEntry> {
        self.classes.get(name)
    }

    /// True when `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// True when no class is registered.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Hops an ancestor walk may take.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// `name` followed by its ancestors, nearest first, at most
    /// `max_depth + 1` entries.
    pub fn ancestors(&self, name: &str) -> BridgeResult<Vec<&ClassEntry>> {
        let chain = self.lineage(name, self.max_depth + 1)?;
        if chain.last().and_then(|e| e.parent.as_deref()).is_some()
            && chain.len() > self.max_depth
        {
            tracing::warn!(
                target: "gdbridge::classes",
                class = name,
                depth = self.max_depth,
                "Ancestor walk truncated"
            );
        }
        Ok(chain)
    }

    // Parents were validated acyclic at build time, so the full walk ends.
    fn lineage(&self, name: &str, limit: usize) -> BridgeResult<Vec<&ClassEntry>> {
        let mut chain = Vec::new();
        let mut current = Some(
            self.classes
                .get(name)
                .ok_or_else(|| BridgeError::UnknownClass(name.to_string()))?,
        );
        while let Some(entry) = current {
            if chain.len() == limit {
                break;
            }
            chain.push(entry);
            current = entry.parent.as_deref().and_then(|p| self.classes.get(p));
        }
        Ok(chain)
    }

    /// Nearest class in the chain of `class` that knows `method`, with its
    /// entry.
    pub fn resolve_virtual(&self, class: &str, method: &str) -> Option<(&ClassEntry, &VirtualEntry)> {
        self.ancestors(class)
            .ok()?
            .into_iter()
            .find_map(|entry| entry.virtuals.get(method).map(|v| (entry, v)))
    }

    /// True when `class` is `ancestor` or derives from it.
    pub fn extends(&self, class: &str, ancestor: &str) -> bool {
        self.lineage(class, usize::MAX)
            .map(|chain| chain.iter().any(|e| e.name == ancestor))
            .unwrap_or(false)
    }

    /// True when `class` or an ancestor registers or declares `method`.
    pub fn has_virtual(&self, class: &str, method: &str) -> bool {
        self.resolve_virtual(class, method).is_some()
    }

    /// Construct the engine object for `name` and build its host data.
    ///
    /// The object is constructed as the nearest engine ancestor; the host
    /// data comes from the nearest factory, or `()` when there is none. A
    /// panicking factory releases the object and yields `Panic`.
    pub fn instantiate(&self, name: &str, engine: &dyn EngineInterface) -> BridgeResult<InstanceCell> {
        let chain = self.lineage(name, usize::MAX)?;
        let base = chain
            .iter()
            .find(|e| e.origin == ClassOrigin::Engine)
            .ok_or_else(|| BridgeError::ArgumentError(format!("{} has no engine base class", name)))?;
        let object = engine.construct_object(&base.name).ok_or_else(|| {
            BridgeError::ArgumentError(format!("Engine could not construct {}", base.name))
        })?;
        let data = match chain.iter().find_map(|e| e.factory) {
            Some(factory) => match panic::catch_unwind(AssertUnwindSafe(|| factory(object))) {
                Ok(data) => data,
                Err(payload) => {
                    engine.release(Kind::Object, &object.words());
                    let message = panic_message(payload.as_ref());
                    tracing::error!(
                        target: "gdbridge::classes",
                        class = name,
                        %message,
                        "Factory panicked"
                    );
                    return Err(BridgeError::Panic(message));
                }
            },
            None => Box::new(()),
        };
        tracing::debug!(
            target: "gdbridge::classes",
            class = name,
            base = base.name(),
            "Instantiated"
        );
        Ok(InstanceCell::new(name, object, data))
    }

    /// Build host data for an engine object that already exists.
    pub fn wrap(&self, name: &str, object: RawObject) -> BridgeResult<InstanceCell> {
        let factory = self
            .lineage(name, usize::MAX)?
            .into_iter()
            .find_map(|e| e.factory)
            .ok_or_else(|| BridgeError::UnknownClass(name.to_string()))?;
        Ok(InstanceCell::new(name, object, factory(object)))
    }
}

impl fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("classes", &self.classes.len())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}
