//! Process-wide bridge state
//!
//! One [`Bridge`] is installed per process when the engine loads the
//! extension. It owns the engine interface, the frozen class registry and
//! the configuration. Handle registries are thread-confined, so each thread
//! that calls in gets its own, created on first use.

use std::cell::RefCell;
use std::ffi::c_void;
use std::rc::Rc;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use gdbridge_sdk::{BridgeError, BridgeResult, EngineInterface, RawObject};
use once_cell::sync::OnceCell;

use crate::class_registry::{ClassRegistry, ClassRegistryBuilder, InstanceCell};
use crate::config::{BridgeConfig, InitLevel};
use crate::handle::HandleRegistry;
use crate::logging;
use crate::trampoline::{self, DispatchOutcome, VirtualSignature};

static BRIDGE: OnceCell<Bridge> = OnceCell::new();
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

const NOT_LOADED: i32 = -1;

thread_local! {
    static REGISTRY: RefCell<Option<(u64, Rc<HandleRegistry>)>> = const { RefCell::new(None) };
}

/// Engine, classes and configuration shared by every call into the
/// extension.
pub struct Bridge {
    id: u64,
    engine: Arc<dyn EngineInterface>,
    classes: ClassRegistry,
    config: BridgeConfig,
    level: AtomicI32,
}

impl Bridge {
    /// Freeze `classes` under `config` and build a bridge.
    pub fn new(
        engine: Arc<dyn EngineInterface>,
        classes: ClassRegistryBuilder,
        config: BridgeConfig,
    ) -> BridgeResult<Self> {
        let classes = classes.with_max_depth(config.max_fallback_depth).build()?;
        Ok(Bridge {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            engine,
            classes,
            config,
            level: AtomicI32::new(NOT_LOADED),
        })
    }

    /// Install the process-wide bridge. Fails with `AlreadyInstalled` on any
    /// later call.
    pub fn install(bridge: Bridge) -> BridgeResult<&'static Bridge> {
        let install_logger = bridge.config.install_logger;
        let filter = bridge.config.log_filter.clone();
        BRIDGE
            .set(bridge)
            .map_err(|_| BridgeError::AlreadyInstalled)?;
        let bridge = Self::get()?;
        if install_logger {
            logging::init(&bridge.config);
        }
        tracing::info!(
            target: "gdbridge::bridge",
            classes = bridge.classes.len(),
            %filter,
            "Bridge installed"
        );
        Ok(bridge)
    }

    /// The installed bridge.
    pub fn get() -> BridgeResult<&'static Bridge> {
        BRIDGE.get().ok_or(BridgeError::NotInstalled)
    }

    /// Engine function table.
    pub fn engine(&self) -> &Arc<dyn EngineInterface> {
        &self.engine
    }

    /// Frozen class registry.
    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    /// Configuration the bridge was built with.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    // ========================================================================
    // Initialization levels
    // ========================================================================

    /// Record that the engine reached `level`.
    pub fn initialize(&self, level: InitLevel) {
        let previous = self.level.fetch_max(level.as_i32(), Ordering::AcqRel);
        if previous < level.as_i32() {
            tracing::info!(target: "gdbridge::bridge", %level, "Initialized");
        }
    }

    /// Record that the engine is leaving `level`.
    pub fn deinitialize(&self, level: InitLevel) {
        let below = level.as_i32() - 1;
        let previous = self.level.fetch_min(below, Ordering::AcqRel);
        if previous > below {
            tracing::info!(target: "gdbridge::bridge", %level, "Deinitialized");
        }
    }

    /// Highest level reached, `None` before the first `initialize`.
    pub fn level(&self) -> Option<InitLevel> {
        InitLevel::from_i32(self.level.load(Ordering::Acquire))
    }

    /// True once the configured minimum level is reached.
    pub fn is_ready(&self) -> bool {
        self.level.load(Ordering::Acquire) >= self.config.minimum_init_level.as_i32()
    }

    // ========================================================================
    // Registries
    // ========================================================================

    /// Run `f` with this thread's handle registry for this bridge.
    ///
    /// Re-entrant: `f` may call back into the bridge on the same thread.
    pub fn with_registry<T>(&self, f: impl FnOnce(&HandleRegistry) -> T) -> T {
        let registry = REGISTRY.with(|slot| {
            let mut slot = slot.borrow_mut();
            match slot.as_ref() {
                Some((id, registry)) if *id == self.id => Rc::clone(registry),
                _ => {
                    let registry = Rc::new(HandleRegistry::with_config(
                        Arc::clone(&self.engine),
                        &self.config,
                    ));
                    // The previous bridge's registry drops here and
                    // releases what it still owns.
                    *slot = Some((self.id, Rc::clone(&registry)));
                    registry
                }
            }
        });
        f(&registry)
    }

    // ========================================================================
    // Instances
    // ========================================================================

    /// Create an instance of `class` and attach it to a new engine object.
    pub fn create_instance(&self, class: &str) -> BridgeResult<RawObject> {
        if !self.is_ready() {
            return Err(BridgeError::NotInitialized);
        }
        let cell = self.classes.instantiate(class, self.engine.as_ref())?;
        let object = cell.object();
        let instance = Box::into_raw(Box::new(cell));
        self.engine
            .set_instance(object, class, instance as *mut c_void);
        tracing::debug!(target: "gdbridge::bridge", class, "Created instance");
        Ok(object)
    }

    /// Drop an instance created by [`Bridge::create_instance`].
    ///
    /// # Safety
    /// `instance` must come from `create_instance` and must not be used
    /// afterwards. Null is ignored.
    pub unsafe fn free_instance(&self, instance: *mut InstanceCell) {
        if instance.is_null() {
            return;
        }
        let cell = Box::from_raw(instance);
        tracing::debug!(target: "gdbridge::bridge", class = cell.class(), "Freed instance");
    }

    /// True when `class` or an ancestor registers or declares `method`.
    pub fn has_virtual(&self, class: &str, method: &str) -> bool {
        self.classes.has_virtual(class, method)
    }

    /// Declared signature of `method` as seen from `class`.
    pub fn virtual_signature(&self, class: &str, method: &str) -> BridgeResult<&VirtualSignature> {
        self.classes
            .resolve_virtual(class, method)
            .map(|(_, entry)| entry.signature())
            .ok_or_else(|| BridgeError::MissingVirtualImplementation {
                class: class.to_string(),
                method: method.to_string(),
            })
    }

    /// Dispatch an engine-initiated virtual call on this thread.
    ///
    /// # Safety
    /// `instance` must be null or come from `create_instance`. `args` and
    /// `ret` must satisfy [`trampoline::dispatch`].
    pub unsafe fn call_virtual(
        &self,
        instance: *mut InstanceCell,
        method: &str,
        args: *const *const c_void,
        ret: *mut c_void,
    ) -> DispatchOutcome {
        let Some(cell) = instance.as_mut() else {
            tracing::error!(target: "gdbridge::bridge", method, "Virtual call on null instance");
            return DispatchOutcome::Failed(BridgeError::ArgumentError(format!(
                "Null instance for {}",
                method
            )));
        };
        self.with_registry(|registry| {
            trampoline::dispatch(&self.classes, registry, cell, method, args, ret)
        })
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("id", &self.id)
            .field("classes", &self.classes)
            .field("level", &self.level())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdbridge_sdk::Word;
    use gdbridge_test::MockEngine;
    use std::any::Any;

    struct Score(i64);

    fn score(_object: RawObject) -> Box<dyn Any> {
        Box::new(Score(10))
    }

    fn get_score(s: &mut Score, _args: ()) -> i64 {
        s.0
    }

    fn classes() -> ClassRegistryBuilder {
        let mut builder = ClassRegistry::builder();
        builder.engine_class("Object", None).unwrap();
        builder
            .engine_class("Node", Some("Object"))
            .unwrap()
            .declare_virtual("_ready", &[], 0);
        builder
            .register("Score", "Node", score)
            .unwrap()
            .virtual_fn("get_score", get_score);
        builder
    }

    fn bridge() -> (Arc<MockEngine>, Bridge) {
        let engine = MockEngine::shared();
        let bridge = Bridge::new(engine.clone(), classes(), BridgeConfig::default()).unwrap();
        (engine, bridge)
    }

    #[test]
    fn test_levels_gate_instance_creation() {
        let (_engine, bridge) = bridge();
        assert_eq!(bridge.level(), None);
        assert_eq!(bridge.create_instance("Score"), Err(BridgeError::NotInitialized));

        bridge.initialize(InitLevel::Core);
        bridge.initialize(InitLevel::Servers);
        assert!(!bridge.is_ready());
        bridge.initialize(InitLevel::Scene);
        assert!(bridge.is_ready());
        assert_eq!(bridge.level(), Some(InitLevel::Scene));

        bridge.deinitialize(InitLevel::Scene);
        assert_eq!(bridge.level(), Some(InitLevel::Servers));
        assert!(!bridge.is_ready());
        bridge.deinitialize(InitLevel::Core);
        assert_eq!(bridge.level(), None);
    }

    #[test]
    fn test_create_call_free() {
        let (engine, bridge) = bridge();
        bridge.initialize(InitLevel::Scene);

        let object = bridge.create_instance("Score").unwrap();
        let (class, instance) = engine.instance_of(object).unwrap();
        assert_eq!(class, "Score");
        let instance = instance as *mut InstanceCell;

        let mut ret: [Word; 1] = [0];
        let outcome = unsafe {
            bridge.call_virtual(instance, "get_score", std::ptr::null(), ret.as_mut_ptr() as *mut c_void)
        };
        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(ret, [10]);

        let outcome = unsafe {
            bridge.call_virtual(instance, "_ready", std::ptr::null(), std::ptr::null_mut())
        };
        assert_eq!(outcome, DispatchOutcome::Defaulted);

        unsafe { bridge.free_instance(instance) };
    }

    #[test]
    fn test_null_instance_fails() {
        let (_engine, bridge) = bridge();
        let outcome = unsafe {
            bridge.call_virtual(std::ptr::null_mut(), "get_score", std::ptr::null(), std::ptr::null_mut())
        };
        assert!(matches!(outcome, DispatchOutcome::Failed(BridgeError::ArgumentError(_))));
    }

    #[test]
    fn test_virtual_queries() {
        let (_engine, bridge) = bridge();
        assert!(bridge.has_virtual("Score", "_ready"));
        assert!(!bridge.has_virtual("Node", "get_score"));
        assert_eq!(bridge.virtual_signature("Score", "get_score").unwrap().ret, 1);
        assert!(matches!(
            bridge.virtual_signature("Node", "get_score"),
            Err(BridgeError::MissingVirtualImplementation { .. })
        ));
    }

    #[test]
    fn test_registry_is_per_bridge() {
        let (_a_engine, a) = bridge();
        let (b_engine, b) = bridge();
        let first = a.with_registry(|r| r as *const HandleRegistry);
        assert_eq!(a.with_registry(|r| r as *const HandleRegistry), first);

        b.with_registry(|r| {
            let _ = r.new_string("leftover");
        });
        // Switching back drops b's registry, releasing what it owned.
        a.with_registry(|_| ());
        assert_eq!(b_engine.live_strings(), 0);
    }

    #[test]
    fn test_with_registry_is_reentrant() {
        let (_engine, bridge) = bridge();
        let depth = bridge.with_registry(|outer| {
            let _s = outer.new_string("outer");
            bridge.with_registry(|inner| inner.live_count())
        });
        assert_eq!(depth, 1);
    }

    #[test]
    fn test_config_depth_reaches_classes() {
        let engine = MockEngine::shared();
        let config = BridgeConfig {
            max_fallback_depth: 3,
            ..BridgeConfig::default()
        };
        let bridge = Bridge::new(engine, classes(), config).unwrap();
        assert_eq!(bridge.classes().max_depth(), 3);
    }
}
