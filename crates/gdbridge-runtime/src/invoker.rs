//! Method-bind invoker
//!
//! [`MethodTable`] is built once at class-registration time by resolving each
//! (class, method, hash) to an engine method bind. After resolution a call is
//! a direct index into a Vec: no lookup by name on the call path.
//!
//! Every invoke issues exactly one native call. Frames are owned locals, so
//! they are freed on every exit path.

use std::ffi::c_void;
use std::fmt;

use gdbridge_sdk::{
    BridgeError, BridgeResult, CallError, EngineInterface, ErrorCode, MethodBind, RawObject,
    RawVariant, SlotWords, Variant, Wire, Word,
};

use crate::frame::{wire_width_violation, ArgList, ArgWords, CallFrame};
use crate::handle::{Handle, HandleKind, HandleRegistry, ObjectKind, VariantKind};

// ============================================================================
// Method Table
// ============================================================================

/// Static description of one engine method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSpec {
    /// Declaring engine class
    pub class: &'static str,
    /// Method name
    pub method: &'static str,
    /// Signature hash
    pub hash: i64,
    /// Width of each parameter in words
    pub args: &'static [usize],
    /// Width of the return value in words
    pub ret: usize,
    /// Return slot carries an engine error code
    pub returns_error: bool,
}

impl MethodSpec {
    /// Describe a method.
    pub const fn new(
        class: &'static str,
        method: &'static str,
        hash: i64,
        args: &'static [usize],
        ret: usize,
    ) -> Self {
        MethodSpec {
            class,
            method,
            hash,
            args,
            ret,
            returns_error: false,
        }
    }

    /// Mark the return slot as an engine error code.
    pub const fn returning_error(self) -> Self {
        MethodSpec {
            returns_error: true,
            ..self
        }
    }
}

/// Index of a resolved method in a [`MethodTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodSlot(u32);

struct ResolvedMethod {
    spec: MethodSpec,
    bind: MethodBind,
    arg_words: usize,
}

/// Method binds resolved once and cached.
pub struct MethodTable {
    methods: Vec<ResolvedMethod>,
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("count", &self.methods.len())
            .finish()
    }
}

impl MethodTable {
    /// Resolve every spec against the engine.
    ///
    /// Fails on the first method the engine does not know.
    pub fn resolve(engine: &dyn EngineInterface, specs: &[MethodSpec]) -> BridgeResult<Self> {
        let mut methods = Vec::with_capacity(specs.len());
        for spec in specs {
            if let Some(&width) = spec.args.iter().chain([&spec.ret]).find(|&&w| w > 3) {
                return Err(BridgeError::ArgumentError(format!(
                    "{}::{} declares a {}-word slot",
                    spec.class, spec.method, width
                )));
            }
            let bind = engine
                .method_bind(spec.class, spec.method, spec.hash)
                .ok_or_else(|| BridgeError::UnresolvedMethod {
                    class: spec.class.to_string(),
                    method: spec.method.to_string(),
                    hash: spec.hash,
                })?;
            methods.push(ResolvedMethod {
                spec: *spec,
                bind,
                arg_words: spec.args.iter().sum(),
            });
        }
        tracing::debug!(target: "gdbridge::invoker", count = methods.len(), "Resolved method table");
        Ok(MethodTable { methods })
    }

    /// Table with no methods.
    pub fn empty() -> Self {
        MethodTable {
            methods: Vec::new(),
        }
    }

    /// Slot of a method, for use when wiring generated wrappers.
    pub fn slot(&self, class: &str, method: &str) -> Option<MethodSlot> {
        self.methods
            .iter()
            .position(|m| m.spec.class == class && m.spec.method == method)
            .map(|index| MethodSlot(index as u32))
    }

    /// Spec of a resolved method.
    pub fn spec(&self, slot: MethodSlot) -> Option<&MethodSpec> {
        self.methods.get(slot.0 as usize).map(|m| &m.spec)
    }

    /// Cached method bind.
    pub fn bind(&self, slot: MethodSlot) -> Option<MethodBind> {
        self.methods.get(slot.0 as usize).map(|m| m.bind)
    }

    /// Number of resolved methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// True when no methods are resolved.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    fn get(&self, slot: MethodSlot) -> BridgeResult<&ResolvedMethod> {
        self.methods.get(slot.0 as usize).ok_or_else(|| {
            BridgeError::ArgumentError(format!("Invalid method slot: {}", slot.0))
        })
    }
}

// ============================================================================
// Encoded Values
// ============================================================================

/// A value already encoded into its wire words, for the dynamic call path.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EncodedArg {
    words: [Word; 3],
    width: usize,
}

impl EncodedArg {
    /// Encode a typed value.
    pub fn new<T: Wire>(value: T) -> Self {
        Self::from_words(value.to_slot().as_words())
    }

    /// Wrap raw words. More than three words is a wire width violation.
    #[track_caller]
    pub fn from_words(words: &[Word]) -> Self {
        if words.len() > 3 {
            wire_width_violation("EncodedArg", 3, words.len());
        }
        let mut buf = [0; 3];
        buf[..words.len()].copy_from_slice(words);
        EncodedArg {
            words: buf,
            width: words.len(),
        }
    }

    /// Width in words.
    pub fn width(&self) -> usize {
        self.width
    }

    /// The encoded words.
    pub fn words(&self) -> &[Word] {
        &self.words[..self.width]
    }
}

impl fmt::Debug for EncodedArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Encoded{:x?}", self.words())
    }
}

/// Return slot of a dynamic call.
pub type EncodedResult = EncodedArg;

impl EncodedResult {
    /// Decode as `T`. A width mismatch is a wire width violation.
    #[track_caller]
    pub fn decode<T: Wire>(&self) -> T {
        if T::WIDTH != self.width {
            wire_width_violation("EncodedResult::decode", T::WIDTH, self.width);
        }
        T::from_slot(T::Slot::from_words(self.words()))
    }
}

// ============================================================================
// Invoker
// ============================================================================

/// Issues native calls through a resolved [`MethodTable`].
pub struct Invoker<'a> {
    registry: &'a HandleRegistry,
    table: &'a MethodTable,
}

impl<'a> Invoker<'a> {
    /// Create an invoker over a registry and table.
    pub fn new(registry: &'a HandleRegistry, table: &'a MethodTable) -> Self {
        Invoker { registry, table }
    }

    fn engine(&self) -> &dyn EngineInterface {
        self.registry.engine().as_ref()
    }

    /// Typed call on a receiver.
    ///
    /// A released receiver fails before any native call is made.
    pub fn call<A: ArgList, R: Wire>(
        &self,
        slot: MethodSlot,
        receiver: &Handle<ObjectKind>,
        args: A,
    ) -> BridgeResult<R> {
        let receiver = self.registry.get(receiver)?;
        self.ptrcall(slot, receiver, args)
    }

    /// Typed call of a static method.
    pub fn call_static<A: ArgList, R: Wire>(&self, slot: MethodSlot, args: A) -> BridgeResult<R> {
        self.ptrcall(slot, RawObject::NULL, args)
    }

    /// Call a method whose return slot is an engine error code.
    pub fn call_status<A: ArgList>(
        &self,
        slot: MethodSlot,
        receiver: &Handle<ObjectKind>,
        args: A,
    ) -> BridgeResult<()> {
        let code: ErrorCode = self.call(slot, receiver, args)?;
        code.into_result().map_err(BridgeError::from)
    }

    /// Call a method that transfers ownership of its result to the host.
    pub fn call_owned<A: ArgList, K: HandleKind>(
        &self,
        slot: MethodSlot,
        receiver: &Handle<ObjectKind>,
        args: A,
    ) -> BridgeResult<Handle<K>> {
        let raw: K::Raw = self.call(slot, receiver, args)?;
        Ok(self.registry.acquire_owned(raw))
    }

    /// Static variant of [`Invoker::call_owned`].
    pub fn call_static_owned<A: ArgList, K: HandleKind>(
        &self,
        slot: MethodSlot,
        args: A,
    ) -> BridgeResult<Handle<K>> {
        let raw: K::Raw = self.call_static(slot, args)?;
        Ok(self.registry.acquire_owned(raw))
    }

    /// Call a method whose result stays valid only while the receiver lives.
    pub fn call_bound<A: ArgList, K: HandleKind>(
        &self,
        slot: MethodSlot,
        receiver: &Handle<ObjectKind>,
        args: A,
    ) -> BridgeResult<Handle<K>> {
        let raw: K::Raw = self.call(slot, receiver, args)?;
        self.registry.bind_to_parent(raw, receiver)
    }

    fn ptrcall<A: ArgList, R: Wire>(
        &self,
        slot: MethodSlot,
        receiver: RawObject,
        args: A,
    ) -> BridgeResult<R> {
        let method = self.table.get(slot)?;
        if A::COUNT != method.spec.args.len() || A::WORDS != method.arg_words {
            wire_width_violation(method.spec.method, method.arg_words, A::WORDS);
        }
        if R::WIDTH != method.spec.ret {
            wire_width_violation(method.spec.method, method.spec.ret, R::WIDTH);
        }

        let mut frame = CallFrame::<R>::for_args::<A>();
        args.push_into(&mut frame);
        let (pointers, ret) = frame.pointers();
        tracing::trace!(
            target: "gdbridge::invoker",
            class = method.spec.class,
            method = method.spec.method,
            "ptrcall"
        );
        // SAFETY: one pointer per declared parameter, each addressing a slot of
        // the declared width; `ret` addresses a slot of the declared return width.
        unsafe {
            self.engine()
                .ptrcall(method.bind, receiver, pointers.as_ptr(), ret);
        }
        Ok(frame.read_ret())
    }

    /// Dynamic call with pre-encoded arguments.
    ///
    /// Argument widths are checked against the method spec; a mismatch is a
    /// fatal wire width violation. Error-code methods decode their result.
    pub fn invoke(
        &self,
        slot: MethodSlot,
        receiver: Option<&Handle<ObjectKind>>,
        args: &[EncodedArg],
    ) -> BridgeResult<EncodedResult> {
        let method = self.table.get(slot)?;
        let receiver = match receiver {
            Some(handle) => self.registry.get(handle)?,
            None => RawObject::NULL,
        };
        if args.len() != method.spec.args.len() {
            wire_width_violation(method.spec.method, method.spec.args.len(), args.len());
        }

        let mut words = ArgWords::with_capacity(args.len(), method.arg_words);
        for (arg, &width) in args.iter().zip(method.spec.args) {
            if arg.width() != width {
                wire_width_violation(method.spec.method, width, arg.width());
            }
            words.push(arg.words());
        }
        let pointers = words.pointers();
        let mut ret: [Word; 3] = [0; 3];
        tracing::trace!(
            target: "gdbridge::invoker",
            class = method.spec.class,
            method = method.spec.method,
            "dynamic ptrcall"
        );
        // SAFETY: widths were checked against the spec above; `ret` has room
        // for any return width.
        unsafe {
            self.engine().ptrcall(
                method.bind,
                receiver,
                pointers.as_ptr(),
                ret.as_mut_ptr() as *mut c_void,
            );
        }

        let result = EncodedArg::from_words(&ret[..method.spec.ret]);
        if method.spec.returns_error {
            ErrorCode(ret[0] as i64).into_result()?;
        }
        Ok(result)
    }

    /// Variadic call. The engine reports argument problems as a [`CallError`].
    ///
    /// The returned variant is owned by the host.
    pub fn call_variadic(
        &self,
        slot: MethodSlot,
        receiver: &Handle<ObjectKind>,
        args: &[Variant],
    ) -> BridgeResult<Handle<VariantKind>> {
        let method = self.table.get(slot)?;
        let receiver = self.registry.get(receiver)?;

        let slots: Vec<[Word; 3]> = args.iter().map(|arg| arg.to_slot()).collect();
        let pointers: Vec<*const c_void> = slots
            .iter()
            .map(|slot| slot.as_ptr() as *const c_void)
            .collect();
        let mut ret: [Word; 3] = [0; 3];
        let mut error = CallError::default();
        // SAFETY: `pointers` addresses `args.len()` 3-word variants that live
        // until the call returns; `ret` is a 3-word slot.
        unsafe {
            self.engine().varcall(
                method.bind,
                receiver,
                pointers.as_ptr(),
                pointers.len(),
                ret.as_mut_ptr() as *mut c_void,
                &mut error,
            );
        }
        if !error.is_ok() {
            tracing::debug!(
                target: "gdbridge::invoker",
                class = method.spec.class,
                method = method.spec.method,
                %error,
                "Variadic call rejected"
            );
            return Err(BridgeError::Call(error));
        }
        Ok(self.registry.acquire_owned(RawVariant::from_words(ret)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::StringKind;
    use gdbridge_sdk::{Kind, RawString};
    use gdbridge_test::MockEngine;
    use std::sync::Arc;

    const GET_NAME: MethodSpec = MethodSpec::new("Node", "get_name", 1, &[], 2);
    const ADD_CHILD: MethodSpec = MethodSpec::new("Node", "add_child", 2, &[1, 1], 0);
    const SCALE: MethodSpec = MethodSpec::new("Node", "scale", 3, &[1, 1], 1);
    const SAVE: MethodSpec = MethodSpec::new("Node", "save", 4, &[2], 1).returning_error();
    const CALL: MethodSpec = MethodSpec::new("Object", "call", 5, &[], 3);

    fn setup() -> (Arc<MockEngine>, HandleRegistry, MethodTable) {
        let engine = MockEngine::shared();
        let names = Arc::clone(&engine);
        engine.define_method("Node", "get_name", 1, &[], 2, move |_| {
            names.string_new("Player").words().to_vec()
        });
        engine.define_method("Node", "add_child", 2, &[1, 1], 0, |_| vec![]);
        engine.define_method("Node", "scale", 3, &[1, 1], 1, |call| {
            let x = f64::from_bits(call.word(0));
            vec![(x * call.word(1) as f64).to_bits()]
        });
        engine.define_method("Node", "save", 4, &[2], 1, |call| {
            vec![if call.args[0][1] == 0 { 31 } else { 0 }]
        });
        engine.define_varcall("Object", "call", 5, |call| {
            if call.args.len() > 2 {
                return Err(CallError {
                    error: 3,
                    argument: 0,
                    expected: 2,
                });
            }
            Ok([2, call.args.len() as Word, 0])
        });

        let registry = HandleRegistry::new(engine.clone());
        let table =
            MethodTable::resolve(engine.as_ref(), &[GET_NAME, ADD_CHILD, SCALE, SAVE, CALL])
                .unwrap();
        (engine, registry, table)
    }

    #[test]
    fn test_resolve_caches_slots() {
        let (_engine, _registry, table) = setup();
        assert_eq!(table.len(), 5);
        let slot = table.slot("Node", "scale").unwrap();
        assert_eq!(table.spec(slot), Some(&SCALE));
        assert!(table.bind(slot).is_some());
        assert!(table.slot("Node", "missing").is_none());
        assert!(MethodTable::empty().is_empty());
    }

    #[test]
    fn test_resolve_unknown_method_fails() {
        let engine = MockEngine::new();
        let err = MethodTable::resolve(&engine, &[GET_NAME]).unwrap_err();
        assert_eq!(
            err,
            BridgeError::UnresolvedMethod {
                class: "Node".into(),
                method: "get_name".into(),
                hash: 1
            }
        );
    }

    #[test]
    fn test_typed_call_issues_one_native_call() {
        let (engine, registry, table) = setup();
        let (obj, _) = engine.spawn_object("Node");
        let node = registry.borrow::<ObjectKind>(obj);
        let invoker = Invoker::new(&registry, &table);

        let scaled: f64 = invoker
            .call(table.slot("Node", "scale").unwrap(), &node, (1.5f64, 4i64))
            .unwrap();
        assert_eq!(scaled, 6.0);
        assert_eq!(engine.native_calls(), 1);

        let child = RawObject::from_words([0x20]);
        let _: () = invoker
            .call(table.slot("Node", "add_child").unwrap(), &node, (child, true))
            .unwrap();
        assert_eq!(engine.native_calls(), 2);
    }

    #[test]
    fn test_stale_receiver_makes_no_native_call() {
        let (engine, registry, table) = setup();
        let (obj, _) = engine.spawn_object("Node");
        let invoker = Invoker::new(&registry, &table);
        let node = {
            let _scope = registry.enter_scope();
            registry.borrow::<ObjectKind>(obj)
        };
        let result: BridgeResult<f64> =
            invoker.call(table.slot("Node", "scale").unwrap(), &node, (1.0f64, 1i64));
        assert_eq!(result, Err(BridgeError::Released));
        assert_eq!(engine.native_calls(), 0);
    }

    #[test]
    fn test_status_call_decodes_error_codes() {
        let (engine, registry, table) = setup();
        let (obj, _) = engine.spawn_object("Node");
        let node = registry.borrow::<ObjectKind>(obj);
        let invoker = Invoker::new(&registry, &table);
        let save = table.slot("Node", "save").unwrap();

        assert!(invoker
            .call_status(save, &node, (RawString::from_words([1, 1]),))
            .is_ok());
        assert_eq!(
            invoker.call_status(save, &node, (RawString::NULL,)),
            Err(BridgeError::NativeCall(gdbridge_sdk::EngineError::InvalidParameter))
        );
    }

    #[test]
    fn test_owned_result_released_with_scope() {
        let (engine, registry, table) = setup();
        let (obj, _) = engine.spawn_object("Node");
        let invoker = Invoker::new(&registry, &table);
        let get_name = table.slot("Node", "get_name").unwrap();

        registry.with_scope(|_| {
            let node = registry.borrow::<ObjectKind>(obj);
            let name: Handle<StringKind> = invoker.call_owned(get_name, &node, ()).unwrap();
            assert_eq!(registry.read_string(&name).unwrap(), "Player");
        });
        assert_eq!(engine.release_count_of(Kind::String), 1);
        assert_eq!(engine.release_count_of(Kind::Object), 0);
        assert_eq!(engine.live_strings(), 0);
    }

    #[test]
    fn test_bound_result_dies_with_receiver() {
        let (engine, registry, table) = setup();
        let (obj, _) = engine.spawn_object("Node");
        let invoker = Invoker::new(&registry, &table);
        let get_name = table.slot("Node", "get_name").unwrap();

        let name = registry.with_scope(|_| {
            let node = registry.borrow::<ObjectKind>(obj);
            let name: Handle<StringKind> = invoker.call_bound(get_name, &node, ()).unwrap();
            assert!(registry.is_live(&name));
            name
        });
        assert!(!registry.is_live(&name));
        assert_eq!(engine.release_count(), 0);
    }

    #[test]
    fn test_dynamic_invoke() {
        let (engine, registry, table) = setup();
        let (obj, _) = engine.spawn_object("Node");
        let node = registry.borrow::<ObjectKind>(obj);
        let invoker = Invoker::new(&registry, &table);

        let result = invoker
            .invoke(
                table.slot("Node", "scale").unwrap(),
                Some(&node),
                &[EncodedArg::new(2.0f64), EncodedArg::new(3i64)],
            )
            .unwrap();
        assert_eq!(result.width(), 1);
        assert_eq!(result.decode::<f64>(), 6.0);

        let err = invoker
            .invoke(
                table.slot("Node", "save").unwrap(),
                Some(&node),
                &[EncodedArg::new(RawString::NULL)],
            )
            .unwrap_err();
        assert!(matches!(err, BridgeError::NativeCall(_)));
        assert_eq!(engine.native_calls(), 2);
    }

    #[test]
    #[should_panic(expected = "wire width violation")]
    fn test_dynamic_width_mismatch_is_fatal() {
        let (engine, registry, table) = setup();
        let (obj, _) = engine.spawn_object("Node");
        let node = registry.borrow::<ObjectKind>(obj);
        let invoker = Invoker::new(&registry, &table);
        let _ = invoker.invoke(
            table.slot("Node", "scale").unwrap(),
            Some(&node),
            &[EncodedArg::new(Variant::Nil), EncodedArg::new(3i64)],
        );
    }

    #[test]
    #[should_panic(expected = "wire width violation")]
    fn test_decode_width_mismatch_is_fatal() {
        let result = EncodedArg::new(7i64);
        let _ = result.decode::<RawString>();
    }

    #[test]
    fn test_variadic_call() {
        let (engine, registry, table) = setup();
        let (obj, _) = engine.spawn_object("Object");
        let target = registry.borrow::<ObjectKind>(obj);
        let invoker = Invoker::new(&registry, &table);
        let call = table.slot("Object", "call").unwrap();

        let result = invoker
            .call_variadic(call, &target, &[Variant::Int(1), Variant::Bool(true)])
            .unwrap();
        assert_eq!(registry.variant(&result), Ok(Variant::Int(2)));
        assert_eq!(result.ownership(), crate::handle::Ownership::Owned);

        let err = invoker
            .call_variadic(call, &target, &[Variant::Nil, Variant::Nil, Variant::Nil])
            .unwrap_err();
        match err {
            BridgeError::Call(e) => {
                assert_eq!(e.kind(), Some(gdbridge_sdk::CallErrorKind::TooManyArguments));
                assert_eq!(e.expected, 2);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
