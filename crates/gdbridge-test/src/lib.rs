//! Mock engine for exercising the bridge without a running engine
//!
//! [`MockEngine`] implements [`EngineInterface`] entirely in process. It keeps
//! a live-object table, an interned string table and a log of every release
//! and native call, so tests can assert exactly how many times the runtime
//! crossed the boundary.
//!
//! Object pointers are fake addresses and are never dereferenced.

use std::ffi::c_void;
use std::sync::Arc;

use gdbridge_sdk::{
    CallError, EngineInterface, InstanceId, Kind, MethodBind, RawObject, RawString, Word,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Arguments of one native call as the mock saw them.
#[derive(Debug, Clone)]
pub struct MockCall {
    /// Declaring class of the method
    pub class: String,
    /// Method name
    pub method: String,
    /// Receiver object
    pub receiver: RawObject,
    /// Argument slots, one word vector per argument
    pub args: Vec<Vec<Word>>,
}

impl MockCall {
    /// First word of argument `index`.
    pub fn word(&self, index: usize) -> Word {
        self.args[index][0]
    }
}

/// Body of a pointer-call method: returns the return slot words.
pub type PtrBody = Arc<dyn Fn(&MockCall) -> Vec<Word> + Send + Sync>;

/// Body of a variadic method: returns a 3-word variant or a call error.
pub type VarBody = Arc<dyn Fn(&MockCall) -> Result<[Word; 3], CallError> + Send + Sync>;

enum Body {
    Ptr {
        arg_widths: Vec<usize>,
        ret_width: usize,
        body: PtrBody,
    },
    Var(VarBody),
}

struct MethodDef {
    class: String,
    method: String,
    hash: i64,
    body: Body,
}

#[derive(Debug, Clone)]
struct MockObject {
    id: InstanceId,
    class: String,
    instance: Option<(String, usize)>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    next_ptr: u64,
    next_string: u64,
    objects: FxHashMap<Word, MockObject>,
    by_id: FxHashMap<InstanceId, Word>,
    strings: FxHashMap<Word, String>,
    methods: Vec<MethodDef>,
    releases: Vec<(Kind, Vec<Word>)>,
    native_calls: usize,
    errors: Vec<String>,
}

/// In-process [`EngineInterface`] implementation.
pub struct MockEngine {
    state: Mutex<State>,
}

impl MockEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        MockEngine {
            state: Mutex::new(State {
                next_id: 1,
                next_ptr: 0x1000,
                next_string: 1,
                ..State::default()
            }),
        }
    }

    /// Shared handle, the form the runtime takes.
    pub fn shared() -> Arc<MockEngine> {
        Arc::new(MockEngine::new())
    }

    // ========================================================================
    // Setup
    // ========================================================================

    /// Define a pointer-call method and return its bind.
    pub fn define_method<F>(
        &self,
        class: &str,
        method: &str,
        hash: i64,
        arg_widths: &[usize],
        ret_width: usize,
        body: F,
    ) -> MethodBind
    where
        F: Fn(&MockCall) -> Vec<Word> + Send + Sync + 'static,
    {
        self.push_method(
            class,
            method,
            hash,
            Body::Ptr {
                arg_widths: arg_widths.to_vec(),
                ret_width,
                body: Arc::new(body),
            },
        )
    }

    /// Define a variadic method and return its bind.
    pub fn define_varcall<F>(&self, class: &str, method: &str, hash: i64, body: F) -> MethodBind
    where
        F: Fn(&MockCall) -> Result<[Word; 3], CallError> + Send + Sync + 'static,
    {
        self.push_method(class, method, hash, Body::Var(Arc::new(body)))
    }

    fn push_method(&self, class: &str, method: &str, hash: i64, body: Body) -> MethodBind {
        let mut state = self.state.lock();
        state.methods.push(MethodDef {
            class: class.to_string(),
            method: method.to_string(),
            hash,
            body,
        });
        MethodBind(state.methods.len())
    }

    /// Create a live object of `class`.
    pub fn spawn_object(&self, class: &str) -> (RawObject, InstanceId) {
        let mut state = self.state.lock();
        let ptr = state.next_ptr;
        state.next_ptr += 0x10;
        let id = InstanceId(state.next_id);
        state.next_id += 1;
        state.objects.insert(
            ptr,
            MockObject {
                id,
                class: class.to_string(),
                instance: None,
            },
        );
        state.by_id.insert(id, ptr);
        (RawObject::from_words([ptr]), id)
    }

    /// Destroy an object; its instance id becomes stale.
    pub fn destroy_object(&self, object: RawObject) {
        let mut state = self.state.lock();
        if let Some(obj) = state.objects.remove(&object.words()[0]) {
            state.by_id.remove(&obj.id);
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Every release in call order.
    pub fn releases(&self) -> Vec<(Kind, Vec<Word>)> {
        self.state.lock().releases.clone()
    }

    /// Number of releases.
    pub fn release_count(&self) -> usize {
        self.state.lock().releases.len()
    }

    /// Number of releases of one kind.
    pub fn release_count_of(&self, kind: Kind) -> usize {
        self.state
            .lock()
            .releases
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    /// Number of pointer and variadic calls issued.
    pub fn native_calls(&self) -> usize {
        self.state.lock().native_calls
    }

    /// Messages passed to `print_error`.
    pub fn errors(&self) -> Vec<String> {
        self.state.lock().errors.clone()
    }

    /// Contents of a live engine string.
    pub fn string(&self, raw: RawString) -> Option<String> {
        self.state.lock().strings.get(&raw.words()[0]).cloned()
    }

    /// Number of engine strings not yet released.
    pub fn live_strings(&self) -> usize {
        self.state.lock().strings.len()
    }

    /// Class of a live object.
    pub fn class_of(&self, object: RawObject) -> Option<String> {
        self.state
            .lock()
            .objects
            .get(&object.words()[0])
            .map(|o| o.class.clone())
    }

    /// Host instance attached to an object by `set_instance`.
    pub fn instance_of(&self, object: RawObject) -> Option<(String, *mut c_void)> {
        self.state
            .lock()
            .objects
            .get(&object.words()[0])
            .and_then(|o| o.instance.clone())
            .map(|(class, ptr)| (class, ptr as *mut c_void))
    }

    fn lookup(&self, bind: MethodBind) -> Option<(String, String, Body)> {
        let state = self.state.lock();
        let def = state.methods.get(bind.0.checked_sub(1)?)?;
        let body = match &def.body {
            Body::Ptr {
                arg_widths,
                ret_width,
                body,
            } => Body::Ptr {
                arg_widths: arg_widths.clone(),
                ret_width: *ret_width,
                body: Arc::clone(body),
            },
            Body::Var(body) => Body::Var(Arc::clone(body)),
        };
        Some((def.class.clone(), def.method.clone(), body))
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

unsafe fn read_words(ptr: *const c_void, width: usize) -> Vec<Word> {
    std::slice::from_raw_parts(ptr as *const Word, width).to_vec()
}

impl EngineInterface for MockEngine {
    fn method_bind(&self, class: &str, method: &str, hash: i64) -> Option<MethodBind> {
        let state = self.state.lock();
        state
            .methods
            .iter()
            .position(|m| m.class == class && m.method == method && m.hash == hash)
            .map(|index| MethodBind(index + 1))
    }

    unsafe fn ptrcall(
        &self,
        bind: MethodBind,
        receiver: RawObject,
        args: *const *const c_void,
        ret: *mut c_void,
    ) {
        self.state.lock().native_calls += 1;
        let Some((class, method, Body::Ptr { arg_widths, ret_width, body })) = self.lookup(bind)
        else {
            panic!("ptrcall on unknown or variadic bind {:?}", bind);
        };
        let args = arg_widths
            .iter()
            .enumerate()
            .map(|(i, &width)| read_words(*args.add(i), width))
            .collect();
        let call = MockCall {
            class,
            method,
            receiver,
            args,
        };
        let out = body(&call);
        let ret = ret as *mut Word;
        for (i, word) in out.iter().take(ret_width).enumerate() {
            *ret.add(i) = *word;
        }
    }

    unsafe fn varcall(
        &self,
        bind: MethodBind,
        receiver: RawObject,
        args: *const *const c_void,
        arg_count: usize,
        ret: *mut c_void,
        error: &mut CallError,
    ) {
        self.state.lock().native_calls += 1;
        let Some((class, method, Body::Var(body))) = self.lookup(bind) else {
            *error = CallError {
                error: 1,
                argument: 0,
                expected: 0,
            };
            return;
        };
        let args = (0..arg_count).map(|i| read_words(*args.add(i), 3)).collect();
        let call = MockCall {
            class,
            method,
            receiver,
            args,
        };
        match body(&call) {
            Ok(words) => {
                let ret = ret as *mut Word;
                for (i, word) in words.iter().enumerate() {
                    *ret.add(i) = *word;
                }
            }
            Err(err) => *error = err,
        }
    }

    fn release(&self, kind: Kind, words: &[Word]) {
        let mut state = self.state.lock();
        if kind == Kind::String {
            state.strings.remove(&words[0]);
        }
        state.releases.push((kind, words.to_vec()));
    }

    fn instance_id(&self, object: RawObject) -> InstanceId {
        self.state
            .lock()
            .objects
            .get(&object.words()[0])
            .map(|o| o.id)
            .unwrap_or(InstanceId::NONE)
    }

    fn object_from_instance_id(&self, id: InstanceId) -> Option<RawObject> {
        self.state
            .lock()
            .by_id
            .get(&id)
            .map(|&ptr| RawObject::from_words([ptr]))
    }

    fn construct_object(&self, class: &str) -> Option<RawObject> {
        Some(self.spawn_object(class).0)
    }

    fn set_instance(&self, object: RawObject, class: &str, instance: *mut c_void) {
        if let Some(obj) = self.state.lock().objects.get_mut(&object.words()[0]) {
            obj.instance = Some((class.to_string(), instance as usize));
        }
    }

    fn string_new(&self, text: &str) -> RawString {
        let mut state = self.state.lock();
        let key = state.next_string;
        state.next_string += 1;
        state.strings.insert(key, text.to_string());
        RawString::from_words([key, text.len() as Word])
    }

    fn string_read(&self, string: RawString) -> String {
        self.string(string).unwrap_or_default()
    }

    fn print_error(&self, message: &str, function: &str, file: &str, line: u32) {
        self.state
            .lock()
            .errors
            .push(format!("{} ({} at {}:{})", message, function, file, line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_objects_and_ids() {
        let engine = MockEngine::new();
        let (obj, id) = engine.spawn_object("Node");
        assert_eq!(engine.instance_id(obj), id);
        assert_eq!(engine.object_from_instance_id(id), Some(obj));
        assert_eq!(engine.class_of(obj).as_deref(), Some("Node"));

        engine.destroy_object(obj);
        assert_eq!(engine.object_from_instance_id(id), None);
        assert_eq!(engine.instance_id(obj), InstanceId::NONE);
    }

    #[test]
    fn test_strings_and_releases() {
        let engine = MockEngine::new();
        let s = engine.string_new("hello");
        assert_eq!(engine.string_read(s), "hello");
        assert_eq!(engine.live_strings(), 1);

        engine.release(Kind::String, s.as_words());
        assert_eq!(engine.live_strings(), 0);
        assert_eq!(engine.release_count_of(Kind::String), 1);
        assert_eq!(engine.releases()[0].1, s.as_words().to_vec());
    }

    #[test]
    fn test_ptrcall_reads_declared_widths() {
        let engine = MockEngine::new();
        let bind = engine.define_method("Node", "sum", 7, &[1, 2], 1, |call| {
            vec![call.args[0][0] + call.args[1][0] + call.args[1][1]]
        });
        assert_eq!(engine.method_bind("Node", "sum", 7), Some(bind));
        assert_eq!(engine.method_bind("Node", "sum", 8), None);

        let a: [Word; 1] = [1];
        let b: [Word; 2] = [10, 100];
        let args = [a.as_ptr() as *const c_void, b.as_ptr() as *const c_void];
        let mut ret: [Word; 1] = [0];
        unsafe {
            engine.ptrcall(
                bind,
                RawObject::NULL,
                args.as_ptr(),
                ret.as_mut_ptr() as *mut c_void,
            );
        }
        assert_eq!(ret, [111]);
        assert_eq!(engine.native_calls(), 1);
    }

    #[test]
    fn test_varcall_reports_errors() {
        let engine = MockEngine::new();
        let bind = engine.define_varcall("Object", "call", 0, |call| {
            if call.args.is_empty() {
                Err(CallError {
                    error: 4,
                    argument: 0,
                    expected: 1,
                })
            } else {
                Ok([2, call.args.len() as Word, 0])
            }
        });

        let mut ret: [Word; 3] = [0; 3];
        let mut error = CallError::default();
        unsafe {
            engine.varcall(
                bind,
                RawObject::NULL,
                std::ptr::null(),
                0,
                ret.as_mut_ptr() as *mut c_void,
                &mut error,
            );
        }
        assert_eq!(error.error, 4);
        assert_eq!(ret, [0; 3]);
    }
}
