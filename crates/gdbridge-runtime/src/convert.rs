//! Conversions for engine-initiated (virtual) calls
//!
//! The engine passes an untyped array of argument pointers and a back-buffer
//! for the result. [`VirtualArgs`] decodes the array according to the host
//! function's static parameter types; [`IntoVirtualRet`] encodes the result.
//!
//! Handles decoded from arguments are borrowed unless the parameter is
//! declared as [`Transferred`].

use std::ffi::c_void;

use gdbridge_sdk::{
    BridgeError, BridgeResult, ErrorCode, InstanceId, RawHandle, RawString, SlotWords, Variant,
    Vector2, Vector2i, Wire, Word,
};

use crate::handle::{Handle, HandleKind, HandleRegistry, Ownership};

/// Read a slot the engine wrote; virtual argument slots carry no alignment
/// guarantee.
///
/// # Safety
/// `ptr` must address `T::WIDTH` readable words.
#[inline]
unsafe fn read_slot<T: Wire>(ptr: *const c_void) -> T {
    T::from_slot(std::ptr::read_unaligned(ptr as *const T::Slot))
}

#[inline]
fn widen<T: Wire>(value: T) -> [Word; 3] {
    let slot = value.to_slot();
    let mut out = [0; 3];
    out[..T::WIDTH].copy_from_slice(slot.as_words());
    out
}

// ============================================================================
// Arguments
// ============================================================================

/// A parameter type the engine can pass to a virtual method.
pub trait FromVirtualArg: Sized {
    /// Slot width in words.
    const WIDTH: usize;

    /// Decode one argument.
    ///
    /// # Safety
    /// `ptr` must address `Self::WIDTH` readable words.
    unsafe fn from_virtual_arg(ptr: *const c_void, registry: &HandleRegistry)
        -> BridgeResult<Self>;
}

macro_rules! impl_wire_arg {
    ($($ty:ty),* $(,)?) => {$(
        impl FromVirtualArg for $ty {
            const WIDTH: usize = <$ty as Wire>::WIDTH;

            #[inline]
            unsafe fn from_virtual_arg(
                ptr: *const c_void,
                _registry: &HandleRegistry,
            ) -> BridgeResult<Self> {
                Ok(read_slot::<$ty>(ptr))
            }
        }
    )*};
}

impl_wire_arg!(
    bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, InstanceId, ErrorCode,
    Vector2, Vector2i, Variant,
);

impl<const N: usize> FromVirtualArg for RawHandle<N>
where
    [Word; N]: SlotWords,
{
    const WIDTH: usize = N;

    #[inline]
    unsafe fn from_virtual_arg(ptr: *const c_void, _registry: &HandleRegistry) -> BridgeResult<Self> {
        Ok(read_slot::<RawHandle<N>>(ptr))
    }
}

/// Borrowed for the duration of the call.
impl<K: HandleKind> FromVirtualArg for Handle<K> {
    const WIDTH: usize = <K::Raw as Wire>::WIDTH;

    unsafe fn from_virtual_arg(ptr: *const c_void, registry: &HandleRegistry) -> BridgeResult<Self> {
        Ok(registry.borrow(read_slot::<K::Raw>(ptr)))
    }
}

/// Parameter whose ownership the engine hands to the host.
#[derive(Debug)]
pub struct Transferred<K: HandleKind>(pub Handle<K>);

impl<K: HandleKind> FromVirtualArg for Transferred<K> {
    const WIDTH: usize = <K::Raw as Wire>::WIDTH;

    unsafe fn from_virtual_arg(ptr: *const c_void, registry: &HandleRegistry) -> BridgeResult<Self> {
        Ok(Transferred(registry.acquire_owned(read_slot::<K::Raw>(ptr))))
    }
}

/// Copied out of a borrowed engine string.
impl FromVirtualArg for String {
    const WIDTH: usize = <RawString as Wire>::WIDTH;

    unsafe fn from_virtual_arg(ptr: *const c_void, registry: &HandleRegistry) -> BridgeResult<Self> {
        let raw = read_slot::<RawString>(ptr);
        Ok(registry.engine().string_read(raw))
    }
}

/// A statically typed virtual parameter list.
pub trait VirtualArgs: Sized {
    /// Number of parameters.
    const COUNT: usize;

    /// Width of each parameter in declared order.
    fn widths() -> Vec<usize>;

    /// Decode every argument in declared order.
    ///
    /// # Safety
    /// `args` must point to `Self::COUNT` pointers, each addressing a slot of
    /// the matching parameter's width. Null pointers are rejected.
    unsafe fn decode(args: *const *const c_void, registry: &HandleRegistry) -> BridgeResult<Self>;
}

fn null_argument(index: usize) -> BridgeError {
    BridgeError::ArgumentError(format!("Null pointer for virtual argument {}", index))
}

macro_rules! impl_virtual_args {
    ($count:literal; $($T:ident $idx:tt),*) => {
        impl<$($T: FromVirtualArg),*> VirtualArgs for ($($T,)*) {
            const COUNT: usize = $count;

            fn widths() -> Vec<usize> {
                vec![$(<$T as FromVirtualArg>::WIDTH),*]
            }

            #[allow(unused_variables)]
            unsafe fn decode(
                args: *const *const c_void,
                registry: &HandleRegistry,
            ) -> BridgeResult<Self> {
                if $count > 0 && args.is_null() {
                    return Err(null_argument(0));
                }
                Ok(($(
                    {
                        let ptr = *args.add($idx);
                        if ptr.is_null() {
                            return Err(null_argument($idx));
                        }
                        <$T as FromVirtualArg>::from_virtual_arg(ptr, registry)?
                    },
                )*))
            }
        }
    };
}

impl_virtual_args!(0;);
impl_virtual_args!(1; A 0);
impl_virtual_args!(2; A 0, B 1);
impl_virtual_args!(3; A 0, B 1, C 2);
impl_virtual_args!(4; A 0, B 1, C 2, D 3);
impl_virtual_args!(5; A 0, B 1, C 2, D 3, E 4);
impl_virtual_args!(6; A 0, B 1, C 2, D 3, E 4, F 5);
impl_virtual_args!(7; A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_virtual_args!(8; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

// ============================================================================
// Return Values
// ============================================================================

/// A type a virtual implementation can return to the engine.
pub trait IntoVirtualRet {
    /// Back-buffer width in words.
    const WIDTH: usize;

    /// Encode into words; only the first `Self::WIDTH` are written back.
    fn into_virtual_ret(self, registry: &HandleRegistry) -> BridgeResult<[Word; 3]>;

    /// Split off an error the host function returned, before encoding.
    fn host_result(self) -> BridgeResult<Self>
    where
        Self: Sized,
    {
        Ok(self)
    }
}

macro_rules! impl_wire_ret {
    ($($ty:ty),* $(,)?) => {$(
        impl IntoVirtualRet for $ty {
            const WIDTH: usize = <$ty as Wire>::WIDTH;

            #[inline]
            fn into_virtual_ret(self, _registry: &HandleRegistry) -> BridgeResult<[Word; 3]> {
                Ok(widen(self))
            }
        }
    )*};
}

impl_wire_ret!(
    (), bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, InstanceId,
    ErrorCode, Vector2, Vector2i, Variant,
);

impl<const N: usize> IntoVirtualRet for RawHandle<N>
where
    [Word; N]: SlotWords,
{
    const WIDTH: usize = N;

    fn into_virtual_ret(self, _registry: &HandleRegistry) -> BridgeResult<[Word; 3]> {
        Ok(widen(self))
    }
}

/// A new engine string; the engine owns the result.
impl IntoVirtualRet for String {
    const WIDTH: usize = <RawString as Wire>::WIDTH;

    fn into_virtual_ret(self, registry: &HandleRegistry) -> BridgeResult<[Word; 3]> {
        Ok(widen(registry.engine().string_new(&self)))
    }
}

/// Owned handles are handed over to the engine; others are passed through.
impl<K: HandleKind> IntoVirtualRet for Handle<K> {
    const WIDTH: usize = <K::Raw as Wire>::WIDTH;

    fn into_virtual_ret(self, registry: &HandleRegistry) -> BridgeResult<[Word; 3]> {
        let raw = match self.ownership() {
            Ownership::Owned => registry.detach(self)?,
            _ => registry.get(&self)?,
        };
        Ok(widen(raw))
    }
}

impl<T: IntoVirtualRet> IntoVirtualRet for BridgeResult<T> {
    const WIDTH: usize = T::WIDTH;

    fn into_virtual_ret(self, registry: &HandleRegistry) -> BridgeResult<[Word; 3]> {
        self?.into_virtual_ret(registry)
    }

    fn host_result(self) -> BridgeResult<Self> {
        match self {
            Err(err) => Err(err),
            ok => Ok(ok),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{ObjectKind, StringKind};
    use gdbridge_sdk::{Kind, RawObject};
    use gdbridge_test::MockEngine;

    fn registry() -> (std::sync::Arc<MockEngine>, HandleRegistry) {
        let engine = MockEngine::shared();
        let registry = HandleRegistry::new(engine.clone());
        (engine, registry)
    }

    #[test]
    fn test_decode_mixed_widths() {
        let (_engine, registry) = registry();
        let flag: [Word; 1] = [1];
        let object: [Word; 1] = [0x40];
        let variant: [Word; 3] = [2, 11, 0];
        let args = [
            flag.as_ptr() as *const c_void,
            object.as_ptr() as *const c_void,
            variant.as_ptr() as *const c_void,
        ];

        let (f, o, v) = unsafe {
            <(bool, Handle<ObjectKind>, Variant)>::decode(args.as_ptr(), &registry).unwrap()
        };
        assert!(f);
        assert_eq!(o.ownership(), Ownership::Borrowed);
        assert_eq!(registry.get(&o), Ok(RawObject::from_words([0x40])));
        assert_eq!(v, Variant::Int(11));
    }

    #[test]
    fn test_decode_unaligned_slot() {
        let (_engine, registry) = registry();
        let mut bytes = [0u8; 17];
        bytes[1..9].copy_from_slice(&42i64.to_ne_bytes());
        let args = [unsafe { bytes.as_ptr().add(1) } as *const c_void];
        let (value,) = unsafe { <(i64,)>::decode(args.as_ptr(), &registry).unwrap() };
        assert_eq!(value, 42);
    }

    #[test]
    fn test_decode_rejects_null_pointers() {
        let (_engine, registry) = registry();
        let err = unsafe { <(i64,)>::decode(std::ptr::null(), &registry) }.unwrap_err();
        assert!(matches!(err, BridgeError::ArgumentError(_)));

        let one: [Word; 1] = [1];
        let args = [one.as_ptr() as *const c_void, std::ptr::null()];
        let err = unsafe { <(i64, i64)>::decode(args.as_ptr(), &registry) }.unwrap_err();
        assert_eq!(
            err,
            BridgeError::ArgumentError("Null pointer for virtual argument 1".into())
        );

        let none = unsafe { <()>::decode(std::ptr::null(), &registry) };
        assert!(none.is_ok());
    }

    #[test]
    fn test_string_and_transferred_args() {
        let (engine, registry) = registry();
        let text = gdbridge_sdk::EngineInterface::string_new(engine.as_ref(), "arg");
        let owned = gdbridge_sdk::EngineInterface::string_new(engine.as_ref(), "mine");
        let text_words = text.words();
        let owned_words = owned.words();
        let args = [
            text_words.as_ptr() as *const c_void,
            owned_words.as_ptr() as *const c_void,
        ];

        registry.with_scope(|_| {
            let (s, Transferred(h)) = unsafe {
                <(String, Transferred<StringKind>)>::decode(args.as_ptr(), &registry).unwrap()
            };
            assert_eq!(s, "arg");
            assert_eq!(h.ownership(), Ownership::Owned);
        });
        assert_eq!(engine.release_count_of(Kind::String), 1);
        assert_eq!(engine.releases()[0].1, owned_words.to_vec());
    }

    #[test]
    fn test_widths() {
        assert_eq!(<(bool, String, Variant)>::widths(), vec![1, 2, 3]);
        assert_eq!(<(Handle<ObjectKind>,) as VirtualArgs>::COUNT, 1);
        assert_eq!(<() as IntoVirtualRet>::WIDTH, 0);
        assert_eq!(<String as IntoVirtualRet>::WIDTH, 2);
        assert_eq!(<BridgeResult<Variant> as IntoVirtualRet>::WIDTH, 3);
    }

    #[test]
    fn test_return_encodings() {
        let (engine, registry) = registry();
        assert_eq!((-1i32).into_virtual_ret(&registry), Ok([u64::MAX, 0, 0]));
        assert_eq!(
            Variant::object(InstanceId(3), RawObject::from_words([0x50])).into_virtual_ret(&registry),
            Ok([24, 3, 0x50])
        );

        let words = "out".to_string().into_virtual_ret(&registry).unwrap();
        let raw = RawString::from_words([words[0], words[1]]);
        assert_eq!(engine.string(raw).as_deref(), Some("out"));

        let failed: BridgeResult<i64> = Err(BridgeError::Released);
        assert_eq!(failed.into_virtual_ret(&registry), Err(BridgeError::Released));
    }

    #[test]
    fn test_owned_handle_return_is_detached() {
        let (engine, registry) = registry();
        let s = registry.new_string("give");
        let words = s.into_virtual_ret(&registry).unwrap();
        assert_eq!(registry.live_count(), 0);
        drop(registry);
        assert_eq!(engine.release_count(), 0);
        assert_eq!(engine.string(RawString::from_words([words[0], words[1]])).as_deref(), Some("give"));
    }
}
