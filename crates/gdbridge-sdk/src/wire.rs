//! Wire encoding: fixed-width word slots for every type that crosses the ABI
//!
//! Every static type that can appear in a call frame names its slot type as
//! an array of machine words. The slot array length is the type's width, so
//! a frame built from static types can never disagree with the engine about
//! how many words an argument occupies.

use std::ffi::c_void;
use std::fmt;

use crate::engine::InstanceId;
use crate::error::ErrorCode;

/// One machine word of a call-frame slot.
pub type Word = u64;

mod sealed {
    pub trait Sealed {}
}

// ============================================================================
// Slot Words
// ============================================================================

/// A fixed-size word array used as the slot of a [`Wire`] type.
///
/// Sealed: only `[Word; 0]` through `[Word; 3]` implement it. Nothing that
/// crosses the boundary is wider than a variant.
pub trait SlotWords: sealed::Sealed + Copy + Default + fmt::Debug + PartialEq + 'static {
    /// Number of words in the slot.
    const WIDTH: usize;

    /// All-zero slot, the engine's default bit pattern for every type.
    fn zeroed() -> Self;

    /// View the slot as words.
    fn as_words(&self) -> &[Word];

    /// Copy a slot out of a word slice.
    ///
    /// # Panics
    /// Panics if `words.len() != Self::WIDTH`.
    fn from_words(words: &[Word]) -> Self;
}

macro_rules! impl_slot_words {
    ($($n:literal),*) => {$(
        impl sealed::Sealed for [Word; $n] {}

        impl SlotWords for [Word; $n] {
            const WIDTH: usize = $n;

            #[inline]
            fn zeroed() -> Self {
                [0; $n]
            }

            #[inline]
            fn as_words(&self) -> &[Word] {
                self
            }

            #[inline]
            #[track_caller]
            fn from_words(words: &[Word]) -> Self {
                let mut slot = [0; $n];
                slot.copy_from_slice(words);
                slot
            }
        }
    )*};
}

impl_slot_words!(0, 1, 2, 3);

// ============================================================================
// Wire Trait
// ============================================================================

/// A value with a fixed word layout in call frames and virtual back-buffers.
pub trait Wire: Copy + 'static {
    /// Slot array; its length is the wire width of the type.
    type Slot: SlotWords;

    /// Wire width in words.
    const WIDTH: usize = <Self::Slot as SlotWords>::WIDTH;

    /// Encode into the slot layout.
    fn to_slot(self) -> Self::Slot;

    /// Decode from the slot layout.
    fn from_slot(slot: Self::Slot) -> Self;
}

impl Wire for () {
    type Slot = [Word; 0];

    #[inline]
    fn to_slot(self) -> Self::Slot {
        []
    }

    #[inline]
    fn from_slot(_slot: Self::Slot) -> Self {}
}

impl Wire for bool {
    type Slot = [Word; 1];

    #[inline]
    fn to_slot(self) -> Self::Slot {
        [self as Word]
    }

    #[inline]
    fn from_slot(slot: Self::Slot) -> Self {
        slot[0] != 0
    }
}

// Signed integers travel sign-extended, unsigned zero-extended.
macro_rules! impl_wire_int {
    ($($ty:ty => $wide:ty),* $(,)?) => {$(
        impl Wire for $ty {
            type Slot = [Word; 1];

            #[inline]
            fn to_slot(self) -> Self::Slot {
                [self as $wide as Word]
            }

            #[inline]
            fn from_slot(slot: Self::Slot) -> Self {
                slot[0] as $ty
            }
        }
    )*};
}

impl_wire_int! {
    i8 => i64, i16 => i64, i32 => i64, i64 => i64, isize => i64,
    u8 => u64, u16 => u64, u32 => u64, u64 => u64, usize => u64,
}

impl Wire for f64 {
    type Slot = [Word; 1];

    #[inline]
    fn to_slot(self) -> Self::Slot {
        [self.to_bits()]
    }

    #[inline]
    fn from_slot(slot: Self::Slot) -> Self {
        f64::from_bits(slot[0])
    }
}

/// Single precision floats are widened; the engine only passes doubles.
impl Wire for f32 {
    type Slot = [Word; 1];

    #[inline]
    fn to_slot(self) -> Self::Slot {
        [(self as f64).to_bits()]
    }

    #[inline]
    fn from_slot(slot: Self::Slot) -> Self {
        f64::from_bits(slot[0]) as f32
    }
}

impl Wire for InstanceId {
    type Slot = [Word; 1];

    #[inline]
    fn to_slot(self) -> Self::Slot {
        [self.0]
    }

    #[inline]
    fn from_slot(slot: Self::Slot) -> Self {
        InstanceId(slot[0])
    }
}

impl Wire for ErrorCode {
    type Slot = [Word; 1];

    #[inline]
    fn to_slot(self) -> Self::Slot {
        [self.0 as Word]
    }

    #[inline]
    fn from_slot(slot: Self::Slot) -> Self {
        ErrorCode(slot[0] as i64)
    }
}

// ============================================================================
// Packed Vectors
// ============================================================================

/// Two single precision floats packed into one word (x low, y high).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2 {
    /// Horizontal component
    pub x: f32,
    /// Vertical component
    pub y: f32,
}

impl Vector2 {
    /// Create a vector.
    pub const fn new(x: f32, y: f32) -> Self {
        Vector2 { x, y }
    }

    #[inline]
    pub(crate) fn pack(self) -> Word {
        (self.x.to_bits() as Word) | ((self.y.to_bits() as Word) << 32)
    }

    #[inline]
    pub(crate) fn unpack(word: Word) -> Self {
        Vector2 {
            x: f32::from_bits(word as u32),
            y: f32::from_bits((word >> 32) as u32),
        }
    }
}

impl Wire for Vector2 {
    type Slot = [Word; 1];

    #[inline]
    fn to_slot(self) -> Self::Slot {
        [self.pack()]
    }

    #[inline]
    fn from_slot(slot: Self::Slot) -> Self {
        Vector2::unpack(slot[0])
    }
}

/// Two 32-bit integers packed into one word (x low, y high).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Vector2i {
    /// Horizontal component
    pub x: i32,
    /// Vertical component
    pub y: i32,
}

impl Vector2i {
    /// Create a vector.
    pub const fn new(x: i32, y: i32) -> Self {
        Vector2i { x, y }
    }

    #[inline]
    pub(crate) fn pack(self) -> Word {
        (self.x as u32 as Word) | ((self.y as u32 as Word) << 32)
    }

    #[inline]
    pub(crate) fn unpack(word: Word) -> Self {
        Vector2i {
            x: word as u32 as i32,
            y: (word >> 32) as u32 as i32,
        }
    }
}

impl Wire for Vector2i {
    type Slot = [Word; 1];

    #[inline]
    fn to_slot(self) -> Self::Slot {
        [self.pack()]
    }

    #[inline]
    fn from_slot(slot: Self::Slot) -> Self {
        Vector2i::unpack(slot[0])
    }
}

// ============================================================================
// Raw Handles
// ============================================================================

/// Category of an engine-side value, fixing its handle width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Object or resource reference
    Object,
    /// Engine string
    String,
    /// Interned string name
    StringName,
    /// Untyped or typed array
    Array,
    /// Dictionary
    Dictionary,
    /// Packed array of any element type
    PackedArray,
    /// Callable
    Callable,
    /// Tagged variant
    Variant,
}

impl Kind {
    /// Handle width in words.
    pub const fn words(self) -> usize {
        match self {
            Kind::Object => 1,
            Kind::String
            | Kind::StringName
            | Kind::Array
            | Kind::Dictionary
            | Kind::PackedArray
            | Kind::Callable => 2,
            Kind::Variant => 3,
        }
    }

    /// Lower-case name used in diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            Kind::Object => "object",
            Kind::String => "string",
            Kind::StringName => "string_name",
            Kind::Array => "array",
            Kind::Dictionary => "dictionary",
            Kind::PackedArray => "packed_array",
            Kind::Callable => "callable",
            Kind::Variant => "variant",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque engine value of `N` words.
///
/// The host never interprets the words; it only stores them and hands them
/// back to the engine.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle<const N: usize> {
    words: [Word; N],
}

/// Object or resource reference.
pub type RawObject = RawHandle<1>;
/// Engine string.
pub type RawString = RawHandle<2>;
/// Interned string name.
pub type RawStringName = RawHandle<2>;
/// Array.
pub type RawArray = RawHandle<2>;
/// Dictionary.
pub type RawDictionary = RawHandle<2>;
/// Packed array.
pub type RawPackedArray = RawHandle<2>;
/// Callable.
pub type RawCallable = RawHandle<2>;
/// Tagged variant.
pub type RawVariant = RawHandle<3>;

impl<const N: usize> RawHandle<N> {
    /// The all-zero handle.
    pub const NULL: Self = RawHandle { words: [0; N] };

    /// Wrap raw words.
    #[inline]
    pub const fn from_words(words: [Word; N]) -> Self {
        RawHandle { words }
    }

    /// The raw words.
    #[inline]
    pub const fn words(&self) -> [Word; N] {
        self.words
    }

    /// Borrow the raw words.
    #[inline]
    pub fn as_words(&self) -> &[Word] {
        &self.words
    }

    /// True when every word is zero.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }
}

impl RawHandle<1> {
    /// Wrap an engine object pointer.
    #[inline]
    pub fn from_ptr(ptr: *mut c_void) -> Self {
        RawHandle {
            words: [ptr as usize as Word],
        }
    }

    /// The engine object pointer.
    #[inline]
    pub fn as_ptr(&self) -> *mut c_void {
        self.words[0] as usize as *mut c_void
    }
}

impl<const N: usize> Default for RawHandle<N> {
    fn default() -> Self {
        Self::NULL
    }
}

impl<const N: usize> fmt::Debug for RawHandle<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawHandle<{}>(", N)?;
        for (i, w) in self.words.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{:#x}", w)?;
        }
        f.write_str(")")
    }
}

impl<const N: usize> Wire for RawHandle<N>
where
    [Word; N]: SlotWords,
{
    type Slot = [Word; N];

    #[inline]
    fn to_slot(self) -> Self::Slot {
        self.words
    }

    #[inline]
    fn from_slot(slot: Self::Slot) -> Self {
        RawHandle { words: slot }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widths_follow_static_types() {
        assert_eq!(<() as Wire>::WIDTH, 0);
        assert_eq!(<bool as Wire>::WIDTH, 1);
        assert_eq!(<i32 as Wire>::WIDTH, 1);
        assert_eq!(<f32 as Wire>::WIDTH, 1);
        assert_eq!(<RawObject as Wire>::WIDTH, 1);
        assert_eq!(<RawString as Wire>::WIDTH, 2);
        assert_eq!(<RawVariant as Wire>::WIDTH, 3);

        for kind in [Kind::Object, Kind::String, Kind::Array, Kind::Variant] {
            let expected = match kind {
                Kind::Object => <RawObject as Wire>::WIDTH,
                Kind::Variant => <RawVariant as Wire>::WIDTH,
                _ => <RawString as Wire>::WIDTH,
            };
            assert_eq!(kind.words(), expected);
        }
    }

    #[test]
    fn test_integer_boundaries() {
        assert_eq!(0i64.to_slot(), [0]);
        assert_eq!((-1i32).to_slot(), [u64::MAX]);
        assert_eq!(i32::from_slot([u64::MAX]), -1);
        assert_eq!(u64::MAX.to_slot(), [u64::MAX]);
        assert_eq!(u32::MAX.to_slot(), [0xFFFF_FFFF]);
        assert_eq!(i64::MIN.to_slot(), [0x8000_0000_0000_0000]);
        assert_eq!(i64::from_slot(i64::MIN.to_slot()), i64::MIN);
        assert_eq!(u8::from_slot([0x1FF]), 0xFF);
    }

    #[test]
    fn test_bool_and_float_bit_patterns() {
        assert_eq!(true.to_slot(), [1]);
        assert_eq!(false.to_slot(), [0]);
        assert!(bool::from_slot([2]));

        assert_eq!(0.0f64.to_slot(), [0]);
        assert_eq!(1.5f64.to_slot(), [0x3FF8_0000_0000_0000]);
        assert_eq!((-0.0f64).to_slot(), [0x8000_0000_0000_0000]);
        assert_eq!(1.5f32.to_slot(), 1.5f64.to_slot());
        assert_eq!(f32::from_slot([0x3FF8_0000_0000_0000]), 1.5);
        assert!(f64::from_slot(f64::NAN.to_slot()).is_nan());
    }

    #[test]
    fn test_packed_vectors() {
        let v = Vector2::new(1.0, -2.0);
        assert_eq!(v.to_slot(), [0xC000_0000_3F80_0000]);
        assert_eq!(Vector2::from_slot(v.to_slot()), v);

        let vi = Vector2i::new(-1, 7);
        assert_eq!(vi.to_slot(), [0x0000_0007_FFFF_FFFF]);
        assert_eq!(Vector2i::from_slot(vi.to_slot()), vi);
    }

    #[test]
    fn test_null_handles() {
        assert!(RawObject::NULL.is_null());
        assert!(RawString::default().is_null());
        assert_eq!(RawVariant::NULL.to_slot(), [0, 0, 0]);
        assert!(!RawString::from_words([0, 1]).is_null());
        assert!(RawObject::from_ptr(std::ptr::null_mut()).is_null());
    }

    #[test]
    fn test_handle_words_pass_through() {
        let raw = RawString::from_words([u64::MAX, 0]);
        assert_eq!(raw.to_slot(), [u64::MAX, 0]);
        assert_eq!(RawString::from_slot([u64::MAX, 0]), raw);

        let mut value = 5u32;
        let obj = RawObject::from_ptr(&mut value as *mut u32 as *mut c_void);
        assert_eq!(obj.as_ptr() as *mut u32, &mut value as *mut u32);
    }

    #[test]
    fn test_slot_words_from_slice() {
        let slot = <[Word; 3] as SlotWords>::from_words(&[1, 2, 3]);
        assert_eq!(slot.as_words(), &[1, 2, 3]);
        assert_eq!(<[Word; 2] as SlotWords>::zeroed(), [0, 0]);
    }

    #[test]
    #[should_panic]
    fn test_slot_words_length_mismatch_panics() {
        let _ = <[Word; 2] as SlotWords>::from_words(&[1, 2, 3]);
    }
}
