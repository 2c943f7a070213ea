//! Variant - the engine's tagged 3-word dynamic value
//!
//! Layout: word 0 holds the type tag, words 1 and 2 hold the payload.
//! Decoding is exact: any word pattern that is not the canonical encoding of
//! a known variant decodes to [`Variant::Other`], so encoding a decoded
//! variant always reproduces the original words.

use crate::engine::InstanceId;
use crate::wire::{
    Kind, RawArray, RawCallable, RawDictionary, RawObject, RawPackedArray, RawString,
    RawStringName, Vector2, Vector2i, Wire, Word,
};

macro_rules! variant_types {
    ($($variant:ident = $tag:literal,)*) => {
        /// Engine variant type tags.
        #[repr(u32)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum VariantType {
            $(
                #[allow(missing_docs)]
                $variant = $tag,
            )*
        }

        impl VariantType {
            /// Decode a tag word.
            pub fn from_tag(tag: Word) -> Option<Self> {
                match tag {
                    $($tag => Some(VariantType::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

variant_types! {
    Nil = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    String = 4,
    Vector2 = 5,
    Vector2i = 6,
    Rect2 = 7,
    Rect2i = 8,
    Vector3 = 9,
    Vector3i = 10,
    Transform2D = 11,
    Vector4 = 12,
    Vector4i = 13,
    Plane = 14,
    Quaternion = 15,
    Aabb = 16,
    Basis = 17,
    Transform3D = 18,
    Projection = 19,
    Color = 20,
    StringName = 21,
    NodePath = 22,
    Rid = 23,
    Object = 24,
    Callable = 25,
    Signal = 26,
    Dictionary = 27,
    Array = 28,
    PackedByteArray = 29,
    PackedInt32Array = 30,
    PackedInt64Array = 31,
    PackedFloat32Array = 32,
    PackedFloat64Array = 33,
    PackedStringArray = 34,
    PackedVector2Array = 35,
    PackedVector3Array = 36,
    PackedColorArray = 37,
    PackedVector4Array = 38,
}

impl VariantType {
    /// The tag word.
    pub fn tag(self) -> Word {
        self as u32 as Word
    }

    /// True for the packed array family.
    pub fn is_packed_array(self) -> bool {
        (VariantType::PackedByteArray.tag()..=VariantType::PackedVector4Array.tag())
            .contains(&self.tag())
    }
}

/// Decoded variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Variant {
    /// Null
    Nil,
    /// Boolean
    Bool(bool),
    /// 64-bit integer
    Int(i64),
    /// Double
    Float(f64),
    /// String payload (engine-owned words)
    String(RawString),
    /// 2D float vector
    Vector2(Vector2),
    /// 2D integer vector
    Vector2i(Vector2i),
    /// String name payload
    StringName(RawStringName),
    /// Resource id
    Rid(u64),
    /// Object reference: instance id plus object pointer
    Object {
        /// Instance id, validated before use
        id: InstanceId,
        /// Object pointer
        ptr: RawObject,
    },
    /// Callable payload
    Callable(RawCallable),
    /// Dictionary payload
    Dictionary(RawDictionary),
    /// Array payload
    Array(RawArray),
    /// Packed array payload
    Packed {
        /// Element family, always a packed array type
        ty: VariantType,
        /// Array payload
        raw: RawPackedArray,
    },
    /// Any tag or payload without a dedicated decoding
    Other {
        /// Raw type tag
        tag: Word,
        /// Raw payload words
        payload: [Word; 2],
    },
}

impl Variant {
    /// Object variant.
    pub fn object(id: InstanceId, ptr: RawObject) -> Self {
        Variant::Object { id, ptr }
    }

    /// Type tag word.
    pub fn tag(&self) -> Word {
        self.to_slot()[0]
    }

    /// Known type, `None` for unknown tags.
    pub fn variant_type(&self) -> Option<VariantType> {
        VariantType::from_tag(self.tag())
    }

    /// True for [`Variant::Nil`].
    pub fn is_nil(&self) -> bool {
        matches!(self, Variant::Nil)
    }

    /// Integer payload.
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Variant::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Float payload.
    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Variant::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Boolean payload.
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Variant::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Object payload.
    pub fn as_object(&self) -> Option<(InstanceId, RawObject)> {
        match *self {
            Variant::Object { id, ptr } => Some((id, ptr)),
            _ => None,
        }
    }

    /// Category of the engine value the payload refers to, when it holds one.
    pub fn payload_kind(&self) -> Option<Kind> {
        match self {
            Variant::String(_) => Some(Kind::String),
            Variant::StringName(_) => Some(Kind::StringName),
            Variant::Object { .. } => Some(Kind::Object),
            Variant::Callable(_) => Some(Kind::Callable),
            Variant::Dictionary(_) => Some(Kind::Dictionary),
            Variant::Array(_) => Some(Kind::Array),
            Variant::Packed { .. } => Some(Kind::PackedArray),
            _ => None,
        }
    }
}

impl Default for Variant {
    fn default() -> Self {
        Variant::Nil
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Bool(v)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Variant::Int(v)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Float(v)
    }
}

impl From<Vector2> for Variant {
    fn from(v: Vector2) -> Self {
        Variant::Vector2(v)
    }
}

impl Wire for Variant {
    type Slot = [Word; 3];

    fn to_slot(self) -> Self::Slot {
        let (ty, payload) = match self {
            Variant::Nil => (VariantType::Nil, [0, 0]),
            Variant::Bool(v) => (VariantType::Bool, [v as Word, 0]),
            Variant::Int(v) => (VariantType::Int, [v as Word, 0]),
            Variant::Float(v) => (VariantType::Float, [v.to_bits(), 0]),
            Variant::String(raw) => (VariantType::String, raw.words()),
            Variant::Vector2(v) => (VariantType::Vector2, [v.pack(), 0]),
            Variant::Vector2i(v) => (VariantType::Vector2i, [v.pack(), 0]),
            Variant::StringName(raw) => (VariantType::StringName, raw.words()),
            Variant::Rid(rid) => (VariantType::Rid, [rid, 0]),
            Variant::Object { id, ptr } => (VariantType::Object, [id.0, ptr.words()[0]]),
            Variant::Callable(raw) => (VariantType::Callable, raw.words()),
            Variant::Dictionary(raw) => (VariantType::Dictionary, raw.words()),
            Variant::Array(raw) => (VariantType::Array, raw.words()),
            Variant::Packed { ty, raw } => (ty, raw.words()),
            Variant::Other { tag, payload } => return [tag, payload[0], payload[1]],
        };
        [ty.tag(), payload[0], payload[1]]
    }

    fn from_slot(slot: Self::Slot) -> Self {
        let [tag, a, b] = slot;
        let other = Variant::Other {
            tag,
            payload: [a, b],
        };
        let Some(ty) = VariantType::from_tag(tag) else {
            return other;
        };
        let words = [a, b];
        match ty {
            VariantType::Nil if a == 0 && b == 0 => Variant::Nil,
            VariantType::Bool if a <= 1 && b == 0 => Variant::Bool(a == 1),
            VariantType::Int if b == 0 => Variant::Int(a as i64),
            VariantType::Float if b == 0 => Variant::Float(f64::from_bits(a)),
            VariantType::String => Variant::String(RawString::from_words(words)),
            VariantType::Vector2 if b == 0 => Variant::Vector2(Vector2::unpack(a)),
            VariantType::Vector2i if b == 0 => Variant::Vector2i(Vector2i::unpack(a)),
            VariantType::StringName => Variant::StringName(RawStringName::from_words(words)),
            VariantType::Rid if b == 0 => Variant::Rid(a),
            VariantType::Object => Variant::Object {
                id: InstanceId(a),
                ptr: RawObject::from_words([b]),
            },
            VariantType::Callable => Variant::Callable(RawCallable::from_words(words)),
            VariantType::Dictionary => Variant::Dictionary(RawDictionary::from_words(words)),
            VariantType::Array => Variant::Array(RawArray::from_words(words)),
            ty if ty.is_packed_array() => Variant::Packed {
                ty,
                raw: RawPackedArray::from_words(words),
            },
            _ => other,
        }
    }
}
