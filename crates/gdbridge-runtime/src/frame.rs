//! Call frames for native method calls
//!
//! A frame owns a contiguous buffer of argument words plus the offset of each
//! argument, and a return slot sized by the static return type. The engine
//! receives an array of pointers into the buffer (one per argument) and a
//! pointer to the return slot.
//!
//! Arguments are pushed in declared order. A frame lives for exactly one call:
//! [`CallFrame::read_ret`] consumes it.

use std::ffi::c_void;
use std::marker::PhantomData;

use gdbridge_sdk::{SlotWords, Wire, Word};

/// Argument words shared by typed and dynamic frames.
#[derive(Debug, Default)]
pub(crate) struct ArgWords {
    words: Vec<Word>,
    offsets: Vec<usize>,
}

impl ArgWords {
    pub(crate) fn with_capacity(count: usize, words: usize) -> Self {
        ArgWords {
            words: Vec::with_capacity(words),
            offsets: Vec::with_capacity(count),
        }
    }

    #[inline]
    pub(crate) fn push(&mut self, slot: &[Word]) {
        self.offsets.push(self.words.len());
        self.words.extend_from_slice(slot);
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.offsets.len()
    }

    pub(crate) fn get(&self, index: usize) -> Option<&[Word]> {
        let start = *self.offsets.get(index)?;
        let end = self
            .offsets
            .get(index + 1)
            .copied()
            .unwrap_or(self.words.len());
        Some(&self.words[start..end])
    }

    /// One pointer per argument. Valid until the next push.
    pub(crate) fn pointers(&self) -> Vec<*const c_void> {
        let base = self.words.as_ptr();
        self.offsets
            .iter()
            .map(|&offset| base.wrapping_add(offset) as *const c_void)
            .collect()
    }
}

/// Typed call frame with a return slot for `R`.
pub struct CallFrame<R: Wire = ()> {
    args: ArgWords,
    ret: R::Slot,
    _ret: PhantomData<R>,
}

impl<R: Wire> CallFrame<R> {
    /// Empty frame with a zeroed return slot.
    pub fn new() -> Self {
        CallFrame {
            args: ArgWords::default(),
            ret: R::Slot::zeroed(),
            _ret: PhantomData,
        }
    }

    /// Empty frame with capacity for the argument list `A`.
    pub fn for_args<A: ArgList>() -> Self {
        CallFrame {
            args: ArgWords::with_capacity(A::COUNT, A::WORDS),
            ret: R::Slot::zeroed(),
            _ret: PhantomData,
        }
    }

    /// Append one argument; it occupies exactly `T::WIDTH` words.
    #[inline]
    pub fn push_arg<T: Wire>(&mut self, value: T) {
        self.args.push(value.to_slot().as_words());
    }

    /// Number of arguments pushed.
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Words of argument `index`.
    pub fn arg_words(&self, index: usize) -> Option<&[Word]> {
        self.args.get(index)
    }

    /// Words of the return slot.
    pub fn ret_words(&self) -> &[Word] {
        self.ret.as_words()
    }

    /// Argument pointer array and return slot pointer for one native call.
    ///
    /// The pointers stay valid while the frame is neither moved nor pushed to.
    pub fn pointers(&mut self) -> (Vec<*const c_void>, *mut c_void) {
        let ret = &mut self.ret as *mut R::Slot as *mut c_void;
        (self.args.pointers(), ret)
    }

    /// Decode the return slot and free the frame.
    #[inline]
    pub fn read_ret(self) -> R {
        R::from_slot(self.ret)
    }

    /// Free the frame without reading the return slot.
    pub fn free(self) {}
}

impl<R: Wire> Default for CallFrame<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Wire> std::fmt::Debug for CallFrame<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallFrame")
            .field("args", &self.args.len())
            .field("ret_width", &R::WIDTH)
            .finish()
    }
}

// ============================================================================
// Argument Lists
// ============================================================================

/// A statically typed argument list: a tuple of [`Wire`] values.
pub trait ArgList: Copy {
    /// Number of arguments.
    const COUNT: usize;
    /// Total words across all arguments.
    const WORDS: usize;

    /// Width of each argument in declared order.
    fn widths() -> Vec<usize>;

    /// Push every argument into `frame` in declared order.
    fn push_into<R: Wire>(self, frame: &mut CallFrame<R>);
}

macro_rules! impl_arg_list {
    ($count:literal; $($T:ident $v:ident),*) => {
        impl<$($T: Wire),*> ArgList for ($($T,)*) {
            const COUNT: usize = $count;
            const WORDS: usize = 0 $(+ <$T as Wire>::WIDTH)*;

            fn widths() -> Vec<usize> {
                vec![$(<$T as Wire>::WIDTH),*]
            }

            #[inline]
            #[allow(unused_variables)]
            fn push_into<R: Wire>(self, frame: &mut CallFrame<R>) {
                let ($($v,)*) = self;
                $(frame.push_arg($v);)*
            }
        }
    };
}

impl_arg_list!(0;);
impl_arg_list!(1; A a);
impl_arg_list!(2; A a, B b);
impl_arg_list!(3; A a, B b, C c);
impl_arg_list!(4; A a, B b, C c, D d);
impl_arg_list!(5; A a, B b, C c, D d, E e);
impl_arg_list!(6; A a, B b, C c, D d, E e, F f);
impl_arg_list!(7; A a, B b, C c, D d, E e, F f, G g);
impl_arg_list!(8; A a, B b, C c, D d, E e, F f, G g, H h);

/// Fatal: a dynamically encoded value disagrees with the declared width.
#[cold]
#[inline(never)]
#[track_caller]
pub(crate) fn wire_width_violation(context: &str, expected: usize, actual: usize) -> ! {
    panic!(
        "wire width violation in {}: expected {} words, got {}",
        context, expected, actual
    )
}
