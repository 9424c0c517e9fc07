//! Runtime values handed to the injector
//!
//! The debugger describes the call with the runtime's type-erased values:
//! the function to call and an optional pointer to the stack argument frame.
//! Their kinds are checked before anything is sent to the target.

use core::fmt;
use core::ptr::NonNull;
use core::slice;

/// A function value of the target runtime
///
/// `entry` is the code address the call jumps to; `closure` is the address
/// of the function value itself, passed in the context register so closures
/// can reach their captured variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncVal {
    pub entry: u64,
    pub closure: u64,
}

/// Caller-owned memory holding stack-passed arguments and result space
///
/// The size of the pointee defines the argument frame size. The frame is
/// copied into the target before the call and copied back after it returns.
/// A `FramePtr` is an exclusive borrow: it moves into the injection and is
/// never duplicated.
pub struct FramePtr<'a> {
    bytes: &'a mut [u8],
}

impl<'a> FramePtr<'a> {
    /// Frame backed by a byte buffer
    pub fn from_bytes(frame: &'a mut [u8]) -> Self {
        Self { bytes: frame }
    }

    /// Frame backed by a typed value; its size is `size_of::<T>()`
    ///
    /// # Safety
    ///
    /// The injected call writes arbitrary bytes back into `value`. Every bit
    /// pattern of the frame must be a valid `T` (plain-old-data layouts only).
    pub unsafe fn of<T>(value: &'a mut T) -> Self {
        let size = core::mem::size_of::<T>();
        Self {
            bytes: slice::from_raw_parts_mut((value as *mut T).cast::<u8>(), size),
        }
    }

    /// Frame at a raw address
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `size` bytes for `'a`, and
    /// nothing else may access that memory while an injection uses it.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, size: usize) -> Self {
        Self {
            bytes: slice::from_raw_parts_mut(ptr.as_ptr(), size),
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.bytes
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.bytes
    }
}

impl fmt::Debug for FramePtr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePtr")
            .field("ptr", &self.bytes.as_ptr())
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// A type-erased runtime value
///
/// Not `Copy`: a `Pointer` carries the exclusive frame borrow.
#[derive(Debug)]
pub enum Value<'a> {
    Nil,
    Func(FuncVal),
    Pointer(FramePtr<'a>),
    Scalar(u64),
}

impl Value<'_> {
    /// Kind name, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Func(_) => "func",
            Value::Pointer(_) => "pointer",
            Value::Scalar(_) => "scalar",
        }
    }
}

impl From<FuncVal> for Value<'_> {
    fn from(func: FuncVal) -> Self {
        Value::Func(func)
    }
}

impl<'a> From<FramePtr<'a>> for Value<'a> {
    fn from(frame: FramePtr<'a>) -> Self {
        Value::Pointer(frame)
    }
}

/// Panic payload of an injected call: the runtime's two-word panic value
/// (type word, data word), copied out verbatim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanicValue {
    pub words: [u64; 2],
}

impl PanicValue {
    pub const fn new(type_word: u64, data_word: u64) -> Self {
        Self {
            words: [type_word, data_word],
        }
    }

    pub const fn type_word(&self) -> u64 {
        self.words[0]
    }

    pub const fn data_word(&self) -> u64 {
        self.words[1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    assert_not_impl_any!(FramePtr<'static>: Copy, Clone);
    assert_not_impl_any!(Value<'static>: Copy, Clone);
    assert_impl_all!(FramePtr<'static>: Send, Sync);

    #[allow(dead_code)]
    #[repr(C)]
    struct Frame {
        a: u64,
        b: u32,
        ret: u64,
    }

    #[test]
    fn typed_frame_uses_type_size() {
        let mut frame = Frame { a: 1, b: 2, ret: 0 };
        let ptr = unsafe { FramePtr::of(&mut frame) };
        assert_eq!(ptr.size(), 24);
    }

    #[test]
    fn byte_frame_uses_slice_length() {
        let mut bytes = [0u8; 40];
        assert_eq!(FramePtr::from_bytes(&mut bytes).size(), 40);

        let mut empty: [u8; 0] = [];
        assert_eq!(FramePtr::from_bytes(&mut empty).size(), 0);
    }

    #[test]
    fn frame_borrow_moves_into_value() {
        let mut bytes = [7u8; 16];
        let value = Value::from(FramePtr::from_bytes(&mut bytes));
        match value {
            Value::Pointer(mut frame) => {
                frame.as_bytes_mut()[0] = 1;
                assert_eq!(frame.as_bytes()[..2], [1, 7]);
            }
            other => panic!("expected a pointer, got {}", other.kind()),
        }
        assert_eq!(bytes[0], 1);
    }

    #[test]
    fn value_kinds() {
        let mut bytes = [0u8; 8];
        assert_eq!(Value::Nil.kind(), "nil");
        assert_eq!(Value::from(FuncVal { entry: 1, closure: 2 }).kind(), "func");
        assert_eq!(Value::from(FramePtr::from_bytes(&mut bytes)).kind(), "pointer");
        assert_eq!(Value::Scalar(3).kind(), "scalar");
    }
}
