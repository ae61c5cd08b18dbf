//! The closed set of types the backend understands.
use std::fmt;

/// A type of a value, a storage location, or a function result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    /// A signed 32-bit integer (C's `int`).
    Int,
    /// An unsigned 8-bit integer (C's `unsigned char`).
    Byte,
    Array { element: Box<Type>, len: usize },
    Pointer(Box<Type>),
}

impl Type {
    pub fn array(element: Type, len: usize) -> Self {
        Type::Array {
            element: Box::new(element),
            len,
        }
    }

    pub fn pointer(self) -> Self {
        Type::Pointer(Box::new(self))
    }

    /// Integer types support arithmetic, comparisons and branching.
    pub fn is_integral(&self) -> bool {
        matches!(self, Type::Int | Type::Byte)
    }

    /// Types that fit in a register: anything a local or a parameter can hold.
    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Int | Type::Byte | Type::Pointer(_))
    }

    /// Size of a value of this type in bytes, given the target's pointer width. `None` if it
    /// does not fit in a `usize`.
    pub fn size(&self, pointer_bytes: usize) -> Option<usize> {
        match self {
            Type::Void => Some(0),
            Type::Int => Some(4),
            Type::Byte => Some(1),
            Type::Array { element, len } => element.size(pointer_bytes)?.checked_mul(*len),
            Type::Pointer(_) => Some(pointer_bytes),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int => write!(f, "int"),
            Type::Byte => write!(f, "unsigned char"),
            Type::Array { element, len } => write!(f, "{}[{}]", element, len),
            Type::Pointer(pointee) => write!(f, "{} *", pointee),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(Type::array(Type::Byte, 30_000).size(8), Some(30_000));
        assert_eq!(Type::array(Type::Int, 4).size(8), Some(16));
        assert_eq!(Type::Byte.pointer().pointer().size(8), Some(8));
        assert_eq!(Type::Void.size(8), Some(0));
    }

    #[test]
    fn huge_arrays_have_no_size() {
        assert_eq!(Type::array(Type::Int, usize::MAX).size(8), None);
        assert_eq!(Type::array(Type::array(Type::Byte, 1 << 40), 1 << 40).size(8), None);
        assert_eq!(Type::array(Type::Byte, usize::MAX).size(8), Some(usize::MAX));
    }

    #[test]
    fn display_like_c() {
        assert_eq!(Type::Byte.pointer().pointer().to_string(), "unsigned char * *");
        assert_eq!(Type::array(Type::Byte, 3).to_string(), "unsigned char[3]");
    }
}
