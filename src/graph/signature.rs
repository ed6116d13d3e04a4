//! Method signatures and structural signature comparison.

use crate::graph::TypeRef;

/// The signature of a method: calling-convention instance flag, return type
/// and ordered parameter types.
///
/// Equality is structural value equality over the descriptor, which is what
/// override and interface-implementation matching is defined in terms of
/// (together with the method name). Two handles compare equal only when they
/// reference the same entity, so structural comparison stays cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    /// True for instance methods (an implicit `this` precedes the parameters).
    pub instance: bool,
    /// Return type; `Primitive(Void)` for void methods.
    pub ret: TypeRef,
    /// Ordered declared parameter types, excluding `this`.
    pub params: Vec<TypeRef>,
}

impl MethodSignature {
    /// Static signature with the given return and parameter types.
    #[must_use]
    pub fn stat(ret: TypeRef, params: Vec<TypeRef>) -> Self {
        MethodSignature {
            instance: false,
            ret,
            params,
        }
    }

    /// Instance signature with the given return and parameter types.
    #[must_use]
    pub fn instance(ret: TypeRef, params: Vec<TypeRef>) -> Self {
        MethodSignature {
            instance: true,
            ret,
            params,
        }
    }

    /// Number of stack values a call to this signature consumes, including
    /// the implicit `this` for instance methods.
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.params.len() + usize::from(self.instance)
    }

    /// True when the method returns a value.
    #[must_use]
    pub fn returns_value(&self) -> bool {
        !self.ret.is_void()
    }
}
