//! Type-erased values carried by instructions.
//!
//! The interpreter works on a single uniform representation so that one
//! continuation stack can hold frames of every type. Typed APIs erase into a
//! [`Value`] at the boundary and downcast on the way out.

use super::cause::{Cause, Defect};
use super::exit::Exit;
use core::fmt;
use std::any::{type_name, Any};
use std::sync::{Arc, OnceLock};

/// Types that can flow through effects.
pub trait Data: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Data for T {}

/// A shared, immutable, type-erased value.
#[derive(Clone)]
pub struct Value {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Value {
    /// Erases `value`.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
            type_name: type_name::<T>(),
        }
    }

    /// The shared unit value.
    #[must_use]
    pub fn unit() -> Self {
        static UNIT: OnceLock<Value> = OnceLock::new();
        UNIT.get_or_init(|| Self::new(())).clone()
    }

    /// Returns `true` if the value holds a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Borrows the value as a `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Clones the value out as a `T`.
    #[must_use]
    pub fn downcast<T: Any + Clone>(&self) -> Option<T> {
        self.downcast_ref::<T>().cloned()
    }

    /// Name of the erased type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value<{}>", self.type_name)
    }
}

pub(crate) fn type_mismatch<T>(value: &Value) -> Defect {
    Defect::new(format!(
        "type mismatch: expected {}, found {}",
        type_name::<T>(),
        value.type_name()
    ))
}

/// Downcasts a value, turning a mismatch into a defect cause.
pub(crate) fn cast<T: Data>(value: &Value) -> Result<T, Cause<Value>> {
    value
        .downcast::<T>()
        .ok_or_else(|| Cause::Die(type_mismatch::<T>(value)))
}

pub(crate) fn erase_cause<E: Data>(cause: &Cause<E>) -> Cause<Value> {
    cause.map(Value::new)
}

/// Restores typed failures. A failure of the wrong type becomes a defect.
pub(crate) fn typed_cause<E: Data>(cause: &Cause<Value>) -> Cause<E> {
    cause.flat_map_failures(&mut |v| match v.downcast::<E>() {
        Some(e) => Cause::Fail(e),
        None => Cause::Die(type_mismatch::<E>(&v)),
    })
}

pub(crate) fn erase_exit<A: Data, E: Data>(exit: &Exit<A, E>) -> Exit<Value, Value> {
    match exit {
        Exit::Success(a) => Exit::Success(Value::new(a.clone())),
        Exit::Failure(cause) => Exit::Failure(erase_cause(cause)),
    }
}

pub(crate) fn typed_exit<A: Data, E: Data>(exit: &Exit<Value, Value>) -> Exit<A, E> {
    match exit {
        Exit::Success(v) => match v.downcast::<A>() {
            Some(a) => Exit::Success(a),
            None => Exit::Failure(Cause::Die(type_mismatch::<A>(v))),
        },
        Exit::Failure(cause) => Exit::Failure(typed_cause(cause)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_round_trip() {
        let v = Value::new(42_i32);
        assert!(v.is::<i32>());
        assert_eq!(v.downcast::<i32>(), Some(42));
        assert_eq!(v.downcast::<u8>(), None);
        assert_eq!(v.type_name(), "i32");
    }

    #[test]
    fn unit_is_shared() {
        let a = Value::unit();
        assert!(a.is::<()>());
        assert_eq!(format!("{a:?}"), "Value<()>");
    }

    #[test]
    fn typed_cause_reports_mismatch_as_defect() {
        let cause = Cause::then(Cause::fail(Value::new("text")), Cause::fail(Value::new(7_u32)));
        let typed: Cause<u32> = typed_cause(&cause);
        assert_eq!(typed.failures(), vec![&7]);
        assert_eq!(typed.defects().len(), 1);
        assert!(typed.defects()[0].message().contains("type mismatch"));
    }

    #[test]
    fn exit_erasure_round_trip() {
        let exit: Exit<String, i32> = Exit::fail(3);
        let erased = erase_exit(&exit);
        assert_eq!(typed_exit::<String, i32>(&erased), exit);
        let ok: Exit<String, i32> = Exit::succeed("hi".into());
        assert_eq!(typed_exit::<String, i32>(&erase_exit(&ok)), ok);
    }
}
