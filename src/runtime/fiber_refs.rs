//! The persistent map of fiber-local values.
//!
//! [`FiberRefs`] maps each [`FiberRef`](super::fiber_ref::FiberRef) to the
//! value visible to one fiber. The map is shared structurally: clones are
//! cheap, and an update copies only when the map is shared.
//!
//! Each entry carries a version. [`FiberRefs::fork_as`] records the version a
//! child inherited, so [`FiberRefs::join_as`] merges back only the entries the
//! child actually changed, using each ref's `join` function.

use super::fiber_ref::FiberRef;
use crate::types::{Data, FiberId, Value};
use core::fmt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_FIBER_REF_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

pub(crate) type ForkFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;
pub(crate) type JoinFn = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

pub(crate) struct RefKey {
    pub(crate) id: u64,
    pub(crate) initial: Value,
    pub(crate) fork: ForkFn,
    pub(crate) join: JoinFn,
}

/// Erased identity of a fiber ref.
#[derive(Clone)]
pub(crate) struct AnyFiberRef(pub(crate) Arc<RefKey>);

impl AnyFiberRef {
    pub(crate) fn new(initial: Value, fork: ForkFn, join: JoinFn) -> Self {
        Self(Arc::new(RefKey {
            id: NEXT_FIBER_REF_ID.fetch_add(1, Ordering::Relaxed),
            initial,
            fork,
            join,
        }))
    }

    pub(crate) fn id(&self) -> u64 {
        self.0.id
    }
}

#[derive(Clone)]
struct Entry {
    key: AnyFiberRef,
    value: Value,
    version: u64,
    inherited: Option<u64>,
    writer: FiberId,
}

/// Fiber-local values of one fiber.
#[derive(Clone, Default)]
pub struct FiberRefs {
    locals: Arc<BTreeMap<u64, Entry>>,
}

impl FiberRefs {
    /// An empty map: every ref reads as its initial value.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of refs with an explicit value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locals.len()
    }

    /// Returns `true` if no ref has an explicit value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }

    /// The explicit value of `fiber_ref`, if any.
    #[must_use]
    pub fn get<A: Data>(&self, fiber_ref: &FiberRef<A>) -> Option<A> {
        self.locals
            .get(&fiber_ref.key().id())
            .and_then(|entry| entry.value.downcast::<A>())
    }

    /// The value of `fiber_ref`, falling back to its initial value.
    #[must_use]
    pub fn get_or_default<A: Data>(&self, fiber_ref: &FiberRef<A>) -> A {
        self.get(fiber_ref).unwrap_or_else(|| fiber_ref.initial())
    }

    /// The fiber that last wrote `fiber_ref`, if any.
    #[must_use]
    pub fn writer<A: Data>(&self, fiber_ref: &FiberRef<A>) -> Option<FiberId> {
        self.locals
            .get(&fiber_ref.key().id())
            .map(|entry| entry.writer)
    }

    /// A copy of this map with `fiber_ref` set to `value` by `writer`.
    #[must_use]
    pub fn updated<A: Data>(&self, writer: FiberId, fiber_ref: &FiberRef<A>, value: A) -> Self {
        let mut next = self.clone();
        next.set_value(writer, fiber_ref.key(), Value::new(value));
        next
    }

    /// A copy of this map without an explicit value for `fiber_ref`.
    #[must_use]
    pub fn deleted<A: Data>(&self, fiber_ref: &FiberRef<A>) -> Self {
        let mut next = self.clone();
        next.delete_value(fiber_ref.key());
        next
    }

    /// Derives the initial map of a child fiber by applying each ref's
    /// `fork` function.
    #[must_use]
    pub fn fork_as(&self, child: FiberId) -> Self {
        let locals = self
            .locals
            .iter()
            .map(|(id, entry)| {
                let value = (entry.key.0.fork)(&entry.value);
                let forked = Entry {
                    key: entry.key.clone(),
                    value,
                    version: entry.version,
                    inherited: Some(entry.version),
                    writer: child,
                };
                (*id, forked)
            })
            .collect();
        Self {
            locals: Arc::new(locals),
        }
    }

    /// Merges a child's final map into this one. Only entries the child
    /// changed since it was forked are joined, using each ref's `join`
    /// function with this map's value (or the initial value) on the left.
    #[must_use]
    pub fn join_as(&self, parent: FiberId, child: &Self) -> Self {
        let mut joined = self.clone();
        for (id, entry) in child.locals.iter() {
            if entry.inherited == Some(entry.version) {
                continue;
            }
            let parent_value = self
                .locals
                .get(id)
                .map_or_else(|| entry.key.0.initial.clone(), |own| own.value.clone());
            let value = (entry.key.0.join)(&parent_value, &entry.value);
            joined.set_value(parent, &entry.key, value);
        }
        joined
    }

    pub(crate) fn set_value(&mut self, writer: FiberId, key: &AnyFiberRef, value: Value) {
        let version = NEXT_VERSION.fetch_add(1, Ordering::Relaxed);
        let locals = Arc::make_mut(&mut self.locals);
        match locals.get_mut(&key.id()) {
            Some(entry) => {
                entry.value = value;
                entry.version = version;
                entry.writer = writer;
            }
            None => {
                locals.insert(
                    key.id(),
                    Entry {
                        key: key.clone(),
                        value,
                        version,
                        inherited: None,
                        writer,
                    },
                );
            }
        }
    }

    pub(crate) fn delete_value(&mut self, key: &AnyFiberRef) {
        if self.locals.contains_key(&key.id()) {
            Arc::make_mut(&mut self.locals).remove(&key.id());
        }
    }
}

impl fmt::Debug for FiberRefs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.locals
                    .iter()
                    .map(|(id, entry)| (id, (&entry.value, entry.writer))),
            )
            .finish()
    }
}
