//! Cache Key Module
//!
//! Per-member identity tokens used to namespace entries inside a container.

use std::any::type_name;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);

// == Member Kind ==
/// Whether a member is declared on instances or on the type itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Instance,
    Static,
}

// == Cache Key ==
/// Opaque, process-unique token for one memoized member.
///
/// Equality and hashing use only the numeric id, so two members with the
/// same name (an instance and a static member, or the same name on two
/// types) never share a slot. The label is kept for diagnostics.
#[derive(Clone)]
pub struct CacheKey {
    id: u64,
    label: Arc<str>,
}

impl CacheKey {
    /// Allocates a key for member `name` declared on `T`.
    pub fn of<T: ?Sized>(name: &str, kind: MemberKind) -> Self {
        let prefix = match kind {
            MemberKind::Instance => "",
            MemberKind::Static => "static:",
        };
        Self::named(&format!("{}::{}{}", type_name::<T>(), prefix, name))
    }

    /// Allocates a key with a free-form diagnostic label.
    pub fn named(label: &str) -> Self {
        Self {
            id: NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed),
            label: Arc::from(label),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({}#{})", self.label, self.id)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.label, self.id)
    }
}
