use super::attributes::{
    AttributeKind, FloatAttr, IntAttr, ObjectAttr, ParticleAttr, ParticlesAttr, StringAttr,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::{OnceLock, PoisonError, RwLock};

/// The value kinds an attribute key can address.
///
/// Each kind owns an independent index namespace: the float key `"x"` and the
/// int key `"x"` are unrelated and may carry different indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyKind {
    Float,
    Int,
    String,
    Particle,
    ParticleList,
    Object,
}

impl KeyKind {
    pub const COUNT: usize = 6;

    pub const ALL: [KeyKind; Self::COUNT] = [
        KeyKind::Float,
        KeyKind::Int,
        KeyKind::String,
        KeyKind::Particle,
        KeyKind::ParticleList,
        KeyKind::Object,
    ];

    const fn slot(self) -> usize {
        match self {
            KeyKind::Float => 0,
            KeyKind::Int => 1,
            KeyKind::String => 2,
            KeyKind::Particle => 3,
            KeyKind::ParticleList => 4,
            KeyKind::Object => 5,
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            KeyKind::Float => "float",
            KeyKind::Int => "int",
            KeyKind::String => "string",
            KeyKind::Particle => "particle",
            KeyKind::ParticleList => "particles",
            KeyKind::Object => "object",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Default)]
struct Namespace {
    names: Vec<&'static str>,
    by_name: HashMap<&'static str, u32>,
}

impl Namespace {
    fn find(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    fn intern(&mut self, name: &str) -> u32 {
        if let Some(index) = self.find(name) {
            return index;
        }
        // Interned names live for the rest of the process, so leaking them
        // lets `Key::name` hand out `&'static str` without holding the lock.
        let name: &'static str = Box::leak(name.to_owned().into_boxed_str());
        let index = self.names.len() as u32;
        self.names.push(name);
        self.by_name.insert(name, index);
        index
    }
}

#[derive(Debug, Default)]
struct KeyRegistry {
    attributes: [Namespace; KeyKind::COUNT],
    graphs: Namespace,
}

static REGISTRY: OnceLock<RwLock<KeyRegistry>> = OnceLock::new();

fn registry() -> &'static RwLock<KeyRegistry> {
    REGISTRY.get_or_init(|| RwLock::new(KeyRegistry::default()))
}

// A panic while holding the lock cannot leave a namespace half-updated
// (`intern` pushes and inserts without intermediate failure points), so a
// poisoned lock is still safe to read.
fn read_registry<R>(f: impl FnOnce(&KeyRegistry) -> R) -> R {
    let guard = registry().read().unwrap_or_else(PoisonError::into_inner);
    f(&guard)
}

fn write_registry<R>(f: impl FnOnce(&mut KeyRegistry) -> R) -> R {
    let mut guard = registry().write().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}

fn intern_in(select: impl Fn(&mut KeyRegistry) -> &mut Namespace, name: &str) -> u32 {
    write_registry(|reg| select(reg).intern(name))
}

pub(crate) fn intern_attribute(kind: KeyKind, name: &str) -> u32 {
    if let Some(index) = read_registry(|reg| reg.attributes[kind.slot()].find(name)) {
        return index;
    }
    intern_in(|reg| &mut reg.attributes[kind.slot()], name)
}

pub(crate) fn intern_graph(name: &str) -> (u32, &'static str) {
    let index = match read_registry(|reg| reg.graphs.find(name)) {
        Some(index) => index,
        None => intern_in(|reg| &mut reg.graphs, name),
    };
    (index, read_registry(|reg| reg.graphs.names[index as usize]))
}

fn attribute_name(kind: KeyKind, index: u32) -> &'static str {
    read_registry(|reg| {
        reg.attributes[kind.slot()]
            .names
            .get(index as usize)
            .copied()
            .unwrap_or("<unregistered>")
    })
}

/// A process-wide, typed handle for an attribute name.
///
/// Keys are interned on first use: constructing `Key::<T>::new(name)` twice with
/// the same name yields the same index, and no two names of the same kind ever
/// share one. Indices are assigned sequentially, never hashed, so they stay
/// small and dense and can index per-particle storage directly.
pub struct Key<T> {
    index: u32,
    _kind: PhantomData<fn() -> T>,
}

/// Key of a real-valued, optionally optimized attribute.
pub type FloatKey = Key<FloatAttr>;
pub type IntKey = Key<IntAttr>;
pub type StringKey = Key<StringAttr>;
/// Key of an attribute referring to another particle.
pub type ParticleKey = Key<ParticleAttr>;
/// Key of an attribute holding a list of particles.
pub type ParticlesKey = Key<ParticlesAttr>;
/// Key of an attribute holding a shared, type-erased object.
pub type ObjectKey = Key<ObjectAttr>;

impl<T: AttributeKind> Key<T> {
    /// Interns `name` in this kind's namespace and returns its key.
    pub fn new(name: &str) -> Self {
        Self::from_index(intern_attribute(T::KIND, name) as usize)
    }

    /// Finds an already-interned key without creating one.
    pub fn lookup(name: &str) -> Option<Self> {
        read_registry(|reg| reg.attributes[T::KIND.slot()].find(name))
            .map(|index| Self::from_index(index as usize))
    }

    /// Every key of this kind interned so far, in index order.
    pub fn registered() -> Vec<Self> {
        let count = read_registry(|reg| reg.attributes[T::KIND.slot()].names.len());
        (0..count).map(Self::from_index).collect()
    }

    pub fn kind(self) -> KeyKind {
        T::KIND
    }

    pub fn index(self) -> usize {
        self.index as usize
    }

    /// The name the key was interned with.
    pub fn name(self) -> &'static str {
        attribute_name(T::KIND, self.index)
    }

    pub(crate) fn from_index(index: usize) -> Self {
        Self {
            index: index as u32,
            _kind: PhantomData,
        }
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> PartialEq for Key<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Key<T> {}

impl<T> Hash for Key<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> PartialOrd for Key<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Key<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T: AttributeKind> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Key(\"{}\" #{})", T::KIND, self.name(), self.index)
    }
}

impl<T: AttributeKind> fmt::Display for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_same_name_returns_same_index() {
        let a = FloatKey::new("keys_test_same_name");
        let b = FloatKey::new("keys_test_same_name");
        assert_eq!(a, b);
        assert_eq!(a.index(), b.index());
    }

    #[test]
    fn distinct_names_receive_distinct_indices() {
        let a = IntKey::new("keys_test_distinct_a");
        let b = IntKey::new("keys_test_distinct_b");
        assert_ne!(a.index(), b.index());
    }

    #[test]
    fn name_round_trips_through_index() {
        let key = StringKey::new("keys_test_round_trip");
        assert_eq!(key.name(), "keys_test_round_trip");
        assert_eq!(key.to_string(), "keys_test_round_trip");
    }

    #[test]
    fn namespaces_are_independent_per_kind() {
        let _float = FloatKey::new("keys_test_float_only");
        assert!(FloatKey::lookup("keys_test_float_only").is_some());
        assert!(IntKey::lookup("keys_test_float_only").is_none());
        assert!(ObjectKey::lookup("keys_test_float_only").is_none());
    }

    #[test]
    fn lookup_does_not_intern() {
        assert!(ParticleKey::lookup("keys_test_never_created").is_none());
        assert!(ParticleKey::lookup("keys_test_never_created").is_none());
    }

    #[test]
    fn registered_lists_every_interned_key_in_index_order() {
        let a = ParticlesKey::new("keys_test_registered_a");
        let b = ParticlesKey::new("keys_test_registered_b");
        let all = ParticlesKey::registered();
        assert!(all.contains(&a));
        assert!(all.contains(&b));
        assert!(all.windows(2).all(|w| w[0].index() < w[1].index()));
    }

    #[test]
    fn concurrent_interning_agrees_on_indices() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    (0..32)
                        .map(|i| FloatKey::new(&format!("keys_test_concurrent_{i}")).index())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let results: Vec<Vec<usize>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn graph_names_use_their_own_namespace() {
        let (a, name) = intern_graph("keys_test_graph");
        let (b, _) = intern_graph("keys_test_graph");
        assert_eq!(a, b);
        assert_eq!(name, "keys_test_graph");
        assert!(FloatKey::lookup("keys_test_graph").is_none());
    }

    #[test]
    fn key_kind_display_is_lowercase() {
        assert_eq!(KeyKind::Float.to_string(), "float");
        assert_eq!(KeyKind::ParticleList.to_string(), "particles");
        assert_eq!(FloatKey::new("keys_test_kind").kind(), KeyKind::Float);
    }
}
