//! Hash-based collections.

/// [`BuildHasher`][std::hash::BuildHasher] implementation used by the collections in this crate.
///
/// Currently, [`foldhash`][foldhash] is used as the underlying implementation.
///
/// [foldhash]: http://github.com/orlp/foldhash
pub type FastBuildHasher = foldhash::quality::RandomState;

/// A hash set based on `hashbrown` ([`HashSet`][hashbrown::HashSet]) using [`FastBuildHasher`].
pub type FastHashSet<T> = hashbrown::HashSet<T, FastBuildHasher>;

/// A hash map based on `hashbrown` ([`HashMap`][hashbrown::HashMap]) using [`FastBuildHasher`].
pub type FastHashMap<K, V> = hashbrown::HashMap<K, V, FastBuildHasher>;
