use core::{
    borrow::Borrow, fmt, iter::FusedIterator, marker::PhantomPinned, mem,
    ops::{Index, IndexMut},
    ptr::NonNull,
};

use cordyceps::Linked;

use crate::{
    entry::Entry, iter, Avl, Balance, Error, Links, SearchTree, TreeNode, Unbalanced,
};

/// An ordered map backed by a [`SearchTree`].
///
/// Keys are unique: inserting a key that is already present overwrites its value in place.
pub struct TreeMap<K: Ord, V, B: Balance = Avl> {
    tree: SearchTree<MapNode<K, V>, B>,
}

/// An ordered map based on an [AVL tree].
///
/// [AVL tree]: https://en.wikipedia.org/wiki/AVL_tree
pub type AvlMap<K, V> = TreeMap<K, V, Avl>;

/// An ordered map based on an unbalanced binary search tree.
pub type BstMap<K, V> = TreeMap<K, V, Unbalanced>;

struct MapNode<K, V> {
    links: Links<MapNode<K, V>>,
    key: K,
    value: V,
    _unpin: PhantomPinned,
}

impl<K, V> MapNode<K, V> {
    fn new(key: K, value: V) -> Box<Self> {
        Box::new(MapNode {
            links: Links::new(),
            key,
            value,
            _unpin: PhantomPinned,
        })
    }
}

unsafe impl<K, V> Linked<Links<MapNode<K, V>>> for MapNode<K, V> {
    type Handle = Box<Self>;

    fn into_ptr(r: Self::Handle) -> NonNull<Self> {
        Box::leak(r).into()
    }

    unsafe fn from_ptr(ptr: NonNull<Self>) -> Self::Handle {
        unsafe { Box::from_raw(ptr.as_ptr()) }
    }

    unsafe fn links(ptr: NonNull<Self>) -> NonNull<Links<MapNode<K, V>>> {
        let ptr = ptr.as_ptr();
        unsafe { NonNull::new_unchecked(core::ptr::addr_of_mut!((*ptr).links)) }
    }
}

impl<K: Ord, V> TreeNode<Links<MapNode<K, V>>> for MapNode<K, V> {
    type Key = K;

    fn key(&self) -> &Self::Key {
        &self.key
    }
}

impl<K: Ord, V, B: Balance> TreeMap<K, V, B> {
    /// Creates a new, empty map.
    pub const fn new() -> Self {
        Self {
            tree: SearchTree::new(),
        }
    }

    /// Returns `true` if the map contains no elements.
    pub const fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Returns the number of elements in the map.
    pub const fn len(&self) -> usize {
        self.tree.len()
    }

    /// Returns `true` if the map contains a value associated with `key`.
    #[inline]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        self.tree.contains_key(key)
    }

    /// Returns a reference to the value associated with `key`.
    #[inline]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        self.tree.get(key).map(|node| &node.get_ref().value)
    }

    /// Returns a mutable reference to the value associated with `key`.
    #[inline]
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        // SAFETY: Pinning is not structural for `node.value`, and neither the key nor the links
        // are modified.
        unsafe {
            self.tree
                .get_mut(key)
                .map(|node| &mut node.get_unchecked_mut().value)
        }
    }

    /// Returns a reference to the value associated with `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if the map holds no such key.
    pub fn try_get<Q>(&self, key: &Q) -> Result<&V, Error>
    where
        K: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        self.get(key).ok_or(Error::KeyNotFound)
    }

    /// Returns a mutable reference to the value associated with `key`.
    ///
    /// Unlike [`TreeMap::insert`], this never adds a new key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if the map holds no such key.
    pub fn try_get_mut<Q>(&mut self, key: &Q) -> Result<&mut V, Error>
    where
        K: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        self.get_mut(key).ok_or(Error::KeyNotFound)
    }

    /// Inserts a key-value pair into the map.
    ///
    /// If the map already had a value for `key`, it is overwritten in place and the old value is
    /// returned; the shape of the tree does not change.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.tree.entry(&key) {
            Entry::Occupied(mut occupied) => {
                // SAFETY: Pinning is not structural for `node.value`, and neither the key nor the
                // links are modified.
                let node = unsafe { occupied.get_mut().get_unchecked_mut() };
                Some(mem::replace(&mut node.value, value))
            }

            Entry::Vacant(vacant) => {
                // SAFETY: the entry was looked up with `key`.
                unsafe { vacant.insert(MapNode::new(key, value)) };
                None
            }
        }
    }

    /// Returns the first key-value pair in the map.
    ///
    /// The returned key is the minimum key in the map.
    #[inline]
    pub fn first_key_value(&self) -> Option<(&K, &V)> {
        self.tree
            .first()
            .map(|node| (&node.get_ref().key, &node.get_ref().value))
    }

    /// Removes and returns the first key-value pair in the map.
    ///
    /// The returned key is the minimum key in the map.
    #[inline]
    pub fn pop_first(&mut self) -> Option<(K, V)> {
        self.tree.pop_first().map(|node| {
            let MapNode { key, value, .. } = *node;
            (key, value)
        })
    }

    /// Returns the last key-value pair in the map.
    ///
    /// The returned key is the maximum key in the map.
    #[inline]
    pub fn last_key_value(&self) -> Option<(&K, &V)> {
        self.tree
            .last()
            .map(|node| (&node.get_ref().key, &node.get_ref().value))
    }

    /// Removes and returns the last key-value pair in the map.
    ///
    /// The returned key is the maximum key in the map.
    #[inline]
    pub fn pop_last(&mut self) -> Option<(K, V)> {
        self.tree.pop_last().map(|node| {
            let MapNode { key, value, .. } = *node;
            (key, value)
        })
    }

    /// Removes the value associated with `key` from the map.
    ///
    /// Removing a key that is not present does nothing and returns `None`.
    #[inline]
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        self.tree.remove(key).map(|node| node.value)
    }

    /// Clears the map, removing all elements.
    #[inline]
    pub fn clear(&mut self) {
        self.tree.clear();
    }

    /// Returns an iterator over the entries of the map, sorted by key.
    pub fn iter(&self) -> Iter<'_, K, V, B> {
        Iter {
            inner: self.tree.iter(),
        }
    }

    /// Returns an iterator starting at the entry for `key`.
    ///
    /// If the map holds no such key, the returned iterator is already exhausted.
    pub fn find<Q>(&self, key: &Q) -> Iter<'_, K, V, B>
    where
        K: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        Iter {
            inner: self.tree.find(key).iter(),
        }
    }

    /// Returns `true` if the heights of the two subtrees of every node differ by at most one.
    pub fn is_balanced(&self) -> bool {
        self.tree.is_balanced()
    }

    /// Returns the height of the underlying tree.
    pub fn height(&self) -> usize {
        self.tree.height()
    }

    #[doc(hidden)]
    pub fn assert_invariants(&self) {
        self.tree.assert_invariants();
    }
}

impl<K: Ord, V, B: Balance> Default for TreeMap<K, V, B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, B> fmt::Debug for TreeMap<K, V, B>
where
    K: Ord + fmt::Debug,
    V: fmt::Debug,
    B: Balance,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, Q, V, B> Index<&Q> for TreeMap<K, V, B>
where
    K: Borrow<Q> + Ord,
    Q: Ord + ?Sized,
    B: Balance,
{
    type Output = V;

    /// Returns a reference to the value associated with `key`.
    ///
    /// # Panics
    ///
    /// Panics if the key is not present in the map.
    fn index(&self, key: &Q) -> &V {
        match self.try_get(key) {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }
}

impl<K, Q, V, B> IndexMut<&Q> for TreeMap<K, V, B>
where
    K: Borrow<Q> + Ord,
    Q: Ord + ?Sized,
    B: Balance,
{
    /// Returns a mutable reference to the value associated with `key`.
    ///
    /// # Panics
    ///
    /// Panics if the key is not present in the map.
    fn index_mut(&mut self, key: &Q) -> &mut V {
        match self.try_get_mut(key) {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }
}

impl<K: Ord, V, B: Balance> FromIterator<(K, V)> for TreeMap<K, V, B> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = TreeMap::new();
        map.extend(iter);
        map
    }
}

impl<K: Ord, V, B: Balance> Extend<(K, V)> for TreeMap<K, V, B> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<'map, K: Ord, V, B: Balance> IntoIterator for &'map TreeMap<K, V, B> {
    type Item = (&'map K, &'map V);
    type IntoIter = Iter<'map, K, V, B>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over the entries of a [`TreeMap`], sorted by key.
pub struct Iter<'map, K: Ord, V, B: Balance> {
    inner: iter::Iter<'map, MapNode<K, V>, B>,
}

impl<'map, K: Ord, V, B: Balance> Iterator for Iter<'map, K, V, B> {
    type Item = (&'map K, &'map V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|node| (&node.key, &node.value))
    }
}

impl<'map, K: Ord, V, B: Balance> FusedIterator for Iter<'map, K, V, B> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_overwrites_in_place() {
        let mut map: AvlMap<u32, &str> = AvlMap::new();

        assert_eq!(map.insert(1, "one"), None);
        assert_eq!(map.insert(2, "two"), None);
        let height = map.height();

        assert_eq!(map.insert(1, "uno"), Some("one"));
        assert_eq!(map.len(), 2);
        assert_eq!(map.height(), height);
        assert_eq!(map.get(&1), Some(&"uno"));
        map.assert_invariants();
    }

    #[test]
    fn try_get_missing_key() {
        let mut map: AvlMap<u32, u32> = AvlMap::new();
        assert_eq!(map.try_get(&7), Err(Error::KeyNotFound));
        assert_eq!(map.try_get_mut(&7), Err(Error::KeyNotFound));
        assert!(map.is_empty());

        map.insert(7, 49);
        *map.try_get_mut(&7).unwrap() += 1;
        assert_eq!(map[&7], 50);
    }

    #[test]
    #[should_panic(expected = "key not found")]
    fn index_missing_key_panics() {
        let map: AvlMap<u32, u32> = AvlMap::new();
        let _ = map[&3];
    }

    #[test]
    fn index_mut_updates_value() {
        let mut map: AvlMap<u32, u32> = (0..5).map(|k| (k, k)).collect();

        map[&3] += 10;
        map[&0] = 7;

        assert_eq!(map[&3], 13);
        assert_eq!(map.get(&0), Some(&7));
        assert_eq!(map.len(), 5);
        map.assert_invariants();
    }

    #[test]
    #[should_panic(expected = "key not found")]
    fn index_mut_missing_key_panics() {
        let mut map: AvlMap<u32, u32> = [(1, 1)].into_iter().collect();
        map[&3] = 9;
    }

    #[test]
    fn find_iterates_from_key() {
        let map: AvlMap<u32, u32> = (0..10).map(|k| (k, k * k)).collect();

        let tail: Vec<_> = map.find(&7).map(|(&k, &v)| (k, v)).collect();
        assert_eq!(tail, [(7, 49), (8, 64), (9, 81)]);

        assert_eq!(map.find(&42).next(), None);
    }

    #[test]
    fn remove_and_pop() {
        let mut map: BstMap<i32, char> = [(2, 'b'), (1, 'a'), (3, 'c'), (4, 'd')]
            .into_iter()
            .collect();

        assert_eq!(map.remove(&9), None);
        assert_eq!(map.remove(&2), Some('b'));
        assert_eq!(map.pop_first(), Some((1, 'a')));
        assert_eq!(map.pop_last(), Some((4, 'd')));
        assert_eq!(map.first_key_value(), Some((&3, &'c')));
        assert_eq!(map.last_key_value(), Some((&3, &'c')));
        map.assert_invariants();

        map.clear();
        map.clear();
        assert!(map.is_empty());
        assert_eq!(format!("{map:?}"), "{}");
    }

    #[test]
    fn debug_lists_entries_in_order() {
        let map: AvlMap<u32, char> = [(3, 'c'), (1, 'a'), (2, 'b')].into_iter().collect();
        assert_eq!(format!("{map:?}"), "{1: 'a', 2: 'b', 3: 'c'}");
    }
}
