use core::{borrow::Borrow, cmp::Ordering, marker::PhantomData, pin::Pin, ptr::NonNull};

use crate::{
    cursor::{Cursor, CursorMut},
    entry::{Entry, InsertAs},
    iter::Iter,
    Dir, Link, Links, TreeNode,
};

mod private {
    pub trait Sealed {}
}

/// A balancing policy for a [`SearchTree`].
///
/// The base tree performs all structural mutation (descending, linking, splicing and swapping
/// nodes) and calls into the policy afterwards so that it can restore its own invariants.
pub trait Balance: private::Sealed + Sized {
    /// Whether the policy keeps the per-node balance factor up to date.
    #[doc(hidden)]
    const TRACKS_BALANCE: bool;

    /// Called after `node` has been linked into the tree as a new leaf.
    #[doc(hidden)]
    unsafe fn inserted<T>(tree: &mut SearchTree<T, Self>, node: NonNull<T>)
    where
        T: TreeNode<Links<T>> + ?Sized;

    /// Called after a node with at most one child has been spliced out of the `dir` subtree of
    /// `parent`, which is now one level shorter.
    #[doc(hidden)]
    unsafe fn removed<T>(tree: &mut SearchTree<T, Self>, parent: NonNull<T>, dir: Dir)
    where
        T: TreeNode<Links<T>> + ?Sized;

    /// Called after `a` and `b` have exchanged structural positions.
    #[doc(hidden)]
    unsafe fn swapped<T>(tree: &mut SearchTree<T, Self>, a: NonNull<T>, b: NonNull<T>)
    where
        T: TreeNode<Links<T>> + ?Sized;
}

/// The policy of a plain binary search tree: nodes stay wherever they were inserted.
#[derive(Copy, Clone, Debug)]
pub enum Unbalanced {}

impl private::Sealed for Unbalanced {}
impl private::Sealed for crate::Avl {}

impl Balance for Unbalanced {
    const TRACKS_BALANCE: bool = false;

    unsafe fn inserted<T>(_: &mut SearchTree<T, Self>, _: NonNull<T>)
    where
        T: TreeNode<Links<T>> + ?Sized,
    {
    }

    unsafe fn removed<T>(_: &mut SearchTree<T, Self>, _: NonNull<T>, _: Dir)
    where
        T: TreeNode<Links<T>> + ?Sized,
    {
    }

    unsafe fn swapped<T>(_: &mut SearchTree<T, Self>, _: NonNull<T>, _: NonNull<T>)
    where
        T: TreeNode<Links<T>> + ?Sized,
    {
    }
}

/// An intrusive binary search tree.
///
/// The tree owns its items through their [`Linked::Handle`](cordyceps::Linked::Handle): an item
/// is converted into a raw pointer on insertion and converted back when it is removed or the
/// tree is cleared. Child links own, parent links only observe.
pub struct SearchTree<T, B>
where
    T: TreeNode<Links<T>> + ?Sized,
    B: Balance,
{
    pub(crate) root: Link<T>,
    pub(crate) len: usize,
    _balance: PhantomData<B>,
}

/// An unbalanced binary search tree.
pub type BaseTree<T> = SearchTree<T, Unbalanced>;

// Result of descending the tree in search of a key.
pub(crate) enum Search<T: ?Sized> {
    Found(NonNull<T>),
    Vacant(InsertAs<T>),
}

impl<T, B> SearchTree<T, B>
where
    T: TreeNode<Links<T>> + ?Sized,
    B: Balance,
{
    /// Returns a new empty tree.
    pub const fn new() -> SearchTree<T, B> {
        SearchTree {
            root: None,
            len: 0,
            _balance: PhantomData,
        }
    }

    /// Returns `true` if the tree contains no elements.
    pub const fn is_empty(&self) -> bool {
        let empty = self.len() == 0;

        if cfg!(debug_assertions) {
            // Can't use assert_eq!() in const fn.
            assert!(empty == self.root.is_none());
        }

        empty
    }

    /// Returns the number of elements in the tree.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns the element at the root of the tree.
    pub fn root(&self) -> Option<Pin<&T>> {
        self.root.map(|root| unsafe { Pin::new_unchecked(root.as_ref()) })
    }

    #[doc(hidden)]
    pub fn assert_invariants(&self) {
        if let Some(root) = self.root {
            assert_eq!(
                unsafe { T::links(root).as_ref().parent() },
                None,
                "root has a parent"
            );
        }

        let mut count = 0;
        unsafe { self.assert_invariants_at(self.root, None, None, &mut count) };
        assert_eq!(count, self.len, "length does not match number of nodes");
    }

    // Checks the subtree rooted at `opt_node`, whose keys must lie strictly between `lower` and
    // `upper`. Returns the height of the subtree.
    unsafe fn assert_invariants_at(
        &self,
        opt_node: Link<T>,
        lower: Link<T>,
        upper: Link<T>,
        count: &mut usize,
    ) -> usize {
        let Some(node) = opt_node else {
            return 0;
        };

        *count += 1;

        unsafe {
            let key = node.as_ref().key();

            if let Some(lower) = lower {
                assert!(lower.as_ref().key() < key, "keys out of order");
            }

            if let Some(upper) = upper {
                assert!(key < upper.as_ref().key(), "keys out of order");
            }

            let links = T::links(node).as_ref();

            for dir in [Dir::Left, Dir::Right] {
                if let Some(child) = links.child(dir) {
                    // Ensure child's parent link points to this node.
                    let parent = T::links(child)
                        .as_ref()
                        .parent()
                        .expect("child parent pointer not set");
                    assert_eq!(node, parent);
                }
            }

            let left_height = self.assert_invariants_at(links.left(), lower, Some(node), count);
            let right_height = self.assert_invariants_at(links.right(), Some(node), upper, count);

            if B::TRACKS_BALANCE {
                let balance = right_height as isize - left_height as isize;
                assert_eq!(
                    links.balance() as isize,
                    balance,
                    "stored balance factor is stale"
                );
                assert!((-1..=1).contains(&balance), "subtree out of balance");
            }

            1 + left_height.max(right_height)
        }
    }

    /// Returns a reference to the element corresponding to `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<Pin<&T>>
    where
        T::Key: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        let ptr = self.get_raw(key)?;
        unsafe { Some(Pin::new_unchecked(ptr.as_ref())) }
    }

    /// Returns a pinned mutable reference to the element corresponding to `key`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that neither the links nor the key of the returned element are
    /// modified.
    pub unsafe fn get_mut<Q>(&mut self, key: &Q) -> Option<Pin<&mut T>>
    where
        T::Key: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        let mut ptr = self.get_raw(key)?;
        unsafe { Some(Pin::new_unchecked(ptr.as_mut())) }
    }

    /// Returns `true` if the tree contains an element corresponding to `key`.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        T::Key: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        self.get_raw(key).is_some()
    }

    pub(crate) fn get_raw<Q>(&self, key: &Q) -> Link<T>
    where
        T::Key: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        match self.search(key) {
            Search::Found(node) => Some(node),
            Search::Vacant(_) => None,
        }
    }

    pub(crate) fn search<Q>(&self, key: &Q) -> Search<T>
    where
        T::Key: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        let Some(mut cur) = self.root else {
            return Search::Vacant(InsertAs::Root);
        };

        loop {
            let dir = match key.cmp(unsafe { cur.as_ref() }.key().borrow()) {
                Ordering::Less => Dir::Left,
                Ordering::Equal => return Search::Found(cur),
                Ordering::Greater => Dir::Right,
            };

            match unsafe { T::links(cur).as_ref().child(dir) } {
                // Descend.
                Some(child) => cur = child,

                // Fell off the tree; this is where `key` belongs.
                None => return Search::Vacant(InsertAs::Child { parent: cur, dir }),
            }
        }
    }

    /// Returns the minimum element of the tree.
    pub fn first(&self) -> Option<Pin<&T>> {
        self.first_raw()
            .map(|first| unsafe { Pin::new_unchecked(first.as_ref()) })
    }

    /// Returns the maximum element of the tree.
    pub fn last(&self) -> Option<Pin<&T>> {
        self.last_raw()
            .map(|last| unsafe { Pin::new_unchecked(last.as_ref()) })
    }

    pub(crate) fn first_raw(&self) -> Link<T> {
        self.root
            .map(|root| unsafe { self.extreme_in_subtree(root, Dir::Left) })
    }

    pub(crate) fn last_raw(&self) -> Link<T> {
        self.root
            .map(|root| unsafe { self.extreme_in_subtree(root, Dir::Right) })
    }

    // Returns the node reached by following `dir` links from `root` until there are none.
    #[inline]
    unsafe fn extreme_in_subtree(&self, root: NonNull<T>, dir: Dir) -> NonNull<T> {
        let mut cur = root;

        while let Some(child) = unsafe { T::links(cur).as_ref().child(dir) } {
            cur = child;
        }

        cur
    }

    // Returns the minimum node in the subtree.
    //
    // If the subtree root is not the minimum, also returns the minimum node's parent.
    #[inline]
    unsafe fn min_in_subtree(&self, root: NonNull<T>) -> (NonNull<T>, Option<NonNull<T>>) {
        let mut parent = None;
        let mut cur = root;

        while let Some(left) = unsafe { T::links(cur).as_ref().left() } {
            parent = Some(cur);
            cur = left;
        }

        (cur, parent)
    }

    /// Returns the in-order successor of `node`.
    pub(crate) unsafe fn successor_raw(&self, node: NonNull<T>) -> Link<T> {
        unsafe { self.neighbor_raw(node, Dir::Right) }
    }

    /// Returns the in-order predecessor of `node`.
    pub(crate) unsafe fn predecessor_raw(&self, node: NonNull<T>) -> Link<T> {
        unsafe { self.neighbor_raw(node, Dir::Left) }
    }

    // Returns the next node after `node` in direction `dir`.
    //
    // If `node` has a `dir` subtree, the neighbor is the `!dir`-most node of that subtree.
    // Otherwise, ascend until crossing from a `!dir` child into its parent; if the root is
    // reached without such a crossing, there is no neighbor.
    unsafe fn neighbor_raw(&self, node: NonNull<T>, dir: Dir) -> Link<T> {
        unsafe {
            if let Some(child) = T::links(node).as_ref().child(dir) {
                return Some(self.extreme_in_subtree(child, !dir));
            }

            let mut cur = node;
            while let Some(parent) = T::links(cur).as_ref().parent() {
                if self.which_child(parent, cur) == !dir {
                    return Some(parent);
                }

                cur = parent;
            }

            None
        }
    }

    /// Returns an iterator over the elements of the tree, in ascending key order.
    pub fn iter(&self) -> Iter<'_, T, B> {
        Iter::new(self)
    }

    /// Returns a cursor pointing to the minimum element of the tree.
    ///
    /// If the tree is empty, this is the same as [`SearchTree::end`].
    pub fn begin(&self) -> Cursor<'_, T, B> {
        Cursor::first(self)
    }

    /// Returns a cursor pointing to the "ghost" non-element past the maximum element.
    pub fn end(&self) -> Cursor<'_, T, B> {
        Cursor::ghost(self)
    }

    /// Returns a cursor pointing to the element corresponding to `key`.
    ///
    /// If there is no such element, this is the same as [`SearchTree::end`].
    pub fn find<Q>(&self, key: &Q) -> Cursor<'_, T, B>
    where
        T::Key: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        Cursor::at(self, self.get_raw(key))
    }

    /// Returns a cursor pointing to the minimum element of the tree, which supports editing
    /// operations.
    pub fn cursor_first_mut(&mut self) -> CursorMut<'_, T, B> {
        CursorMut::first(self)
    }

    /// Returns a cursor pointing to the element corresponding to `key`, which supports editing
    /// operations.
    pub fn find_mut<Q>(&mut self, key: &Q) -> CursorMut<'_, T, B>
    where
        T::Key: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        let ptr = self.get_raw(key);
        CursorMut::at(self, ptr)
    }

    /// Returns the entry corresponding to `key`.
    pub fn entry<Q>(&mut self, key: &Q) -> Entry<'_, T, B>
    where
        T::Key: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        match self.search(key) {
            Search::Found(node) => unsafe { Entry::occupied(self, node) },
            Search::Vacant(insert_as) => unsafe { Entry::vacant(self, insert_as) },
        }
    }

    /// Inserts an item into the tree.
    ///
    /// If the tree already holds an item with an equal key, `item` takes over its position and
    /// the old item is returned. The shape of the tree does not change in that case.
    ///
    /// This operation completes in _O(h)_ time, where _h_ is the height of the tree.
    pub fn insert(&mut self, item: T::Handle) -> Option<T::Handle> {
        let ptr = T::into_ptr(item);

        unsafe {
            match self.search(ptr.as_ref().key()) {
                Search::Found(existing) => Some(self.replace(existing, ptr)),
                Search::Vacant(insert_as) => {
                    self.link_at(insert_as, ptr);
                    None
                }
            }
        }
    }

    // Links `ptr` into the tree as a new leaf at `insert_as` and lets the policy rebalance.
    pub(crate) unsafe fn link_at(&mut self, insert_as: InsertAs<T>, ptr: NonNull<T>) {
        unsafe {
            let links = T::links(ptr).as_mut();
            links.clear();

            match insert_as {
                InsertAs::Root => {
                    debug_assert!(self.root.is_none());
                    self.root = Some(ptr);
                    self.len += 1;
                }

                InsertAs::Child { parent, dir } => {
                    debug_assert!(T::links(parent).as_ref().child(dir).is_none());
                    links.set_parent(Some(parent));
                    T::links(parent).as_mut().set_child(dir, Some(ptr));
                    self.len += 1;

                    B::inserted(self, ptr);
                }
            }
        }
    }

    // Puts `new` into the structural position of `old`, which is unlinked and returned.
    //
    // `new` inherits the links and balance factor of `old`.
    pub(crate) unsafe fn replace(&mut self, old: NonNull<T>, new: NonNull<T>) -> T::Handle {
        unsafe {
            // Read the old value's links.
            let old_links = T::links(old).as_ref();
            let balance = old_links.balance();
            let parent = old_links.parent();
            let left = old_links.left();
            let right = old_links.right();

            // Link the new item into the tree.
            self.replace_child_or_set_root(parent, old, Some(new));
            self.maybe_set_parent(left, Some(new));
            self.maybe_set_parent(right, Some(new));

            let new_links = T::links(new).as_mut();
            new_links.set_parent(parent);
            new_links.set_left(left);
            new_links.set_right(right);
            new_links.set_balance(balance);

            // Deinit the old item's links.
            T::links(old).as_mut().clear();

            T::from_ptr(old)
        }
    }

    /// Removes the element corresponding to `key` from the tree and returns it.
    ///
    /// Returns `None` if there is no such element.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<T::Handle>
    where
        T::Key: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        let node = self.get_raw(key)?;
        Some(unsafe { self.remove_at(node) })
    }

    /// Removes and returns the minimum element of the tree.
    pub fn pop_first(&mut self) -> Option<T::Handle> {
        let first = self.first_raw()?;
        Some(unsafe { self.remove_at(first) })
    }

    /// Removes and returns the maximum element of the tree.
    pub fn pop_last(&mut self) -> Option<T::Handle> {
        let last = self.last_raw()?;
        Some(unsafe { self.remove_at(last) })
    }

    /// Removes an arbitrary node from the tree.
    ///
    /// # Safety
    ///
    /// It is the caller's responsibility to ensure that `node` is an element of `self`, and not any
    /// other tree.
    pub unsafe fn remove_at(&mut self, node: NonNull<T>) -> T::Handle {
        // There are three possible cases:
        //
        // 1. `node` has two children.
        //
        //    In this case `node` swaps positions with its predecessor, the maximum node of its
        //    left subtree. The predecessor by definition has no right child, so after the swap
        //    `node` can be removed as in case 2 or 3.
        //
        // 2. `node` has one child.
        //
        //    The child is elevated to take `node`'s place.
        //
        // 3. `node` is a leaf.
        //
        //    `node` is unlinked from its parent.
        //
        // In all cases the subtree that held `node` shrinks by one level before rebalancing.

        unsafe {
            if T::links(node).as_ref().left().is_some() && T::links(node).as_ref().right().is_some()
            {
                let predecessor = self
                    .predecessor_raw(node)
                    .expect("node with a left child must have a predecessor");
                self.swap_nodes(node, predecessor);
            }

            let links = T::links(node).as_ref();
            let parent = links.parent();
            let child = links.left().or(links.right());
            let dir = parent.map(|p| self.which_child(p, node));

            self.replace_child_or_set_root(parent, node, child);
            self.maybe_set_parent(child, parent);

            T::links(node).as_mut().clear();
            self.len -= 1;

            if let (Some(parent), Some(dir)) = (parent, dir) {
                B::removed(self, parent, dir);
            }

            T::from_ptr(node)
        }
    }

    // Exchanges the structural positions of `a` and `b`, leaving the items themselves untouched.
    //
    // Every link into or out of either node is retargeted, including the root pointer, so this
    // is correct when `a` and `b` are adjacent.
    pub(crate) unsafe fn swap_nodes(&mut self, a: NonNull<T>, b: NonNull<T>) {
        if a == b {
            return;
        }

        unsafe {
            let a_links = T::links(a).as_ref();
            let a_parent = a_links.parent();
            let a_children = [a_links.left(), a_links.right()];
            let a_dir = a_parent.map(|p| self.which_child(p, a));

            let b_links = T::links(b).as_ref();
            let b_parent = b_links.parent();
            let b_children = [b_links.left(), b_links.right()];
            let b_dir = b_parent.map(|p| self.which_child(p, b));

            // A link to `me` in the record being moved onto `me` must point to `other` instead.
            let retarget = |link: Link<T>, me: NonNull<T>, other: NonNull<T>| {
                if link == Some(me) {
                    Some(other)
                } else {
                    link
                }
            };

            let a_links = T::links(a).as_mut();
            a_links.set_parent(retarget(b_parent, a, b));
            a_links.set_left(retarget(b_children[0], a, b));
            a_links.set_right(retarget(b_children[1], a, b));

            let b_links = T::links(b).as_mut();
            b_links.set_parent(retarget(a_parent, b, a));
            b_links.set_left(retarget(a_children[0], b, a));
            b_links.set_right(retarget(a_children[1], b, a));

            // Point the old neighbors of each node at the other node.
            match (a_parent, a_dir) {
                (Some(p), Some(dir)) if p != b => {
                    T::links(p).as_mut().set_child(dir, Some(b));
                }
                (None, _) => self.root = Some(b),
                _ => (),
            }

            match (b_parent, b_dir) {
                (Some(p), Some(dir)) if p != a => {
                    T::links(p).as_mut().set_child(dir, Some(a));
                }
                (None, _) => self.root = Some(a),
                _ => (),
            }

            for child in a_children.into_iter().flatten().filter(|&c| c != b) {
                T::links(child).as_mut().set_parent(Some(b));
            }

            for child in b_children.into_iter().flatten().filter(|&c| c != a) {
                T::links(child).as_mut().set_parent(Some(a));
            }

            B::swapped(self, a, b);
        }
    }

    /// Clears the tree, removing all elements.
    pub fn clear(&mut self) {
        if self.root.is_some() {
            tracing::debug!(len = self.len, "clearing tree");
        }

        let mut opt_cur = self.root;

        while let Some(cur) = opt_cur {
            unsafe {
                // Descend to the minimum node.
                let (cur, parent) = self.min_in_subtree(cur);
                let parent = parent.or_else(|| T::links(cur).as_ref().parent());

                let right = T::links(cur).as_ref().right();

                // Elevate the node's right child (which may be None).
                self.replace_child_or_set_root(parent, cur, right);
                self.maybe_set_parent(right, parent);

                // Drop the node.
                T::links(cur).as_mut().clear();
                drop(T::from_ptr(cur));
                self.len -= 1;

                // If the node had no right child, climb to the parent. If the node had no parent,
                // the tree is empty.
                opt_cur = right.or(parent);
            }
        }

        debug_assert!(self.root.is_none());
        debug_assert_eq!(self.len(), 0);
    }

    /// Returns the height of the tree: 0 if it is empty, 1 if it holds a single element.
    ///
    /// This operation completes in _O(n)_ time.
    pub fn height(&self) -> usize {
        unsafe { self.height_at(self.root) }
    }

    unsafe fn height_at(&self, opt_node: Link<T>) -> usize {
        let Some(node) = opt_node else {
            return 0;
        };

        unsafe {
            let links = T::links(node).as_ref();
            1 + self.height_at(links.left()).max(self.height_at(links.right()))
        }
    }

    /// Returns `true` if the heights of the two subtrees of every node differ by at most one.
    ///
    /// This is a diagnostic that inspects the actual shape of the tree, independently of any
    /// stored balance factors. It completes in _O(n)_ time.
    pub fn is_balanced(&self) -> bool {
        let mut balanced = true;
        unsafe { self.balanced_height(self.root, &mut balanced) };
        balanced
    }

    // Returns the height of the subtree at `opt_node`, clearing `balanced` if any node in it is
    // out of balance. Once `balanced` is cleared the returned heights are meaningless.
    unsafe fn balanced_height(&self, opt_node: Link<T>, balanced: &mut bool) -> usize {
        let Some(node) = opt_node else {
            return 0;
        };

        unsafe {
            let links = T::links(node).as_ref();

            let left_height = self.balanced_height(links.left(), balanced);
            if !*balanced {
                return 1;
            }

            let right_height = self.balanced_height(links.right(), balanced);
            if !*balanced {
                return 1;
            }

            if left_height.abs_diff(right_height) > 1 {
                *balanced = false;
            }

            1 + left_height.max(right_height)
        }
    }

    // Support methods ========================================================

    #[inline]
    pub(crate) unsafe fn maybe_set_parent(&mut self, opt_node: Link<T>, parent: Link<T>) {
        let Some(node) = opt_node else {
            return;
        };

        unsafe { T::links(node).as_mut().set_parent(parent) };
    }

    #[inline]
    pub(crate) unsafe fn replace_child_or_set_root(
        &mut self,
        parent: Link<T>,
        old_child: NonNull<T>,
        new_child: Link<T>,
    ) {
        match parent {
            Some(parent) => unsafe { self.replace_child(parent, old_child, new_child) },
            None => self.root = new_child,
        }
    }

    // Replaces the child pointer of `parent` pointing at `old_child` with `new_child`.
    //
    // `new_child`'s parent pointer is not updated.
    //
    // # Safety
    //
    // The caller must ensure that `old_child` is a child node of `parent`.
    #[inline]
    unsafe fn replace_child(&mut self, parent: NonNull<T>, old_child: NonNull<T>, new_child: Link<T>) {
        unsafe {
            let links = T::links(parent).as_mut();

            if links.left() == Some(old_child) {
                links.set_left(new_child);
            } else {
                debug_assert_eq!(
                    links.right(),
                    Some(old_child),
                    "`old_child` must be a child of `parent`"
                );
                links.set_right(new_child);
            }
        }
    }

    #[inline]
    pub(crate) unsafe fn which_child(&self, parent: NonNull<T>, child: NonNull<T>) -> Dir {
        if unsafe { T::links(parent).as_ref().left() } == Some(child) {
            Dir::Left
        } else {
            Dir::Right
        }
    }
}

impl<T, B> Default for SearchTree<T, B>
where
    T: TreeNode<Links<T>> + ?Sized,
    B: Balance,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, B> Drop for SearchTree<T, B>
where
    T: TreeNode<Links<T>> + ?Sized,
    B: Balance,
{
    fn drop(&mut self) {
        self.clear();
    }
}

impl<'tree, T, B> IntoIterator for &'tree SearchTree<T, B>
where
    T: TreeNode<Links<T>> + ?Sized,
    B: Balance,
{
    type Item = &'tree T;
    type IntoIter = Iter<'tree, T, B>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
