use core::ptr::NonNull;

use crate::{Balance, Dir, Links, SearchTree, TreeNode};

/// The AVL balancing policy.
///
/// After every insertion or removal, balance factors are updated on the way up from the point of
/// mutation and single or double rotations restore `|balance| <= 1` at every node.
#[derive(Copy, Clone, Debug)]
pub enum Avl {}

/// A height-balanced binary search tree, or AVL tree.
pub type AvlTree<T> = SearchTree<T, Avl>;

impl Balance for Avl {
    const TRACKS_BALANCE: bool = true;

    unsafe fn inserted<T>(tree: &mut SearchTree<T, Self>, node: NonNull<T>)
    where
        T: TreeNode<Links<T>> + ?Sized,
    {
        unsafe { tree.rebalance_inserted(node) }
    }

    unsafe fn removed<T>(tree: &mut SearchTree<T, Self>, parent: NonNull<T>, dir: Dir)
    where
        T: TreeNode<Links<T>> + ?Sized,
    {
        unsafe { tree.rebalance_removed(parent, dir) }
    }

    unsafe fn swapped<T>(_: &mut SearchTree<T, Self>, a: NonNull<T>, b: NonNull<T>)
    where
        T: TreeNode<Links<T>> + ?Sized,
    {
        // Balance factors describe the shape below a position, not the item at it, so they
        // follow the positions the nodes were swapped into.
        unsafe {
            let a_balance = T::links(a).as_ref().balance();
            let b_balance = T::links(b).as_ref().balance();
            T::links(a).as_mut().set_balance(b_balance);
            T::links(b).as_mut().set_balance(a_balance);
        }
    }
}

impl<T> SearchTree<T, Avl>
where
    T: TreeNode<Links<T>> + ?Sized,
{
    // Performs a bottom-up rebalance of the tree after the insertion of the leaf `node`.
    //
    // Invariants:
    // - `node` has no children and a balance of 0.
    unsafe fn rebalance_inserted(&mut self, node: NonNull<T>) {
        unsafe {
            debug_assert!(T::links(node).as_ref().is_leaf());

            let Some(parent) = T::links(node).as_ref().parent() else {
                return;
            };

            let dir = self.which_child(parent, node);
            let before = T::links(parent).as_ref().balance();
            T::links(parent).as_mut().update_balance(dir.sign());

            // The new leaf filled an empty slot, so `parent` cannot have been heavy towards it.
            // If it was heavy the other way, it is now even and its height is unchanged.
            if before != 0 {
                debug_assert_eq!(T::links(parent).as_ref().balance(), 0);
                return;
            }

            // `parent` grew by one level.
            self.fix_inserted(parent, node);
        }
    }

    // Walks up from `parent`, whose `child` subtree just grew taller and which itself just grew
    // taller, until the growth is absorbed by an ancestor or repaired by a rotation.
    unsafe fn fix_inserted(&mut self, mut parent: NonNull<T>, mut child: NonNull<T>) {
        unsafe {
            loop {
                let Some(grandparent) = T::links(parent).as_ref().parent() else {
                    return;
                };

                let parent_dir = self.which_child(grandparent, parent);
                T::links(grandparent).as_mut().update_balance(parent_dir.sign());

                match T::links(grandparent).as_ref().balance() {
                    // The other side was taller; the grandparent's height is unchanged.
                    0 => return,

                    // The grandparent grew taller as well. Ascend one level.
                    -1 | 1 => {
                        child = parent;
                        parent = grandparent;
                    }

                    // The grandparent is two levels heavier on the `parent_dir` side.
                    _ => {
                        let child_dir = self.which_child(parent, child);

                        if child_dir == parent_dir {
                            tracing::trace!(dir = ?parent_dir, "insert: single rotation");

                            self.rotate(grandparent, !parent_dir);
                            T::links(parent).as_mut().set_balance(0);
                            T::links(grandparent).as_mut().set_balance(0);
                        } else {
                            tracing::trace!(dir = ?parent_dir, "insert: double rotation");

                            self.rotate_twice(grandparent, parent, child, parent_dir);
                        }

                        // The subtree is back at its height before the insertion.
                        return;
                    }
                }
            }
        }
    }

    // Performs a bottom-up rebalance of the tree after the `dir` subtree of `parent` lost one
    // level of height.
    unsafe fn rebalance_removed(&mut self, parent: NonNull<T>, dir: Dir) {
        let mut node = parent;
        let mut dir = dir;

        unsafe {
            loop {
                // Read the position of `node` before any rotation moves it.
                let up = T::links(node).as_ref().parent();
                let up_dir = up.map(|up| self.which_child(up, node));

                T::links(node).as_mut().update_balance(-dir.sign());

                let shrunk = match T::links(node).as_ref().balance() {
                    // `node` was even, so its height is unchanged.
                    -1 | 1 => false,

                    // `node` was heavy on the `dir` side and lost one level.
                    0 => true,

                    // `node` is two levels heavier on the side opposite to `dir`.
                    balance => {
                        let heavy = if balance > 0 { Dir::Right } else { Dir::Left };
                        let sign = heavy.sign();

                        let sibling = T::links(node)
                            .as_ref()
                            .child(heavy)
                            .expect("heavy side of an unbalanced node must be non-empty");
                        let sibling_balance = T::links(sibling).as_ref().balance();

                        if sibling_balance == -sign {
                            tracing::trace!(dir = ?heavy, "remove: double rotation");

                            let inner = T::links(sibling)
                                .as_ref()
                                .child(!heavy)
                                .expect("sibling leaning inwards must have an inner child");
                            self.rotate_twice(node, sibling, inner, heavy);
                            true
                        } else {
                            tracing::trace!(dir = ?heavy, "remove: single rotation");

                            self.rotate(node, !heavy);

                            if sibling_balance == 0 {
                                // The sibling's inner subtree keeps `node` one level heavy and
                                // the subtree keeps its height.
                                T::links(node).as_mut().set_balance(sign);
                                T::links(sibling).as_mut().set_balance(-sign);
                                false
                            } else {
                                T::links(node).as_mut().set_balance(0);
                                T::links(sibling).as_mut().set_balance(0);
                                true
                            }
                        }
                    }
                };

                if !shrunk {
                    return;
                }

                // The subtree at `node`'s old position is one level shorter. Ascend.
                match (up, up_dir) {
                    (Some(up), Some(up_dir)) => {
                        node = up;
                        dir = up_dir;
                    }
                    _ => return,
                }
            }
        }
    }

    // Performs a double rotation that brings `inner` up to the position of `top`.
    //
    // `mid` is the `heavy` child of `top` and `inner` is the `!heavy` child of `mid`. Balance
    // factors of all three nodes are updated.
    unsafe fn rotate_twice(&mut self, top: NonNull<T>, mid: NonNull<T>, inner: NonNull<T>, heavy: Dir) {
        unsafe {
            let sign = heavy.sign();
            let inner_balance = T::links(inner).as_ref().balance();

            self.rotate(mid, heavy);
            self.rotate(top, !heavy);

            // `inner`'s two subtrees are handed to `top` and `mid`; whichever received the
            // shorter one leans away from it.
            let (mid_balance, top_balance) = match inner_balance {
                b if b == sign => (0, -sign),
                b if b == -sign => (sign, 0),
                _ => (0, 0),
            };

            T::links(mid).as_mut().set_balance(mid_balance);
            T::links(top).as_mut().set_balance(top_balance);
            T::links(inner).as_mut().set_balance(0);
        }
    }

    // Rotates `pivot` down in direction `dir`, bringing its `!dir` child up to take its place.
    //
    // `rotate(pivot, Dir::Left)` is a left rotation. Balance factors are not updated.
    unsafe fn rotate(&mut self, pivot: NonNull<T>, dir: Dir) {
        unsafe {
            let up = T::links(pivot)
                .as_ref()
                .child(!dir)
                .expect("rotation requires a child to promote");

            // `across` moves from the `dir` side of `up` to the `!dir` side of `pivot`.
            let across = T::links(up).as_ref().child(dir);
            T::links(pivot).as_mut().set_child(!dir, across);
            self.maybe_set_parent(across, Some(pivot));

            T::links(up).as_mut().set_child(dir, Some(pivot));
            let parent = T::links(pivot).as_mut().set_parent(Some(up));
            T::links(up).as_mut().set_parent(parent);

            self.replace_child_or_set_root(parent, pivot, Some(up));
        }
    }
}
