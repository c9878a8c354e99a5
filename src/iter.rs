use core::iter::FusedIterator;

use crate::{Balance, Link, Links, SearchTree, TreeNode};

/// An in-order iterator over the elements of a [`SearchTree`].
///
/// The iterator is positioned at a node and advances to that node's successor. It is exhausted
/// once it steps past the maximum element.
pub struct Iter<'tree, T, B>
where
    T: TreeNode<Links<T>> + ?Sized,
    B: Balance,
{
    tree: &'tree SearchTree<T, B>,
    next: Link<T>,
}

impl<'tree, T, B> Iter<'tree, T, B>
where
    T: TreeNode<Links<T>> + ?Sized,
    B: Balance,
{
    pub(crate) fn new(tree: &'tree SearchTree<T, B>) -> Self {
        Iter {
            tree,
            next: tree.first_raw(),
        }
    }

    pub(crate) fn starting_at(tree: &'tree SearchTree<T, B>, next: Link<T>) -> Self {
        Iter { tree, next }
    }
}

impl<'tree, T, B> Iterator for Iter<'tree, T, B>
where
    T: TreeNode<Links<T>> + ?Sized,
    B: Balance,
{
    type Item = &'tree T;

    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.next?;

        self.next = unsafe { self.tree.successor_raw(cur) };

        Some(unsafe { cur.as_ref() })
    }
}

impl<'tree, T, B> FusedIterator for Iter<'tree, T, B>
where
    T: TreeNode<Links<T>> + ?Sized,
    B: Balance,
{
}

impl<'tree, T, B> Clone for Iter<'tree, T, B>
where
    T: TreeNode<Links<T>> + ?Sized,
    B: Balance,
{
    fn clone(&self) -> Self {
        Iter {
            tree: self.tree,
            next: self.next,
        }
    }
}
