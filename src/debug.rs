use core::{fmt, pin::Pin, ptr::NonNull};
use std::collections::VecDeque;

use crate::{Balance, Dir, Links, SearchTree, TreeNode};

impl<T, B> SearchTree<T, B>
where
    T: TreeNode<Links<T>> + ?Sized,
    B: Balance,
{
    /// Returns the element reached by walking from the root along `path`.
    ///
    /// Returns `None` if the path leaves the tree.
    pub fn node_at(&self, path: &[Dir]) -> Option<Pin<&T>> {
        let mut cur = self.root?;

        for &dir in path {
            cur = unsafe { T::links(cur).as_ref().child(dir)? };
        }

        Some(unsafe { Pin::new_unchecked(cur.as_ref()) })
    }

    /// Returns the stored balance factor of `node`: the height of its right subtree minus the
    /// height of its left subtree.
    ///
    /// Only trees with the [`Avl`](crate::Avl) policy maintain balance factors; for other trees
    /// this is always 0.
    pub fn balance_of(&self, node: &T) -> i8 {
        unsafe { T::links(NonNull::from(node)).as_ref().balance() }
    }

    /// Writes a Graphviz rendering of the tree to `w`.
    ///
    /// Each node is labelled `key:balance`; missing children are drawn as points.
    pub fn dotgraph<W>(&self, name: &str, mut w: W) -> fmt::Result
    where
        W: fmt::Write,
        T::Key: fmt::Display,
    {
        let root = match self.root {
            Some(r) => r,
            None => return write!(w, "digraph \"graph-{name}\" {{}}"),
        };

        enum Item<T: ?Sized> {
            Node(NonNull<T>),
            Missing(u32),
        }

        let mut queue = VecDeque::new();
        queue.push_back(Item::Node(root));

        write!(
            w,
            "digraph \"graph-{name}\" {{\n subgraph \"subgraph-{name}\" {{"
        )?;

        let mut missing = 0;
        let mut links = String::new();

        while !queue.is_empty() {
            use fmt::Write;

            write!(w, "{{rank=same; ")?;

            for _ in 0..queue.len() {
                let node = match queue.pop_front() {
                    Some(Item::Node(node)) => node,
                    Some(Item::Missing(id)) => {
                        write!(w, "\"graph{name}-missing{id}\" [shape=point]; ")?;
                        continue;
                    }
                    None => break,
                };

                let key = unsafe { node.as_ref().key() };
                let balance = unsafe { T::links(node).as_ref().balance() };
                write!(w, "\"graph{name}-{key}\" [label=\"{key}:{balance}\"]; ")?;

                for dir in [Dir::Left, Dir::Right] {
                    if let Some(child) = unsafe { T::links(node).as_ref().child(dir) } {
                        let child_key = unsafe { child.as_ref().key() };

                        queue.push_back(Item::Node(child));
                        writeln!(
                            links,
                            "\"graph{name}-{key}\" -> \"graph{name}-{child_key}\";"
                        )?;
                    } else {
                        queue.push_back(Item::Missing(missing));
                        writeln!(
                            links,
                            "\"graph{name}-{key}\" -> \"graph{name}-missing{missing}\";"
                        )?;
                        missing += 1;
                    }
                }
            }

            writeln!(w, "}}")?;
        }

        w.write_str(&links)?;

        w.write_str(" }\n}")
    }
}
