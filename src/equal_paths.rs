//! Checking whether every root-to-leaf path of a plain binary tree has the same length.
//!
//! This works on its own owned tree shape, [`PathNode`], and shares nothing with
//! [`SearchTree`](crate::SearchTree).

/// A node of a plain binary tree with owned children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathNode<T> {
    pub value: T,
    pub left: Option<Box<PathNode<T>>>,
    pub right: Option<Box<PathNode<T>>>,
}

impl<T> PathNode<T> {
    /// Returns a node with no children.
    pub fn leaf(value: T) -> Self {
        PathNode {
            value,
            left: None,
            right: None,
        }
    }

    /// Returns a node with the given children.
    pub fn new(value: T, left: Option<PathNode<T>>, right: Option<PathNode<T>>) -> Self {
        PathNode {
            value,
            left: left.map(Box::new),
            right: right.map(Box::new),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }
}

/// Returns `true` if all leaves of the tree rooted at `root` are at the same depth.
///
/// A leaf is a node without children. The empty tree trivially satisfies this.
pub fn equal_paths<T>(root: Option<&PathNode<T>>) -> bool {
    match root {
        None => true,
        Some(root) => leaf_depth(root, 0).is_some(),
    }
}

// Returns the common depth of all leaves below `node`, or `None` if two leaves differ.
fn leaf_depth<T>(node: &PathNode<T>, depth: usize) -> Option<usize> {
    match (node.left.as_deref(), node.right.as_deref()) {
        (None, None) => Some(depth),
        (Some(child), None) | (None, Some(child)) => leaf_depth(child, depth + 1),
        (Some(left), Some(right)) => {
            let left = leaf_depth(left, depth + 1)?;
            let right = leaf_depth(right, depth + 1)?;
            (left == right).then_some(left)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(v: u32) -> Option<PathNode<u32>> {
        Some(PathNode::leaf(v))
    }

    #[test]
    fn empty_and_single() {
        assert!(equal_paths::<u32>(None));
        assert!(equal_paths(Some(&PathNode::leaf(1))));
    }

    #[test]
    fn unary_chain_has_one_path() {
        let chain = PathNode::new(1, None, Some(PathNode::new(2, leaf(3), None)));
        assert!(equal_paths(Some(&chain)));
    }

    #[test]
    fn full_tree() {
        let tree = PathNode::new(
            1,
            Some(PathNode::new(2, leaf(4), leaf(5))),
            Some(PathNode::new(3, leaf(6), None)),
        );
        assert!(equal_paths(Some(&tree)));
    }

    #[test]
    fn uneven_leaves() {
        let tree = PathNode::new(1, leaf(2), Some(PathNode::new(3, leaf(4), None)));
        assert!(!equal_paths(Some(&tree)));

        let deep = PathNode::new(
            1,
            Some(PathNode::new(2, leaf(4), leaf(5))),
            Some(PathNode::new(3, Some(PathNode::new(6, leaf(7), None)), None)),
        );
        assert!(!equal_paths(Some(&deep)));
    }
}
