use std::{
    ops::Range,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use cordyceps::Linked;
use proptest::prelude::*;

use crate::model::{self, TestNode};

use super::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn keys<B: Balance>(tree: &SearchTree<TestNode, B>) -> Vec<u32> {
    tree.iter().map(|node| node.key).collect()
}

fn key_at<B: Balance>(tree: &SearchTree<TestNode, B>, path: &[Dir]) -> Option<u32> {
    tree.node_at(path).map(|node| node.key)
}

fn avl_from(keys: &[u32]) -> AvlTree<TestNode> {
    let mut tree = AvlTree::new();

    for &key in keys {
        tree.insert(TestNode::new(key));
        tree.assert_invariants();
        assert!(tree.is_balanced());
    }

    tree
}

// Calls `f` with every permutation of `keys`.
fn for_each_permutation(keys: &mut [u32], k: usize, f: &mut impl FnMut(&[u32])) {
    if k <= 1 {
        f(keys);
        return;
    }

    for i in 0..k {
        for_each_permutation(keys, k - 1, f);
        let swap = if k % 2 == 0 { i } else { 0 };
        keys.swap(swap, k - 1);
    }
}

fn insert_find_all<B: Balance>(keys: &[u32]) {
    let mut tree: SearchTree<TestNode, B> = SearchTree::new();

    for &key in keys {
        tree.insert(TestNode::new(key));
        tree.assert_invariants();
    }

    for key in keys {
        let node = tree.get_raw(key).expect("item not found");
        assert_eq!(unsafe { node.as_ref().key() }, key);
    }
}

fn insert_remove_all<B: Balance>(keys: &[u32]) {
    let mut tree: SearchTree<TestNode, B> = SearchTree::new();

    for &key in keys {
        tree.insert(TestNode::new(key));
        tree.assert_invariants();
    }

    for key in keys {
        let node = tree.get_raw(key).expect("item not found");
        unsafe { tree.remove_at(node) };
        tree.assert_invariants();
    }

    assert!(tree.is_empty());

    for &key in keys {
        tree.insert(TestNode::new(key));
        tree.assert_invariants();
    }

    for key in keys.iter().rev() {
        assert_eq!(tree.remove(key).map(|node| node.key), Some(*key));
        tree.assert_invariants();
    }

    assert!(tree.is_empty());
}

#[test]
fn zero_elems_find() {
    insert_find_all::<Avl>(&[]);
    insert_find_all::<Unbalanced>(&[]);
}

#[test]
fn single_elem_find() {
    insert_find_all::<Avl>(&[0]);
    insert_find_all::<Unbalanced>(&[0]);
}

#[test]
fn three_elems_find() {
    for keys in [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]] {
        insert_find_all::<Avl>(&keys);
        insert_find_all::<Unbalanced>(&keys);
    }
}

#[test]
fn all_permutations_find() {
    for n in 4..=6 {
        let mut keys: Vec<u32> = (0..n).collect();
        for_each_permutation(&mut keys, n as usize, &mut |keys| {
            insert_find_all::<Avl>(keys);
            insert_find_all::<Unbalanced>(keys);
        });
    }
}

#[test]
fn remove_one() {
    insert_remove_all::<Avl>(&[0]);
    insert_remove_all::<Unbalanced>(&[0]);
}

#[test]
fn remove_two() {
    for keys in [[0, 1], [1, 0]] {
        insert_remove_all::<Avl>(&keys);
        insert_remove_all::<Unbalanced>(&keys);
    }
}

#[test]
fn all_permutations_remove() {
    for n in 3..=6 {
        let mut keys: Vec<u32> = (0..n).collect();
        for_each_permutation(&mut keys, n as usize, &mut |keys| {
            insert_remove_all::<Avl>(keys);
            insert_remove_all::<Unbalanced>(keys);
        });
    }
}

#[test]
fn insert_then_find() {
    let mut tree: AvlTree<TestNode> = AvlTree::new();
    assert!(tree.insert(TestNode::new(42)).is_none());

    let found = tree.find(&42);
    assert_eq!(found.get().map(|node| node.key), Some(42));
    assert!(tree.contains_key(&42));
}

#[test]
fn reinsert_replaces_without_reshaping() {
    let mut tree = avl_from(&[5, 3, 8, 1, 4]);
    let shape = tree.iter().map(|n| tree.balance_of(n)).collect::<Vec<_>>();
    let height = tree.height();

    let old = tree.insert(TestNode::new(3)).expect("3 was present");
    assert_eq!(old.key, 3);
    assert!(old.links.parent().is_none() && old.links.is_leaf());

    tree.assert_invariants();
    assert_eq!(tree.len(), 5);
    assert_eq!(tree.height(), height);
    assert_eq!(tree.iter().map(|n| tree.balance_of(n)).collect::<Vec<_>>(), shape);
    assert_eq!(key_at(&tree, &[Dir::Left]), Some(3));
}

#[test]
fn scenario_mixed_inserts() {
    let tree = avl_from(&[5, 3, 8, 1, 4, 7, 9]);
    assert_eq!(keys(&tree), [1, 3, 4, 5, 7, 8, 9]);
}

// Counts single insertion rotations, keyed by the heavy side they repair.
#[derive(Clone, Default)]
struct RotationCounter {
    left: Arc<AtomicUsize>,
    right: Arc<AtomicUsize>,
}

#[derive(Default)]
struct EventFields {
    message: String,
    dir: String,
}

impl tracing::field::Visit for EventFields {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            "dir" => self.dir = format!("{value:?}"),
            _ => (),
        }
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for RotationCounter {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut fields = EventFields::default();
        event.record(&mut fields);

        if fields.message != "insert: single rotation" {
            return;
        }

        // A right-heavy node is fixed by a left rotation.
        match fields.dir.as_str() {
            "Right" => self.left.fetch_add(1, Ordering::SeqCst),
            "Left" => self.right.fetch_add(1, Ordering::SeqCst),
            _ => 0,
        };
    }
}

#[test]
fn scenario_ascending_inserts_rotate_left() {
    use tracing_subscriber::layer::SubscriberExt;

    let counter = RotationCounter::default();
    let subscriber = tracing_subscriber::registry().with(counter.clone());

    tracing::subscriber::with_default(subscriber, || {
        let mut tree: AvlTree<TestNode> = AvlTree::new();

        for key in 1..=7 {
            tree.insert(TestNode::new(key));
            tree.assert_invariants();

            match key {
                3 => assert_eq!(key_at(&tree, &[]), Some(2)),
                5 => {
                    assert_eq!(key_at(&tree, &[]), Some(2));
                    assert_eq!(key_at(&tree, &[Dir::Right]), Some(4));
                }
                _ => (),
            }
        }

        assert_eq!(key_at(&tree, &[]), Some(4));
        assert_eq!(key_at(&tree, &[Dir::Left]), Some(2));
        assert_eq!(key_at(&tree, &[Dir::Right]), Some(6));
        assert_eq!(tree.height(), 3);
        assert!(tree.iter().all(|node| tree.balance_of(node) == 0));
    });

    assert!(counter.left.load(Ordering::SeqCst) >= 2);
    assert_eq!(counter.right.load(Ordering::SeqCst), 0);
}

#[test]
fn double_rotations_on_insert() {
    // Left-right.
    let tree = avl_from(&[3, 1, 2]);
    assert_eq!(key_at(&tree, &[]), Some(2));
    assert_eq!(key_at(&tree, &[Dir::Left]), Some(1));
    assert_eq!(key_at(&tree, &[Dir::Right]), Some(3));

    // Right-left.
    let tree = avl_from(&[1, 3, 2]);
    assert_eq!(key_at(&tree, &[]), Some(2));

    // Right-left where the middle node was left-heavy before the rotation.
    let tree = avl_from(&[20, 10, 40, 30, 50, 25]);
    assert_eq!(key_at(&tree, &[]), Some(30));
    let twenty = tree.get(&20).unwrap();
    let forty = tree.get(&40).unwrap();
    assert_eq!(tree.balance_of(&twenty), 0);
    assert_eq!(tree.balance_of(&forty), 1);
}

#[test]
fn scenario_remove_two_child_node() {
    init_tracing();

    let mut tree = avl_from(&[10, 5, 15, 3, 7, 12, 18]);

    let removed = tree.remove(&15).expect("15 was present");
    assert_eq!(removed.key, 15);
    tree.assert_invariants();

    assert_eq!(key_at(&tree, &[Dir::Right]), Some(12));
    assert_eq!(key_at(&tree, &[Dir::Right, Dir::Right]), Some(18));
    assert_eq!(key_at(&tree, &[Dir::Right, Dir::Left]), None);
    assert_eq!(keys(&tree), [3, 5, 7, 10, 12, 18]);
    assert!(tree.is_balanced());
    assert!(tree.find(&15).is_end());
}

#[test]
fn scenario_empty_tree() {
    let tree: AvlTree<TestNode> = AvlTree::new();
    assert!(tree.find(&3) == tree.end());
    assert!(tree.begin() == tree.end());
    assert!(tree.get(&3).is_none());
    assert!(tree.is_balanced());
    assert_eq!(tree.height(), 0);

    let map: AvlMap<u32, u32> = AvlMap::new();
    assert_eq!(map.try_get(&3), Err(Error::KeyNotFound));
}

#[test]
fn remove_missing_is_noop() {
    let mut tree: AvlTree<TestNode> = AvlTree::new();
    assert!(tree.remove(&1).is_none());

    let mut tree = avl_from(&[2, 1, 3]);
    assert!(tree.remove(&4).is_none());
    assert_eq!(keys(&tree), [1, 2, 3]);
    tree.assert_invariants();
}

#[test]
fn remove_rebalances_upwards() {
    init_tracing();

    let mut tree = avl_from(&(1..=100).collect::<Vec<_>>());

    for key in (2..=100).step_by(2) {
        assert_eq!(tree.remove(&key).map(|n| n.key), Some(key));
        tree.assert_invariants();
        assert!(tree.is_balanced());
    }

    assert_eq!(keys(&tree), (1..=100).step_by(2).collect::<Vec<_>>());

    // Drain from the left edge, repeatedly shrinking the shorter side of the root.
    while let Some(node) = tree.pop_first() {
        assert!(tree.get(&node.key).is_none());
        tree.assert_invariants();
    }
}

#[test]
fn remove_single_rotation_keeps_height() {
    //       2
    //     1   4
    //        3 5
    let mut tree = avl_from(&[2, 1, 4, 3, 5]);
    let height = tree.height();

    // Removing 1 leaves 2 at +2 with an even sibling; one rotation fixes it without shrinking.
    tree.remove(&1);
    tree.assert_invariants();
    assert_eq!(tree.height(), height);
    assert_eq!(key_at(&tree, &[]), Some(4));
    let root = tree.root().unwrap();
    assert_eq!(tree.balance_of(&root), -1);
}

#[test]
fn height_bound() {
    for n in [1usize, 2, 10, 100, 1000, 4096] {
        let tree = avl_from(&(0..n as u32).collect::<Vec<_>>());
        let bound = 1.4405 * ((n + 2) as f64).log2() - 0.3277;
        assert!(
            tree.height() as f64 <= bound,
            "height {} exceeds bound {bound} for {n} nodes",
            tree.height()
        );
    }
}

#[test]
fn base_tree_does_not_balance() {
    let mut tree: BaseTree<TestNode> = BaseTree::new();

    for key in 0..10 {
        tree.insert(TestNode::new(key));
        tree.assert_invariants();
    }

    assert_eq!(tree.height(), 10);
    assert!(!tree.is_balanced());
    assert!(tree.iter().all(|node| tree.balance_of(node) == 0));
    assert_eq!(keys(&tree), (0..10).collect::<Vec<_>>());
}

#[test]
fn base_tree_removes_with_predecessor() {
    //          10
    //       5      15
    //     3   7  12  18
    //               11
    let mut tree: BaseTree<TestNode> = BaseTree::new();
    for key in [10, 5, 15, 3, 7, 12, 18, 11] {
        tree.insert(TestNode::new(key));
    }
    assert!(tree.is_balanced());

    // The root's predecessor is a leaf deep in the left subtree.
    tree.remove(&10);
    tree.assert_invariants();
    assert_eq!(key_at(&tree, &[]), Some(7));
    assert_eq!(key_at(&tree, &[Dir::Left]), Some(5));
    assert_eq!(key_at(&tree, &[Dir::Left, Dir::Right]), None);

    // The predecessor of 15 is its direct left child and has a child of its own.
    tree.remove(&15);
    tree.assert_invariants();
    assert_eq!(key_at(&tree, &[Dir::Right]), Some(12));
    assert_eq!(key_at(&tree, &[Dir::Right, Dir::Left]), Some(11));
    assert_eq!(key_at(&tree, &[Dir::Right, Dir::Right]), Some(18));

    // The predecessor of 12 is a leaf and its direct left child.
    tree.remove(&12);
    tree.assert_invariants();
    assert_eq!(key_at(&tree, &[Dir::Right]), Some(11));
    assert_eq!(key_at(&tree, &[Dir::Right, Dir::Right]), Some(18));

    assert_eq!(keys(&tree), [3, 5, 7, 11, 18]);
}

#[test]
fn swap_adjacent_and_distant_nodes() {
    let mut tree: BaseTree<TestNode> = BaseTree::new();
    for key in [4, 2, 6, 1, 3, 5, 7] {
        tree.insert(TestNode::new(key));
    }

    // Keys are out of order between swaps, so look up every node beforehand.
    let ptr: Vec<_> = (0..=7).map(|key| tree.get_raw(&key)).collect();
    let ptr = |key: usize| ptr[key].unwrap();

    // Root with its left child.
    unsafe { tree.swap_nodes(ptr(4), ptr(2)) };
    assert_eq!(key_at(&tree, &[]), Some(2));
    assert_eq!(key_at(&tree, &[Dir::Left]), Some(4));
    assert_eq!(key_at(&tree, &[Dir::Left, Dir::Left]), Some(1));
    assert_eq!(key_at(&tree, &[Dir::Left, Dir::Right]), Some(3));

    // Swap back, child first.
    unsafe { tree.swap_nodes(ptr(4), ptr(2)) };
    tree.assert_invariants();

    // Siblings.
    unsafe { tree.swap_nodes(ptr(1), ptr(3)) };
    assert_eq!(key_at(&tree, &[Dir::Left, Dir::Left]), Some(3));
    assert_eq!(key_at(&tree, &[Dir::Left, Dir::Right]), Some(1));
    unsafe { tree.swap_nodes(ptr(1), ptr(3)) };
    tree.assert_invariants();

    // Nodes in different subtrees.
    unsafe { tree.swap_nodes(ptr(2), ptr(7)) };
    assert_eq!(key_at(&tree, &[Dir::Left]), Some(7));
    assert_eq!(key_at(&tree, &[Dir::Right, Dir::Right]), Some(2));
    assert_eq!(key_at(&tree, &[Dir::Left, Dir::Left]), Some(1));
    unsafe { tree.swap_nodes(ptr(7), ptr(2)) };
    tree.assert_invariants();

    // Self-swap is a no-op.
    unsafe { tree.swap_nodes(ptr(5), ptr(5)) };
    tree.assert_invariants();
    assert_eq!(keys(&tree), [1, 2, 3, 4, 5, 6, 7]);
}

#[test]
fn avl_swap_exchanges_balance() {
    let mut tree = avl_from(&[4, 2, 6, 1]);
    let four = tree.get_raw(&4).unwrap();
    let two = tree.get_raw(&2).unwrap();

    let balance = |node| unsafe { TestNode::links(node).as_ref().balance() };

    assert_eq!(balance(four), -1);
    assert_eq!(balance(two), -1);

    let one = tree.get_raw(&1).unwrap();
    unsafe { tree.swap_nodes(two, one) };
    assert_eq!(balance(one), -1);
    assert_eq!(balance(two), 0);
    unsafe { tree.swap_nodes(two, one) };

    tree.assert_invariants();
}

#[test]
fn predecessor_and_successor() {
    let tree = avl_from(&[5, 3, 8, 1, 4, 7, 9]);

    let mut cursor = tree.begin();
    let mut forward = Vec::new();
    while let Some(node) = cursor.get() {
        forward.push(node.key);
        cursor.move_next();
    }
    assert_eq!(forward, [1, 3, 4, 5, 7, 8, 9]);
    assert!(cursor == tree.end());

    let mut cursor = tree.end();
    let mut backward = Vec::new();
    loop {
        cursor.move_prev();
        match cursor.get() {
            Some(node) => backward.push(node.key),
            None => break,
        }
    }
    assert_eq!(backward, [9, 8, 7, 5, 4, 3, 1]);

    let found = tree.find(&4);
    assert_eq!(found.peek_prev().map(|n| n.key), Some(3));
    assert_eq!(found.peek_next().map(|n| n.key), Some(5));
    assert_eq!(
        found.iter().map(|n| n.key).collect::<Vec<_>>(),
        [4, 5, 7, 8, 9]
    );
}

#[test]
fn clear_is_idempotent() {
    let mut tree = avl_from(&[5, 3, 8, 1, 4, 7, 9]);

    tree.clear();
    assert!(tree.is_empty());
    assert!(tree.begin() == tree.end());

    tree.clear();
    assert!(tree.is_empty());
    assert!(tree.begin() == tree.end());

    // The tree is reusable after clearing.
    tree.insert(TestNode::new(1));
    tree.assert_invariants();
    assert_eq!(keys(&tree), [1]);
}

#[test]
fn entry_api() {
    let mut tree: AvlTree<TestNode> = AvlTree::new();

    for key in [3, 1, 2] {
        match tree.entry(&key) {
            entry::Entry::Vacant(vacant) => unsafe {
                vacant.insert(TestNode::new(key));
            },
            entry::Entry::Occupied(_) => panic!("{key} should be vacant"),
        }
        tree.assert_invariants();
    }

    match tree.entry(&2) {
        entry::Entry::Occupied(mut occupied) => {
            assert_eq!(occupied.get().key, 2);
            let old = unsafe { occupied.insert(TestNode::new(2)) };
            assert_eq!(old.key, 2);
        }
        entry::Entry::Vacant(_) => panic!("2 should be occupied"),
    }
    tree.assert_invariants();

    match tree.entry(&1) {
        entry::Entry::Occupied(occupied) => assert_eq!(occupied.remove().key, 1),
        entry::Entry::Vacant(_) => panic!("1 should be occupied"),
    }
    tree.assert_invariants();
    assert_eq!(keys(&tree), [2, 3]);
}

#[test]
fn cursor_mut_removes() {
    let mut tree = avl_from(&[1, 2, 3, 4, 5]);

    let mut cursor = tree.find_mut(&2);
    assert_eq!(cursor.remove_current().map(|n| n.key), Some(2));
    assert_eq!(cursor.get().map(|n| n.key), Some(3));
    assert_eq!(
        cursor.remove_current_and_move_prev().map(|n| n.key),
        Some(3)
    );
    assert_eq!(cursor.get().map(|n| n.key), Some(1));
    assert_eq!(cursor.as_cursor().peek_next().map(|n| n.key), Some(4));

    tree.assert_invariants();
    assert_eq!(keys(&tree), [1, 4, 5]);
}

#[test]
fn dotgraph_labels_balance() {
    let tree = avl_from(&[2, 1, 3, 4]);

    let mut out = String::new();
    tree.dotgraph("t", &mut out).unwrap();

    assert!(out.starts_with("digraph \"graph-t\""));
    assert!(out.contains("[label=\"2:1\"]"));
    assert!(out.contains("[label=\"3:1\"]"));
    assert!(out.contains("\"grapht-2\" -> \"grapht-1\";"));
    assert!(out.contains("\"grapht-3\" -> \"grapht-4\";"));

    let empty: AvlTree<TestNode> = AvlTree::new();
    let mut out = String::new();
    empty.dotgraph("e", &mut out).unwrap();
    assert_eq!(out, "digraph \"graph-e\" {}");
}

#[cfg(miri)]
const FUZZ_RANGE: Range<usize> = 0..10;

#[cfg(not(miri))]
const FUZZ_RANGE: Range<usize> = 0..1000;

proptest::proptest! {
    #![proptest_config(ProptestConfig {
        max_shrink_iters: 65536,
        .. ProptestConfig::default()
    })]

    #[test]
    fn btree_equivalence(ops in proptest::collection::vec(model::op_strategy(), FUZZ_RANGE)) {
        model::run_btree_equivalence::<Avl>(ops);
    }

    #[test]
    fn btree_equivalence_unbalanced(ops in proptest::collection::vec(model::op_strategy(), FUZZ_RANGE)) {
        model::run_btree_equivalence::<Unbalanced>(ops);
    }

    #[test]
    fn map_equivalence(ops in proptest::collection::vec(model::map_op_strategy(), FUZZ_RANGE)) {
        model::run_map_equivalence::<Avl>(ops);
    }

    #[test]
    fn cursor_equivalence(
        values in proptest::collection::vec(0u32..1000, 0..100),
        ops in proptest::collection::vec(model::cursor_op_strategy(), FUZZ_RANGE),
    ) {
        model::run_cursor_equivalence::<Avl>(values, ops);
    }
}
