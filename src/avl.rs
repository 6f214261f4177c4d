//! Height-balanced ordered index with positional queries.
//!
//! An AVL tree stored in an arena: nodes live in a slot vector and refer to
//! each other by [`NodeId`]. Child edges own nothing — the arena does — so
//! the child→parent back-edges needed by the upward rebalance are plain
//! indices rather than unsafe pointers. Freed slots go on an intrusive free
//! list and are reused by later insertions.
//!
//! Every node carries its subtree height and node count. Height drives the
//! rebalance; the count makes rank and k-th-element queries O(log n), which
//! is what an ordered command layer wants from this index.
//!
//! Node ids are stable: removal splices the in-order successor into the
//! victim's place by rewriting links, never by moving payloads, so an id
//! handed out by [`AvlTree::insert`] keeps naming the same item until that
//! item is removed.

/// Stable handle to a live tree node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    fn idx(self) -> usize {
        self.0 as usize
    }
}

struct AvlNode<T> {
    left: Option<NodeId>,
    right: Option<NodeId>,
    parent: Option<NodeId>,
    /// Subtree height, ≥ 1 for a live node.
    height: u32,
    /// Nodes in the subtree rooted here, including this one.
    count: u32,
    item: T,
}

/// Arena-backed AVL tree ordered by `T: Ord`.
pub struct AvlTree<T> {
    nodes: Vec<Option<AvlNode<T>>>,
    free: Vec<NodeId>,
    root: Option<NodeId>,
}

impl<T> Default for AvlTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AvlTree<T> {
    pub fn new() -> Self {
        AvlTree { nodes: Vec::new(), free: Vec::new(), root: None }
    }

    pub fn len(&self) -> usize {
        self.count_of(self.root) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Borrow the item behind a live id.
    pub fn get(&self, id: NodeId) -> &T {
        &self.node(id).item
    }

    // ── Arena plumbing ───────────────────────────────────────────────────────

    fn node(&self, id: NodeId) -> &AvlNode<T> {
        match self.nodes[id.idx()].as_ref() {
            Some(n) => n,
            None => unreachable!("dangling node id"),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut AvlNode<T> {
        match self.nodes[id.idx()].as_mut() {
            Some(n) => n,
            None => unreachable!("dangling node id"),
        }
    }

    fn alloc(&mut self, item: T) -> NodeId {
        let node = AvlNode { left: None, right: None, parent: None, height: 1, count: 1, item };
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.idx()] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                NodeId((self.nodes.len() - 1) as u32)
            }
        }
    }

    fn dealloc(&mut self, id: NodeId) -> T {
        let node = match self.nodes[id.idx()].take() {
            Some(n) => n,
            None => unreachable!("double free of node id"),
        };
        self.free.push(id);
        node.item
    }

    #[inline]
    fn height_of(&self, id: Option<NodeId>) -> u32 {
        id.map_or(0, |id| self.node(id).height)
    }

    #[inline]
    fn count_of(&self, id: Option<NodeId>) -> u32 {
        id.map_or(0, |id| self.node(id).count)
    }

    /// Recompute `height` and `count` from the children.
    fn update(&mut self, id: NodeId) {
        let (l, r) = {
            let n = self.node(id);
            (n.left, n.right)
        };
        let height = 1 + self.height_of(l).max(self.height_of(r));
        let count = 1 + self.count_of(l) + self.count_of(r);
        let n = self.node_mut(id);
        n.height = height;
        n.count = count;
    }

    // ── Rotations ────────────────────────────────────────────────────────────
    //
    // Rotations rewire the subtree and set the new subtree root's parent
    // field, but the parent's child edge is the caller's to fix — `fix`
    // owns that link.

    fn rot_left(&mut self, id: NodeId) -> NodeId {
        let parent = self.node(id).parent;
        let new_root = match self.node(id).right {
            Some(r) => r,
            None => unreachable!("left rotation requires a right child"),
        };
        let inner = self.node(new_root).left;
        self.node_mut(id).right = inner;
        if let Some(i) = inner {
            self.node_mut(i).parent = Some(id);
        }
        self.node_mut(new_root).parent = parent;
        self.node_mut(new_root).left = Some(id);
        self.node_mut(id).parent = Some(new_root);
        self.update(id);
        self.update(new_root);
        new_root
    }

    fn rot_right(&mut self, id: NodeId) -> NodeId {
        let parent = self.node(id).parent;
        let new_root = match self.node(id).left {
            Some(l) => l,
            None => unreachable!("right rotation requires a left child"),
        };
        let inner = self.node(new_root).right;
        self.node_mut(id).left = inner;
        if let Some(i) = inner {
            self.node_mut(i).parent = Some(id);
        }
        self.node_mut(new_root).parent = parent;
        self.node_mut(new_root).right = Some(id);
        self.node_mut(id).parent = Some(new_root);
        self.update(id);
        self.update(new_root);
        new_root
    }

    /// Left subtree two levels too tall: pre-rotate an inner-heavy left
    /// child, then rotate right.
    fn fix_left(&mut self, id: NodeId) -> NodeId {
        let l = match self.node(id).left {
            Some(l) => l,
            None => unreachable!("left-heavy node has a left child"),
        };
        if self.height_of(self.node(l).left) < self.height_of(self.node(l).right) {
            let new_l = self.rot_left(l);
            self.node_mut(id).left = Some(new_l);
        }
        self.rot_right(id)
    }

    /// Mirror of [`fix_left`](Self::fix_left).
    fn fix_right(&mut self, id: NodeId) -> NodeId {
        let r = match self.node(id).right {
            Some(r) => r,
            None => unreachable!("right-heavy node has a right child"),
        };
        if self.height_of(self.node(r).right) < self.height_of(self.node(r).left) {
            let new_r = self.rot_right(r);
            self.node_mut(id).right = Some(new_r);
        }
        self.rot_left(id)
    }

    /// Walk from `id` to the root, refreshing annotations and rotating
    /// wherever the balance is off by two. Returns the (possibly new) root.
    fn fix(&mut self, mut id: NodeId) -> NodeId {
        loop {
            let parent = self.node(id).parent;
            self.update(id);
            let l = self.height_of(self.node(id).left);
            let r = self.height_of(self.node(id).right);
            let sub = if l == r + 2 {
                self.fix_left(id)
            } else if r == l + 2 {
                self.fix_right(id)
            } else {
                id
            };
            let Some(p) = parent else { return sub };
            // The parent's child edge still names the pre-rotation node.
            if self.node(p).left == Some(id) {
                self.node_mut(p).left = Some(sub);
            } else {
                self.node_mut(p).right = Some(sub);
            }
            id = p;
        }
    }

    // ── Ordered operations ───────────────────────────────────────────────────

    /// Insert `item`, returning its stable id. Equal items land to the right
    /// of their peers, so duplicates are allowed and keep insertion order
    /// among themselves.
    pub fn insert(&mut self, item: T) -> NodeId
    where
        T: Ord,
    {
        let id = self.alloc(item);
        let Some(root) = self.root else {
            self.root = Some(id);
            return id;
        };
        let mut cur = root;
        loop {
            let go_left = self.node(id).item < self.node(cur).item;
            let next = if go_left { self.node(cur).left } else { self.node(cur).right };
            match next {
                Some(n) => cur = n,
                None => {
                    if go_left {
                        self.node_mut(cur).left = Some(id);
                    } else {
                        self.node_mut(cur).right = Some(id);
                    }
                    self.node_mut(id).parent = Some(cur);
                    break;
                }
            }
        }
        self.root = Some(self.fix(id));
        id
    }

    /// Remove the node behind `id` and return its item. Ids of all other
    /// nodes remain valid.
    pub fn remove(&mut self, id: NodeId) -> T {
        let (left, right) = {
            let n = self.node(id);
            (n.left, n.right)
        };
        let new_root = match (left, right) {
            (None, _) | (_, None) => self.detach_simple(id),
            (Some(_), Some(r)) => {
                // Two children: splice out the in-order successor, then let
                // it adopt the victim's links and annotations wholesale.
                let mut victim = r;
                while let Some(l) = self.node(victim).left {
                    victim = l;
                }
                let mut root = self.detach_simple(victim);
                let (nl, nr, np, nh, nc) = {
                    let n = self.node(id);
                    (n.left, n.right, n.parent, n.height, n.count)
                };
                {
                    let v = self.node_mut(victim);
                    v.left = nl;
                    v.right = nr;
                    v.parent = np;
                    v.height = nh;
                    v.count = nc;
                }
                if let Some(c) = nl {
                    self.node_mut(c).parent = Some(victim);
                }
                if let Some(c) = nr {
                    self.node_mut(c).parent = Some(victim);
                }
                match np {
                    None => root = Some(victim),
                    Some(p) => {
                        if self.node(p).left == Some(id) {
                            self.node_mut(p).left = Some(victim);
                        } else {
                            self.node_mut(p).right = Some(victim);
                        }
                    }
                }
                root
            }
        };
        self.root = new_root;
        self.dealloc(id)
    }

    /// Unlink a node with at most one child, splicing that child into its
    /// place and rebalancing upward. Returns the new tree root.
    fn detach_simple(&mut self, id: NodeId) -> Option<NodeId> {
        let (left, right, parent) = {
            let n = self.node(id);
            (n.left, n.right, n.parent)
        };
        debug_assert!(left.is_none() || right.is_none());
        let child = left.or(right);
        if let Some(c) = child {
            self.node_mut(c).parent = parent;
        }
        let Some(p) = parent else { return child };
        if self.node(p).left == Some(id) {
            self.node_mut(p).left = child;
        } else {
            self.node_mut(p).right = child;
        }
        Some(self.fix(p))
    }

    // ── Positional queries ───────────────────────────────────────────────────

    /// Id of the `k`-th item in order, 0-based.
    pub fn kth(&self, mut k: usize) -> Option<NodeId> {
        if k >= self.len() {
            return None;
        }
        let mut cur = self.root?;
        loop {
            let left = self.node(cur).left;
            let before = self.count_of(left) as usize;
            if k < before {
                cur = match left {
                    Some(l) => l,
                    None => unreachable!("count promises a left subtree"),
                };
            } else if k == before {
                return Some(cur);
            } else {
                k -= before + 1;
                cur = self.node(cur).right?;
            }
        }
    }

    /// In-order position of a live node, 0-based. O(log n).
    pub fn rank(&self, id: NodeId) -> usize {
        let mut rank = self.count_of(self.node(id).left) as usize;
        let mut cur = id;
        while let Some(p) = self.node(cur).parent {
            if self.node(p).right == Some(cur) {
                rank += self.count_of(self.node(p).left) as usize + 1;
            }
            cur = p;
        }
        rank
    }

    // ── In-order traversal ───────────────────────────────────────────────────

    fn leftmost(&self, mut id: NodeId) -> NodeId {
        while let Some(l) = self.node(id).left {
            id = l;
        }
        id
    }

    /// Smallest item's id.
    pub fn first(&self) -> Option<NodeId> {
        self.root.map(|r| self.leftmost(r))
    }

    /// In-order successor.
    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        if let Some(r) = self.node(id).right {
            return Some(self.leftmost(r));
        }
        let mut cur = id;
        loop {
            let p = self.node(cur).parent?;
            if self.node(p).left == Some(cur) {
                return Some(p);
            }
            cur = p;
        }
    }

    /// Iterate items in order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { tree: self, next: self.first() }
    }
}

/// In-order item iterator, see [`AvlTree::iter`].
pub struct Iter<'a, T> {
    tree: &'a AvlTree<T>,
    next: Option<NodeId>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let id = self.next?;
        self.next = self.tree.next(id);
        Some(&self.tree.node(id).item)
    }
}
