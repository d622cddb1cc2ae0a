//! The anchor tree.
//!
//! Children are owned top-down through `Arc`; the parent link is a `Weak`
//! used only to rebuild the path string. Nodes are never removed.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use crate::element::ElementRef;
use crate::lock;

/// Contents of an occupied anchor.
#[derive(Clone)]
pub struct Slot {
    pub kind: String,
    pub element: ElementRef,
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot").field("kind", &self.kind).finish()
    }
}

/// A named location in the namespace.
pub struct AnchorNode {
    name: String,
    parent: Weak<AnchorNode>,
    children: Mutex<BTreeMap<String, Arc<AnchorNode>>>,
    pub(crate) slot: Mutex<Option<Slot>>,
    /// Serializes attach, make, get and scrub on this node.
    pub(crate) tx: tokio::sync::Mutex<()>,
}

impl AnchorNode {
    /// A fresh root node.
    pub fn root(name: &str) -> Arc<Self> {
        Arc::new(Self::new(name, Weak::new()))
    }

    fn new(name: &str, parent: Weak<AnchorNode>) -> Self {
        AnchorNode {
            name: name.to_string(),
            parent,
            children: Mutex::new(BTreeMap::new()),
            slot: Mutex::new(None),
            tx: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up or create the child called `name`.
    ///
    /// Creation happens under the parent's children lock, so concurrent
    /// callers asking for the same missing child get the same node.
    pub fn child(node: &Arc<AnchorNode>, name: &str) -> Arc<AnchorNode> {
        let mut children = lock(&node.children);
        Arc::clone(
            children
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AnchorNode::new(name, Arc::downgrade(node)))),
        )
    }

    /// Follow `path` from `node`, creating missing nodes on the way.
    pub fn walk<S: AsRef<str>>(node: &Arc<AnchorNode>, path: &[S]) -> Arc<AnchorNode> {
        path.iter().fold(Arc::clone(node), |current, segment| {
            AnchorNode::child(&current, segment.as_ref())
        })
    }

    /// Snapshot of the current children.
    pub fn view(&self) -> BTreeMap<String, Arc<AnchorNode>> {
        lock(&self.children).clone()
    }

    /// Absolute path of this node. The root is `/`.
    pub fn path(&self) -> String {
        let mut names = Vec::new();
        if self.parent.upgrade().is_some() {
            names.push(self.name.clone());
        }
        let mut cursor = self.parent.upgrade();
        while let Some(node) = cursor {
            let parent = node.parent.upgrade();
            if parent.is_some() {
                names.push(node.name.clone());
            }
            cursor = parent;
        }
        names.reverse();
        format!("/{}", names.join("/"))
    }

    /// Point-in-time read of the slot without the transaction lock.
    pub fn peek_slot(&self) -> Option<Slot> {
        lock(&self.slot).clone()
    }
}

impl fmt::Debug for AnchorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnchorNode")
            .field("path", &self.path())
            .field("slot", &self.peek_slot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_walk_is_identity() {
        let root = AnchorNode::root("circuit");
        let same = AnchorNode::walk::<&str>(&root, &[]);
        assert!(Arc::ptr_eq(&root, &same));
    }

    #[test]
    fn walk_creates_and_reuses() {
        let root = AnchorNode::root("circuit");
        let a = AnchorNode::walk(&root, &["x", "y"]);
        let b = AnchorNode::walk(&root, &["x", "y"]);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(root.view().len(), 1);
        assert_eq!(a.name(), "y");
    }

    #[test]
    fn path_reconstruction() {
        let root = AnchorNode::root("circuit");
        assert_eq!(root.path(), "/");
        let node = AnchorNode::walk(&root, &["X1", "jobs", "build"]);
        assert_eq!(node.path(), "/X1/jobs/build");
    }

    #[test]
    fn parent_link_does_not_own() {
        let root = AnchorNode::root("circuit");
        let node = AnchorNode::walk(&root, &["a"]);
        assert_eq!(Arc::strong_count(&root), 1);
        drop(root);
        assert_eq!(node.path(), "/");
    }

    #[test]
    fn view_is_a_snapshot() {
        let root = AnchorNode::root("circuit");
        AnchorNode::walk(&root, &["a"]);
        let view = root.view();
        AnchorNode::walk(&root, &["b"]);
        assert_eq!(view.keys().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(root.view().len(), 2);
    }

    #[test]
    fn concurrent_walks_converge() {
        let root = AnchorNode::root("circuit");
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let root = Arc::clone(&root);
                std::thread::spawn(move || AnchorNode::walk(&root, &["p", "q", "r"]))
            })
            .collect();
        let nodes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for node in &nodes[1..] {
            assert!(Arc::ptr_eq(&nodes[0], node));
        }
        assert_eq!(root.view().len(), 1);
        assert_eq!(AnchorNode::walk(&root, &["p", "q"]).view().len(), 1);
    }
}
