//! Resumable depth-first traversal.

use super::allocator::SlotAllocator;
use super::node::RTreeNode;
use super::rtree_impl::RTree;
use super::rtree_types::{NodeRef, Pointer, RTreeEntry, SpatialResult};

/// What the scan visitor wants done with an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDecision {
    /// Ignore the entry; node entries are not descended into
    Skip,
    /// Accept the entry and keep going; node entries are descended into
    Continue,
    /// Accept the entry and suspend the scan after it
    Yield,
}

struct ScanFrame {
    node_ref: NodeRef,
    /// Read on first visit
    node: Option<RTreeNode>,
    index: usize,
}

impl ScanFrame {
    fn new(node_ref: NodeRef) -> Self {
        Self {
            node_ref,
            node: None,
            index: 0,
        }
    }
}

/// Depth-first scan over an explicit stack of node frames.
///
/// Suspending keeps the stack intact, so a later `scan` call resumes right
/// after the entry that yielded. A scanner holds no borrow of the tree
/// between calls; the tree must not be mutated while a scan is in progress.
#[derive(Default)]
pub struct RTreeScanner {
    stack: Vec<ScanFrame>,
}

impl RTreeScanner {
    pub fn new() -> Self {
        Self { stack: Vec::new() }
    }

    /// Start a new scan from `root`. A null root leaves the scanner exhausted.
    ///
    /// No node is read until the first `scan` call.
    pub fn init(&mut self, root: &RTreeEntry) {
        self.stack.clear();
        if let Pointer::Node(node_ref) = root.pointer {
            self.stack.push(ScanFrame::new(node_ref));
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.stack.is_empty()
    }

    /// Advance the traversal, handing every entry to `visitor` together with
    /// its depth (entries of the root node are at depth 1).
    ///
    /// Returns when the visitor yields or when the traversal is complete.
    pub fn scan<A, F>(&mut self, tree: &RTree<A>, mut visitor: F) -> SpatialResult<()>
    where
        A: SlotAllocator,
        F: FnMut(&RTreeEntry, usize) -> ScanDecision,
    {
        loop {
            let depth = self.stack.len();
            let frame = match self.stack.last_mut() {
                Some(frame) => frame,
                None => return Ok(()),
            };
            if frame.node.is_none() {
                frame.node = Some(tree.read_node(frame.node_ref)?);
            }

            let next = frame
                .node
                .as_ref()
                .and_then(|node| node.entries.get(frame.index))
                .copied();
            let entry = match next {
                Some(entry) => entry,
                None => {
                    self.stack.pop();
                    continue;
                }
            };
            frame.index += 1;

            let decision = visitor(&entry, depth);
            if decision == ScanDecision::Skip {
                continue;
            }
            if let Pointer::Node(node_ref) = entry.pointer {
                self.stack.push(ScanFrame::new(node_ref));
            }
            if decision == ScanDecision::Yield {
                return Ok(());
            }
        }
    }
}
