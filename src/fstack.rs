//! File-stack nodes (§3 `FileStackNode`, §4.2 "File stack").
//!
//! A [`FileStackNode`] records one level of source-expansion nesting: a plain
//! included file, a macro invocation, or a `REPT`/`FOR` iteration. Nodes form a
//! DAG rooted at the top-level source file; every node but the root has a
//! parent and the line number *in the parent* at which it was entered. The
//! whole arena is reference-counted so that a node can outlive the lexer
//! context that created it (a `REPT` body keeps referring to its node's line
//! numbers long after the loop that spawned it has been popped), and so that
//! the object writer (`object::writer`) can walk every still-reachable node
//! when it assigns file IDs.

use std::rc::Rc;

/// What kind of expansion context a [`FileStackNode`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// An ordinary included source file.
    File,
    /// A macro invocation.
    Macro,
    /// One `REPT`/`FOR` loop (not one iteration - the iteration counters are
    /// carried in `Payload::Rept`).
    Rept,
}

/// The node-kind-specific payload.
#[derive(Debug, Clone)]
pub enum Payload {
    /// File/Macro name (a path for `File`, a symbol name for `Macro`).
    Name(String),
    /// `REPT`/`FOR` iteration counters, outermost loop first. A nested
    /// `REPT` inside a `REPT` appends one more counter rather than replacing
    /// the vector, so a diagnostic can report "iteration 3.1" for the inner
    /// loop's first pass within the outer loop's third.
    IterCounts(Vec<u32>),
}

/// One level of the file/macro/rept expansion stack.
#[derive(Debug)]
pub struct FileStackNode {
    pub kind: NodeKind,
    pub payload: Payload,
    /// Line number, in the *parent* context, where this node was entered.
    /// For the root node this is meaningless and left at 0.
    pub line_no: u32,
    pub parent: Option<Rc<FileStackNode>>,
    /// Assigned when the node is registered for object-file emission
    /// (`object::writer`); `None` until then.
    pub id: std::cell::Cell<Option<u32>>,
}

impl FileStackNode {
    pub fn root_file(name: impl Into<String>) -> Rc<FileStackNode> {
        Rc::new(FileStackNode {
            kind: NodeKind::File,
            payload: Payload::Name(name.into()),
            line_no: 0,
            parent: None,
            id: std::cell::Cell::new(None),
        })
    }

    pub fn push_file(parent: &Rc<FileStackNode>, line_no: u32, name: impl Into<String>) -> Rc<FileStackNode> {
        Rc::new(FileStackNode {
            kind: NodeKind::File,
            payload: Payload::Name(name.into()),
            line_no,
            parent: Some(Rc::clone(parent)),
            id: std::cell::Cell::new(None),
        })
    }

    pub fn push_macro(parent: &Rc<FileStackNode>, line_no: u32, macro_name: impl Into<String>) -> Rc<FileStackNode> {
        Rc::new(FileStackNode {
            kind: NodeKind::Macro,
            payload: Payload::Name(macro_name.into()),
            line_no,
            parent: Some(Rc::clone(parent)),
            id: std::cell::Cell::new(None),
        })
    }

    /// Pushes a new `REPT`/`FOR` node. `depth` is how many nested Rept/For
    /// loops are currently open including this one; the iteration-counter
    /// vector starts at that length, all zeroed, and is mutated in place by
    /// the lexer as iterations advance (see `lexer::Lexer::advance_rept`).
    pub fn push_rept(parent: &Rc<FileStackNode>, line_no: u32, depth: usize) -> Rc<FileStackNode> {
        Rc::new(FileStackNode {
            kind: NodeKind::Rept,
            payload: Payload::IterCounts(vec![0; depth]),
            line_no,
            parent: Some(Rc::clone(parent)),
            id: std::cell::Cell::new(None),
        })
    }

    pub fn name(&self) -> Option<&str> {
        match &self.payload {
            Payload::Name(n) => Some(n),
            Payload::IterCounts(_) => None,
        }
    }

    /// A one-line human-readable description used in diagnostic backtraces,
    /// e.g. `some_file.asm(12)` or `some_macro::(3)` or `REPT~1.2(4)`.
    pub fn describe(&self) -> String {
        match self.kind {
            NodeKind::File => format!("{}({})", self.name().unwrap_or("?"), self.line_no),
            NodeKind::Macro => format!("{}::({})", self.name().unwrap_or("?"), self.line_no),
            NodeKind::Rept => {
                let counts = match &self.payload {
                    Payload::IterCounts(c) => c
                        .iter()
                        .map(|n| n.to_string())
                        .collect::<Vec<_>>()
                        .join("."),
                    _ => String::new(),
                };
                format!("REPT~{counts}({})", self.line_no)
            }
        }
    }

    /// Walks from this node to the root, producing one line per level -
    /// the backtrace shown under an error/warning (§7).
    pub fn backtrace(self: &Rc<Self>) -> Vec<String> {
        let mut lines = Vec::new();
        let mut cur = Some(Rc::clone(self));
        while let Some(node) = cur {
            lines.push(node.describe());
            cur = node.parent.clone();
        }
        lines
    }
}

/// Depth of a node, counting the root as depth 0. Used to enforce the
/// recursion cap (§4.2, §8 "Recursion cap").
pub fn depth(node: &Rc<FileStackNode>) -> usize {
    let mut d = 0;
    let mut cur = node.parent.clone();
    while let Some(n) = cur {
        d += 1;
        cur = n.parent.clone();
    }
    d
}

/// Recursion depth is capped; exceeding it is fatal (§4.2, §8).
pub fn check_recursion_depth(node: &Rc<FileStackNode>, max_depth: u32) -> crate::error::Result<()> {
    if depth(node) as u32 > max_depth {
        return Err(crate::error::Error::Fatal(format!(
            "Recursion limit ({max_depth}) exceeded"
        )));
    }
    Ok(())
}

/// Registers every node reachable from `leaves` (deduplicated by pointer
/// identity) into a flat, parent-before-child-safe list and assigns each an
/// increasing ID, as the object writer needs (§6 "Nodes (written in reverse so
/// the root is last)"). Returns the nodes in *assignment* order (root last),
/// matching the on-disk order the object writer expects to emit them in.
pub fn register_nodes(leaves: &[Rc<FileStackNode>]) -> Vec<Rc<FileStackNode>> {
    use std::collections::HashSet;

    let mut seen: HashSet<*const FileStackNode> = HashSet::new();
    let mut chains: Vec<Rc<FileStackNode>> = Vec::new();

    for leaf in leaves {
        let mut cur = Some(Rc::clone(leaf));
        while let Some(node) = cur {
            let ptr = Rc::as_ptr(&node);
            if !seen.insert(ptr) {
                break;
            }
            chains.push(Rc::clone(&node));
            cur = node.parent.clone();
        }
    }

    // Assign IDs breadth over the collected set; order doesn't matter for
    // correctness as long as `id` is unique and `parentId` is resolvable, but
    // keep it deterministic (first-seen order through the leaves) rather than
    // depending on hash-set iteration order.
    for (i, node) in chains.iter().enumerate() {
        node.id.set(Some(i as u32));
    }

    chains
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backtrace_walks_to_root() {
        let root = FileStackNode::root_file("main.asm");
        let inc = FileStackNode::push_file(&root, 5, "inc.asm");
        let mac = FileStackNode::push_macro(&inc, 2, "my_macro");

        let bt = mac.backtrace();
        assert_eq!(bt.len(), 3);
        assert_eq!(bt[0], "my_macro::(2)");
        assert_eq!(bt[1], "inc.asm(5)");
        assert_eq!(bt[2], "main.asm(0)");
    }

    #[test]
    fn recursion_cap_trips() {
        let mut node = FileStackNode::root_file("main.asm");
        for i in 0..5 {
            node = FileStackNode::push_file(&node, i, "main.asm");
        }
        assert!(check_recursion_depth(&node, 5).is_ok());
        let node = FileStackNode::push_file(&node, 6, "main.asm");
        assert!(check_recursion_depth(&node, 5).is_err());
    }

    #[test]
    fn register_nodes_assigns_unique_ids() {
        let root = FileStackNode::root_file("main.asm");
        let a = FileStackNode::push_file(&root, 1, "a.asm");
        let b = FileStackNode::push_file(&root, 2, "b.asm");
        let nodes = register_nodes(&[a.clone(), b.clone()]);
        // root shared by both chains must only appear once
        assert_eq!(nodes.len(), 3);
        assert!(a.id.get().is_some());
        assert!(b.id.get().is_some());
        assert!(root.id.get().is_some());
    }
}
