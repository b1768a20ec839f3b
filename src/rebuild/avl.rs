//! Arena-backed AVL trees for directory construction.
//!
//! Every file and directory of the image being built is a node in one
//! `AvlArena`; links are indices, so rotations only rewrite index fields.
//! Each directory node owns the root index of its own tree of children.

use std::cmp::Ordering;
use std::path::PathBuf;

use crate::error::{Result, XisoError};
use crate::fs::Attributes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skew {
    Balanced,
    LeftHeavy,
    RightHeavy,
}

/// Where a file's bytes come from during the write pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    /// Directories and zero-byte files.
    Empty,
    /// Sector range in the source image.
    ImageSectors { start_sector: u32 },
    /// A file on the host.
    HostFile(PathBuf),
}

#[derive(Debug, Clone)]
pub struct AvlNode {
    pub name: String,
    /// File size, or table size once a directory has been laid out.
    pub size: u32,
    pub attributes: Attributes,
    pub source: DataSource,
    pub left: Option<usize>,
    pub right: Option<usize>,
    /// Root of the child tree (directories only).
    pub children: Option<usize>,
    pub skew: Skew,
    /// First sector of the file data or directory table in the new image.
    pub new_sector: u32,
    /// Byte offset of this node's record within its parent's table.
    pub table_offset: u32,
    /// Absolute byte position of this node's record in the new image.
    pub record_position: u64,
}

impl AvlNode {
    pub fn directory(name: impl Into<String>, attributes: Attributes) -> Self {
        Self::new(
            name.into(),
            0,
            attributes | Attributes::DIRECTORY,
            DataSource::Empty,
        )
    }

    pub fn file(
        name: impl Into<String>,
        size: u32,
        attributes: Attributes,
        source: DataSource,
    ) -> Self {
        let source = if size == 0 { DataSource::Empty } else { source };
        Self::new(name.into(), size, attributes, source)
    }

    fn new(name: String, size: u32, attributes: Attributes, source: DataSource) -> Self {
        Self {
            name,
            size,
            attributes,
            source,
            left: None,
            right: None,
            children: None,
            skew: Skew::Balanced,
            new_sector: 0,
            table_offset: 0,
            record_position: 0,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.is_directory()
    }
}

/// XDVDFS orders names by their upper-cased ASCII bytes.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    a.bytes()
        .map(|c| c.to_ascii_uppercase())
        .cmp(b.bytes().map(|c| c.to_ascii_uppercase()))
}

#[derive(Debug, Default)]
pub struct AvlArena {
    nodes: Vec<AvlNode>,
}

impl AvlArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: AvlNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> &AvlNode {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: usize) -> &mut AvlNode {
        &mut self.nodes[index]
    }

    /// Push `node` and insert it into `directory`'s child tree.
    pub fn add_child(&mut self, directory: usize, node: AvlNode) -> Result<usize> {
        let index = self.push(node);
        let root = self.nodes[directory].children;
        let new_root = self.insert(root, index)?;
        self.nodes[directory].children = Some(new_root);
        Ok(index)
    }

    /// Insert an already-pushed node into the tree rooted at `root` and
    /// return the (possibly new) root.
    pub fn insert(&mut self, root: Option<usize>, new: usize) -> Result<usize> {
        let (root, _) = self.insert_at(root, new)?;
        Ok(root)
    }

    fn insert_at(&mut self, root: Option<usize>, new: usize) -> Result<(usize, bool)> {
        let Some(r) = root else {
            return Ok((new, true));
        };
        match compare_names(&self.nodes[new].name, &self.nodes[r].name) {
            Ordering::Equal => Err(XisoError::InvalidSource(format!(
                "duplicate name \"{}\" (names are case-insensitive)",
                self.nodes[new].name
            ))),
            Ordering::Less => {
                let (sub, grew) = self.insert_at(self.nodes[r].left, new)?;
                self.nodes[r].left = Some(sub);
                if !grew {
                    return Ok((r, false));
                }
                match self.nodes[r].skew {
                    Skew::RightHeavy => {
                        self.nodes[r].skew = Skew::Balanced;
                        Ok((r, false))
                    }
                    Skew::Balanced => {
                        self.nodes[r].skew = Skew::LeftHeavy;
                        Ok((r, true))
                    }
                    Skew::LeftHeavy => Ok((self.rebalance_left(r), false)),
                }
            }
            Ordering::Greater => {
                let (sub, grew) = self.insert_at(self.nodes[r].right, new)?;
                self.nodes[r].right = Some(sub);
                if !grew {
                    return Ok((r, false));
                }
                match self.nodes[r].skew {
                    Skew::LeftHeavy => {
                        self.nodes[r].skew = Skew::Balanced;
                        Ok((r, false))
                    }
                    Skew::Balanced => {
                        self.nodes[r].skew = Skew::RightHeavy;
                        Ok((r, true))
                    }
                    Skew::RightHeavy => Ok((self.rebalance_right(r), false)),
                }
            }
        }
    }

    /// `n` is left-heavy and its left subtree just grew.
    fn rebalance_left(&mut self, n: usize) -> usize {
        let Some(l) = self.nodes[n].left else {
            return n;
        };
        if self.nodes[l].skew == Skew::LeftHeavy {
            // single right rotation
            self.nodes[n].left = self.nodes[l].right;
            self.nodes[l].right = Some(n);
            self.nodes[n].skew = Skew::Balanced;
            self.nodes[l].skew = Skew::Balanced;
            return l;
        }
        let Some(lr) = self.nodes[l].right else {
            return n;
        };
        // left-right double rotation
        self.nodes[l].right = self.nodes[lr].left;
        self.nodes[n].left = self.nodes[lr].right;
        self.nodes[lr].left = Some(l);
        self.nodes[lr].right = Some(n);
        let (l_skew, n_skew) = match self.nodes[lr].skew {
            Skew::LeftHeavy => (Skew::Balanced, Skew::RightHeavy),
            Skew::RightHeavy => (Skew::LeftHeavy, Skew::Balanced),
            Skew::Balanced => (Skew::Balanced, Skew::Balanced),
        };
        self.nodes[l].skew = l_skew;
        self.nodes[n].skew = n_skew;
        self.nodes[lr].skew = Skew::Balanced;
        lr
    }

    /// `n` is right-heavy and its right subtree just grew.
    fn rebalance_right(&mut self, n: usize) -> usize {
        let Some(r) = self.nodes[n].right else {
            return n;
        };
        if self.nodes[r].skew == Skew::RightHeavy {
            // single left rotation
            self.nodes[n].right = self.nodes[r].left;
            self.nodes[r].left = Some(n);
            self.nodes[n].skew = Skew::Balanced;
            self.nodes[r].skew = Skew::Balanced;
            return r;
        }
        let Some(rl) = self.nodes[r].left else {
            return n;
        };
        // right-left double rotation
        self.nodes[r].left = self.nodes[rl].right;
        self.nodes[n].right = self.nodes[rl].left;
        self.nodes[rl].right = Some(r);
        self.nodes[rl].left = Some(n);
        let (n_skew, r_skew) = match self.nodes[rl].skew {
            Skew::RightHeavy => (Skew::LeftHeavy, Skew::Balanced),
            Skew::LeftHeavy => (Skew::Balanced, Skew::RightHeavy),
            Skew::Balanced => (Skew::Balanced, Skew::Balanced),
        };
        self.nodes[n].skew = n_skew;
        self.nodes[r].skew = r_skew;
        self.nodes[rl].skew = Skew::Balanced;
        rl
    }

    /// Node indices of the tree rooted at `root`, in name order.
    pub fn in_order(&self, root: Option<usize>) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = Vec::new();
        let mut current = root;
        loop {
            while let Some(n) = current {
                stack.push(n);
                current = self.nodes[n].left;
            }
            let Some(n) = stack.pop() else {
                break;
            };
            out.push(n);
            current = self.nodes[n].right;
        }
        out
    }

    /// Node indices of the tree rooted at `root`, each node before its
    /// subtrees. This is the on-disk record order: the tree root lands at
    /// table offset 0, where readers start.
    pub fn pre_order(&self, root: Option<usize>) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = root.into_iter().collect();
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.nodes[n].right);
            stack.extend(self.nodes[n].left);
        }
        out
    }

    /// Children of a directory node, in name order.
    pub fn children_of(&self, directory: usize) -> Vec<usize> {
        self.in_order(self.nodes[directory].children)
    }

    /// Height of the tree rooted at `root` (0 for an empty tree).
    pub fn height(&self, root: Option<usize>) -> usize {
        let Some(r) = root else {
            return 0;
        };
        1 + self
            .height(self.nodes[r].left)
            .max(self.height(self.nodes[r].right))
    }
}
