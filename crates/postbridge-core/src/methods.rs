//! Method trees and their flat key-path form.
//!
//! A [`MethodTree`] nests callables under string keys. The handshake only
//! ever transmits the flat form: each leaf addressed by its dotted key-path
//! (`"math.add"`). Keys are validated on insertion, so a tree never holds a
//! key that would be ambiguous once flattened.

use std::collections::BTreeMap;

/// Key-path to callable. The flat counterpart of a [`MethodTree`].
pub type FlatMethods<F> = BTreeMap<String, F>;

/// A node in a method tree.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodNode<F> {
    Method(F),
    Namespace(MethodTree<F>),
}

/// Nested mapping of names to callables or further trees.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodTree<F> {
    nodes: BTreeMap<String, MethodNode<F>>,
}

/// Error building a method tree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MethodTreeError {
    #[error("key-path {0:?} contains an empty segment")]
    EmptySegment(String),
    #[error("name {0:?} must not contain '.'")]
    DottedName(String),
    #[error("key-path {0:?} conflicts with an existing method or namespace")]
    Conflict(String),
}

impl<F> Default for MethodTree<F> {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }
}

impl<F> MethodTree<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a callable at `key_path`, creating namespaces on demand.
    ///
    /// An existing method at the same path is replaced. A path that runs
    /// through a method, or that ends on a namespace, is a conflict.
    pub fn insert(&mut self, key_path: &str, method: F) -> Result<(), MethodTreeError> {
        let segments = split_key_path(key_path)?;
        let (leaf, parents) = segments
            .split_last()
            .ok_or_else(|| MethodTreeError::EmptySegment(key_path.to_string()))?;

        let mut tree = self;
        for segment in parents {
            let node = tree
                .nodes
                .entry((*segment).to_string())
                .or_insert_with(|| MethodNode::Namespace(MethodTree::new()));
            tree = match node {
                MethodNode::Namespace(child) => child,
                MethodNode::Method(_) => {
                    return Err(MethodTreeError::Conflict(key_path.to_string()));
                }
            };
        }

        if matches!(tree.nodes.get(*leaf), Some(MethodNode::Namespace(_))) {
            return Err(MethodTreeError::Conflict(key_path.to_string()));
        }
        tree.nodes.insert((*leaf).to_string(), MethodNode::Method(method));
        Ok(())
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, key_path: &str, method: F) -> Result<Self, MethodTreeError> {
        self.insert(key_path, method)?;
        Ok(self)
    }

    /// Attach a whole subtree under `name`.
    pub fn nest(&mut self, name: &str, tree: MethodTree<F>) -> Result<(), MethodTreeError> {
        if name.is_empty() {
            return Err(MethodTreeError::EmptySegment(name.to_string()));
        }
        if name.contains('.') {
            return Err(MethodTreeError::DottedName(name.to_string()));
        }
        if self.nodes.contains_key(name) {
            return Err(MethodTreeError::Conflict(name.to_string()));
        }
        self.nodes.insert(name.to_string(), MethodNode::Namespace(tree));
        Ok(())
    }

    /// Look up the callable at `key_path`.
    pub fn get(&self, key_path: &str) -> Option<&F> {
        let mut segments = key_path.split('.').peekable();
        let mut tree = self;
        while let Some(segment) = segments.next() {
            match (tree.nodes.get(segment)?, segments.peek()) {
                (MethodNode::Method(method), None) => return Some(method),
                (MethodNode::Namespace(child), Some(_)) => tree = child,
                _ => return None,
            }
        }
        None
    }

    /// Remove the callable at `key_path`.
    ///
    /// Namespaces left empty by the removal are pruned; siblings are
    /// untouched.
    pub fn remove(&mut self, key_path: &str) -> Option<F> {
        let segments: Vec<&str> = key_path.split('.').collect();
        self.remove_segments(&segments)
    }

    fn remove_segments(&mut self, segments: &[&str]) -> Option<F> {
        let (first, rest) = segments.split_first()?;
        if rest.is_empty() {
            return match self.nodes.remove(*first)? {
                MethodNode::Method(method) => Some(method),
                namespace @ MethodNode::Namespace(_) => {
                    self.nodes.insert((*first).to_string(), namespace);
                    None
                }
            };
        }

        let MethodNode::Namespace(child) = self.nodes.get_mut(*first)? else {
            return None;
        };
        let removed = child.remove_segments(rest);
        if child.is_empty() {
            self.nodes.remove(*first);
        }
        removed
    }

    /// Direct children of this tree.
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &MethodNode<F>)> {
        self.nodes.iter().map(|(name, node)| (name.as_str(), node))
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of callables in the whole tree.
    pub fn len(&self) -> usize {
        self.nodes
            .values()
            .map(|node| match node {
                MethodNode::Method(_) => 1,
                MethodNode::Namespace(child) => child.len(),
            })
            .sum()
    }

    /// Every key-path in the tree, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.visit("", &mut |path: &str, _: &F| paths.push(path.to_string()));
        paths
    }

    /// Flatten into key-path → callable.
    pub fn flatten(&self) -> FlatMethods<F>
    where
        F: Clone,
    {
        let mut flat = FlatMethods::new();
        self.visit("", &mut |path: &str, method: &F| {
            flat.insert(path.to_string(), method.clone());
        });
        flat
    }

    /// Rebuild a tree from key-paths, asking `factory` for each leaf.
    ///
    /// Key-paths sharing a prefix share the intermediate namespace.
    pub fn unflatten<I, S>(
        key_paths: I,
        mut factory: impl FnMut(&str) -> F,
    ) -> Result<Self, MethodTreeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tree = Self::new();
        for key_path in key_paths {
            let key_path = key_path.as_ref();
            tree.insert(key_path, factory(key_path))?;
        }
        Ok(tree)
    }

    /// Same shape, with every leaf transformed.
    pub fn map<G>(&self, mut f: impl FnMut(&str, &F) -> G) -> MethodTree<G> {
        self.map_with_prefix("", &mut f)
    }

    fn map_with_prefix<G>(&self, prefix: &str, f: &mut impl FnMut(&str, &F) -> G) -> MethodTree<G> {
        let nodes = self
            .nodes
            .iter()
            .map(|(name, node)| {
                let path = join(prefix, name);
                let node = match node {
                    MethodNode::Method(method) => MethodNode::Method(f(&path, method)),
                    MethodNode::Namespace(child) => {
                        MethodNode::Namespace(child.map_with_prefix(&path, f))
                    }
                };
                (name.clone(), node)
            })
            .collect();
        MethodTree { nodes }
    }

    fn visit<'a>(&'a self, prefix: &str, f: &mut impl FnMut(&str, &'a F)) {
        for (name, node) in &self.nodes {
            let path = join(prefix, name);
            match node {
                MethodNode::Method(method) => f(&path, method),
                MethodNode::Namespace(child) => child.visit(&path, f),
            }
        }
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn split_key_path(key_path: &str) -> Result<Vec<&str>, MethodTreeError> {
    let segments: Vec<&str> = key_path.split('.').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(MethodTreeError::EmptySegment(key_path.to_string()));
    }
    Ok(segments)
}
