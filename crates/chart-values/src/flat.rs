//! Conversion between a nested values [`Tree`] and its flat, path-addressed
//! view.
//!
//! Flattening descends into mappings only. Every other value, including
//! sequences and `null`, is a leaf:
//!
//! ```yaml
//! image:
//!   repository: nginx
//!   pullSecrets: [a, b]
//! replicaCount: 1
//! ```
//!
//! flattens into
//!
//! ```yaml
//! image.repository: nginx
//! image.pullSecrets: [a, b]
//! replicaCount: 1
//! ```
//!
//! An empty mapping produces no entry at all, so after flattening an empty
//! default sub-mapping cannot be told apart from an absent key. Reconciling
//! through [`merge`](crate::merge::merge) keeps such branches because it
//! starts from the default tree.
use std::{collections::BTreeMap, ops::Deref};

use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::{Tree, Value, path::Path};

/// A flat path in the map collides with a leaf stored at one of its
/// ancestors. A leaf and a sub-tree can never coexist at the same location.
#[derive(Clone, Debug, PartialEq, Eq, Snafu)]
#[snafu(display("path {path} collides with the leaf value stored at {ancestor}"))]
pub struct ConflictError {
    pub path: Path,
    pub ancestor: Path,
}

/// A map from [`Path`] to leaf [`Value`].
///
/// Mapping values are never stored directly. Inserting a mapping stores its
/// leaf descendants instead (see [`FlatMap::insert`]).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<Path, Value>", into = "BTreeMap<Path, Value>")]
pub struct FlatMap(BTreeMap<Path, Value>);

impl FlatMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` at `path`.
    ///
    /// If `value` is a mapping, its leaf descendants are stored below `path`
    /// instead, and an empty mapping stores nothing.
    pub fn insert(&mut self, path: Path, value: Value) {
        match value {
            Value::Object(map) => flatten_into(&map, Some(&path), self),
            leaf => {
                self.0.insert(path, leaf);
            }
        }
    }

    /// Stores `value` at `path`, replacing whatever was stored at, below or
    /// above it.
    ///
    /// Unlike [`FlatMap::insert`], this never introduces a conflict: entries
    /// below `path` and leaves stored at one of its ancestors are removed
    /// first.
    pub fn set(&mut self, path: Path, value: Value) {
        let stale = self
            .subtree(&path)
            .map(|(stale, _)| stale.clone())
            .chain(path.ancestors().filter(|ancestor| self.0.contains_key(ancestor)))
            .collect::<Vec<_>>();
        for stale in &stale {
            self.0.remove(stale);
        }

        self.insert(path, value);
    }

    pub fn remove(&mut self, path: &Path) -> Option<Value> {
        self.0.remove(path)
    }

    /// Returns the entries whose path is `prefix` or lies below it.
    pub fn subtree(&self, prefix: &Path) -> impl Iterator<Item = (&Path, &Value)> {
        self.0
            .range(prefix.clone()..)
            .take_while(move |(path, _)| path.starts_with(prefix))
    }

    /// Returns the first path which has one of its ancestors stored as a leaf
    /// in the same map.
    ///
    /// A map without conflicts can be turned into a tree with [`unflatten`].
    pub fn check_conflicts(&self) -> Result<(), ConflictError> {
        for path in self.0.keys() {
            if let Some(ancestor) = path
                .ancestors()
                .find(|ancestor| self.0.contains_key(ancestor))
            {
                return Err(ConflictError {
                    path: path.clone(),
                    ancestor,
                });
            }
        }
        Ok(())
    }
}

impl Deref for FlatMap {
    type Target = BTreeMap<Path, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<BTreeMap<Path, Value>> for FlatMap {
    fn from(value: BTreeMap<Path, Value>) -> Self {
        value.into_iter().collect()
    }
}

impl From<FlatMap> for BTreeMap<Path, Value> {
    fn from(value: FlatMap) -> Self {
        value.0
    }
}

impl FromIterator<(Path, Value)> for FlatMap {
    fn from_iter<T: IntoIterator<Item = (Path, Value)>>(iter: T) -> Self {
        let mut flat = Self::new();
        flat.extend(iter);
        flat
    }
}

impl Extend<(Path, Value)> for FlatMap {
    fn extend<T: IntoIterator<Item = (Path, Value)>>(&mut self, iter: T) {
        for (path, value) in iter {
            self.insert(path, value);
        }
    }
}

impl IntoIterator for FlatMap {
    type IntoIter = std::collections::btree_map::IntoIter<Path, Value>;
    type Item = (Path, Value);

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a FlatMap {
    type IntoIter = std::collections::btree_map::Iter<'a, Path, Value>;
    type Item = (&'a Path, &'a Value);

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Flattens `tree` into a map of leaf values.
pub fn flatten(tree: &Tree) -> FlatMap {
    let mut flat = FlatMap::new();
    flatten_into(tree, None, &mut flat);
    flat
}

/// Flattens `tree` as if it was located at `prefix`.
pub fn flatten_under(tree: &Tree, prefix: &Path) -> FlatMap {
    let mut flat = FlatMap::new();
    flatten_into(tree, Some(prefix), &mut flat);
    flat
}

fn flatten_into(tree: &Tree, prefix: Option<&Path>, out: &mut FlatMap) {
    for (key, value) in tree {
        let path = match prefix {
            Some(prefix) => prefix.child(key),
            None => Path::root(key),
        };

        match value {
            Value::Object(map) => flatten_into(map, Some(&path), out),
            leaf => {
                out.0.insert(path, leaf.clone());
            }
        }
    }
}

/// Rebuilds the nested tree from a flat map.
///
/// Fails if a path runs through a location which already holds a leaf, the
/// map is then corrupt and is never repaired by overwriting.
pub fn unflatten(flat: &FlatMap) -> Result<Tree, ConflictError> {
    let mut tree = Tree::new();
    for (path, value) in flat {
        set_path(&mut tree, path, value.clone(), false)?;
    }
    Ok(tree)
}

/// Stores `value` at `path` inside `tree`, creating intermediate mappings.
///
/// With `replace_leaves`, a leaf found on the way is replaced by a fresh
/// mapping, otherwise it is reported as a [`ConflictError`]. A mapping found
/// at the final segment is always a conflict, because `path` itself would
/// then be an ancestor of other stored paths.
pub(crate) fn set_path(
    tree: &mut Tree,
    path: &Path,
    value: Value,
    replace_leaves: bool,
) -> Result<(), ConflictError> {
    let segments = path.segments();
    let (leaf, intermediate) = match segments.split_last() {
        Some(split) => split,
        None => return Ok(()),
    };

    let mut current = tree;
    for (depth, segment) in intermediate.iter().enumerate() {
        let slot = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Tree::new()));

        if replace_leaves && !slot.is_object() {
            *slot = Value::Object(Tree::new());
        }

        let Value::Object(map) = slot else {
            return Err(ConflictError {
                path: path.clone(),
                ancestor: Path::try_from(segments[..=depth].to_vec())
                    .unwrap_or_else(|_| path.clone()),
            });
        };
        current = map;
    }

    if !replace_leaves && current.get(leaf).is_some_and(Value::is_object) {
        return Err(ConflictError {
            path: path.clone(),
            ancestor: path.clone(),
        });
    }
    current.insert(leaf.clone(), value);
    Ok(())
}

/// Lists every path of `tree`, including the paths of intermediate mappings,
/// in document order with parents before their children.
///
/// This is the universe the visible, required and fixed key sets are chosen
/// from.
pub fn key_universe(tree: &Tree) -> Vec<Path> {
    fn collect(tree: &Tree, prefix: Option<&Path>, out: &mut Vec<Path>) {
        for (key, value) in tree {
            let path = match prefix {
                Some(prefix) => prefix.child(key),
                None => Path::root(key),
            };
            out.push(path.clone());
            if let Value::Object(map) = value {
                collect(map, Some(&path), out);
            }
        }
    }

    let mut universe = Vec::new();
    collect(tree, None, &mut universe);
    universe
}

/// Looks up the value stored at `path` inside `tree`, descending through
/// mappings only.
pub fn get_path<'a>(tree: &'a Tree, path: &Path) -> Option<&'a Value> {
    let (first, rest) = path.segments().split_first()?;
    rest.iter()
        .try_fold(tree.get(first)?, |value, segment| value.as_object()?.get(segment))
}
