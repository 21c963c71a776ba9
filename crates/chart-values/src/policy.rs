//! Per-key policy: which paths are shown, which are mandatory and which can
//! never be changed by the user.
use std::fmt::Display;

use indexmap::IndexSet;
use serde::Serialize;

use crate::{
    Tree, Value,
    flat::{self, FlatMap},
    path::Path,
};

/// Required paths which have no usable value.
///
/// All offending paths are collected, so a single message can list every
/// one of them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MissingRequired(pub Vec<Path>);

impl Display for MissingRequired {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "missing required keys: ")?;
        for (i, path) in self.0.iter().enumerate() {
            let prefix = match i {
                0 => "",
                _ => ", ",
            };
            write!(f, "{prefix}{path}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MissingRequired {}

/// The visible, required and fixed path sets of one chart version.
///
/// Duplicates are dropped on construction. The visible set keeps its first
/// occurrence order, which is the order the form renders fields in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PolicySets {
    visible: IndexSet<Path>,
    required: IndexSet<Path>,
    fixed: IndexSet<Path>,
}

/// How the form-rendering collaborator should present a single visible path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub path: Path,

    /// The current value, [`None`] if the form state has none.
    pub value: Option<Value>,

    /// The path is fixed: render it, but never accept input.
    pub disabled: bool,

    /// The path is required: the field must not be left blank.
    pub mandatory: bool,
}

impl PolicySets {
    pub fn new(
        visible: impl IntoIterator<Item = Path>,
        required: impl IntoIterator<Item = Path>,
        fixed: impl IntoIterator<Item = Path>,
    ) -> Self {
        Self {
            visible: visible.into_iter().collect(),
            required: required.into_iter().collect(),
            fixed: fixed.into_iter().collect(),
        }
    }

    pub fn visible(&self) -> &IndexSet<Path> {
        &self.visible
    }

    pub fn required(&self) -> &IndexSet<Path> {
        &self.required
    }

    pub fn fixed(&self) -> &IndexSet<Path> {
        &self.fixed
    }

    pub fn is_visible(&self, path: &Path) -> bool {
        self.visible.contains(path)
    }

    pub fn is_required(&self, path: &Path) -> bool {
        self.required.contains(path)
    }

    /// Returns `true` if `path` or one of its ancestors is fixed.
    pub fn is_fixed(&self, path: &Path) -> bool {
        self.fixed.iter().any(|fixed| path.starts_with(fixed))
    }

    /// Returns `true` if the user may change the value at `path` through the
    /// form.
    pub fn is_editable(&self, path: &Path) -> bool {
        self.is_visible(path) && !self.is_fixed(path)
    }

    /// Describes every visible path for the form-rendering collaborator.
    pub fn fields(&self, form: &FlatMap) -> Vec<FieldDescriptor> {
        self.visible
            .iter()
            .map(|path| FieldDescriptor {
                path: path.clone(),
                value: form.get(path).cloned(),
                disabled: self.is_fixed(path),
                mandatory: self.is_required(path),
            })
            .collect()
    }

    /// See [`apply_fixed`].
    pub fn apply_fixed(&self, flat: &FlatMap, defaults: &FlatMap) -> FlatMap {
        apply_fixed(flat, &self.fixed, defaults)
    }

    /// See [`check_required`].
    pub fn check_required(&self, flat: &FlatMap) -> Result<(), MissingRequired> {
        let missing = check_required(flat, &self.required);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(MissingRequired(missing))
        }
    }
}

/// A value counts as blank if it is `null` or the empty string.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Returns every required path whose value in `flat` is absent, `null` or
/// the empty string. An empty result means `flat` is valid.
///
/// A required path naming a mapping counts as present if at least one leaf
/// below it has a non-blank value. Chart configs doing this are reported by
/// [`ChartConfig::lint`](crate::schema::ChartConfig::lint).
pub fn check_required<'a>(
    flat: &FlatMap,
    required: impl IntoIterator<Item = &'a Path>,
) -> Vec<Path> {
    required
        .into_iter()
        .filter(|path| match flat.get(*path) {
            Some(value) => is_blank(value),
            None => flat.subtree(path).all(|(_, value)| is_blank(value)),
        })
        .cloned()
        .collect()
}

/// Forces every fixed path back to its default, whatever the user entered.
///
/// A fixed path without a default is removed. A fixed path naming a
/// mapping resets the whole branch below it. A user leaf stored at an
/// ancestor of a fixed path is dropped, since it would replace the fixed
/// branch when merged.
pub fn apply_fixed<'a>(
    flat: &FlatMap,
    fixed: impl IntoIterator<Item = &'a Path>,
    defaults: &FlatMap,
) -> FlatMap {
    let mut result = flat.clone();
    for path in fixed {
        let stale = result
            .subtree(path)
            .map(|(path, _)| path.clone())
            .chain(path.ancestors().filter(|ancestor| result.contains_key(ancestor)))
            .collect::<Vec<_>>();
        for stale in &stale {
            result.remove(stale);
        }

        for (path, value) in defaults.subtree(path) {
            result.set(path.clone(), value.clone());
        }
    }
    result
}

/// Returns every required path which does not exist in `tree` at all.
///
/// This is the check a deploy backend runs on the submitted nested values:
/// it only looks for presence, blank values pass.
pub fn missing_in_tree<'a>(tree: &Tree, required: impl IntoIterator<Item = &'a Path>) -> Vec<Path> {
    required
        .into_iter()
        .filter(|path| flat::get_path(tree, path).is_none())
        .cloned()
        .collect()
}
