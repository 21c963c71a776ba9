//! Combining values trees.
//!
//! Two flavours of merging are needed:
//!
//! - [`merge`] applies a set of path-scoped overrides (the quick-mode form
//!   state) onto a base tree. Exactly the overridden paths change, every
//!   sibling keeps its base value, even below a top-level key which is only
//!   partially overridden.
//! - [`Merge`] combines two whole trees, recursing into mappings. This is
//!   what [`merge_layers`] uses to stack chart defaults, administrator
//!   defaults and user values.
use crate::{
    Tree, Value,
    flat::{self, ConflictError, FlatMap},
};

/// A type that can be merged with itself.
///
/// Mappings are merged key by key, recursively. Every other value is merged
/// atomically: the value from `self` wins, unless it is `null`, in which case
/// the default is used. Sequences are therefore replaced wholesale.
///
/// ```
/// # use chart_values::merge::Merge;
/// use serde_json::json;
///
/// let mut values = json!({"image": {"tag": "1.25"}, "replicaCount": null});
/// values.merge(&json!({"image": {"repository": "nginx", "tag": "1.24"}, "replicaCount": 1}));
///
/// assert_eq!(values, json!({
///     "image": {"repository": "nginx", "tag": "1.25"},
///     "replicaCount": 1,
/// }));
/// ```
pub trait Merge {
    /// Merge with `defaults`, preferring values from `self` if they are set there
    fn merge(&mut self, defaults: &Self);
}

impl Merge for Tree {
    fn merge(&mut self, defaults: &Self) {
        // Start from the defaults so the merged tree keeps their key order
        let mut merged = defaults.clone();
        overlay(&mut merged, self);
        *self = merged;
    }
}

impl Merge for Value {
    fn merge(&mut self, defaults: &Self) {
        match (self, defaults) {
            (Self::Object(overrides), Self::Object(defaults)) => overrides.merge(defaults),
            (this, defaults) if this.is_null() => *this = defaults.clone(),
            _ => {}
        }
    }
}

/// Moving version of [`Merge::merge`], to produce slightly nicer test output
pub fn merge_with<T: Merge>(mut overrides: T, defaults: &T) -> T {
    overrides.merge(defaults);
    overrides
}

fn overlay(base: &mut Tree, layer: &Tree) {
    for (key, value) in layer {
        match (base.get_mut(key), value) {
            (Some(Value::Object(base)), Value::Object(layer)) => overlay(base, layer),
            (Some(_), Value::Null) => {}
            (_, value) => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Applies `overrides` onto a copy of `base`.
///
/// Every override replaces exactly the value at its path. Missing
/// intermediate mappings are created, and a leaf in `base` which lies on the
/// way to an override is replaced by a mapping. `base` is never modified.
///
/// Fails if `overrides` is itself inconsistent, for example when it contains
/// both `a` and `a.b`.
pub fn merge(base: &Tree, overrides: &FlatMap) -> Result<Tree, ConflictError> {
    overrides.check_conflicts()?;

    let mut merged = base.clone();
    for (path, value) in overrides {
        flat::set_path(&mut merged, path, value.clone(), true)?;
    }

    tracing::trace!(overrides = overrides.len(), "merged overrides onto base tree");
    Ok(merged)
}

/// Stacks the three layers a release is installed with.
///
/// Administrator defaults take precedence over the chart's own defaults, user
/// values take precedence over both.
pub fn merge_layers(chart_defaults: &Tree, admin_defaults: &Tree, user_values: &Tree) -> Tree {
    let admin = merge_with(admin_defaults.clone(), chart_defaults);
    merge_with(user_values.clone(), &admin)
}
