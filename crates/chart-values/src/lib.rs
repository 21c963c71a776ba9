//! Reconciles the values a chart release is installed with.
//!
//! A chart version publishes a default values tree and three lists of
//! dot-paths: which keys the guided form shows, which must not be left blank
//! and which users can never change. Users edit either a flat form of those
//! keys ([quick mode](session::Mode::Quick)) or the whole YAML document
//! ([advanced mode](session::Mode::Advanced)), and this crate keeps both
//! views consistent, enforces the policy and prepares the payload handed to
//! the deploy service.
//!
//! ```
//! use chart_values::{flat, merge, path::Path};
//! use serde_json::json;
//!
//! let defaults = json!({"image": {"repository": "nginx", "tag": "1.24"}});
//! let defaults = defaults.as_object().unwrap();
//!
//! let mut form = flat::flatten(defaults);
//! form.set("image.tag".parse::<Path>().unwrap(), json!("1.25"));
//!
//! let reconciled = merge::merge(defaults, &form).unwrap();
//! assert_eq!(reconciled["image"], json!({"repository": "nginx", "tag": "1.25"}));
//! ```
pub mod deploy;
pub mod document;
pub mod flat;
pub mod logging;
pub mod merge;
pub mod path;
pub mod policy;
pub mod schema;
pub mod session;

/// A single value in a values tree.
///
/// Keys keep the order they were parsed or inserted in.
pub type Value = serde_json::Value;

/// A mapping from keys to [`Value`]s, the top level of every values document.
pub type Tree = serde_json::Map<String, Value>;
