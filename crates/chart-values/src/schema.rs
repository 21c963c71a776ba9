//! The per-chart-version configuration an administrator publishes: the
//! default values tree plus the visible, required and fixed key lists.
use std::{fmt::Display, str::FromStr};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use strum::Display as StrumDisplay;

use crate::{
    Tree, Value,
    flat::{self, FlatMap},
    path::{Path, PathError},
    policy::{self, PolicySets},
};

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("failed to parse {list} key {key:?} as a values path"))]
    ParsePolicyKey {
        source: PathError,
        list: KeyList,
        key: String,
    },
}

/// Names one of the three policy key lists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, StrumDisplay)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "lowercase")]
pub enum KeyList {
    Visible,
    Required,
    Fixed,
}

/// The schema the engine operates on, as delivered by the chart config
/// collaborator.
///
/// The key lists hold canonical dot-paths. Their order only matters for
/// `visible_keys` (form field order), duplicates are tolerated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChartConfig {
    pub chart_id: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub default_values: Tree,
    pub required_keys: Vec<String>,
    pub visible_keys: Vec<String>,
    pub fixed_keys: Vec<String>,
}

/// A problem with a [`ChartConfig`] which chart authors should fix.
///
/// Findings never block editing or submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "finding", rename_all = "camelCase")]
pub enum LintFinding {
    /// A key list entry is not a valid path.
    InvalidPath { list: KeyList, key: String },

    /// A key list entry does not exist in the default values.
    UnknownKey { list: KeyList, path: Path },

    /// A required key is not visible, users cannot fill it in quick mode.
    RequiredNotVisible { path: Path },

    /// A required key is also fixed but has no usable default, so it can
    /// never be supplied.
    RequiredAndFixedWithoutDefault { path: Path },

    /// A required key names a mapping in the default values. It counts as
    /// supplied once any key below it has a value, which the form cannot show.
    RequiredMapping { path: Path },

    /// A key in the default values contains the path delimiter (or is empty),
    /// its dot-path is ambiguous.
    AmbiguousKey { path: Path },
}

impl Display for LintFinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPath { list, key } => {
                write!(f, "{list} key {key:?} is not a valid values path")
            }
            Self::UnknownKey { list, path } => {
                write!(f, "{list} key {path} does not exist in the default values")
            }
            Self::RequiredNotVisible { path } => {
                write!(f, "required key {path} is not visible in quick mode")
            }
            Self::RequiredAndFixedWithoutDefault { path } => write!(
                f,
                "required key {path} is fixed but has no default, it can never be supplied"
            ),
            Self::RequiredMapping { path } => write!(
                f,
                "required key {path} is a mapping, list the keys below it instead"
            ),
            Self::AmbiguousKey { path } => write!(
                f,
                "default values key {path:?} cannot be addressed by a dot-path",
                path = path.segments()
            ),
        }
    }
}

impl ChartConfig {
    /// The raw entries of one key list.
    pub fn keys(&self, list: KeyList) -> &[String] {
        match list {
            KeyList::Visible => &self.visible_keys,
            KeyList::Required => &self.required_keys,
            KeyList::Fixed => &self.fixed_keys,
        }
    }

    /// Parses the key lists into deduplicated [`PolicySets`].
    pub fn policy(&self) -> Result<PolicySets, Error> {
        Ok(PolicySets::new(
            self.parse_keys(KeyList::Visible)?,
            self.parse_keys(KeyList::Required)?,
            self.parse_keys(KeyList::Fixed)?,
        ))
    }

    fn parse_keys(&self, list: KeyList) -> Result<IndexSet<Path>, Error> {
        self.keys(list)
            .iter()
            .map(|key| Path::from_str(key).context(ParsePolicyKeySnafu { list, key }))
            .collect()
    }

    /// The default values in their flat form.
    pub fn default_flat(&self) -> FlatMap {
        flat::flatten(&self.default_values)
    }

    /// Checks the configuration for problems chart authors should resolve.
    ///
    /// This is meant to run when the configuration is authored. The engine
    /// itself does not enforce that required keys are visible, or that fixed
    /// required keys have a default.
    pub fn lint(&self) -> Vec<LintFinding> {
        let universe = flat::key_universe(&self.default_values);
        let mut findings = universe
            .iter()
            .filter(|path| !path.is_canonical())
            .map(|path| LintFinding::AmbiguousKey { path: path.clone() })
            .collect::<Vec<_>>();

        let known = universe.into_iter().collect::<IndexSet<_>>();
        let mut parsed = |list: KeyList| {
            let mut paths = IndexSet::new();
            for key in self.keys(list) {
                match Path::from_str(key) {
                    Ok(path) => {
                        if !known.contains(&path) {
                            findings.push(LintFinding::UnknownKey {
                                list,
                                path: path.clone(),
                            });
                        }
                        paths.insert(path);
                    }
                    Err(_) => findings.push(LintFinding::InvalidPath {
                        list,
                        key: key.clone(),
                    }),
                }
            }
            paths
        };

        let visible = parsed(KeyList::Visible);
        let required = parsed(KeyList::Required);
        let fixed = parsed(KeyList::Fixed);

        let defaults = self.default_flat();
        for path in &required {
            if !visible.contains(path) {
                findings.push(LintFinding::RequiredNotVisible { path: path.clone() });
            }
            if flat::get_path(&self.default_values, path).is_some_and(Value::is_object) {
                findings.push(LintFinding::RequiredMapping { path: path.clone() });
            }
            if fixed.iter().any(|fixed| path.starts_with(fixed))
                && !policy::check_required(&defaults, [path]).is_empty()
            {
                findings.push(LintFinding::RequiredAndFixedWithoutDefault { path: path.clone() });
            }
        }

        for finding in &findings {
            tracing::debug!(
                chart.id = %self.chart_id,
                chart.version = %self.version,
                %finding,
                "chart config lint finding"
            );
        }
        findings
    }
}
