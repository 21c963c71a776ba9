use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

use chart_values::schema::ChartConfig;
use snafu::{ResultExt, Snafu};

type Result<T, E = Error> = std::result::Result<T, E>;

/// Where a chart config is looked for when none is given.
pub const DEFAULT_SEARCH_PATHS: &[&str] = &[
    "chart-config.yaml",
    "/etc/chart-values/chart-config.yaml",
];

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "failed to locate a chart config in any of the following locations: {search_path:?}"
    ))]
    RequiredFileMissing { search_path: Vec<PathBuf> },

    #[snafu(display("failed to read chart config {path:?}"))]
    ReadChartConfig {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse chart config {path:?}"))]
    ParseChartConfig {
        source: serde_yaml::Error,
        path: PathBuf,
    },
}

/// A path to a [`ChartConfig`] file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChartConfigPath {
    path: Option<PathBuf>,
}

impl From<&OsStr> for ChartConfigPath {
    fn from(s: &OsStr) -> Self {
        Self {
            // clap does not hand us the underlying `Option<&str>`, so the
            // otherwise-invalid `""` means "use the defaults"
            path: if s.is_empty() { None } else { Some(s.into()) },
        }
    }
}

impl ChartConfigPath {
    /// Loads the [`ChartConfig`] from the given path, falling back to the
    /// first path that exists from `default_search_paths` if none is given.
    pub fn load(&self, default_search_paths: &[impl AsRef<Path>]) -> Result<ChartConfig> {
        let path = Self::resolve_path(self.path.as_deref(), default_search_paths)?;
        let contents = std::fs::read_to_string(path).context(ReadChartConfigSnafu { path })?;
        let config: ChartConfig =
            serde_yaml::from_str(&contents).context(ParseChartConfigSnafu { path })?;

        tracing::debug!(
            path = %path.display(),
            chart.id = %config.chart_id,
            chart.version = %config.version,
            "loaded chart config"
        );
        Ok(config)
    }

    /// Finds the file to load.
    ///
    /// 1. A path given by the user must exist, otherwise an [`Error`] is
    ///    returned.
    /// 2. Without a user-provided path, the first existing file from
    ///    `default_paths` is taken.
    /// 3. If nothing exists, an [`Error`] is returned.
    fn resolve_path<'a>(
        user_provided_path: Option<&'a Path>,
        default_paths: &'a [impl AsRef<Path> + 'a],
    ) -> Result<&'a Path> {
        let search_paths = if let Some(path) = user_provided_path {
            vec![path]
        } else {
            default_paths.iter().map(AsRef::as_ref).collect()
        };
        for path in &search_paths {
            if path.exists() {
                return Ok(path);
            }
        }
        RequiredFileMissingSnafu {
            search_path: search_paths
                .into_iter()
                .map(PathBuf::from)
                .collect::<Vec<_>>(),
        }
        .fail()
    }
}
