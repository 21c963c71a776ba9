//! Works with chart values files from the command line.
//!
//! Every subcommand prints its result as YAML on stdout.
use std::{
    io::Write,
    path::{Path, PathBuf},
};

use chart_values::{
    Tree,
    document::{self, FormatError, SerializeError, SerializeOptions},
    flat::{self, ConflictError, FlatMap},
    logging, merge,
    policy::MissingRequired,
    schema,
};
use clap::{Args, Parser};
use snafu::{ResultExt, Snafu, ensure};

use crate::config_path::{ChartConfigPath, DEFAULT_SEARCH_PATHS};

mod config_path;

pub const APP_NAME: &str = "chart-values";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("failed to read {path:?}"))]
    ReadFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse values file {path:?}"))]
    ParseValues { source: FormatError, path: PathBuf },

    #[snafu(display("failed to parse flat values file {path:?}"))]
    ParseFlatValues {
        source: serde_yaml::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to load chart config"))]
    LoadChartConfig { source: config_path::Error },

    #[snafu(display("failed to read the chart config key lists"))]
    ReadPolicy { source: schema::Error },

    #[snafu(display("failed to rebuild the values tree"))]
    Unflatten { source: ConflictError },

    #[snafu(display("failed to merge the overrides onto the defaults"))]
    MergeOverrides { source: ConflictError },

    #[snafu(display("values are invalid"))]
    Validate { source: MissingRequired },

    #[snafu(display("chart config has {count} lint finding(s)"))]
    LintFindings { count: usize },

    #[snafu(display("failed to write output"))]
    WriteOutput { source: SerializeError },
}

#[derive(Debug, Parser)]
#[command(name = APP_NAME, version, about)]
enum Command {
    /// Print the flat `path: value` form of a values file.
    Flatten {
        /// The nested values file.
        #[arg(value_name = "FILE")]
        values: PathBuf,
    },

    /// Rebuild the nested values tree from a flat `path: value` file.
    Unflatten {
        #[arg(value_name = "FILE")]
        flat: PathBuf,
    },

    /// Apply flat overrides onto a defaults file.
    Merge {
        /// The nested defaults file.
        #[arg(long, value_name = "FILE")]
        defaults: PathBuf,

        /// The flat `path: value` overrides file.
        #[arg(long, value_name = "FILE")]
        overrides: PathBuf,
    },

    /// Stack chart defaults, administrator defaults and user values.
    Layers {
        /// The chart's own values file.
        #[arg(value_name = "CHART")]
        chart: PathBuf,

        /// Administrator defaults, taking precedence over the chart.
        #[arg(value_name = "ADMIN")]
        admin: Option<PathBuf>,

        /// User values, taking precedence over both.
        #[arg(value_name = "USER")]
        user: Option<PathBuf>,
    },

    /// Force fixed keys, check required keys and print the final values.
    Validate {
        /// The user's values file. Without it, the chart defaults are
        /// validated.
        #[arg(long, value_name = "FILE")]
        values: Option<PathBuf>,

        #[command(flatten)]
        config: ConfigArguments,
    },

    /// Report problems in a chart config.
    Lint {
        /// Fail if there is any finding.
        #[arg(long)]
        strict: bool,

        #[command(flatten)]
        config: ConfigArguments,
    },

    /// Describe the quick mode form fields of a chart config.
    Fields {
        #[command(flatten)]
        config: ConfigArguments,
    },
}

#[derive(Debug, Args)]
struct ConfigArguments {
    /// Provides the path to a chart config file
    #[arg(
        long,
        short = 'c',
        value_name = "FILE",
        default_value = "",
        env = "CHART_VALUES_CONFIG"
    )]
    config: ChartConfigPath,
}

impl ConfigArguments {
    fn load(&self) -> Result<schema::ChartConfig, Error> {
        self.config
            .load(DEFAULT_SEARCH_PATHS)
            .context(LoadChartConfigSnafu)
    }
}

#[snafu::report]
fn main() -> Result<(), Error> {
    let command = Command::parse();
    logging::initialize_logging("CHART_VALUES_LOG", APP_NAME).context(InitializeLoggingSnafu)?;

    run(command, std::io::stdout().lock())
}

fn run(command: Command, out: impl Write) -> Result<(), Error> {
    match command {
        Command::Flatten { values } => {
            let tree = read_values(&values)?;
            print(&flat::flatten(&tree), out)
        }
        Command::Unflatten { flat } => {
            let flat = read_flat_values(&flat)?;
            print(&flat::unflatten(&flat).context(UnflattenSnafu)?, out)
        }
        Command::Merge {
            defaults,
            overrides,
        } => {
            let defaults = read_values(&defaults)?;
            let overrides = read_flat_values(&overrides)?;
            print(
                &merge::merge(&defaults, &overrides).context(MergeOverridesSnafu)?,
                out,
            )
        }
        Command::Layers { chart, admin, user } => {
            let chart = read_values(&chart)?;
            let admin = read_optional_values(admin.as_deref())?;
            let user = read_optional_values(user.as_deref())?;
            print(&merge::merge_layers(&chart, &admin, &user), out)
        }
        Command::Validate { values, config } => {
            let config = config.load()?;
            let policy = config.policy().context(ReadPolicySnafu)?;
            let defaults = config.default_flat();

            let user = match values {
                Some(values) => flat::flatten(&read_values(&values)?),
                None => defaults.clone(),
            };
            let user = policy.apply_fixed(&user, &defaults);
            let reconciled =
                merge::merge(&config.default_values, &user).context(MergeOverridesSnafu)?;
            policy
                .check_required(&flat::flatten(&reconciled))
                .context(ValidateSnafu)?;

            tracing::info!(chart.id = %config.chart_id, "values are valid");
            print(&reconciled, out)
        }
        Command::Lint { strict, config } => {
            let config = config.load()?;
            let findings = config.lint();
            for finding in &findings {
                tracing::warn!(chart.id = %config.chart_id, %finding, "chart config lint finding");
            }

            print(&findings, out)?;
            ensure!(
                !strict || findings.is_empty(),
                LintFindingsSnafu {
                    count: findings.len()
                }
            );
            Ok(())
        }
        Command::Fields { config } => {
            let config = config.load()?;
            let policy = config.policy().context(ReadPolicySnafu)?;
            print(&policy.fields(&config.default_flat()), out)
        }
    }
}

fn read_file(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path).context(ReadFileSnafu { path })
}

fn read_values(path: &Path) -> Result<Tree, Error> {
    document::parse(&read_file(path)?).context(ParseValuesSnafu { path })
}

fn read_optional_values(path: Option<&Path>) -> Result<Tree, Error> {
    path.map_or_else(|| Ok(Tree::new()), read_values)
}

fn read_flat_values(path: &Path) -> Result<FlatMap, Error> {
    serde_yaml::from_str(&read_file(path)?).context(ParseFlatValuesSnafu { path })
}

fn print(value: &impl serde::Serialize, out: impl Write) -> Result<(), Error> {
    document::write_document(value, out, SerializeOptions::default()).context(WriteOutputSnafu)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use clap::CommandFactory;
    use indoc::indoc;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn verify_cli() {
        Command::command().debug_assert();
    }

    #[fixture]
    fn workdir() -> TempDir {
        let dir = tempfile::tempdir().expect("create temporary directory");
        let files = [
            ("values.yaml", indoc! {"
                image:
                  repository: bitnami/nginx
                  tag: '1.24'
                service:
                  type: ClusterIP
                  port: 80
            "}),
            ("overrides.yaml", indoc! {"
                image.tag: '1.25'
                service.port: 8080
            "}),
            ("chart-config.yaml", indoc! {"
                chart_id: nginx
                version: 15.4.0
                default_values:
                  image:
                    repository: bitnami/nginx
                    tag: ''
                  service:
                    type: ClusterIP
                visible_keys: [image.tag, service.type]
                required_keys: [image.tag]
                fixed_keys: [service.type]
            "}),
            ("user.yaml", indoc! {"
                image:
                  tag: '1.25'
                service:
                  type: LoadBalancer
            "}),
        ];
        for (name, contents) in files {
            fs::write(dir.path().join(name), contents).expect("write test file");
        }
        dir
    }

    fn run_to_string(args: &[&str], dir: &TempDir) -> Result<String, Error> {
        let args = args.iter().map(|arg| match arg.strip_prefix('@') {
            Some(file) => dir.path().join(file).display().to_string(),
            None => (*arg).to_owned(),
        });
        let command = Command::try_parse_from(std::iter::once(APP_NAME.to_owned()).chain(args))
            .expect("arguments are valid");

        let mut out = Vec::new();
        run(command, &mut out)?;
        Ok(String::from_utf8(out).expect("output is UTF-8"))
    }

    #[rstest]
    fn flatten_prints_sorted_paths(workdir: TempDir) {
        let output = run_to_string(&["flatten", "@values.yaml"], &workdir).expect("file is valid");

        assert_eq!(
            output,
            indoc! {"
                image.repository: bitnami/nginx
                image.tag: '1.24'
                service.port: 80
                service.type: ClusterIP
            "}
        );
    }

    #[rstest]
    fn merge_applies_flat_overrides(workdir: TempDir) {
        let output = run_to_string(
            &["merge", "--defaults", "@values.yaml", "--overrides", "@overrides.yaml"],
            &workdir,
        )
        .expect("files are valid");

        assert_eq!(
            output,
            indoc! {"
                image:
                  repository: bitnami/nginx
                  tag: '1.25'
                service:
                  type: ClusterIP
                  port: 8080
            "}
        );
    }

    #[rstest]
    fn unflatten_rebuilds_tree(workdir: TempDir) {
        let output =
            run_to_string(&["unflatten", "@overrides.yaml"], &workdir).expect("file is valid");

        assert_eq!(
            output,
            indoc! {"
                image:
                  tag: '1.25'
                service:
                  port: 8080
            "}
        );
    }

    #[rstest]
    #[case::chart_only(&["layers", "@values.yaml"], indoc! {"
        image: {repository: bitnami/nginx, tag: '1.24'}
        service: {type: ClusterIP, port: 80}
    "})]
    #[case::user_over_chart(&["layers", "@values.yaml", "@user.yaml"], indoc! {"
        image: {repository: bitnami/nginx, tag: '1.25'}
        service: {type: LoadBalancer, port: 80}
    "})]
    #[case::user_over_admin(&["layers", "@values.yaml", "@admin.yaml", "@user.yaml"], indoc! {"
        image: {repository: registry.example.com/nginx, tag: '1.25'}
        service: {type: LoadBalancer, port: 80}
    "})]
    fn layers_stack_values_files(workdir: TempDir, #[case] args: &[&str], #[case] expected: &str) {
        fs::write(
            workdir.path().join("admin.yaml"),
            "image: {repository: registry.example.com/nginx, tag: '1.20'}\n",
        )
        .expect("write test file");
        let output = run_to_string(args, &workdir).expect("files are valid");

        assert_eq!(
            document::parse(&output).expect("output parses"),
            document::parse(expected).expect("expected values parse")
        );
    }

    #[rstest]
    fn fields_describe_visible_keys(workdir: TempDir) {
        let output = run_to_string(&["fields", "--config", "@chart-config.yaml"], &workdir)
            .expect("config is valid");

        let fields: serde_yaml::Value = serde_yaml::from_str(&output).expect("output parses");
        let expected: serde_yaml::Value = serde_yaml::from_str(indoc! {"
            - path: image.tag
              value: ''
              disabled: false
              mandatory: true
            - path: service.type
              value: ClusterIP
              disabled: true
              mandatory: false
        "})
        .expect("expected fields parse");
        assert_eq!(fields, expected);
    }

    #[rstest]
    fn validate_forces_fixed_keys(workdir: TempDir) {
        let output = run_to_string(
            &["validate", "--config", "@chart-config.yaml", "--values", "@user.yaml"],
            &workdir,
        )
        .expect("values are complete");

        assert_eq!(
            output,
            indoc! {"
                image:
                  repository: bitnami/nginx
                  tag: '1.25'
                service:
                  type: ClusterIP
            "}
        );
    }

    #[rstest]
    fn validate_reports_missing_keys(workdir: TempDir) {
        let error = run_to_string(&["validate", "--config", "@chart-config.yaml"], &workdir)
            .expect_err("image.tag is blank by default");

        match error {
            Error::Validate { source } => {
                assert_eq!(source.to_string(), "missing required keys: image.tag");
            }
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[rstest]
    fn strict_lint_fails_on_findings(workdir: TempDir) {
        // image.tag is required and visible, service.type is fixed with a default
        run_to_string(&["lint", "--strict", "--config", "@chart-config.yaml"], &workdir)
            .expect("config is clean");

        fs::write(
            workdir.path().join("broken.yaml"),
            "default_values: {a: 1}\nvisible_keys: [b]\n",
        )
        .expect("write test file");
        let error = run_to_string(&["lint", "--strict", "--config", "@broken.yaml"], &workdir)
            .expect_err("b is unknown");
        assert!(matches!(error, Error::LintFindings { count: 1 }));
    }
}
