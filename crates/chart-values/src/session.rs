//! The editing session of a single release: the quick-mode form, the
//! advanced-mode document and the switches between them.
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu, ensure};
use strum::Display;
use tokio::sync::{Mutex, MutexGuard};

use crate::{
    Tree, Value,
    deploy::{DeployRequest, ReleaseTarget},
    document::{self, FormatError, SerializeError},
    flat::{self, ConflictError, FlatMap},
    merge,
    path::Path,
    policy::{FieldDescriptor, MissingRequired, PolicySets},
    schema::{self, ChartConfig},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read the policy of chart {chart_id} {version}"))]
    ReadPolicy {
        source: schema::Error,
        chart_id: String,
        version: String,
    },

    #[snafu(display("key {path} is fixed and cannot be changed"))]
    EditFixedKey { path: Path },

    #[snafu(display("key {path} is not part of the quick mode form"))]
    EditHiddenKey { path: Path },

    #[snafu(display("cannot {action} in {mode} mode"))]
    WrongMode { action: &'static str, mode: Mode },

    #[snafu(display("the values document is invalid"))]
    InvalidDocument { source: FormatError },

    #[snafu(display("failed to serialize the values document"))]
    SerializeDocument { source: SerializeError },

    #[snafu(display("the values contain conflicting keys"))]
    ConflictingKeys { source: ConflictError },

    #[snafu(transparent)]
    MissingRequired { source: MissingRequired },
}

/// Which view of the values the user is editing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// The guided form of visible keys.
    #[default]
    Quick,

    /// The whole values document as YAML text.
    Advanced,
}

/// The state of one release being configured.
///
/// The session starts in [`Mode::Quick`] with the form seeded from every
/// default value, including keys the form does not show. Only the state of
/// the current mode is authoritative: the form is rebuilt from the defaults
/// overlaid with the document when switching to quick mode, and the document
/// from the form when switching to advanced mode.
///
/// A failed operation never changes the session.
#[derive(Debug)]
pub struct EditSession {
    chart_id: String,
    version: String,
    defaults: Tree,
    default_flat: FlatMap,
    policy: PolicySets,
    mode: Mode,
    form: FlatMap,
    document: String,
    submission: Mutex<()>,
}

impl EditSession {
    pub fn new(config: &ChartConfig) -> Result<Self, Error> {
        let policy = config.policy().context(ReadPolicySnafu {
            chart_id: &config.chart_id,
            version: &config.version,
        })?;
        let default_flat = config.default_flat();
        let document = document::serialize(&config.default_values).context(SerializeDocumentSnafu)?;

        tracing::debug!(
            chart.id = %config.chart_id,
            chart.version = %config.version,
            fields = policy.visible().len(),
            "started edit session"
        );

        Ok(Self {
            chart_id: config.chart_id.clone(),
            version: config.version.clone(),
            defaults: config.default_values.clone(),
            form: default_flat.clone(),
            default_flat,
            policy,
            mode: Mode::Quick,
            document,
            submission: Mutex::new(()),
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn policy(&self) -> &PolicySets {
        &self.policy
    }

    pub fn defaults(&self) -> &Tree {
        &self.defaults
    }

    /// The quick-mode form state, including keys which are not shown.
    ///
    /// Stale while the session is in advanced mode.
    pub fn form(&self) -> &FlatMap {
        &self.form
    }

    /// The advanced-mode document.
    ///
    /// Stale while the session is in quick mode.
    pub fn document(&self) -> &str {
        &self.document
    }

    /// Describes the visible form fields with their current values.
    pub fn fields(&self) -> Vec<FieldDescriptor> {
        self.policy.fields(&self.form)
    }

    /// Sets a form field.
    ///
    /// Only visible keys which are not fixed can be set, and only in quick
    /// mode.
    pub fn set_field(&mut self, path: Path, value: Value) -> Result<(), Error> {
        ensure!(
            self.mode == Mode::Quick,
            WrongModeSnafu {
                action: "edit form fields",
                mode: self.mode
            }
        );
        ensure!(!self.policy.is_fixed(&path), EditFixedKeySnafu { path });
        ensure!(self.policy.is_visible(&path), EditHiddenKeySnafu { path });

        tracing::trace!(%path, "set form field");
        self.form.set(path, value);
        Ok(())
    }

    /// Replaces the document text. Only possible in advanced mode.
    ///
    /// The text is not checked until the session switches back to quick mode
    /// or is submitted.
    pub fn set_document(&mut self, text: impl Into<String>) -> Result<(), Error> {
        ensure!(
            self.mode == Mode::Advanced,
            WrongModeSnafu {
                action: "edit the values document",
                mode: self.mode
            }
        );

        self.document = text.into();
        Ok(())
    }

    /// Switches to `mode`, doing nothing if the session is already in it.
    ///
    /// Switching to advanced mode merges the form onto the defaults and
    /// renders the result as the document. Switching to quick mode parses the
    /// document and overlays it onto the defaults to rebuild the form, so a
    /// key deleted from the document shows its default again. The switch is
    /// rejected if the document is malformed.
    pub fn switch_to(&mut self, mode: Mode) -> Result<(), Error> {
        match (self.mode, mode) {
            (Mode::Quick, Mode::Advanced) => self.switch_to_advanced(),
            (Mode::Advanced, Mode::Quick) => self.switch_to_quick(),
            _ => Ok(()),
        }
    }

    fn switch_to_advanced(&mut self) -> Result<(), Error> {
        let reconciled = merge::merge(&self.defaults, &self.form).context(ConflictingKeysSnafu)?;
        let document = document::serialize(&reconciled).context(SerializeDocumentSnafu)?;

        self.document = document;
        self.mode = Mode::Advanced;
        tracing::debug!(chart.id = %self.chart_id, "switched to advanced mode");
        Ok(())
    }

    fn switch_to_quick(&mut self) -> Result<(), Error> {
        let tree = document::parse(&self.document)
            .inspect_err(|error| {
                tracing::warn!(
                    chart.id = %self.chart_id,
                    %error,
                    "rejected switch to quick mode, document is invalid"
                );
            })
            .context(InvalidDocumentSnafu)?;

        let mut form = self.default_flat.clone();
        for (path, value) in flat::flatten(&tree) {
            form.set(path, value);
        }

        self.form = form;
        self.mode = Mode::Quick;
        tracing::debug!(
            chart.id = %self.chart_id,
            keys = self.form.len(),
            "switched to quick mode"
        );
        Ok(())
    }

    /// The values the release would be installed with, from the state of the
    /// current mode.
    ///
    /// Fixed keys are forced back to their defaults, whatever the user
    /// entered. Required keys are not checked, see [`EditSession::prepare`].
    pub fn reconciled(&self) -> Result<Tree, Error> {
        let user = match self.mode {
            Mode::Quick => self.form.clone(),
            Mode::Advanced => {
                flat::flatten(&document::parse(&self.document).context(InvalidDocumentSnafu)?)
            }
        };

        let user = self.policy.apply_fixed(&user, &self.default_flat);
        merge::merge(&self.defaults, &user).context(ConflictingKeysSnafu)
    }

    /// Computes the final values and checks that every required key has one.
    pub fn prepare(&self) -> Result<Tree, Error> {
        let reconciled = self.reconciled()?;
        self.policy
            .check_required(&flat::flatten(&reconciled))
            .inspect_err(|missing| {
                tracing::debug!(chart.id = %self.chart_id, %missing, "values are incomplete");
            })?;

        Ok(reconciled)
    }

    /// Marks the session as being submitted until the returned guard is
    /// dropped.
    ///
    /// Returns [`None`] while another submission of this session is in
    /// flight.
    pub fn try_begin_submission(&self) -> Option<MutexGuard<'_, ()>> {
        self.submission.try_lock().ok()
    }

    /// Builds the payload handed to the deploy service.
    pub fn deploy_request(&self, target: &ReleaseTarget) -> Result<DeployRequest, Error> {
        Ok(DeployRequest {
            chart_id: self.chart_id.clone(),
            version: self.version.clone(),
            release_name: target.release_name.clone(),
            namespace: target.namespace.clone(),
            user_values: self.prepare()?,
            is_quick_mode: self.mode == Mode::Quick,
        })
    }
}
