//! Handing reconciled values to the deploy service.
//!
//! The service itself is a collaborator behind the [`Deployer`] trait. This
//! module owns what happens around the call: the session token, and making
//! sure a release is never submitted twice at the same time.
use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    Tree,
    session::{self, EditSession},
};

pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("a deploy request for this session is already in flight"))]
    InFlight,

    #[snafu(display("not logged in, or the login has expired"))]
    Unauthenticated,

    #[snafu(display("failed to prepare the deploy request"))]
    PrepareRequest { source: session::Error },

    #[snafu(display("failed to deploy release {release_name:?}"))]
    Deploy {
        source: DeployError,
        release_name: String,
    },
}

/// An error reported by a [`Deployer`].
#[derive(Debug, Snafu)]
pub enum DeployError {
    /// The token was not accepted, the equivalent of an HTTP 401.
    #[snafu(display("the session token was rejected"))]
    Unauthorized,

    #[snafu(display("the deploy service rejected the request: {message}"))]
    Rejected { message: String },

    #[snafu(display("failed to reach the deploy service"))]
    Transport {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// The payload handed to the deploy service.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeployRequest {
    pub chart_id: String,
    pub version: String,
    pub release_name: String,
    pub namespace: String,
    pub user_values: Tree,
    pub is_quick_mode: bool,
}

/// The deploy service's answer to a queued deploy.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TaskResponse {
    pub message: String,
    pub task_id: u64,
    pub status: String,
}

/// Where a release is installed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseTarget {
    pub release_name: String,
    pub namespace: String,
}

impl ReleaseTarget {
    /// Targets [`DEFAULT_NAMESPACE`].
    pub fn new(release_name: impl Into<String>) -> Self {
        Self {
            release_name: release_name.into(),
            namespace: DEFAULT_NAMESPACE.to_owned(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

/// The login state passed into every submission.
///
/// A context is created with a token at login and loses it once the deploy
/// service rejects it. There is no way to refresh it, the user has to log in
/// again.
#[derive(Clone, Default)]
pub struct SessionContext {
    token: Option<String>,
}

impl SessionContext {
    pub fn login(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn invalidate(&mut self) {
        self.token = None;
    }
}

impl Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

/// The deploy service.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, token: &str, request: &DeployRequest)
    -> Result<TaskResponse, DeployError>;
}

/// Submits edit sessions to a [`Deployer`].
///
/// Each [`EditSession`] has at most one submission in flight, whichever
/// submitter it is handed to. Another attempt fails with [`Error::InFlight`]
/// instead of being queued. Failed submissions are not retried.
pub struct Submitter<D> {
    deployer: D,
}

impl<D: Deployer> Submitter<D> {
    pub fn new(deployer: D) -> Self {
        Self { deployer }
    }

    pub fn deployer(&self) -> &D {
        &self.deployer
    }

    /// Prepares the deploy request from `session` and hands it to the
    /// deployer.
    ///
    /// Nothing is sent if the values are incomplete. If the deployer rejects
    /// the token, `context` is invalidated.
    pub async fn submit(
        &self,
        context: &mut SessionContext,
        session: &EditSession,
        target: &ReleaseTarget,
    ) -> Result<TaskResponse, Error> {
        let _in_flight = session.try_begin_submission().context(InFlightSnafu)?;
        let token = context.token().context(UnauthenticatedSnafu)?;
        let request = session
            .deploy_request(target)
            .context(PrepareRequestSnafu)?;

        tracing::info!(
            chart.id = %request.chart_id,
            chart.version = %request.version,
            release.name = %request.release_name,
            release.namespace = %request.namespace,
            quick_mode = request.is_quick_mode,
            "submitting deploy request"
        );

        let result = self.deployer.deploy(token, &request).await;
        match result {
            Ok(response) => {
                tracing::info!(
                    task.id = response.task_id,
                    task.status = %response.status,
                    "deploy request accepted"
                );
                Ok(response)
            }
            Err(error) => {
                if matches!(error, DeployError::Unauthorized) {
                    tracing::warn!("deploy service rejected the session token, logging out");
                    context.invalidate();
                }
                Err(error).context(DeploySnafu {
                    release_name: request.release_name,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use indoc::indoc;
    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::{path::Path, schema::ChartConfig};

    fn session(host: &str) -> EditSession {
        let config: ChartConfig = serde_yaml::from_str(indoc! {"
            chart_id: nginx
            version: 15.4.0
            default_values:
              ingress:
                host: ''
            visible_keys: [ingress.host]
            required_keys: [ingress.host]
        "})
        .expect("test YAML is valid");

        let mut session = EditSession::new(&config).expect("test config is valid");
        session
            .set_field(Path::root("ingress").child("host"), json!(host))
            .expect("key is editable");
        session
    }

    fn accepted(task_id: u64) -> TaskResponse {
        TaskResponse {
            message: "Deployment queued".to_owned(),
            task_id,
            status: "pending".to_owned(),
        }
    }

    /// Answers every request the same way and records what it was sent.
    struct Scripted {
        answer: fn() -> Result<TaskResponse, DeployError>,
        sent: std::sync::Mutex<Vec<(String, DeployRequest)>>,
    }

    impl Scripted {
        fn new(answer: fn() -> Result<TaskResponse, DeployError>) -> Self {
            Self {
                answer,
                sent: std::sync::Mutex::default(),
            }
        }

        fn sent(&self) -> Vec<(String, DeployRequest)> {
            self.sent.lock().expect("lock is not poisoned").clone()
        }
    }

    #[async_trait]
    impl Deployer for Scripted {
        async fn deploy(
            &self,
            token: &str,
            request: &DeployRequest,
        ) -> Result<TaskResponse, DeployError> {
            self.sent
                .lock()
                .expect("lock is not poisoned")
                .push((token.to_owned(), request.clone()));
            (self.answer)()
        }
    }

    /// Holds every request until released.
    #[derive(Default)]
    struct Gated {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Deployer for Gated {
        async fn deploy(
            &self,
            _token: &str,
            _request: &DeployRequest,
        ) -> Result<TaskResponse, DeployError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(accepted(1))
        }
    }

    #[tokio::test]
    async fn submit_sends_reconciled_values() {
        let submitter = Submitter::new(Scripted::new(|| Ok(accepted(7))));
        let mut context = SessionContext::login("secret");

        let response = submitter
            .submit(&mut context, &session("nginx.example.com"), &ReleaseTarget::new("web"))
            .await
            .expect("deploy is accepted");

        assert_eq!(response, accepted(7));
        let sent = submitter.deployer().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "secret");
        assert_eq!(sent[0].1.namespace, DEFAULT_NAMESPACE);
        assert_eq!(
            serde_json::to_value(&sent[0].1).expect("request serializes"),
            json!({
                "chart_id": "nginx",
                "version": "15.4.0",
                "release_name": "web",
                "namespace": "default",
                "user_values": {"ingress": {"host": "nginx.example.com"}},
                "is_quick_mode": true,
            })
        );
    }

    #[tokio::test]
    async fn incomplete_values_are_not_sent() {
        let submitter = Submitter::new(Scripted::new(|| Ok(accepted(1))));
        let mut context = SessionContext::login("secret");

        let error = submitter
            .submit(&mut context, &session(""), &ReleaseTarget::new("web"))
            .await
            .expect_err("ingress.host is blank");

        assert!(matches!(error, Error::PrepareRequest { .. }));
        assert!(submitter.deployer().sent().is_empty());
    }

    #[tokio::test]
    async fn rejected_token_invalidates_context() {
        let submitter = Submitter::new(Scripted::new(|| Err(DeployError::Unauthorized)));
        let mut context = SessionContext::login("expired");
        let session = session("nginx.example.com");
        let target = ReleaseTarget::new("web");

        let error = submitter
            .submit(&mut context, &session, &target)
            .await
            .expect_err("token is rejected");
        assert!(matches!(
            error,
            Error::Deploy {
                source: DeployError::Unauthorized,
                ..
            }
        ));
        assert!(!context.is_authenticated());

        let error = submitter
            .submit(&mut context, &session, &target)
            .await
            .expect_err("context was invalidated");
        assert!(matches!(error, Error::Unauthenticated));
        assert_eq!(submitter.deployer().sent().len(), 1);
    }

    #[tokio::test]
    async fn other_failures_keep_context() {
        let submitter = Submitter::new(Scripted::new(|| {
            Err(DeployError::Rejected {
                message: "release web already exists".to_owned(),
            })
        }));
        let mut context = SessionContext::login("secret");

        let error = submitter
            .submit(&mut context, &session("nginx.example.com"), &ReleaseTarget::new("web"))
            .await
            .expect_err("release exists");

        assert_eq!(error.to_string(), r#"failed to deploy release "web""#);
        assert!(context.is_authenticated());
    }

    #[tokio::test]
    async fn only_one_submission_in_flight() {
        let submitter = Arc::new(Submitter::new(Gated::default()));
        let session = Arc::new(session("nginx.example.com"));

        let first = tokio::spawn({
            let submitter = submitter.clone();
            let session = session.clone();
            async move {
                let mut context = SessionContext::login("secret");
                submitter
                    .submit(&mut context, &session, &ReleaseTarget::new("web"))
                    .await
            }
        });
        submitter.deployer().entered.notified().await;

        let mut context = SessionContext::login("secret");
        let error = submitter
            .submit(&mut context, &session, &ReleaseTarget::new("web"))
            .await
            .expect_err("first submission is still in flight");
        assert!(matches!(error, Error::InFlight));

        submitter.deployer().release.notify_one();
        first
            .await
            .expect("submission task does not panic")
            .expect("first submission is accepted");

        // The guard is released once the submission finished
        submitter.deployer().release.notify_one();
        submitter
            .submit(&mut context, &session, &ReleaseTarget::new("web"))
            .await
            .expect("no submission is in flight");
    }

    #[tokio::test]
    async fn in_flight_gate_spans_submitters() {
        let gated = Arc::new(Submitter::new(Gated::default()));
        let scripted = Submitter::new(Scripted::new(|| Ok(accepted(2))));
        let session = Arc::new(session("nginx.example.com"));

        let first = tokio::spawn({
            let gated = gated.clone();
            let session = session.clone();
            async move {
                let mut context = SessionContext::login("secret");
                gated
                    .submit(&mut context, &session, &ReleaseTarget::new("web"))
                    .await
            }
        });
        gated.deployer().entered.notified().await;

        let mut context = SessionContext::login("secret");
        let error = scripted
            .submit(&mut context, &session, &ReleaseTarget::new("web"))
            .await
            .expect_err("the session is already being submitted");
        assert!(matches!(error, Error::InFlight));
        assert!(scripted.deployer().sent().is_empty());

        // Other sessions are not held up
        scripted
            .submit(&mut context, &self::session("other.example.com"), &ReleaseTarget::new("other"))
            .await
            .expect("a different session is not in flight");

        gated.deployer().release.notify_one();
        first
            .await
            .expect("submission task does not panic")
            .expect("first submission is accepted");
    }

    #[test]
    fn context_debug_hides_token() {
        let context = SessionContext::login("secret");
        assert_eq!(format!("{context:?}"), "SessionContext { authenticated: true }");
    }
}
