use std::{io, path::PathBuf, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header::HeaderValue, Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::config::{InvokeBackend, InvokeConfig, AUTH_TOKEN_ENV};

/// Body of one invoke call: the worker's full argument vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub args: Vec<String>,
}

/// What the remote handler captured from the worker process.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InvocationResult {
    #[serde(rename = "retcode")]
    pub return_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

impl InvocationResult {
    pub fn succeeded(&self) -> bool {
        self.return_code == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("endpoint answered {code}: {body}")]
    Status { code: u16, body: String },
    #[error("function error ({kind}): {body}")]
    Function { kind: String, body: String },
    #[error("undecodable response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("could not run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("request signing failed: {0}")]
    Signer(String),
}

/// Starts one worker and waits for its captured result.
///
/// Implementations must not block the executor; many invocations share one
/// task through the orchestrator.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResult, InvokeError>;
}

/// Applies credentials to an outgoing invoke request. Credentials come from
/// outside; nothing here computes a signature.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, request: RequestBuilder) -> Result<RequestBuilder, InvokeError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Unsigned;

impl RequestSigner for Unsigned {
    fn sign(&self, request: RequestBuilder) -> Result<RequestBuilder, InvokeError> {
        Ok(request)
    }
}

/// Passes a pre-issued token through as `Authorization: Bearer ...`.
#[derive(Clone)]
pub struct BearerToken(HeaderValue);

impl BearerToken {
    pub fn new(token: &str) -> Result<Self, InvokeError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|err| InvokeError::Signer(err.to_string()))?;
        value.set_sensitive(true);
        Ok(Self(value))
    }

    /// `$MESHBENCH_AUTH_TOKEN`, if set.
    pub fn from_env() -> Result<Option<Self>, InvokeError> {
        dotenvy::var(AUTH_TOKEN_ENV)
            .ok()
            .map(|token| Self::new(&token))
            .transpose()
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(..)")
    }
}

impl RequestSigner for BearerToken {
    fn sign(&self, request: RequestBuilder) -> Result<RequestBuilder, InvokeError> {
        Ok(request.header(reqwest::header::AUTHORIZATION, self.0.clone()))
    }
}

/// Synchronous (`RequestResponse`) Lambda invoke over HTTPS.
///
/// One [`Client`] backs every invocation, so TLS configuration and the
/// connection pool are shared while each in-flight call holds its own
/// session.
pub struct LambdaInvoker {
    client: Client,
    url: String,
    signer: Box<dyn RequestSigner>,
}

impl LambdaInvoker {
    pub fn new(
        endpoint: &str,
        function: &str,
        timeout: Duration,
        signer: Box<dyn RequestSigner>,
    ) -> Result<Self, InvokeError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            url: format!(
                "{}/2015-03-31/functions/{function}/invocations",
                endpoint.trim_end_matches('/')
            ),
            signer,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Invoker for LambdaInvoker {
    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResult, InvokeError> {
        let body = Bytes::from(serde_json::to_vec(&request)?);
        let builder = self
            .client
            .post(&self.url)
            .header("X-Amz-Invocation-Type", "RequestResponse")
            .header("X-Amz-Log-Type", "None")
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        let response = self.signer.sign(builder)?.send().await?;

        let status = response.status();
        let function_error = response
            .headers()
            .get("X-Amz-Function-Error")
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(InvokeError::Status {
                code: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        if let Some(kind) = function_error {
            return Err(InvokeError::Function {
                kind,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Runs each worker as a local child process with the same contract as the
/// remote handler.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl ProcessInvoker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Invoker for ProcessInvoker {
    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResult, InvokeError> {
        let mut command = Command::new(&self.program);
        command
            .args(&request.args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);
        let output = command.output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, output)
                .await
                .map_err(|_| InvokeError::Timeout(limit))?,
            None => output.await,
        }
        .map_err(|source| InvokeError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        Ok(InvocationResult {
            // killed by a signal
            return_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Builds the invoker selected in settings.
pub fn from_config(config: &InvokeConfig) -> Result<Box<dyn Invoker>, InvokeError> {
    match config.backend {
        InvokeBackend::Lambda => {
            let signer: Box<dyn RequestSigner> = match BearerToken::from_env()? {
                Some(token) => Box::new(token),
                None => Box::new(Unsigned),
            };
            Ok(Box::new(LambdaInvoker::new(
                &config.endpoint(),
                &config.function,
                config.timeout(),
                signer,
            )?))
        }
        InvokeBackend::Process => {
            Ok(Box::new(ProcessInvoker::new(&config.program).with_timeout(config.timeout())))
        }
    }
}
