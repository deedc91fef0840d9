//! Typed Rust client for the AWS APIs that back server workloads.
//!
//! Covers the subset needed by the spawner backends:
//! ECS (task definitions, tasks), EventBridge (rules, targets),
//! Batch (job definitions, jobs), Lambda (functions, permissions) and
//! API Gateway (REST APIs, authorizers, resources, methods, deployments).
//!
//! Requests are signed with SigV4 using static credentials from the
//! environment. Instance-profile and SSO credential chains are out of scope.

mod apigateway;
mod batch;
mod ecs;
mod events;
mod lambda;
pub mod sigv4;
mod types;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use apigateway::ApiGatewayClient;
pub use batch::BatchClient;
pub use ecs::EcsClient;
pub use events::EventsClient;
pub use lambda::LambdaClient;
pub use types::*;

const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("aws request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("aws {service} {operation} returned {status}: {}", ApiErrorDisplay(.code, .message))]
    Api {
        service: &'static str,
        operation: &'static str,
        status: reqwest::StatusCode,
        code: Option<String>,
        message: String,
    },

    #[error("aws response decode failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing env var: {0}")]
    MissingEnv(String),
}

struct ApiErrorDisplay<'a>(&'a Option<String>, &'a String);

impl fmt::Display for ApiErrorDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, "{code}: {}", self.1),
            None => f.write_str(self.1),
        }
    }
}

impl Error {
    /// AWS error code, e.g. `ResourceNotFoundException`.
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// The addressed resource does not exist (or no longer exists).
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Api { status, code, .. } => {
                status.as_u16() == 404
                    || matches!(
                        code.as_deref(),
                        Some("ResourceNotFoundException" | "NotFoundException")
                    )
            }
            _ => false,
        }
    }

    /// A service quota was hit, e.g. too many resources under one REST API.
    pub fn is_limit_exceeded(&self) -> bool {
        self.code() == Some("LimitExceededException")
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Static credentials used to sign requests.
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct AwsConfig {
    pub credentials: Credentials,
    pub region: String,
    /// Overrides `https://{service}.{region}.amazonaws.com` for every service.
    pub endpoint_url: Option<String>,
    pub timeout: Option<Duration>,
}

impl AwsConfig {
    /// Load from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` (required),
    /// `AWS_SESSION_TOKEN`, `AWS_REGION`/`AWS_DEFAULT_REGION` and `AWS_ENDPOINT_URL`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| Error::MissingEnv("AWS_ACCESS_KEY_ID".into()))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| Error::MissingEnv("AWS_SECRET_ACCESS_KEY".into()))?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        let region = std::env::var("AWS_REGION")
            .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|_| DEFAULT_REGION.into());

        Ok(Self {
            credentials: Credentials {
                access_key_id,
                secret_access_key,
                session_token,
            },
            region,
            endpoint_url: std::env::var("AWS_ENDPOINT_URL").ok(),
            timeout: None,
        })
    }
}

/// How a service is addressed and signed.
pub(crate) struct Service {
    pub name: &'static str,
    pub endpoint_prefix: &'static str,
    pub signing_name: &'static str,
    /// `X-Amz-Target` prefix for awsJson services; `None` for restJson.
    pub target_prefix: Option<&'static str>,
}

/// Shared signing HTTP client; the per-service clients wrap it.
#[derive(Clone)]
pub struct AwsClient {
    config: AwsConfig,
    http: reqwest::Client,
}

impl AwsClient {
    pub fn new(config: AwsConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            config,
            http: builder.build()?,
        })
    }

    pub fn region(&self) -> &str {
        &self.config.region
    }

    fn endpoint(&self, service: &Service) -> String {
        match &self.config.endpoint_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!(
                "https://{}.{}.amazonaws.com",
                service.endpoint_prefix, self.config.region
            ),
        }
    }

    /// awsJson 1.1 call: POST `/` with the operation in `X-Amz-Target`.
    pub(crate) async fn call_target<Req, Resp>(
        &self,
        service: &Service,
        operation: &'static str,
        req: &Req,
    ) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(req)?;
        let target = service
            .target_prefix
            .map(|prefix| format!("{prefix}.{operation}"));

        let bytes = self
            .send(
                service,
                operation,
                reqwest::Method::POST,
                "/",
                &[],
                "application/x-amz-json-1.1",
                target,
                body,
            )
            .await?;
        decode(&bytes)
    }

    /// restJson call with an optional JSON body.
    pub(crate) async fn call_rest<Req, Resp>(
        &self,
        service: &Service,
        operation: &'static str,
        method: reqwest::Method,
        path: &str,
        query: &[(String, String)],
        req: Option<&Req>,
    ) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let body = match req {
            Some(req) => serde_json::to_vec(req)?,
            None => Vec::new(),
        };

        let bytes = self
            .send(
                service,
                operation,
                method,
                path,
                query,
                "application/json",
                None,
                body,
            )
            .await?;
        decode(&bytes)
    }

    /// restJson call whose response body is ignored.
    pub(crate) async fn call_rest_empty<Req>(
        &self,
        service: &Service,
        operation: &'static str,
        method: reqwest::Method,
        path: &str,
        req: Option<&Req>,
    ) -> Result<()>
    where
        Req: Serialize + ?Sized,
    {
        let body = match req {
            Some(req) => serde_json::to_vec(req)?,
            None => Vec::new(),
        };

        self.send(
            service,
            operation,
            method,
            path,
            &[],
            "application/json",
            None,
            body,
        )
        .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn send(
        &self,
        service: &Service,
        operation: &'static str,
        method: reqwest::Method,
        path: &str,
        query: &[(String, String)],
        content_type: &str,
        target: Option<String>,
        body: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let wire_path = sigv4::encode_path(path);
        let mut url = format!("{}{wire_path}", self.endpoint(service));
        if !query.is_empty() {
            url.push('?');
            url.push_str(&sigv4::canonical_query(query));
        }
        let url = reqwest::Url::parse(&url).map_err(|e| Error::Api {
            service: service.name,
            operation,
            status: reqwest::StatusCode::BAD_REQUEST,
            code: None,
            message: format!("invalid endpoint url: {e}"),
        })?;

        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        };

        let now = chrono::Utc::now();
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), host);
        headers.insert("x-amz-date".to_string(), sigv4::amz_date(&now));
        if !body.is_empty() {
            headers.insert("content-type".to_string(), content_type.to_string());
        }
        if let Some(token) = &self.config.credentials.session_token {
            headers.insert("x-amz-security-token".to_string(), token.clone());
        }
        if let Some(target) = target {
            headers.insert("x-amz-target".to_string(), target);
        }

        let authorization = sigv4::authorization(
            &sigv4::SignableRequest {
                method: method.as_str(),
                path: &wire_path,
                query,
                headers: &headers,
                payload: &body,
            },
            &sigv4::Scope {
                access_key_id: &self.config.credentials.access_key_id,
                secret_access_key: &self.config.credentials.secret_access_key,
                region: &self.config.region,
                service: service.signing_name,
                time: now,
            },
        );

        let mut builder = self
            .http
            .request(method, url)
            .header("Authorization", authorization)
            .header("Accept", "application/json");
        for (name, value) in headers.iter().filter(|(name, _)| name.as_str() != "host") {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let resp = builder.send().await?;
        Self::check(resp, service.name, operation).await
    }

    async fn check(
        resp: reqwest::Response,
        service: &'static str,
        operation: &'static str,
    ) -> Result<Vec<u8>> {
        let status = resp.status();
        let error_type = resp
            .headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(':').next().unwrap_or(v).to_string());
        let bytes = resp.bytes().await?.to_vec();

        if status.is_success() {
            return Ok(bytes);
        }

        let (body_code, message) = parse_error_body(&bytes);
        Err(Error::Api {
            service,
            operation,
            status,
            code: error_type.or(body_code),
            message,
        })
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let bytes = if bytes.is_empty() { b"{}".as_slice() } else { bytes };
    serde_json::from_slice(bytes).map_err(Error::from)
}

/// Pull `(code, message)` out of an AWS JSON error body.
///
/// awsJson services put the code in `__type` (sometimes namespaced with `#`),
/// restJson services in `code` or `__type`; the message key varies in case.
fn parse_error_body(bytes: &[u8]) -> (Option<String>, String) {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(bytes) else {
        return (None, String::from_utf8_lossy(bytes).into_owned());
    };

    let code = ["__type", "code", "Code"]
        .iter()
        .find_map(|k| value.get(*k).and_then(|v| v.as_str()))
        .map(|c| c.rsplit('#').next().unwrap_or(c).to_string());
    let message = ["message", "Message", "errorMessage"]
        .iter()
        .find_map(|k| value.get(*k).and_then(|v| v.as_str()))
        .unwrap_or_default()
        .to_string();

    (code, message)
}
