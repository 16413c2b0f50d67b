use crate::config::Config;
use crate::error::ApiError;
use crate::limiter::RateLimitSignal;
use base64::Engine; // for URL_SAFE_NO_PAD.encode/decode
use log::warn;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Rate metadata echoed into tool output envelopes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateMeta {
    pub limit: Option<i64>,
    pub remaining: Option<i64>,
    pub window_secs: Option<u64>,
    pub reset_at: Option<String>,
}

impl RateMeta {
    pub fn from_signal(signal: Option<RateLimitSignal>) -> Option<Self> {
        signal.map(|s| RateMeta {
            limit: Some(s.limit),
            remaining: Some(s.remaining),
            window_secs: Some(s.window_secs),
            reset_at: Some(
                (chrono::Utc::now() + chrono::Duration::seconds(s.window_secs as i64))
                    .to_rfc3339(),
            ),
        })
    }
}

/// Successful upstream response plus any rate-limit signal it carried.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    pub value: T,
    pub rate: Option<RateLimitSignal>,
}

/// Standard list envelope used by the platform's collection endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Paged<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub total: i64,
}

/// Parse the platform's rate-limit headers. All three must be numeric;
/// anything else yields `None` and is ignored upstream.
pub fn extract_rate_signal(headers: &HeaderMap) -> Option<RateLimitSignal> {
    fn num<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<T>().ok())
    }
    Some(RateLimitSignal {
        limit: num(headers, "x-rate-limit-limit")?,
        remaining: num(headers, "x-rate-limit-remaining")?,
        window_secs: num(headers, "x-rate-limit-window")?,
    })
}

pub fn map_status_to_error(status: StatusCode, message: String) -> ApiError {
    let code = match status {
        StatusCode::BAD_REQUEST => "bad_request",
        StatusCode::UNAUTHORIZED => "unauthorized",
        StatusCode::FORBIDDEN => "forbidden",
        StatusCode::NOT_FOUND => "not_found",
        StatusCode::CONFLICT => "conflict",
        s if s.is_server_error() => "upstream_error",
        _ => "server_error",
    };
    ApiError::Status {
        code: code.to_string(),
        message,
    }
}

pub fn encode_path_segment(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// Single-shot client for the monitoring REST API. Retry and throttling
/// live in the injected `RateLimiter`, not here.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base: Url,
    token: String,
}

impl ApiClient {
    pub fn new(cfg: &Config) -> Result<Self, ApiError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&cfg.user_agent)
                .map_err(|e| ApiError::Transport(e.to_string()))?,
        );
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .use_rustls_tls()
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let mut base = Url::parse(&cfg.api_url).map_err(|e| ApiError::Status {
            code: "server_error".into(),
            message: format!("invalid MONITOR_API_URL: {e}"),
        })?;
        // Url::join replaces the last segment unless the base ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client,
            base,
            token: cfg.token.clone(),
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<ApiResponse<T>, ApiError> {
        self.request_json(Method::GET, path, None::<&()>).await
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, ApiError> {
        self.request_json(Method::POST, path, Some(body)).await
    }

    pub async fn patch_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, ApiError> {
        self.request_json(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse<()>, ApiError> {
        let (status, headers, text, rate) = self.send(Method::DELETE, path, None::<&()>).await?;
        if status.is_success() {
            return Ok(ApiResponse { value: (), rate });
        }
        Err(error_from(status, headers, text, rate))
    }

    async fn request_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<ApiResponse<T>, ApiError> {
        let (status, headers, text, rate) = self.send(method, path, body).await?;
        if status.is_success() {
            let value = serde_json::from_str::<T>(&text).map_err(|e| ApiError::Status {
                code: "server_error".into(),
                message: format!("unexpected response body: {e}"),
            })?;
            return Ok(ApiResponse { value, rate });
        }
        Err(error_from(status, headers, text, rate))
    }

    async fn send<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<(StatusCode, HeaderMap, String, Option<RateLimitSignal>), ApiError> {
        let url = self.base.join(path.trim_start_matches('/')).map_err(|e| {
            ApiError::Status {
                code: "bad_request".into(),
                message: format!("invalid path {path}: {e}"),
            }
        })?;
        let mut req = self
            .client
            .request(method.clone(), url.clone())
            .header(AUTHORIZATION, self.auth_header()?);
        if let Some(b) = body {
            req = req.json(b);
        }
        let res = req.send().await.map_err(|e| {
            warn!("{} {} failed to send: {}", method, url, e);
            ApiError::Transport(e.to_string())
        })?;
        let status = res.status();
        let headers = res.headers().clone();
        let rate = extract_rate_signal(&headers);
        let text = res.text().await.unwrap_or_default();
        Ok((status, headers, text, rate))
    }

    fn auth_header(&self) -> Result<HeaderValue, ApiError> {
        HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| ApiError::Transport(format!("invalid token: {e}")))
    }
}

fn error_from(
    status: StatusCode,
    headers: HeaderMap,
    text: String,
    rate: Option<RateLimitSignal>,
) -> ApiError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);
        return ApiError::RateLimited {
            message: if text.is_empty() {
                "too many requests".into()
            } else {
                text
            },
            signal: rate,
            retry_after,
        };
    }
    map_status_to_error(status, text)
}

// Opaque pagination cursor: base64(JSON { offset, size })
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageCursor {
    pub offset: u32,
    pub size: u32,
}

pub fn encode_cursor(c: PageCursor) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .encode(serde_json::to_vec(&c).unwrap_or_default())
}

pub fn decode_cursor(s: &str) -> Option<PageCursor> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(s)
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}
