use std::env;

/// Runtime configuration for the monitoring API client.
/// Values are sourced from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub api_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment.
    ///
    /// Env vars:
    /// - MONITOR_TOKEN (or MONITOR_API_TOKEN) [required]
    /// - MONITOR_API_URL (default: https://api.monitor.example.com/rest)
    /// - MONITOR_HTTP_TIMEOUT_SECS (default: 30)
    /// - MONITOR_USER_AGENT (default: monitor-mcp/<version>)
    pub fn from_env() -> Result<Self, String> {
        let token = env::var("MONITOR_TOKEN")
            .or_else(|_| env::var("MONITOR_API_TOKEN"))
            .map_err(|_| "Missing MONITOR_TOKEN or MONITOR_API_TOKEN".to_string())?;

        let api_url = env::var("MONITOR_API_URL")
            .unwrap_or_else(|_| "https://api.monitor.example.com/rest".to_string());
        let timeout_secs = env::var("MONITOR_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(30);
        let default_ua = format!("monitor-mcp/{}", env!("CARGO_PKG_VERSION"));
        let user_agent = env::var("MONITOR_USER_AGENT").unwrap_or(default_ua);

        Ok(Self {
            token,
            api_url,
            user_agent,
            timeout_secs,
        })
    }
}
