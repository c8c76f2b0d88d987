// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the quizwire client.
#[derive(Debug, Clone, clap::Args)]
pub struct ClientConfig {
    /// Base URL of the quiz REST API.
    #[arg(long, default_value = "http://127.0.0.1:8080/api", env = "QUIZWIRE_API_URL")]
    pub api_url: String,

    /// WebSocket base URL. Derived from --api-url when unset.
    #[arg(long, env = "QUIZWIRE_WS_URL")]
    pub ws_url: Option<String>,

    /// Path of the persisted auth token file.
    #[arg(long, default_value = ".quizwire-token.json", env = "QUIZWIRE_TOKEN_FILE")]
    pub token_file: std::path::PathBuf,

    /// First reconnect delay in milliseconds; doubles on every further attempt.
    #[arg(long, default_value_t = 2000, env = "QUIZWIRE_RECONNECT_BASE_MS")]
    pub reconnect_base_ms: u64,

    /// Max reconnect attempts per failure episode.
    #[arg(long, default_value_t = 5, env = "QUIZWIRE_RECONNECT_MAX_ATTEMPTS")]
    pub reconnect_max_attempts: u32,

    /// Delay between socket open and the join handshake, in milliseconds.
    #[arg(long, default_value_t = 100, env = "QUIZWIRE_JOIN_GRACE_MS")]
    pub join_grace_ms: u64,
}

impl ClientConfig {
    pub fn reconnect_base(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn join_grace(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.join_grace_ms)
    }

    /// WebSocket base URL: the explicit --ws-url, or the API URL with its
    /// scheme swapped to ws(s) and the trailing `/api` replaced by `/ws`.
    pub fn ws_base(&self) -> String {
        if let Some(ws) = &self.ws_url {
            return ws.trim_end_matches('/').to_owned();
        }
        let base = if self.api_url.starts_with("https://") {
            self.api_url.replacen("https://", "wss://", 1)
        } else {
            self.api_url.replacen("http://", "ws://", 1)
        };
        let base = base.trim_end_matches('/');
        let base = base.strip_suffix("/api").unwrap_or(base);
        format!("{base}/ws")
    }

    /// Full channel URL for one session code.
    pub fn session_ws_url(&self, code: &str) -> String {
        format!("{}/{code}", self.ws_base())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
