use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsResponse {
    pub tools: Vec<ToolInfo>,
    #[serde(default)]
    pub agent_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClearHistoryResponse {
    pub message: String,
}

/// HTTP endpoints served next to the chat socket.
#[derive(Clone)]
pub struct BackendClient {
    origin: Url,
    http: reqwest::Client,
}

impl BackendClient {
    pub fn new(origin: Url) -> Self {
        Self { origin, http: reqwest::Client::new() }
    }

    pub async fn health(&self) -> anyhow::Result<HealthStatus> {
        let url = self.origin.join("/health")?;
        self.get_json(url).await
    }

    pub async fn tools(&self) -> anyhow::Result<ToolsResponse> {
        let url = self.origin.join("/tools")?;
        self.get_json(url).await
    }

    pub async fn clear_history(&self, identity: &str) -> anyhow::Result<ClearHistoryResponse> {
        if identity.trim().is_empty() {
            anyhow::bail!("no identity set");
        }
        if matches!(identity, "." | "..") {
            anyhow::bail!("identity {identity:?} cannot be addressed in a path");
        }
        let mut url = self.origin.join("/")?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("origin cannot carry a path"))?
            .clear()
            .push("clear-history")
            .push(identity);
        let resp = self.http.post(url).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("clear-history failed: {}", resp.status());
        }
        Ok(resp.json().await?)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> anyhow::Result<T> {
        let resp = self.http.get(url.clone()).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("GET {} failed: {}", url.path(), resp.status());
        }
        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::{routing::{get, post}, Json, Router};
    use serde_json::json;

    async fn spawn_backend(app: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{addr}")).unwrap()
    }

    #[tokio::test]
    async fn health_tools_and_clear_history() {
        let app = Router::new()
            .route("/health", get(|| async {
                Json(json!({"status": "healthy", "message": "Chat application is running"}))
            }))
            .route("/tools", get(|| async {
                Json(json!({
                    "tools": [
                        {"name": "calculate", "description": "math", "parameters": {"type": "object"}},
                        {"name": "search_web"}
                    ],
                    "agent_name": "chat_agent"
                }))
            }))
            .route("/clear-history/:id", post(|Path(id): Path<String>| async move {
                Json(json!({"message": format!("Conversation history cleared for {id}")}))
            }));
        let client = BackendClient::new(spawn_backend(app).await);

        let health = client.health().await.unwrap();
        assert_eq!(health.status, "healthy");

        let tools = client.tools().await.unwrap();
        assert_eq!(tools.agent_name.as_deref(), Some("chat_agent"));
        assert_eq!(tools.tools.len(), 2);
        assert_eq!(tools.tools[1].description, None);

        let cleared = client.clear_history("dana k").await.unwrap();
        assert_eq!(cleared.message, "Conversation history cleared for dana k");

        assert!(client.clear_history("  ").await.is_err());
        assert!(client.clear_history("..").await.is_err());
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let app = Router::new().route("/health", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let client = BackendClient::new(spawn_backend(app).await);
        let err = client.health().await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
