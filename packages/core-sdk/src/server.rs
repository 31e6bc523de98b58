use anyhow::Result;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::{get_service, post},
    Json, Router,
};
use reqwest::header::AUTHORIZATION;
use serde_json::json;
use tower_http::services::{ServeDir, ServeFile};

use crate::{config::RelayConfig, telemetry};

/**
 * \brief 中继的共享状态：复用的 HTTP 客户端与一次性构造的只读配置。
 */
#[derive(Clone)]
struct RelayState {
    client: reqwest::Client,
    config: RelayConfig,
}

/**
 * \brief 组装路由：/api/chat 转发接口 + 静态前端兜底。
 * \details 非 /api 路径一律回落到 SPA 入口文档，交给前端路由处理。
 */
pub fn router(config: RelayConfig) -> Router {
    let ui_root = if std::path::Path::new(&config.ui_dir).exists() {
        config.ui_dir.clone()
    } else {
        config.ui_fallback_dir.clone()
    };
    let entry_document = format!("{}/index.html", ui_root.trim_end_matches('/'));
    let static_handler = ServeDir::new(ui_root)
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new(entry_document));

    Router::new()
        .route("/api/chat", post(handle_chat))
        .fallback_service(get_service(static_handler))
        .with_state(RelayState {
            client: reqwest::Client::new(),
            config,
        })
}

/**
 * \brief 启动中继服务。
 * \param addr 监听地址，如 "127.0.0.1:5174"
 */
pub async fn run(addr: &str, config: RelayConfig) -> Result<()> {
    let app = router(config);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Relay listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/**
 * \brief POST /api/chat：附上服务端密钥后把请求体原样转发上游。
 * \details 对 body 不做任何校验或重排，上游的状态码与原始响应体也原样镜像回去；
 *          唯一由中继自产的错误是密钥缺失与网络异常两种 500。
 */
async fn handle_chat(State(state): State<RelayState>, body: Bytes) -> Response {
    let Some(api_key) = state.config.api_key.clone() else {
        telemetry::log_error("relay.chat", "server api key not configured");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Server API key not configured"})),
        )
            .into_response();
    };

    let url = format!(
        "{}/v1/chat/completions",
        state.config.api_base.trim_end_matches('/')
    );
    let outcome = state
        .client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .header(AUTHORIZATION, format!("Bearer {}", api_key))
        .body(body)
        .send()
        .await;

    let resp = match outcome {
        Ok(resp) => resp,
        Err(err) => return proxy_error(err),
    };

    let status = resp.status().as_u16();
    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let bytes = match resp.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => return proxy_error(err),
    };

    telemetry::log_event(
        "relay.chat",
        &format!("forwarded status={} bytes={}", status, bytes.len()),
    );
    mirror_upstream(status, content_type, bytes)
}

/**
 * \brief 把上游的状态码、Content-Type 与响应体镜像为中继响应。
 */
fn mirror_upstream(status: u16, content_type: Option<String>, bytes: Bytes) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    if let Some(ct) = content_type {
        builder = builder.header(CONTENT_TYPE, ct);
    }
    builder
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/**
 * \brief 联系上游失败时中继自产的 500 响应。
 */
fn proxy_error(err: reqwest::Error) -> Response {
    telemetry::log_error("relay.chat", &format!("proxy error: {}", err));
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Proxy error", "details": err.to_string()})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    fn test_config(api_key: Option<&str>, api_base: &str) -> RelayConfig {
        RelayConfig {
            api_key: api_key.map(|k| k.to_string()),
            api_base: api_base.to_string(),
            ui_dir: "dist".to_string(),
            ui_fallback_dir: "web".to_string(),
        }
    }

    async fn spawn_relay(config: RelayConfig) -> String {
        let app = router(config);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind relay");
        let addr = listener.local_addr().expect("relay addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve relay");
        });
        format!("http://{}", addr)
    }

    async fn spawn_stub(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub");
        let addr = listener.local_addr().expect("stub addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve stub");
        });
        format!("http://{}", addr)
    }

    async fn unreachable_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_missing_key_returns_config_error_without_upstream_call() {
        let upstream_url = unreachable_url().await;
        let relay_url = spawn_relay(test_config(None, &upstream_url)).await;

        let resp = reqwest::Client::new()
            .post(format!("{}/api/chat", relay_url))
            .header("content-type", "application/json")
            .body(r#"{"model":"m","messages":[],"temperature":0.3}"#)
            .send()
            .await
            .expect("post");
        assert_eq!(resp.status().as_u16(), 500);
        let body: Value = resp.json().await.expect("json body");
        assert_eq!(body, serde_json::json!({"error": "Server API key not configured"}));
    }

    #[tokio::test]
    async fn test_missing_key_error_is_payload_independent() {
        let upstream_url = unreachable_url().await;
        let relay_url = spawn_relay(test_config(None, &upstream_url)).await;

        let resp = reqwest::Client::new()
            .post(format!("{}/api/chat", relay_url))
            .body("not even json {{")
            .send()
            .await
            .expect("post");
        assert_eq!(resp.status().as_u16(), 500);
        let body: Value = resp.json().await.expect("json body");
        assert_eq!(body["error"], "Server API key not configured");
    }

    #[tokio::test]
    async fn test_upstream_status_and_body_mirrored() {
        let upstream = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    r#"{"error":{"message":"rate limited"}}"#,
                )
            }),
        );
        let upstream_url = spawn_stub(upstream).await;
        let relay_url = spawn_relay(test_config(Some("secret"), &upstream_url)).await;

        let resp = reqwest::Client::new()
            .post(format!("{}/api/chat", relay_url))
            .body(r#"{"model":"m","messages":[],"temperature":0.3}"#)
            .send()
            .await
            .expect("post");
        assert_eq!(resp.status().as_u16(), 429);
        let text = resp.text().await.expect("body");
        assert_eq!(text, r#"{"error":{"message":"rate limited"}}"#);
    }

    #[tokio::test]
    async fn test_bearer_header_attached_and_body_forwarded_verbatim() {
        let captured = Arc::new(Mutex::new(None::<(Option<String>, String)>));
        let capture = captured.clone();
        let upstream = Router::new().route(
            "/v1/chat/completions",
            post(move |headers: HeaderMap, body: String| {
                let capture = capture.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(|v| v.to_string());
                    *capture.lock().expect("lock") = Some((auth, body));
                    r#"{"choices":[{"message":{"content":"ok"}}]}"#
                }
            }),
        );
        let upstream_url = spawn_stub(upstream).await;
        let relay_url = spawn_relay(test_config(Some("secret-key"), &upstream_url)).await;

        // 故意畸形的 body：中继不得校验或改写
        let raw_body = r#"{"model":"m","messages":"oops""#;
        let resp = reqwest::Client::new()
            .post(format!("{}/api/chat", relay_url))
            .body(raw_body)
            .send()
            .await
            .expect("post");
        assert_eq!(resp.status().as_u16(), 200);

        let (auth, body) = captured
            .lock()
            .expect("lock")
            .clone()
            .expect("upstream captured request");
        assert_eq!(auth.as_deref(), Some("Bearer secret-key"));
        assert_eq!(body, raw_body);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_reports_proxy_error() {
        let upstream_url = unreachable_url().await;
        let relay_url = spawn_relay(test_config(Some("secret"), &upstream_url)).await;

        let resp = reqwest::Client::new()
            .post(format!("{}/api/chat", relay_url))
            .body(r#"{"model":"m","messages":[],"temperature":0.3}"#)
            .send()
            .await
            .expect("post");
        assert_eq!(resp.status().as_u16(), 500);
        let body: Value = resp.json().await.expect("json body");
        assert_eq!(body["error"], "Proxy error");
        assert!(!body["details"].as_str().expect("details").is_empty());
    }

    #[tokio::test]
    async fn test_non_api_paths_serve_spa_entry_document() {
        let ui_dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            ui_dir.path().join("index.html"),
            "<!doctype html><title>FloodMate</title>",
        )
        .expect("write index");

        let upstream_url = unreachable_url().await;
        let mut config = test_config(Some("secret"), &upstream_url);
        config.ui_dir = ui_dir.path().to_string_lossy().to_string();
        let relay_url = spawn_relay(config).await;

        for path in ["/", "/assistant", "/quiz/flood"] {
            let resp = reqwest::get(format!("{}{}", relay_url, path))
                .await
                .expect("get");
            assert_eq!(resp.status().as_u16(), 200, "path {}", path);
            let text = resp.text().await.expect("body");
            assert!(text.contains("FloodMate"), "path {}", path);
        }
    }
}
