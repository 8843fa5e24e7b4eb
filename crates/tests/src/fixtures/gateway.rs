use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
};
use courier_config::{EmailSettings, SmsSettings, WebsocketSettings};
use serde_json::Value;
use tokio::net::TcpListener;

/// One request as seen by the fake gateway.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub headers: HeaderMap,
    pub body: Value,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Clone)]
struct GatewayState {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    script: Arc<Mutex<VecDeque<(StatusCode, Value)>>>,
    fallback: Arc<(StatusCode, Value)>,
}

/// HTTP stand-in for the email, realtime and SMS gateways. Answers from a
/// script of responses, then from the fallback once the script runs out.
pub struct FakeGateway {
    pub base_url: String,
    state: GatewayState,
}

impl FakeGateway {
    pub async fn spawn(fallback_status: StatusCode, fallback_body: Value) -> Self {
        let state = GatewayState {
            requests: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Arc::new((fallback_status, fallback_body)),
        };
        let app = Router::new().fallback(handle).with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    /// Gateway that accepts every email with `messageId = message_id`.
    pub async fn email_ok(message_id: &str) -> Self {
        Self::spawn(
            StatusCode::OK,
            serde_json::json!({
                "success": true,
                "data": { "messageId": message_id, "provider": "fake" },
            }),
        )
        .await
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Queues one response ahead of the fallback.
    pub fn then(&self, status: StatusCode, body: Value) -> &Self {
        self.state.script.lock().unwrap().push_back((status, body));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }
}

async fn handle(
    State(state): State<GatewayState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
    state.requests.lock().unwrap().push(RecordedRequest {
        path: uri.path().to_string(),
        headers,
        body,
    });
    let (status, body) = state
        .script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| (state.fallback.0, state.fallback.1.clone()));
    (status, Json(body))
}

pub fn email_settings(gateway: &FakeGateway) -> EmailSettings {
    EmailSettings {
        service_url: Some(gateway.base_url.clone()),
        api_key: "email-key".to_string(),
        timeout_ms: 2000,
        retries: 0,
        retry_delay_ms: 1,
    }
}

pub fn websocket_settings(gateway: &FakeGateway) -> WebsocketSettings {
    WebsocketSettings {
        host: gateway.base_url.clone(),
        notify_endpoint: "/api/notify".to_string(),
        secret: "s3cret".to_string(),
        timeout_ms: 2000,
        retries: 0,
    }
}

pub fn sms_settings(gateway: &FakeGateway) -> SmsSettings {
    SmsSettings {
        enabled: true,
        gateway_url: Some(gateway.url("/sms")),
        api_key: "sms-key".to_string(),
        timeout_ms: 2000,
    }
}
