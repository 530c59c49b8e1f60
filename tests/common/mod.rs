//! Shared fixtures: a fake WeCom platform API and gateway configuration.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use wecom_gateway::config::GatewayConfig;

/// Maximum time any test is allowed to run before we consider it hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub const ENCODING_AES_KEY: &str = "jWmYm7qr5nMoAUwZRjGtBxmz3KA1tkAj3ykkR6q2B2C";
pub const CORP_ID: &str = "wx5823bf96d3bd56c7";
pub const TOKEN: &str = "QDG6eK";
pub const AGENT_ID: &str = "1000002";
pub const SECRET: &str = "app-secret";

/// How the fake platform answers.
#[derive(Debug, Clone)]
pub struct PlatformBehavior {
    pub expires_in: i64,
    pub token_errcode: i64,
    pub send_errcode: i64,
}

impl Default for PlatformBehavior {
    fn default() -> Self {
        Self {
            expires_in: 7200,
            token_errcode: 0,
            send_errcode: 0,
        }
    }
}

/// A message the fake platform accepted on `message/send`.
#[derive(Debug, Clone)]
pub struct RecordedSend {
    pub access_token: String,
    pub body: Value,
}

#[derive(Default)]
struct Recorder {
    behavior: PlatformBehavior,
    token_calls: AtomicUsize,
    credentials: Mutex<Vec<(String, String)>>,
    sends: Mutex<Vec<RecordedSend>>,
}

/// Handle to a running fake platform.
#[derive(Clone)]
pub struct FakePlatform {
    pub base_url: String,
    recorder: Arc<Recorder>,
}

impl FakePlatform {
    pub fn token_calls(&self) -> usize {
        self.recorder.token_calls.load(Ordering::SeqCst)
    }

    /// `(corpid, corpsecret)` pairs seen on `gettoken`.
    pub fn credentials(&self) -> Vec<(String, String)> {
        self.recorder.credentials.lock().unwrap().clone()
    }

    pub fn sends(&self) -> Vec<RecordedSend> {
        self.recorder.sends.lock().unwrap().clone()
    }

    /// Poll until at least `count` sends arrived.
    pub async fn wait_for_sends(&self, count: usize) -> Vec<RecordedSend> {
        loop {
            let sends = self.sends();
            if sends.len() >= count {
                return sends;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn get_token(
    State(recorder): State<Arc<Recorder>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let call = recorder.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
    recorder.credentials.lock().unwrap().push((
        params.get("corpid").cloned().unwrap_or_default(),
        params.get("corpsecret").cloned().unwrap_or_default(),
    ));

    let behavior = &recorder.behavior;
    if behavior.token_errcode != 0 {
        return Json(json!({ "errcode": behavior.token_errcode, "errmsg": "invalid credential" }));
    }

    Json(json!({
        "errcode": 0,
        "errmsg": "ok",
        "access_token": format!("token-{call}"),
        "expires_in": behavior.expires_in,
    }))
}

async fn send_message(
    State(recorder): State<Arc<Recorder>>,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    recorder.sends.lock().unwrap().push(RecordedSend {
        access_token: params.get("access_token").cloned().unwrap_or_default(),
        body,
    });

    let errcode = recorder.behavior.send_errcode;
    if errcode != 0 {
        return Json(json!({ "errcode": errcode, "errmsg": "invalid user" }));
    }
    Json(json!({ "errcode": 0, "errmsg": "ok", "invaliduser": "", "msgid": "msg-1" }))
}

/// Start a fake platform API on a random port.
pub async fn start_platform(behavior: PlatformBehavior) -> FakePlatform {
    let recorder = Arc::new(Recorder {
        behavior,
        ..Recorder::default()
    });
    let app = Router::new()
        .route("/cgi-bin/gettoken", get(get_token))
        .route("/cgi-bin/message/send", post(send_message))
        .with_state(Arc::clone(&recorder));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakePlatform {
        base_url: format!("http://127.0.0.1:{port}"),
        recorder,
    }
}

/// A fully configured gateway pointed at `api_base`.
pub fn gateway_config(api_base: &str) -> GatewayConfig {
    GatewayConfig {
        corp_id: CORP_ID.to_string(),
        token: TOKEN.to_string(),
        encoding_aes_key: SecretString::from(ENCODING_AES_KEY),
        agent_id: AGENT_ID.to_string(),
        secret: SecretString::from(SECRET),
        api_base: api_base.to_string(),
        ..GatewayConfig::default()
    }
}
