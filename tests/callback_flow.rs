//! End-to-end callback flow.
//!
//! A real gateway server talks to a fake platform API; the AI backend is a
//! stub that can be held back to prove the callback is acknowledged before
//! the answer exists.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::time::timeout;

use wecom_gateway::api::{MessageSender, TokenCache, WecomClient};
use wecom_gateway::crypto::WecomCrypto;
use wecom_gateway::dispatcher::{Dispatcher, DispatcherConfig};
use wecom_gateway::error::LlmError;
use wecom_gateway::llm::{ChatMessage, LlmProvider};
use wecom_gateway::routes::{AppState, gateway_routes};

use common::{CORP_ID, FakePlatform, PlatformBehavior, TEST_TIMEOUT, gateway_config, start_platform};

/// Answers after `gate` is opened.
struct GatedLlm {
    gate: Arc<Notify>,
}

fn stub_answer(query: &str) -> String {
    format!("stub answer to: {query}")
}

#[async_trait]
impl LlmProvider for GatedLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(
        &self,
        _system_prompt: &str,
        messages: &[ChatMessage],
    ) -> Result<String, LlmError> {
        self.gate.notified().await;
        Ok(stub_answer(&messages[0].content))
    }
}

struct Gateway {
    base_url: String,
    crypto: Arc<WecomCrypto>,
    platform: FakePlatform,
    gate: Arc<Notify>,
    http: reqwest::Client,
}

/// Start a fake platform and a gateway wired to it.
async fn start_gateway() -> Gateway {
    let platform = start_platform(PlatformBehavior::default()).await;
    let config = gateway_config(&platform.base_url);

    let crypto = Arc::new(WecomCrypto::new(&config).unwrap());
    let tokens = Arc::new(TokenCache::new(&config, reqwest::Client::new()));
    let sender: Arc<dyn MessageSender> =
        Arc::new(WecomClient::new(&config, reqwest::Client::new(), tokens));
    let gate = Arc::new(Notify::new());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&sender),
        Arc::new(GatedLlm {
            gate: Arc::clone(&gate),
        }),
        DispatcherConfig::default(),
    ));

    let app = gateway_routes(AppState {
        crypto: Arc::clone(&crypto),
        dispatcher,
        sender,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Gateway {
        base_url: format!("http://127.0.0.1:{port}"),
        crypto,
        platform,
        gate,
        http: reqwest::Client::new(),
    }
}

fn text_message(from: &str, content: &str) -> String {
    format!(
        "<xml><ToUserName><![CDATA[{CORP_ID}]]></ToUserName>\
         <FromUserName><![CDATA[{from}]]></FromUserName>\
         <CreateTime>1409659813</CreateTime>\
         <MsgType><![CDATA[text]]></MsgType>\
         <Content><![CDATA[{content}]]></Content>\
         <MsgId>4561255354251345929</MsgId>\
         <AgentID>1000002</AgentID></xml>"
    )
}

impl Gateway {
    /// POST an encrypted callback; returns (status, body).
    async fn post_callback(&self, plain_xml: &str, sign: bool) -> (u16, String) {
        let encrypted = self.crypto.encrypt(plain_xml).unwrap();
        let signature = if sign {
            self.crypto.build_signature("1409659813", "263014780", &encrypted)
        } else {
            "0".repeat(40)
        };
        let body = format!(
            "<xml><ToUserName><![CDATA[{CORP_ID}]]></ToUserName>\
             <Encrypt><![CDATA[{encrypted}]]></Encrypt>\
             <AgentID><![CDATA[1000002]]></AgentID></xml>"
        );

        let response = self
            .http
            .post(format!("{}/callback", self.base_url))
            .query(&[
                ("msg_signature", signature.as_str()),
                ("timestamp", "1409659813"),
                ("nonce", "263014780"),
            ])
            .body(body)
            .send()
            .await
            .unwrap();
        (response.status().as_u16(), response.text().await.unwrap())
    }
}

// ── Message callbacks ────────────────────────────────────────────────

#[tokio::test]
async fn triggered_text_is_acknowledged_then_answered() {
    timeout(TEST_TIMEOUT, async {
        let gw = start_gateway().await;

        let (status, body) = gw.post_callback(&text_message("zhangsan", "@AI hello"), true).await;
        assert_eq!(status, 200);
        assert_eq!(body, "success");

        // The processing notice goes out while the AI call is still pending.
        let sends = gw.platform.wait_for_sends(1).await;
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].body["touser"], "zhangsan");
        assert_eq!(sends[0].body["msgtype"], "text");

        gw.gate.notify_one();

        let sends = gw.platform.wait_for_sends(2).await;
        let replies: Vec<_> = sends
            .iter()
            .filter(|s| s.body["text"]["content"] == stub_answer("hello").as_str())
            .collect();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].body["msgtype"], "text");
        assert_eq!(replies[0].body["touser"], "zhangsan");
        assert_eq!(replies[0].body["agentid"], 1000002);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn untriggered_text_gets_help_without_ai() {
    timeout(TEST_TIMEOUT, async {
        let gw = start_gateway().await;

        let (status, body) = gw.post_callback(&text_message("lisi", "hello"), true).await;
        assert_eq!((status, body.as_str()), (200, "success"));

        let sends = gw.platform.wait_for_sends(1).await;
        let content = sends[0].body["text"]["content"].as_str().unwrap();
        assert!(content.contains("@AI"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn forged_callback_is_acknowledged_and_dropped() {
    timeout(TEST_TIMEOUT, async {
        let gw = start_gateway().await;

        let (status, body) = gw.post_callback(&text_message("mallory", "@AI hi"), false).await;
        assert_eq!((status, body.as_str()), (200, "success"));

        gw.gate.notify_one();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(gw.platform.sends().is_empty());
        assert_eq!(gw.platform.token_calls(), 0);
    })
    .await
    .expect("test timed out");
}

// ── URL verification ─────────────────────────────────────────────────

#[tokio::test]
async fn url_verification_round_trip() {
    timeout(TEST_TIMEOUT, async {
        let gw = start_gateway().await;
        let echostr = gw.crypto.encrypt("6732154870581546317").unwrap();
        let signature = gw.crypto.build_signature("1409659589", "263014780", &echostr);

        let verify = |signature: String| {
            gw.http
                .get(format!("{}/callback", gw.base_url))
                .query(&[
                    ("msg_signature", signature),
                    ("timestamp", "1409659589".to_string()),
                    ("nonce", "263014780".to_string()),
                    ("echostr", echostr.clone()),
                ])
                .send()
        };

        let ok = verify(signature).await.unwrap();
        assert_eq!(ok.status().as_u16(), 200);
        assert_eq!(ok.text().await.unwrap(), "6732154870581546317");

        let forged = verify("0".repeat(40)).await.unwrap();
        assert_eq!(forged.status().as_u16(), 403);
    })
    .await
    .expect("test timed out");
}

// ── Health and send ──────────────────────────────────────────────────

#[tokio::test]
async fn health_and_send_endpoints() {
    timeout(TEST_TIMEOUT, async {
        let gw = start_gateway().await;

        let health: serde_json::Value = gw
            .http
            .get(format!("{}/health", gw.base_url))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ready");
        assert_eq!(health["corpId"], "wx58****");

        let sent: serde_json::Value = gw
            .http
            .post(format!("{}/send", gw.base_url))
            .json(&serde_json::json!({
                "toParty": "3",
                "msgType": "textcard",
                "content": "Deploy finished",
                "url": "https://ci.example/run/1",
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(sent["success"], true);
        assert_eq!(sent["msgid"], "msg-1");

        let sends = gw.platform.sends();
        assert_eq!(sends.len(), 1);
        let body = &sends[0].body;
        assert_eq!(body["touser"], "@all");
        assert_eq!(body["toparty"], "3");
        assert_eq!(body["textcard"]["description"], "Deploy finished");
        assert_eq!(body["textcard"]["url"], "https://ci.example/run/1");
    })
    .await
    .expect("test timed out");
}
