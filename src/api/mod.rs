//! Outbound WeCom server API: access tokens and message sending.

pub mod token;
pub mod types;

pub use token::TokenCache;
pub use types::{OutboundKind, SendReceipt, SendRequest};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::error::ApiError;

/// Delivers outbound messages to platform users.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, request: SendRequest) -> Result<SendReceipt, ApiError>;
}

/// HTTP client for the platform's `message/send` endpoint.
pub struct WecomClient {
    http: reqwest::Client,
    api_base: String,
    agent_id: Option<i64>,
    tokens: Arc<TokenCache>,
}

impl WecomClient {
    pub fn new(config: &GatewayConfig, http: reqwest::Client, tokens: Arc<TokenCache>) -> Self {
        let agent_id = config.agent_id.parse().ok();
        if agent_id.is_none() && !config.agent_id.is_empty() {
            warn!(agent_id = %config.agent_id, "WECOM_AGENT_ID is not an integer");
        }

        Self {
            http,
            api_base: config.api_base.clone(),
            agent_id,
            tokens,
        }
    }

    /// Send a message; a single attempt, no retry.
    pub async fn send_message(&self, request: &SendRequest) -> Result<SendReceipt, ApiError> {
        let access_token = self.tokens.get_token().await?;

        let receipt: SendReceipt = self
            .http
            .post(format!("{}/cgi-bin/message/send", self.api_base))
            .query(&[("access_token", access_token.as_str())])
            .json(&request.payload(self.agent_id))
            .send()
            .await?
            .json()
            .await?;

        if receipt.errcode != 0 {
            warn!(
                errcode = receipt.errcode,
                errmsg = %receipt.errmsg,
                to_user = ?request.to_user,
                "Platform rejected message"
            );
            return Err(ApiError::Send {
                errcode: receipt.errcode,
                errmsg: receipt.errmsg,
            });
        }

        info!(
            to_user = ?request.to_user,
            msg_type = request.msg_type.as_str(),
            "Message sent"
        );
        Ok(receipt)
    }
}

#[async_trait]
impl MessageSender for WecomClient {
    async fn send(&self, request: SendRequest) -> Result<SendReceipt, ApiError> {
        self.send_message(&request).await
    }
}
