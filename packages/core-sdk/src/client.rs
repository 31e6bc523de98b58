use anyhow::{anyhow, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use rusqlite::Connection;
use serde_json::Value;

use crate::{
    config::AssistantConfig,
    models::{ChatRequest, Message},
    storage, telemetry,
};

/** \brief 固定的 system 首条消息，会话创建后不再改动。 */
pub const SYSTEM_PROMPT: &str = "You are FloodAssistant, a helpful safety guide for flood preparedness and response in schools and communities. Provide clear, actionable guidance, cite standard best practices (NDMA/WHO where relevant), and keep answers concise with bullet points. Do not provide legal or medical advice; instead suggest consulting authorities when needed.";

/** \brief 回复形状不符合预期时替换的固定致歉文案。 */
pub const FALLBACK_REPLY: &str = "Sorry, I could not generate a response.";

/**
 * \brief 发送状态机。
 * \details 转移表：
 *   Idle --begin_send(非空)--> SendingPrimary
 *   SendingPrimary --complete--> Idle
 *   SendingPrimary --primary_failed(有密钥)--> SendingFallback
 *   SendingPrimary --primary_failed(无密钥，追加提示消息)--> Idle
 *   SendingFallback --complete--> Idle
 *   SendingFallback --fallback_failed(追加提示消息)--> Idle
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Idle,
    SendingPrimary,
    SendingFallback,
}

/**
 * \brief 会话历史：只追加，首条永远是 system 消息。
 * \details 纯状态转移，不做任何网络 I/O，便于用注入的结果做单元测试。
 */
#[derive(Debug)]
pub struct Conversation {
    messages: Vec<Message>,
    state: SendState,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            messages: vec![Message::system(SYSTEM_PROMPT)],
            state: SendState::Idle,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    /**
     * \brief 开始一轮发送：追加用户消息并进入 SendingPrimary。
     * \return 空白输入或当前不在 Idle 时返回 false，历史不变。
     */
    pub fn begin_send(&mut self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() || self.state != SendState::Idle {
            return false;
        }
        self.messages.push(Message::user(trimmed));
        self.state = SendState::SendingPrimary;
        true
    }

    /**
     * \brief 任一路径成功：追加助手回复并回到 Idle。
     */
    pub fn complete(&mut self, reply: String) {
        self.messages.push(Message::assistant(reply));
        self.state = SendState::Idle;
    }

    /**
     * \brief 主路径（中继）失败。
     * \return true 表示已进入 SendingFallback，调用方应发起直连；
     *         false 表示无可用密钥，已追加提示消息并回到 Idle。
     */
    pub fn primary_failed(&mut self, has_key: bool, err: &str) -> bool {
        if has_key {
            self.state = SendState::SendingFallback;
            return true;
        }
        self.messages.push(Message::assistant(format!(
            "Assistant error. Start the relay with `floodmate serve` or set an API key.\n{}",
            err
        )));
        self.state = SendState::Idle;
        false
    }

    /**
     * \brief 直连兜底也失败：追加提示消息并回到 Idle。
     */
    pub fn fallback_failed(&mut self, err: &str) {
        self.messages.push(Message::assistant(format!(
            "Assistant error. Make sure the relay is running (`floodmate serve`) or set a valid API key.\n{}",
            err
        )));
        self.state = SendState::Idle;
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/**
 * \brief 会话客户端：持有历史、可选密钥与两段式发送逻辑。
 * \details 每轮最多两次串行网络调用：先走中继，失败后才用本地密钥直连。
 */
pub struct Assistant {
    client: reqwest::Client,
    config: AssistantConfig,
    conversation: Conversation,
    api_key: Option<String>,
}

impl Assistant {
    /**
     * \brief 用给定配置与已读出的本地密钥构造客户端。
     * \details 密钥优先级：本地存储 > 配置注入的兜底；两者都缺失不算错误，
     *          只是直连路径不可用。
     */
    pub fn new(config: AssistantConfig, stored_key: Option<String>) -> Self {
        let api_key = stored_key
            .filter(|k| !k.is_empty())
            .or_else(|| config.default_api_key.clone());
        Self {
            client: reqwest::Client::new(),
            config,
            conversation: Conversation::new(),
            api_key,
        }
    }

    /**
     * \brief 从本地存储读取密钥并构造客户端。
     */
    pub fn load(config: AssistantConfig, conn: &Connection) -> Result<Self> {
        let stored = storage::get_api_key(conn)?;
        Ok(Self::new(config, stored))
    }

    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /**
     * \brief 覆写密钥并同步落盘；对进行中的请求无影响，下轮发送生效。
     */
    pub fn set_api_key(&mut self, conn: &Connection, value: &str) -> Result<()> {
        storage::set_api_key(conn, value)?;
        self.api_key = Some(value.to_string()).filter(|k| !k.is_empty());
        Ok(())
    }

    /**
     * \brief 发送一条用户消息：中继优先，失败后直连兜底。
     * \return 本轮新追加的最后一条消息（助手回复或提示消息）；
     *         空白输入为 no-op，返回 None。
     */
    pub async fn send_message(&mut self, text: &str) -> Result<Option<&Message>> {
        if !self.conversation.begin_send(text) {
            return Ok(None);
        }
        let payload = ChatRequest {
            model: self.config.model.clone(),
            messages: self.conversation.messages().to_vec(),
            temperature: self.config.temperature,
        };
        telemetry::log_event(
            "client.chat",
            &format!(
                "send history={} prompt_len={}",
                payload.messages.len(),
                text.trim().len()
            ),
        );

        match self.call_relay(&payload).await {
            Ok(reply) => self.conversation.complete(reply),
            Err(primary_err) => {
                telemetry::log_error("client.chat", &format!("relay failed: {}", primary_err));
                let has_key = self.api_key.is_some();
                if self
                    .conversation
                    .primary_failed(has_key, &primary_err.to_string())
                {
                    let key = self.api_key.clone().unwrap_or_default();
                    match self.call_upstream(&payload, &key).await {
                        Ok(reply) => self.conversation.complete(reply),
                        Err(direct_err) => {
                            telemetry::log_error(
                                "client.chat",
                                &format!("direct call failed: {}", direct_err),
                            );
                            self.conversation.fallback_failed(&direct_err.to_string());
                        }
                    }
                }
            }
        }
        Ok(self.conversation.messages().last())
    }

    /** \brief 主路径：把完整历史交给中继，密钥留在服务端。 */
    async fn call_relay(&self, payload: &ChatRequest) -> Result<String> {
        let url = format!("{}/api/chat", self.config.relay_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .json(payload)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("relay request failed: {} -> {}", status, text));
        }
        let v: Value = resp.json().await?;
        Ok(extract_reply(&v))
    }

    /** \brief 兜底路径：同一负载直连上游，用本地密钥做 Bearer 认证。 */
    async fn call_upstream(&self, payload: &ChatRequest, api_key: &str) -> Result<String> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.api_base.trim_end_matches('/')
        );
        let resp = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", api_key))
            .json(payload)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("direct request failed: {} -> {}", status, text));
        }
        let v: Value = resp.json().await?;
        Ok(extract_reply(&v))
    }
}

/**
 * \brief 宽松解析上游回复：取 choices[0].message.content，形状不符时用固定致歉文案。
 */
fn extract_reply(v: &Value) -> String {
    v.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| FALLBACK_REPLY.to_string())
}
