use serde::{Deserialize, Serialize};

/** \brief 系统角色。 */
pub const ROLE_SYSTEM: &str = "system";
/** \brief 用户角色。 */
pub const ROLE_USER: &str = "user";
/** \brief 助手角色。 */
pub const ROLE_ASSISTANT: &str = "assistant";

/**
 * \brief 消息结构，与 OpenAI Chat 消息格式对齐。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /** \brief 角色：system/user/assistant */
    pub role: String,
    /** \brief 内容 */
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ROLE_SYSTEM.to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ROLE_USER.to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ROLE_ASSISTANT.to_string(),
            content: content.into(),
        }
    }
}

/**
 * \brief 中继与上游共用的请求负载。
 * \details 客户端发给中继的 JSON 与中继转发给上游的 JSON 形状完全一致。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /** \brief 模型名 */
    pub model: String,
    /** \brief 完整历史（含 system 首条） */
    pub messages: Vec<Message>,
    /** \brief 采样温度 */
    pub temperature: f32,
}
