/** \brief 上游聊天补全服务的默认基地址（Groq 的 OpenAI 兼容端点）。 */
pub const DEFAULT_API_BASE: &str = "https://api.groq.com/openai";
/** \brief 中继服务默认地址。 */
pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:5174";
/** \brief 默认模型名。 */
pub const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";
/** \brief 默认采样温度。 */
pub const DEFAULT_TEMPERATURE: f32 = 0.3;
/** \brief 默认监听端口。 */
pub const DEFAULT_PORT: u16 = 5174;

/**
 * \brief 中继服务配置：进程启动时构造一次，之后只读传递。
 */
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /** \brief 服务端持有的上游密钥；缺失时中继返回配置错误而非崩溃。 */
    pub api_key: Option<String>,
    /** \brief 上游 API 基地址。 */
    pub api_base: String,
    /** \brief 静态前端目录。 */
    pub ui_dir: String,
    /** \brief 静态前端兜底目录。 */
    pub ui_fallback_dir: String,
}

impl RelayConfig {
    /**
     * \brief 从进程环境读取配置。密钥只在这里读取一次，绝不回传给客户端。
     */
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("GROQ_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            api_base: std::env::var("FLOODMATE_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            ui_dir: std::env::var("FLOODMATE_UI_DIR").unwrap_or_else(|_| "dist".to_string()),
            ui_fallback_dir: std::env::var("FLOODMATE_UI_FALLBACK")
                .unwrap_or_else(|_| "web".to_string()),
        }
    }
}

/**
 * \brief 会话客户端配置。
 */
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /** \brief 中继地址（部署约定，不做协商）。 */
    pub relay_url: String,
    /** \brief 直连上游时的 API 基地址。 */
    pub api_base: String,
    /** \brief 模型名 */
    pub model: String,
    /** \brief 采样温度 */
    pub temperature: f32,
    /** \brief 构建期注入的密钥兜底（本地存储优先）。 */
    pub default_api_key: Option<String>,
}

impl AssistantConfig {
    pub fn from_env() -> Self {
        Self {
            relay_url: std::env::var("FLOODMATE_RELAY_URL")
                .unwrap_or_else(|_| DEFAULT_RELAY_URL.to_string()),
            api_base: std::env::var("FLOODMATE_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            default_api_key: std::env::var("FLOODMATE_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
        }
    }
}

/**
 * \brief 读取监听端口（PORT 环境变量，默认 5174）。
 */
pub fn port_from_env() -> u16 {
    std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}
