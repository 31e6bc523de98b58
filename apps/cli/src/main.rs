use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use floodmate_core_sdk::{
    client::Assistant,
    config::{self, AssistantConfig, RelayConfig},
    storage, telemetry,
};

/**
 * \brief CLI 程序入口：中继服务与安全助手会话的统一外壳。
 */
#[derive(Parser, Debug)]
#[command(name = "floodmate", version, about = "FloodMate safety assistant relay & chat")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 初始化本地配置：保存 API 密钥与遥测开关。
     */
    Init {
        #[arg(long)]
        api_key: String,
        #[arg(long, default_value_t = false)]
        enable_telemetry: bool,
    },

    /**
     * \brief 覆写本地保存的 API 密钥（下一轮发送生效）。
     */
    SetKey {
        #[arg(long)]
        api_key: String,
    },

    /**
     * \brief 与安全助手对话：给出 --prompt 则单轮，否则进入逐行交互。
     */
    Chat {
        #[arg(long)]
        prompt: Option<String>,
    },

    /**
     * \brief 启动中继服务（隔离密钥并托管静态前端）。
     */
    Serve {
        #[arg(long)]
        addr: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let conn = storage::open_default_store().context("open local store failed")?;
    storage::migrate(&conn).context("apply migrations failed")?;
    telemetry::set_enabled(storage::get_telemetry_enabled(&conn).unwrap_or(false));

    match cli.command {
        Commands::Init {
            api_key,
            enable_telemetry,
        } => {
            storage::set_api_key(&conn, &api_key).context("save api key failed")?;
            storage::set_telemetry_enabled(&conn, enable_telemetry)
                .context("save telemetry failed")?;
            telemetry::set_enabled(enable_telemetry);
            println!(
                "Saved API key {} (telemetry {})",
                mask_key(&api_key),
                if enable_telemetry { "on" } else { "off" }
            );
        }
        Commands::SetKey { api_key } => {
            storage::set_api_key(&conn, &api_key).context("save api key failed")?;
            println!("Saved API key {}", mask_key(&api_key));
        }
        Commands::Chat { prompt } => {
            let assistant_config = AssistantConfig::from_env();
            let mut assistant =
                Assistant::load(assistant_config, &conn).context("load assistant failed")?;

            match prompt {
                Some(text) => {
                    send_and_print(&mut assistant, &text).await?;
                }
                None => {
                    println!("FloodMate assistant. Empty line is ignored, `exit` quits.");
                    let stdin = std::io::stdin();
                    loop {
                        print!("you> ");
                        std::io::stdout().flush().ok();
                        let mut line = String::new();
                        if stdin.lock().read_line(&mut line).context("read input")? == 0 {
                            break;
                        }
                        let line = line.trim();
                        if line == "exit" || line == "quit" {
                            break;
                        }
                        send_and_print(&mut assistant, line).await?;
                    }
                }
            }
        }
        Commands::Serve { addr } => {
            let addr =
                addr.unwrap_or_else(|| format!("127.0.0.1:{}", config::port_from_env()));
            let relay_config = RelayConfig::from_env();
            if relay_config.api_key.is_none() {
                eprintln!("warning: GROQ_API_KEY not set, /api/chat will answer with a configuration error");
            }
            telemetry::log_event("cli.serve", &format!("addr={}", addr));
            floodmate_core_sdk::server::run(&addr, relay_config).await?;
        }
    }

    Ok(())
}

async fn send_and_print(assistant: &mut Assistant, text: &str) -> Result<()> {
    telemetry::log_event("cli.chat", &format!("prompt_len={}", text.trim().len()));
    if let Some(reply) = assistant.send_message(text).await.context("send failed")? {
        println!("{}", reply.content);
    }
    Ok(())
}

/** \brief 按原前端的样式打码展示密钥：前四个字符 + 后四个字符。 */
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "••••".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}••••{}", head, tail)
}
