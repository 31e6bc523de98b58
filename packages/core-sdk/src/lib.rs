pub mod client;
pub mod config;
pub mod models;
pub mod server;
pub mod storage;
pub mod telemetry;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::client;
    pub use crate::config;
    pub use crate::models;
    pub use crate::server;
    pub use crate::storage;
    pub use crate::telemetry;
}
