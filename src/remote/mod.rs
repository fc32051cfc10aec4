// ==========================================
// 经销商库存同步系统 - 远程文档库
// ==========================================
// 职责: 令牌获取、站点/文件夹解析、文件列表与下载
// 约定: 固定超时，不内置重试
// ==========================================

pub mod connector;
pub mod error;
pub mod models;
pub mod token;

pub use connector::{folder_path_variants, GraphDriveConnector, RemoteFileSource};
pub use error::{RemoteError, RemoteResult};
pub use models::RemoteFile;
pub use token::{ClientCredentialsTokenProvider, StaticTokenProvider, TokenProvider};
