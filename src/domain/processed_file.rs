// ==========================================
// 经销商库存同步系统 - 已处理文件台账
// ==========================================
// 红线: 每个文件路径最多一条 success 记录；success 后重复处理为空操作
// 对齐: processed_file 表（主键 file_path）
// ==========================================

use crate::domain::types::ProcessedFileStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedFile {
    pub file_path: String,
    pub file_id: Option<String>,
    pub file_size: Option<i64>,
    pub imported_count: i64,
    pub skipped_count: i64,
    pub errored_count: i64,
    pub status: ProcessedFileStatus,
    pub error_message: Option<String>,
    pub batch_id: Option<String>,
    pub processed_at: DateTime<Utc>,
}

impl ProcessedFile {
    /// 构造一条失败记录（无导入统计）
    pub fn failed(file_path: &str, file_size: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            file_path: file_path.to_string(),
            file_id: None,
            file_size,
            imported_count: 0,
            skipped_count: 0,
            errored_count: 0,
            status: ProcessedFileStatus::Failed,
            error_message: Some(message.into()),
            batch_id: None,
            processed_at: Utc::now(),
        }
    }
}
