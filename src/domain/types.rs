// ==========================================
// 经销商库存同步系统 - 领域类型定义
// ==========================================
// 职责: 库存状态 / 文件处理状态等枚举
// 序列化格式: 小写 (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 库存状态 (Stock Status)
// ==========================================
// 新导入的库存默认 blocked，确认由外部协作方完成
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockStatus {
    #[default]
    Blocked,   // 冻结（未确认收货）
    Confirmed, // 已确认
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::Blocked => "blocked",
            StockStatus::Confirmed => "confirmed",
        }
    }

    /// 解析上游状态文本
    ///
    /// 只有明确的 confirmed 才视为已确认，其余一律 blocked
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("confirmed") {
            StockStatus::Confirmed
        } else {
            StockStatus::Blocked
        }
    }
}

impl fmt::Display for StockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 文件处理状态 (Processed File Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessedFileStatus {
    Success, // 全部行处理无错误
    Partial, // 部分导入、部分出错
    Failed,  // 无导入且出错 / 整批失败
}

impl ProcessedFileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessedFileStatus::Success => "success",
            ProcessedFileStatus::Partial => "partial",
            ProcessedFileStatus::Failed => "failed",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "success" => ProcessedFileStatus::Success,
            "partial" => ProcessedFileStatus::Partial,
            _ => ProcessedFileStatus::Failed,
        }
    }

    /// 根据导入统计推导文件最终状态
    ///
    /// - errored == 0 → success
    /// - imported > 0 且 errored > 0 → partial
    /// - imported == 0 且 errored > 0 → failed
    pub fn from_counts(imported: usize, errored: usize) -> Self {
        match (imported, errored) {
            (_, 0) => ProcessedFileStatus::Success,
            (0, _) => ProcessedFileStatus::Failed,
            _ => ProcessedFileStatus::Partial,
        }
    }

    /// 是否视为"已导入"（轮询时不再重复处理）
    pub fn counts_as_imported(&self) -> bool {
        matches!(self, ProcessedFileStatus::Success | ProcessedFileStatus::Partial)
    }
}

impl fmt::Display for ProcessedFileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
