// ==========================================
// 经销商库存同步系统 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 约定: 行级问题不走错误通道（计入 ImportSummary），
//       只有文件级/批次级问题才返回 ImportError
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("文件格式不支持: {0}（支持 csv/tsv/txt/xlsx/xlsm/xlsb/xls/ods）")]
    UnsupportedFormat(String),

    #[error("Excel 解析失败: {0}")]
    ExcelParseError(String),

    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),

    #[error("文本编码无法识别: {0}")]
    EncodingError(String),

    // ===== 批次错误 =====
    #[error("批次提交失败（已回滚 {attempted} 行）: {message}")]
    BatchCommitFailed { attempted: usize, message: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        ImportError::Repository(RepositoryError::from(err))
    }
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvParseError(err.to_string())
    }
}

impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::ExcelParseError(err.to_string())
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
