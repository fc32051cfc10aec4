// ==========================================
// 经销商库存同步系统 - 同步驱动层
// ==========================================
// 职责: 推送触发导入 + 定时轮询导入，共享同一条单文件流水线
// 依赖: remote（下载）+ importer（抽取/导入）+ repository（台账）
// ==========================================

pub mod event_importer;
pub mod pipeline;
pub mod scheduler;

use crate::importer::ImportError;
use crate::remote::RemoteError;
use crate::repository::RepositoryError;
use thiserror::Error;

pub use event_importer::{EventImporter, FileOutcome};
pub use pipeline::{
    ingest_in_background, normalize_file_path, FileNotification, ImportPipeline, NO_ROWS_MESSAGE,
};
pub use scheduler::{CycleReport, PollingScheduler, SchedulerStatus};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("后台任务执行失败: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

pub type SyncResult<T> = Result<T, SyncError>;
