// ==========================================
// 经销商库存同步系统 - 推送触发导入
// ==========================================
// 流程: 台账检查 → 下载 → 流水线（阻塞线程池）
// 规则:
//   - 台账 success 的路径直接返回，不下载
//   - 下载为空不写台账，由上游重新推送
// ==========================================

use crate::domain::processed_file::ProcessedFile;
use crate::domain::types::ProcessedFileStatus;
use crate::remote::RemoteFileSource;
use crate::sync::pipeline::{ingest_in_background, FileNotification, ImportPipeline};
use crate::sync::SyncResult;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 单文件处理结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileOutcome {
    /// 台账已有 success 记录
    AlreadyProcessed,
    /// 下载失败或内容为空（未写台账）
    DownloadEmpty,
    /// 已执行流水线并写台账
    Processed(ProcessedFile),
}

impl FileOutcome {
    /// 对应的台账状态（未写台账时为 None）
    pub fn ledger_status(&self) -> Option<ProcessedFileStatus> {
        match self {
            FileOutcome::AlreadyProcessed => Some(ProcessedFileStatus::Success),
            FileOutcome::DownloadEmpty => None,
            FileOutcome::Processed(record) => Some(record.status),
        }
    }
}

pub struct EventImporter {
    source: Arc<dyn RemoteFileSource>,
    pipeline: Arc<ImportPipeline>,
}

impl EventImporter {
    pub fn new(source: Arc<dyn RemoteFileSource>, pipeline: Arc<ImportPipeline>) -> Self {
        Self { source, pipeline }
    }

    #[instrument(skip(self, notification), fields(file_path = %notification.file_path))]
    pub async fn process_one_file(&self, notification: FileNotification) -> SyncResult<FileOutcome> {
        let pipeline = self.pipeline.clone();
        let path = notification.ledger_path();
        let already = tokio::task::spawn_blocking(move || pipeline.is_success(&path)).await??;
        if already {
            info!("台账已记录 success，跳过");
            return Ok(FileOutcome::AlreadyProcessed);
        }

        let bytes = match notification.file_id.as_deref() {
            Some(id) if !id.trim().is_empty() => self.source.download_file(id).await,
            _ => self.source.download_by_path(&notification.file_path).await,
        };
        let bytes = match bytes {
            Some(b) if !b.is_empty() => b,
            _ => {
                warn!("文件下载失败或内容为空，不写台账");
                return Ok(FileOutcome::DownloadEmpty);
            }
        };

        let record = ingest_in_background(self.pipeline.clone(), notification, bytes).await?;
        Ok(FileOutcome::Processed(record))
    }

    /// 并发处理多条通知；结果顺序与输入一致
    pub async fn process_many(
        &self,
        notifications: Vec<FileNotification>,
    ) -> Vec<SyncResult<FileOutcome>> {
        info!(count = notifications.len(), "批量处理文件通知");
        join_all(
            notifications
                .into_iter()
                .map(|notification| self.process_one_file(notification)),
        )
        .await
    }

    /// 人工重试（按路径下载；非 success 台账会被覆盖）
    pub async fn reprocess(&self, file_path: &str) -> SyncResult<FileOutcome> {
        info!(file_path = %file_path, "人工重试文件");
        self.process_one_file(FileNotification::from_path(file_path))
            .await
    }
}
