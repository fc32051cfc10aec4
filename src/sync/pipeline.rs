// ==========================================
// 经销商库存同步系统 - 单文件导入流水线
// ==========================================
// 流程: 抽取 → 目录快照 → 去重导入 → 写台账
// 红线:
//   - 每次处理恰好写一条台账（含失败）
//   - 同步阻塞代码，驱动层通过 spawn_blocking 调用
// ==========================================

use crate::domain::processed_file::ProcessedFile;
use crate::domain::types::ProcessedFileStatus;
use crate::engine::entity_resolver::EntityResolver;
use crate::importer::{ImportOptions, ImportResult, ImportSummary, StockImporter, TabularExtractor};
use crate::repository::{CatalogRepository, ProcessedFileRepository, RepositoryResult};
use crate::sync::SyncResult;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

pub const NO_ROWS_MESSAGE: &str = "no rows extracted";

/// 单文件通知（推送回调负载 / 轮询列表项）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNotification {
    pub file_path: String,
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
}

impl FileNotification {
    pub fn from_path(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            file_id: None,
            size: None,
        }
    }

    /// 台账键: 与轮询生成的 `{folder}/{name}` 同形
    pub fn ledger_path(&self) -> String {
        normalize_file_path(&self.file_path)
    }

    /// 路径最后一段（用于格式识别）
    pub fn file_name(&self) -> &str {
        self.file_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.file_path)
    }
}

/// 反斜杠统一为 `/`，去掉首尾空白与 `/`
pub fn normalize_file_path(path: &str) -> String {
    path.trim().replace('\\', "/").trim_matches('/').to_string()
}

pub struct ImportPipeline {
    extractor: TabularExtractor,
    importer: StockImporter,
    catalog_repo: Arc<dyn CatalogRepository>,
    ledger: Arc<dyn ProcessedFileRepository>,
}

impl ImportPipeline {
    pub fn new(
        importer: StockImporter,
        catalog_repo: Arc<dyn CatalogRepository>,
        ledger: Arc<dyn ProcessedFileRepository>,
    ) -> Self {
        Self {
            extractor: TabularExtractor::new(),
            importer,
            catalog_repo,
            ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn ProcessedFileRepository> {
        &self.ledger
    }

    pub fn is_success(&self, file_path: &str) -> RepositoryResult<bool> {
        self.ledger.is_success(file_path)
    }

    pub fn is_imported(&self, file_path: &str) -> RepositoryResult<bool> {
        self.ledger.is_imported(file_path)
    }

    /// 不写台账的导入（本地诊断用）
    pub fn import_bytes(
        &self,
        bytes: &[u8],
        filename: &str,
        options: &ImportOptions,
    ) -> ImportResult<ImportSummary> {
        let rows = self.extractor.extract(bytes, filename);
        let resolver = EntityResolver::from_repository(self.catalog_repo.as_ref());
        self.importer.import_rows(&rows, &resolver, options)
    }

    /// 处理已下载的文件并写台账
    ///
    /// # 返回
    /// - Ok(ProcessedFile): 已写入（或试图写入）的台账记录
    /// - Err: 批次提交失败；台账已尽力记录为 failed
    #[instrument(skip(self, bytes), fields(file_path = %file.file_path, size = bytes.len()))]
    pub fn ingest_file(&self, file: &FileNotification, bytes: &[u8]) -> SyncResult<ProcessedFile> {
        let rows = self.extractor.extract(bytes, file.file_name());
        if rows.is_empty() {
            warn!("文件未抽取到任何有效行，记为 failed");
            let record = self.failed_record(file, NO_ROWS_MESSAGE);
            self.write_ledger(&record);
            return Ok(record);
        }

        let resolver = EntityResolver::from_repository(self.catalog_repo.as_ref());
        match self
            .importer
            .import_rows(&rows, &resolver, &ImportOptions::default())
        {
            Ok(summary) => {
                let record = self.record_from_summary(file, &summary);
                info!(
                    status = %record.status,
                    imported = summary.imported,
                    skipped = summary.skipped,
                    errored = summary.errored,
                    "文件处理完成"
                );
                self.write_ledger(&record);
                Ok(record)
            }
            Err(e) => {
                error!(error = %e, "文件导入失败，记为 failed");
                let record = self.failed_record(file, &e.to_string());
                self.write_ledger(&record);
                Err(e.into())
            }
        }
    }

    /// 台账尽力写入（失败只记日志）
    pub fn write_ledger(&self, record: &ProcessedFile) {
        match self.ledger.record(record) {
            Ok(true) => {}
            Ok(false) => warn!(file_path = %record.file_path, "台账已有 success 记录，未覆盖"),
            Err(e) => error!(file_path = %record.file_path, error = %e, "台账写入失败"),
        }
    }

    pub fn failed_record(&self, file: &FileNotification, message: &str) -> ProcessedFile {
        ProcessedFile {
            file_id: file.file_id.clone(),
            ..ProcessedFile::failed(&file.ledger_path(), file.size, message)
        }
    }

    fn record_from_summary(&self, file: &FileNotification, summary: &ImportSummary) -> ProcessedFile {
        let status = summary.status();
        ProcessedFile {
            file_path: file.ledger_path(),
            file_id: file.file_id.clone(),
            file_size: file.size,
            imported_count: summary.imported as i64,
            skipped_count: summary.skipped as i64,
            errored_count: summary.errored as i64,
            status,
            error_message: match status {
                ProcessedFileStatus::Success => None,
                _ => summary.error_digest(),
            },
            batch_id: Some(summary.batch_id.clone()),
            processed_at: Utc::now(),
        }
    }
}

/// 在阻塞线程池执行流水线；任务 panic 时仍尽力写入 failed 台账
pub async fn ingest_in_background(
    pipeline: Arc<ImportPipeline>,
    file: FileNotification,
    bytes: Vec<u8>,
) -> SyncResult<ProcessedFile> {
    let worker = pipeline.clone();
    let task_file = file.clone();
    match tokio::task::spawn_blocking(move || worker.ingest_file(&task_file, &bytes)).await {
        Ok(result) => result,
        Err(join_err) => {
            error!(file_path = %file.file_path, error = %join_err, "导入任务异常中止");
            let message = format!("import task aborted: {}", join_err);
            let fallback = pipeline.clone();
            let _ = tokio::task::spawn_blocking(move || {
                let record = fallback.failed_record(&file, &message);
                fallback.write_ledger(&record);
            })
            .await;
            Err(join_err.into())
        }
    }
}
