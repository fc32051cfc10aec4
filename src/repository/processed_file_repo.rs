// ==========================================
// 经销商库存同步系统 - 已处理文件台账仓储
// ==========================================
// 职责: processed_file 的查询与写入
// 红线: 已 success 的路径不可被覆盖（写入语句自带守卫）
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::processed_file::ProcessedFile;
use crate::domain::types::ProcessedFileStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// ProcessedFileRepository Trait
// ==========================================
// 实现者: ProcessedFileRepositoryImpl（使用 rusqlite）
pub trait ProcessedFileRepository: Send + Sync {
    /// 按路径精确查询
    fn find_by_path(&self, file_path: &str) -> RepositoryResult<Option<ProcessedFile>>;

    /// 写入处理结果
    ///
    /// # 返回
    /// - Ok(true): 已写入（新建或覆盖非 success 记录）
    /// - Ok(false): 该路径已有 success 记录，未改动
    fn record(&self, file: &ProcessedFile) -> RepositoryResult<bool>;

    /// 按状态列出（None 表示全部），按处理时间倒序
    fn list_by_status(
        &self,
        status: Option<ProcessedFileStatus>,
    ) -> RepositoryResult<Vec<ProcessedFile>>;

    /// 是否已有 success 记录
    fn is_success(&self, file_path: &str) -> RepositoryResult<bool> {
        Ok(self
            .find_by_path(file_path)?
            .map(|f| f.status == ProcessedFileStatus::Success)
            .unwrap_or(false))
    }

    /// 是否已视为导入（success / partial）
    fn is_imported(&self, file_path: &str) -> RepositoryResult<bool> {
        Ok(self
            .find_by_path(file_path)?
            .map(|f| f.status.counts_as_imported())
            .unwrap_or(false))
    }
}

pub struct ProcessedFileRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

impl ProcessedFileRepositoryImpl {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<ProcessedFile> {
        let status: String = row.get("status")?;
        Ok(ProcessedFile {
            file_path: row.get("file_path")?,
            file_id: row.get("file_id")?,
            file_size: row.get("file_size")?,
            imported_count: row.get("imported_count")?,
            skipped_count: row.get("skipped_count")?,
            errored_count: row.get("errored_count")?,
            status: ProcessedFileStatus::from_db(&status),
            error_message: row.get("error_message")?,
            batch_id: row.get("batch_id")?,
            processed_at: row.get("processed_at")?,
        })
    }
}

impl ProcessedFileRepository for ProcessedFileRepositoryImpl {
    fn find_by_path(&self, file_path: &str) -> RepositoryResult<Option<ProcessedFile>> {
        let conn = self.get_conn()?;
        let found = conn
            .query_row(
                "SELECT * FROM processed_file WHERE file_path = ?1",
                params![file_path],
                Self::map_row,
            )
            .optional()?;
        Ok(found)
    }

    fn record(&self, file: &ProcessedFile) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            r#"
            INSERT INTO processed_file (
                file_path, file_id, file_size, imported_count, skipped_count,
                errored_count, status, error_message, batch_id, processed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(file_path) DO UPDATE SET
                file_id = excluded.file_id,
                file_size = excluded.file_size,
                imported_count = excluded.imported_count,
                skipped_count = excluded.skipped_count,
                errored_count = excluded.errored_count,
                status = excluded.status,
                error_message = excluded.error_message,
                batch_id = excluded.batch_id,
                processed_at = excluded.processed_at
            WHERE processed_file.status <> 'success'
            "#,
            params![
                file.file_path,
                file.file_id,
                file.file_size,
                file.imported_count,
                file.skipped_count,
                file.errored_count,
                file.status.as_str(),
                file.error_message,
                file.batch_id,
                file.processed_at,
            ],
        )?;
        Ok(changed > 0)
    }

    fn list_by_status(
        &self,
        status: Option<ProcessedFileStatus>,
    ) -> RepositoryResult<Vec<ProcessedFile>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM processed_file
            WHERE ?1 IS NULL OR status = ?1
            ORDER BY processed_at DESC, file_path
            "#,
        )?;
        let files = stmt
            .query_map(params![status.map(|s| s.as_str())], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(files)
    }
}
