// ==========================================
// 经销商库存同步系统 - 定时轮询导入
// ==========================================
// 循环: 休眠(分步检查停止标志) → 列目录 → 跳过已知/已导入 → 下载 → 流水线
// 规则:
//   - 同一时刻只有一轮在执行（后台循环与 run_once 互斥）
//   - success/partial 加入内存已知集合；失败保留，下轮重试
//   - 单个文件的错误不中断本轮
// ==========================================

use crate::remote::{RemoteFile, RemoteFileSource};
use crate::sync::pipeline::{ingest_in_background, normalize_file_path, FileNotification, ImportPipeline};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

// 休眠分步长度（停止响应粒度）
const SLEEP_STEP: Duration = Duration::from_secs(1);

/// 单轮轮询统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub listed: usize,
    pub skipped_known: usize,
    pub imported_files: usize,
    pub failed_files: usize,
    pub list_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub poll_interval_secs: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_report: Option<CycleReport>,
    pub known_files: usize,
}

struct SchedulerInner {
    source: Arc<dyn RemoteFileSource>,
    pipeline: Arc<ImportPipeline>,
    interval: Duration,
    running: AtomicBool,
    known_ids: Mutex<HashSet<String>>,
    last_cycle: Mutex<Option<(DateTime<Utc>, CycleReport)>>,
    cycle_lock: tokio::sync::Mutex<()>,
}

pub struct PollingScheduler {
    inner: Arc<SchedulerInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PollingScheduler {
    pub fn new(
        source: Arc<dyn RemoteFileSource>,
        pipeline: Arc<ImportPipeline>,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                source,
                pipeline,
                interval,
                running: AtomicBool::new(false),
                known_ids: Mutex::new(HashSet::new()),
                last_cycle: Mutex::new(None),
                cycle_lock: tokio::sync::Mutex::new(()),
            }),
            handle: Mutex::new(None),
        }
    }

    /// 启动后台循环；已在运行时返回 false
    pub fn start(&self) -> bool {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("轮询已在运行，忽略重复启动");
            return false;
        }

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            info!(interval_secs = inner.interval.as_secs(), "轮询调度已启动");
            while inner.sleep_while_running().await {
                let report = inner.run_cycle().await;
                info!(
                    listed = report.listed,
                    skipped_known = report.skipped_known,
                    imported_files = report.imported_files,
                    failed_files = report.failed_files,
                    "轮询一轮完成"
                );
            }
            info!("轮询调度已停止");
        });

        match self.handle.lock() {
            Ok(mut slot) => *slot = Some(handle),
            Err(_) => error!("调度句柄锁已中毒，后台任务无法被等待"),
        }
        true
    }

    /// 发出停止信号（当前休眠步结束后退出）
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            info!("已请求停止轮询");
        }
    }

    /// 停止并等待后台任务退出
    pub async fn stop_and_wait(&self) {
        self.stop();
        let handle = match self.handle.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "轮询任务异常退出");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// 立即执行一轮（与后台循环互斥）
    pub async fn run_once(&self) -> CycleReport {
        self.inner.run_cycle().await
    }

    pub fn status(&self) -> SchedulerStatus {
        let (last_cycle_at, last_report) = match self.inner.last_cycle.lock() {
            Ok(guard) => match guard.as_ref() {
                Some((at, report)) => (Some(*at), Some(report.clone())),
                None => (None, None),
            },
            Err(_) => (None, None),
        };
        SchedulerStatus {
            running: self.is_running(),
            poll_interval_secs: self.inner.interval.as_secs(),
            last_cycle_at,
            last_report,
            known_files: self.inner.known_count(),
        }
    }
}

impl SchedulerInner {
    /// 分步休眠一个周期；期间收到停止信号返回 false
    async fn sleep_while_running(&self) -> bool {
        let mut remaining = self.interval;
        while !remaining.is_zero() {
            if !self.running.load(Ordering::SeqCst) {
                return false;
            }
            let step = remaining.min(SLEEP_STEP);
            tokio::time::sleep(step).await;
            remaining = remaining.saturating_sub(step);
        }
        self.running.load(Ordering::SeqCst)
    }

    fn is_known(&self, file_id: &str) -> bool {
        self.known_ids
            .lock()
            .map(|set| set.contains(file_id))
            .unwrap_or(false)
    }

    fn mark_known(&self, file_id: &str) {
        if let Ok(mut set) = self.known_ids.lock() {
            set.insert(file_id.to_string());
        }
    }

    fn known_count(&self) -> usize {
        self.known_ids.lock().map(|set| set.len()).unwrap_or(0)
    }

    fn ledger_path(&self, file: &RemoteFile) -> String {
        let folder = self.source.folder_path();
        if folder.is_empty() {
            normalize_file_path(&file.name)
        } else {
            normalize_file_path(&format!("{}/{}", folder, file.name))
        }
    }

    #[instrument(skip(self))]
    async fn run_cycle(&self) -> CycleReport {
        let _guard = self.cycle_lock.lock().await;
        let mut report = CycleReport::default();

        match self.source.list_files().await {
            Ok(files) => {
                report.listed = files.len();
                for file in files {
                    self.process_listed_file(file, &mut report).await;
                }
            }
            Err(e) => {
                warn!(error = %e, "列目录失败，本轮跳过");
                report.list_error = Some(e.to_string());
            }
        }

        if let Ok(mut last) = self.last_cycle.lock() {
            *last = Some((Utc::now(), report.clone()));
        }
        report
    }

    async fn process_listed_file(&self, file: RemoteFile, report: &mut CycleReport) {
        if self.is_known(&file.id) {
            report.skipped_known += 1;
            return;
        }

        let path = self.ledger_path(&file);
        let pipeline = self.pipeline.clone();
        let lookup_path = path.clone();
        let imported = tokio::task::spawn_blocking(move || pipeline.is_imported(&lookup_path)).await;
        match imported {
            Ok(Ok(true)) => {
                self.mark_known(&file.id);
                report.skipped_known += 1;
                return;
            }
            Ok(Ok(false)) => {}
            Ok(Err(e)) => {
                warn!(file_path = %path, error = %e, "台账查询失败，本轮跳过该文件");
                report.failed_files += 1;
                return;
            }
            Err(e) => {
                warn!(file_path = %path, error = %e, "台账查询任务失败");
                report.failed_files += 1;
                return;
            }
        }

        let bytes = match self.source.download_file(&file.id).await {
            Some(b) if !b.is_empty() => b,
            _ => {
                warn!(file_path = %path, "下载失败或内容为空，下轮重试");
                report.failed_files += 1;
                return;
            }
        };

        let notification = FileNotification {
            file_path: path.clone(),
            file_id: Some(file.id.clone()),
            size: file.size,
        };
        match ingest_in_background(self.pipeline.clone(), notification, bytes).await {
            Ok(record) if record.status.counts_as_imported() => {
                self.mark_known(&file.id);
                report.imported_files += 1;
            }
            Ok(record) => {
                warn!(file_path = %path, message = ?record.error_message, "文件处理失败，下轮重试");
                report.failed_files += 1;
            }
            Err(e) => {
                error!(file_path = %path, error = %e, "文件导入异常，下轮重试");
                report.failed_files += 1;
            }
        }
    }
}
