// ==========================================
// 经销商库存同步系统 - 应用状态
// ==========================================
// 职责: 由数据库路径装配 配置 / 仓储 / 流水线 / 远程连接 / 驱动器
// 规则: 远程配置不完整时仍可本地导入，远程相关功能返回配置错误
// ==========================================

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context};
use rusqlite::Connection;

use crate::config::{ConfigManager, SyncConfig, SyncConfigReader};
use crate::db::{init_schema, open_sqlite_connection};
use crate::importer::StockImporter;
use crate::remote::{ClientCredentialsTokenProvider, GraphDriveConnector, RemoteFileSource};
use crate::repository::{
    CatalogRepository, CatalogRepositoryImpl, ProcessedFileRepository,
    ProcessedFileRepositoryImpl, StockRecordRepository, StockRecordRepositoryImpl,
};
use crate::sync::{EventImporter, ImportPipeline, PollingScheduler};

/// 应用状态
///
/// 所有仓储共享一个 SQLite 连接
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 启动时加载的同步配置
    pub config: SyncConfig,

    pub config_manager: Arc<ConfigManager>,
    pub catalog_repo: Arc<dyn CatalogRepository>,
    pub stock_repo: Arc<dyn StockRecordRepository>,
    pub ledger: Arc<dyn ProcessedFileRepository>,

    /// 单文件导入流水线（推送/轮询/本地导入共用）
    pub pipeline: Arc<ImportPipeline>,

    remote: Option<RemoteDrivers>,
}

struct RemoteDrivers {
    source: Arc<dyn RemoteFileSource>,
    event_importer: Arc<EventImporter>,
    scheduler: Arc<PollingScheduler>,
}

impl AppState {
    /// 创建新的 AppState 实例
    ///
    /// # 说明
    /// 1. 打开数据库并建表（幂等）
    /// 2. 读取配置（数据库 + 环境变量覆写）
    /// 3. 初始化仓储与流水线
    /// 4. 远程配置完整时初始化连接器、推送导入与轮询调度
    pub fn new(db_path: String) -> anyhow::Result<Self> {
        let (conn, config_manager, config) = Self::open(&db_path)?;

        let missing = config.remote.missing_fields();
        let source: Option<Arc<dyn RemoteFileSource>> = if missing.is_empty() {
            let http = GraphDriveConnector::build_http_client(&config.remote)?;
            let tokens = Arc::new(ClientCredentialsTokenProvider::new(http.clone(), &config.remote)?);
            Some(Arc::new(GraphDriveConnector::new(http, tokens, &config.remote)))
        } else {
            tracing::warn!(missing = ?missing, "远程文档库配置不完整，仅支持本地导入");
            None
        };

        Ok(Self::assemble(db_path, conn, config_manager, config, source))
    }

    /// 使用外部提供的远程文件源创建（测试或自定义接入）
    pub fn with_source(db_path: String, source: Arc<dyn RemoteFileSource>) -> anyhow::Result<Self> {
        let (conn, config_manager, config) = Self::open(&db_path)?;
        Ok(Self::assemble(db_path, conn, config_manager, config, Some(source)))
    }

    fn open(db_path: &str) -> anyhow::Result<(Arc<Mutex<Connection>>, Arc<ConfigManager>, SyncConfig)> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_sqlite_connection(db_path)
            .with_context(|| format!("无法打开数据库: {}", db_path))?;
        init_schema(&conn).context("数据库建表失败")?;
        let conn = Arc::new(Mutex::new(conn));

        let config_manager = Arc::new(ConfigManager::from_connection(conn.clone())?);
        let config = config_manager.load_sync_config()?;
        tracing::info!(?config, "同步配置已加载");
        Ok((conn, config_manager, config))
    }

    fn assemble(
        db_path: String,
        conn: Arc<Mutex<Connection>>,
        config_manager: Arc<ConfigManager>,
        config: SyncConfig,
        source: Option<Arc<dyn RemoteFileSource>>,
    ) -> Self {
        // ==========================================
        // 初始化Repository层
        // ==========================================
        let catalog_repo: Arc<dyn CatalogRepository> =
            Arc::new(CatalogRepositoryImpl::from_connection(conn.clone()));
        let stock_repo: Arc<dyn StockRecordRepository> =
            Arc::new(StockRecordRepositoryImpl::from_connection(conn.clone()));
        let ledger: Arc<dyn ProcessedFileRepository> =
            Arc::new(ProcessedFileRepositoryImpl::from_connection(conn));

        let importer = StockImporter::new(stock_repo.clone())
            .with_max_skip_reasons(config.import.max_skip_reasons);
        let pipeline = Arc::new(ImportPipeline::new(
            importer,
            catalog_repo.clone(),
            ledger.clone(),
        ));

        let remote = source.map(|source| RemoteDrivers {
            event_importer: Arc::new(EventImporter::new(source.clone(), pipeline.clone())),
            scheduler: Arc::new(PollingScheduler::new(
                source.clone(),
                pipeline.clone(),
                Duration::from_secs(config.scheduler.poll_interval_secs),
            )),
            source,
        });

        Self {
            db_path,
            config,
            config_manager,
            catalog_repo,
            stock_repo,
            ledger,
            pipeline,
            remote,
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    fn remote(&self) -> anyhow::Result<&RemoteDrivers> {
        self.remote.as_ref().ok_or_else(|| {
            anyhow!(
                "远程文档库未配置，缺少: {}",
                self.config.remote.missing_fields().join(", ")
            )
        })
    }

    pub fn remote_source(&self) -> anyhow::Result<Arc<dyn RemoteFileSource>> {
        Ok(self.remote()?.source.clone())
    }

    pub fn event_importer(&self) -> anyhow::Result<Arc<EventImporter>> {
        Ok(self.remote()?.event_importer.clone())
    }

    pub fn scheduler(&self) -> anyhow::Result<Arc<PollingScheduler>> {
        Ok(self.remote()?.scheduler.clone())
    }
}

// ==========================================

/// 获取默认数据库路径
///
/// # 返回
/// - 环境变量 DSS_DB_PATH（非空时）
/// - 否则: 用户数据目录/dealer-stock-sync/stock.db
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var(crate::config::env_keys::DB_PATH) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./stock.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("dealer-stock-sync");
        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("stock.db");
        }
    }

    path.to_string_lossy().to_string()
}
