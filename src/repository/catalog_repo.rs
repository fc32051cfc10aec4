// ==========================================
// 经销商库存同步系统 - 主数据目录仓储
// ==========================================
// 职责: 读取 dealer / product 主数据
// 红线: 只读，主数据归外部目录系统维护
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::catalog::{CatalogSnapshot, Dealer, Product};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// CatalogRepository Trait
// ==========================================
// 实现者: CatalogRepositoryImpl（使用 rusqlite）
pub trait CatalogRepository: Send + Sync {
    /// 全部经销商（按 id 升序）
    fn list_dealers(&self) -> RepositoryResult<Vec<Dealer>>;

    /// 全部产品（按 id 升序）
    fn list_products(&self) -> RepositoryResult<Vec<Product>>;

    /// 加载一次批次用的目录快照
    fn load_snapshot(&self) -> RepositoryResult<CatalogSnapshot> {
        Ok(CatalogSnapshot::new(
            self.list_dealers()?,
            self.list_products()?,
        ))
    }
}

pub struct CatalogRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

impl CatalogRepositoryImpl {
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
}

impl CatalogRepository for CatalogRepositoryImpl {
    fn list_dealers(&self) -> RepositoryResult<Vec<Dealer>> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT id, unique_id, name, alt_name FROM dealer ORDER BY id")?;
        let dealers = stmt
            .query_map([], |row| {
                Ok(Dealer {
                    id: row.get(0)?,
                    unique_id: row.get(1)?,
                    name: row.get(2)?,
                    alt_name: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(dealers)
    }

    fn list_products(&self) -> RepositoryResult<Vec<Product>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT id, name FROM product ORDER BY id")?;
        let products = stmt
            .query_map([], |row| {
                Ok(Product {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(products)
    }
}
