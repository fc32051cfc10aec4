// ==========================================
// 经销商库存同步系统 - 库存台账仓储
// ==========================================
// 职责: dealer_stock_record 的批次事务写入 / 自然键查询 / 可售汇总
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::stock::{DealerStockRecord, NaturalKey, SellableStock};
use crate::domain::types::StockStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

// ==========================================
// StockBatch - 批次事务
// ==========================================
// 一个批次只有一个事务边界：begin → (exists/insert)* → commit
// 未提交即被丢弃时自动回滚
pub trait StockBatch {
    /// 自然键是否已存在（含本批次内已插入但未提交的记录）
    fn exists_by_natural_key(&self, key: &NaturalKey) -> RepositoryResult<bool>;

    /// 插入一条新台账记录，返回行 id
    fn insert_record(&self, record: &DealerStockRecord) -> RepositoryResult<i64>;

    /// 提交；失败时整批回滚
    fn commit(self: Box<Self>) -> RepositoryResult<()>;
}

// ==========================================
// StockRecordRepository Trait
// ==========================================
// 实现者: StockRecordRepositoryImpl（使用 rusqlite）
pub trait StockRecordRepository: Send + Sync {
    /// 开启批次事务
    fn begin_batch(&self) -> RepositoryResult<Box<dyn StockBatch + '_>>;

    /// 按自然键查询
    fn find_by_natural_key(&self, key: &NaturalKey) -> RepositoryResult<Option<DealerStockRecord>>;

    /// 统计台账记录数
    fn count_records(&self) -> RepositoryResult<i64>;

    /// 按 经销商 / 产品编码 / 批号 汇总可售数量
    fn sellable_by_dealer_product_lot(
        &self,
        dealer_unique_id: Option<&str>,
    ) -> RepositoryResult<Vec<SellableStock>>;
}

pub struct StockRecordRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

impl StockRecordRepositoryImpl {
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

    fn map_record(row: &Row<'_>) -> rusqlite::Result<DealerStockRecord> {
        let status: String = row.get("status")?;
        let source_row: i64 = row.get("source_row")?;
        Ok(DealerStockRecord {
            id: row.get("id")?,
            dealer_unique_id: row.get("dealer_unique_id")?,
            product_code: row.get("product_code")?,
            dispatch_date: row.get("dispatch_date")?,
            invoice_id: row.get("invoice_id")?,
            dealer_id: row.get("dealer_id")?,
            product_id: row.get("product_id")?,
            dealer_name: row.get("dealer_name")?,
            product_name: row.get("product_name")?,
            lot_number: row.get("lot_number")?,
            expiry_date: row.get("expiry_date")?,
            quantity: row.get("quantity")?,
            sales_price: row.get("sales_price")?,
            status: StockStatus::parse(&status),
            blocked_quantity: row.get("blocked_quantity")?,
            out_for_delivery_quantity: row.get("out_for_delivery_quantity")?,
            sold_quantity: row.get("sold_quantity")?,
            received_quantity: row.get("received_quantity")?,
            available_for_sale: row.get("available_for_sale")?,
            source_file: row.get("source_file")?,
            sheet_name: row.get("sheet_name")?,
            row_number: source_row.max(0) as usize,
            batch_id: row.get("batch_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

impl StockRecordRepository for StockRecordRepositoryImpl {
    fn begin_batch(&self) -> RepositoryResult<Box<dyn StockBatch + '_>> {
        let conn = self.get_conn()?;
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(Box::new(SqliteStockBatch {
            conn,
            finished: false,
        }))
    }

    fn find_by_natural_key(&self, key: &NaturalKey) -> RepositoryResult<Option<DealerStockRecord>> {
        let conn = self.get_conn()?;
        let record = conn
            .query_row(
                r#"
                SELECT * FROM dealer_stock_record
                WHERE dealer_unique_id = ?1 AND product_code = ?2
                  AND dispatch_date IS ?3 AND invoice_id IS ?4
                "#,
                params![
                    key.dealer_unique_id,
                    key.product_code,
                    key.dispatch_date,
                    key.invoice_id
                ],
                Self::map_record,
            )
            .optional()?;
        Ok(record)
    }

    fn count_records(&self) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM dealer_stock_record", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    fn sellable_by_dealer_product_lot(
        &self,
        dealer_unique_id: Option<&str>,
    ) -> RepositoryResult<Vec<SellableStock>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT dealer_unique_id, product_code, lot_number,
                   SUM(available_for_sale), COUNT(*)
            FROM dealer_stock_record
            WHERE ?1 IS NULL OR dealer_unique_id = ?1
            GROUP BY dealer_unique_id, product_code, lot_number
            ORDER BY dealer_unique_id, product_code, lot_number
            "#,
        )?;
        let rows = stmt
            .query_map(params![dealer_unique_id], |row| {
                Ok(SellableStock {
                    dealer_unique_id: row.get(0)?,
                    product_code: row.get(1)?,
                    lot_number: row.get(2)?,
                    available_for_sale: row.get(3)?,
                    record_count: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ==========================================
// SqliteStockBatch - 基于连接锁的批次事务
// ==========================================
// 持有连接锁直到 COMMIT / ROLLBACK
struct SqliteStockBatch<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl StockBatch for SqliteStockBatch<'_> {
    fn exists_by_natural_key(&self, key: &NaturalKey) -> RepositoryResult<bool> {
        let found = self
            .conn
            .query_row(
                r#"
                SELECT 1 FROM dealer_stock_record
                WHERE dealer_unique_id = ?1 AND product_code = ?2
                  AND dispatch_date IS ?3 AND invoice_id IS ?4
                LIMIT 1
                "#,
                params![
                    key.dealer_unique_id,
                    key.product_code,
                    key.dispatch_date,
                    key.invoice_id
                ],
                |_row| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        Ok(found)
    }

    fn insert_record(&self, record: &DealerStockRecord) -> RepositoryResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO dealer_stock_record (
                dealer_unique_id, product_code, dispatch_date, invoice_id,
                dealer_id, product_id, dealer_name, product_name, lot_number,
                expiry_date, quantity, sales_price, status,
                blocked_quantity, out_for_delivery_quantity, sold_quantity,
                received_quantity, available_for_sale,
                source_file, sheet_name, source_row, batch_id,
                created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24
            )
            "#,
            params![
                record.dealer_unique_id,
                record.product_code,
                record.dispatch_date,
                record.invoice_id,
                record.dealer_id,
                record.product_id,
                record.dealer_name,
                record.product_name,
                record.lot_number,
                record.expiry_date,
                record.quantity,
                record.sales_price,
                record.status.as_str(),
                record.blocked_quantity,
                record.out_for_delivery_quantity,
                record.sold_quantity,
                record.received_quantity,
                record.available_for_sale,
                record.source_file,
                record.sheet_name,
                record.row_number as i64,
                record.batch_id,
                record.created_at,
                record.updated_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn commit(mut self: Box<Self>) -> RepositoryResult<()> {
        self.finished = true;
        if let Err(e) = self.conn.execute_batch("COMMIT") {
            // 提交失败（如 SQLITE_BUSY）时事务仍处于打开状态，需显式回滚
            if let Err(rollback_err) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %rollback_err, "提交失败后回滚也失败");
            }
            return Err(RepositoryError::DatabaseTransactionError(e.to_string()));
        }
        Ok(())
    }
}

impl Drop for SqliteStockBatch<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "批次事务丢弃时回滚失败");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use chrono::{NaiveDate, Utc};

    fn setup() -> StockRecordRepositoryImpl {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO dealer (id, unique_id, name) VALUES (1, 'D-001', 'Acme Pharma');",
        )
        .unwrap();
        StockRecordRepositoryImpl::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn record(invoice_id: Option<&str>, lot: &str, available: i64) -> DealerStockRecord {
        DealerStockRecord {
            id: None,
            dealer_unique_id: "D-001".to_string(),
            product_code: "P-100".to_string(),
            dispatch_date: NaiveDate::from_ymd_opt(2025, 1, 20),
            invoice_id: invoice_id.map(|s| s.to_string()),
            dealer_id: 1,
            product_id: None,
            dealer_name: Some("Acme Pharma".to_string()),
            product_name: None,
            lot_number: Some(lot.to_string()),
            expiry_date: None,
            quantity: Some(10),
            sales_price: None,
            status: StockStatus::Confirmed,
            blocked_quantity: 0,
            out_for_delivery_quantity: 0,
            sold_quantity: 0,
            received_quantity: Some(available),
            available_for_sale: available,
            source_file: "test.csv".to_string(),
            sheet_name: None,
            row_number: 2,
            batch_id: "batch-1".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_batch_commit_persists_records() {
        let repo = setup();
        let batch = repo.begin_batch().unwrap();
        batch.insert_record(&record(None, "L1", 5)).unwrap();
        assert!(batch.exists_by_natural_key(&record(None, "L1", 5).natural_key()).unwrap());
        batch.commit().unwrap();

        assert_eq!(repo.count_records().unwrap(), 1);
        let found = repo
            .find_by_natural_key(&record(None, "L1", 5).natural_key())
            .unwrap()
            .unwrap();
        assert_eq!(found.invoice_id, None);
        assert_eq!(found.status, StockStatus::Confirmed);
    }

    #[test]
    fn test_dropped_batch_rolls_back() {
        let repo = setup();
        {
            let batch = repo.begin_batch().unwrap();
            batch.insert_record(&record(None, "L1", 5)).unwrap();
        }
        assert_eq!(repo.count_records().unwrap(), 0);
    }

    #[test]
    fn test_unique_index_rejects_null_invoice_duplicate() {
        let repo = setup();
        let batch = repo.begin_batch().unwrap();
        batch.insert_record(&record(None, "L1", 5)).unwrap();
        let err = batch.insert_record(&record(None, "L2", 3)).unwrap_err();
        assert!(matches!(err, RepositoryError::UniqueConstraintViolation(_)));

        // 不同发票号视为不同自然键
        batch.insert_record(&record(Some("INV-1"), "L2", 3)).unwrap();
        batch.commit().unwrap();
        assert_eq!(repo.count_records().unwrap(), 2);
    }

    #[test]
    fn test_sellable_grouped_by_lot() {
        let repo = setup();
        let batch = repo.begin_batch().unwrap();
        batch.insert_record(&record(None, "L1", 5)).unwrap();
        batch.insert_record(&record(Some("INV-1"), "L1", 7)).unwrap();
        batch.insert_record(&record(Some("INV-2"), "L2", 4)).unwrap();
        batch.commit().unwrap();

        let sellable = repo.sellable_by_dealer_product_lot(Some("D-001")).unwrap();
        assert_eq!(sellable.len(), 2);
        assert_eq!(sellable[0].lot_number.as_deref(), Some("L1"));
        assert_eq!(sellable[0].available_for_sale, 12);
        assert_eq!(sellable[0].record_count, 2);
        assert_eq!(sellable[1].available_for_sale, 4);

        assert!(repo.sellable_by_dealer_product_lot(Some("D-999")).unwrap().is_empty());
    }
}
