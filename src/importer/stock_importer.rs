// ==========================================
// 经销商库存同步系统 - 库存去重导入引擎
// ==========================================
// 流程: 行范围过滤 → 经销商解析 → 自然键 → 同批次/库内去重
//       → 产品解析 → 数量派生 → 插入 → 整批一次提交
// 红线: 行级失败不中断批次；只有提交失败会回滚整批
// ==========================================

use crate::domain::catalog::Dealer;
use crate::domain::stock::{DealerStockRecord, NaturalKey, StockMovementRow};
use crate::domain::types::ProcessedFileStatus;
use crate::engine::entity_resolver::EntityResolver;
use crate::engine::stock_state_derivation::StockStateDerivationService;
use crate::importer::conflict_handler::{BatchConflict, ConflictHandler};
use crate::importer::error::{ImportError, ImportResult};
use crate::repository::{StockBatch, StockRecordRepository};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

// 跳过原因保留上限（计数始终精确）
pub const DEFAULT_MAX_SKIP_REASONS: usize = 50;

// ==========================================
// 行范围（闭区间，按源文件行号）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRange {
    pub start: usize,
    pub end: usize,
}

impl RowRange {
    pub fn new(start: usize, end: usize) -> Option<Self> {
        if start == 0 || start > end {
            None
        } else {
            Some(Self { start, end })
        }
    }

    pub fn contains(&self, row_number: usize) -> bool {
        (self.start..=self.end).contains(&row_number)
    }
}

impl FromStr for RowRange {
    type Err = String;

    /// 格式: `START-END`，或单个行号
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |v: &str| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| format!("非法行号: {}", v.trim()))
        };
        let (start, end) = match s.split_once('-') {
            Some((a, b)) => (parse(a)?, parse(b)?),
            None => {
                let n = parse(s)?;
                (n, n)
            }
        };
        RowRange::new(start, end).ok_or_else(|| format!("非法行范围: {}", s))
    }
}

impl fmt::Display for RowRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOptions {
    pub row_range: Option<RowRange>,
}

impl ImportOptions {
    pub fn with_row_range(row_range: RowRange) -> Self {
        Self {
            row_range: Some(row_range),
        }
    }
}

// ==========================================
// 导入结果
// ==========================================

/// 行级错误（保留原始行以便排查）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    pub source_file: String,
    pub sheet_name: Option<String>,
    pub row_number: usize,
    pub message: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub batch_id: String,
    pub total: usize,
    pub imported: usize,
    pub skipped: usize,
    pub errored: usize,
    pub skip_reasons: Vec<String>,
    pub errors: Vec<RowError>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl ImportSummary {
    fn new(batch_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            batch_id,
            total: 0,
            imported: 0,
            skipped: 0,
            errored: 0,
            skip_reasons: Vec::new(),
            errors: Vec::new(),
            started_at,
            elapsed_ms: 0,
        }
    }

    /// 对应台账状态: 无错误 success / 有导入有错误 partial / 仅有错误 failed
    pub fn status(&self) -> ProcessedFileStatus {
        ProcessedFileStatus::from_counts(self.imported, self.errored)
    }

    /// 汇总信息（写入台账 error_message）
    pub fn error_digest(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        let first = &self.errors[0];
        Some(format!(
            "{} 行出错，首个错误（行 {}）: {}",
            self.errored, first.row_number, first.message
        ))
    }
}

// 单行处理结果
enum RowOutcome {
    Imported,
    Skipped(String),
    Errored(String),
}

// ==========================================
// StockImporter
// ==========================================
pub struct StockImporter {
    stock_repo: Arc<dyn StockRecordRepository>,
    derivation: StockStateDerivationService,
    max_skip_reasons: usize,
}

impl StockImporter {
    pub fn new(stock_repo: Arc<dyn StockRecordRepository>) -> Self {
        Self {
            stock_repo,
            derivation: StockStateDerivationService::new(),
            max_skip_reasons: DEFAULT_MAX_SKIP_REASONS,
        }
    }

    pub fn with_max_skip_reasons(mut self, max_skip_reasons: usize) -> Self {
        self.max_skip_reasons = max_skip_reasons;
        self
    }

    /// 导入一批行（单事务）
    ///
    /// # 返回
    /// - Ok(ImportSummary): 批次已提交（含行级跳过/错误统计）
    /// - Err(BatchCommitFailed): 开启或提交事务失败，本批次没有任何记录落库
    #[instrument(skip_all, fields(batch_id, rows = rows.len()))]
    pub fn import_rows(
        &self,
        rows: &[StockMovementRow],
        resolver: &EntityResolver,
        options: &ImportOptions,
    ) -> ImportResult<ImportSummary> {
        let timer = Instant::now();
        let batch_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("batch_id", batch_id.as_str());
        let now = Utc::now();
        let mut summary = ImportSummary::new(batch_id.clone(), now);

        let selected: Vec<&StockMovementRow> = rows
            .iter()
            .filter(|r| options.row_range.map_or(true, |range| range.contains(r.row_number)))
            .collect();
        info!(
            selected = selected.len(),
            row_range = ?options.row_range.map(|r| r.to_string()),
            "开始导入库存行"
        );

        let batch = self.stock_repo.begin_batch().map_err(|e| {
            error!(error = %e, "批次事务开启失败");
            ImportError::BatchCommitFailed {
                attempted: 0,
                message: e.to_string(),
            }
        })?;

        let mut conflicts = ConflictHandler::new();
        for row in selected {
            summary.total += 1;
            match self.import_one(batch.as_ref(), row, resolver, &mut conflicts, &batch_id, now) {
                RowOutcome::Imported => summary.imported += 1,
                RowOutcome::Skipped(reason) => {
                    debug!(location = %row.location(), reason = %reason, "跳过");
                    summary.skipped += 1;
                    if summary.skip_reasons.len() < self.max_skip_reasons {
                        summary.skip_reasons.push(reason);
                    }
                }
                RowOutcome::Errored(message) => {
                    warn!(location = %row.location(), error = %message, "行导入失败");
                    summary.errored += 1;
                    summary.errors.push(RowError {
                        source_file: row.source_file.clone(),
                        sheet_name: row.sheet_name.clone(),
                        row_number: row.row_number,
                        message,
                        payload: serde_json::to_value(row).unwrap_or(serde_json::Value::Null),
                    });
                }
            }
        }

        if let Err(e) = batch.commit() {
            error!(attempted = summary.total, error = %e, "批次提交失败，已整批回滚");
            return Err(ImportError::BatchCommitFailed {
                attempted: summary.total,
                message: e.to_string(),
            });
        }

        summary.elapsed_ms = timer.elapsed().as_millis() as u64;
        info!(
            total = summary.total,
            imported = summary.imported,
            skipped = summary.skipped,
            errored = summary.errored,
            elapsed_ms = summary.elapsed_ms,
            "库存导入完成"
        );
        Ok(summary)
    }

    fn import_one(
        &self,
        batch: &dyn StockBatch,
        row: &StockMovementRow,
        resolver: &EntityResolver,
        conflicts: &mut ConflictHandler,
        batch_id: &str,
        now: DateTime<Utc>,
    ) -> RowOutcome {
        let location = row.location();

        // 1. 经销商
        let Some(dealer) =
            resolver.resolve_dealer(row.dealer_name.as_deref(), row.dealer_unique_id.as_deref())
        else {
            return RowOutcome::Skipped(format!(
                "{}: 经销商无法匹配 (name={}, id={})",
                location,
                row.dealer_name_raw.as_deref().unwrap_or("-"),
                row.dealer_unique_id.as_deref().unwrap_or("-"),
            ));
        };

        // 2. 自然键
        let Some(key) = ConflictHandler::natural_key(row, Some(dealer)) else {
            return RowOutcome::Skipped(format!(
                "{}: 无法构建自然键（经销商 {} 无唯一编码）",
                location, dealer.name
            ));
        };

        // 3. 去重
        if let BatchConflict::SameBatch { first_row } = conflicts.check_and_mark(&key, row.row_number) {
            return RowOutcome::Skipped(format!(
                "{}: 与本文件第 {} 行重复 {}",
                location, first_row, key
            ));
        }
        match batch.exists_by_natural_key(&key) {
            Ok(true) => {
                return RowOutcome::Skipped(format!("{}: 记录已存在 {}", location, key));
            }
            Ok(false) => {}
            Err(e) => {
                conflicts.forget(&key);
                return RowOutcome::Errored(format!("自然键查询失败: {}", e));
            }
        }

        // 4. 产品（允许未匹配）
        let product = resolver.resolve_product(row.product_code.as_deref(), row.product_name.as_deref());
        if product.is_none() {
            debug!(location = %location, code = ?row.product_code, "产品未匹配，product_id 置空");
        }

        // 5. 落库
        let record = self.build_record(row, key, dealer, product.map(|p| p.id), batch_id, now);
        match batch.insert_record(&record) {
            Ok(_) => RowOutcome::Imported,
            Err(e) => {
                conflicts.forget(&record.natural_key());
                RowOutcome::Errored(format!("插入失败: {}", e))
            }
        }
    }

    fn build_record(
        &self,
        row: &StockMovementRow,
        key: NaturalKey,
        dealer: &Dealer,
        product_id: Option<i64>,
        batch_id: &str,
        now: DateTime<Utc>,
    ) -> DealerStockRecord {
        DealerStockRecord {
            id: None,
            dealer_unique_id: key.dealer_unique_id,
            product_code: key.product_code,
            dispatch_date: key.dispatch_date,
            invoice_id: key.invoice_id,
            dealer_id: dealer.id,
            product_id,
            dealer_name: row.dealer_name.clone().or_else(|| Some(dealer.name.clone())),
            product_name: row.product_name.clone(),
            lot_number: row.lot_number.clone(),
            expiry_date: row.expiry_date,
            quantity: row.quantity,
            sales_price: row.sales_price,
            status: row.status,
            blocked_quantity: row.blocked_quantity,
            out_for_delivery_quantity: row.out_for_delivery_quantity,
            sold_quantity: row.sold_quantity,
            received_quantity: row.received_quantity,
            // 不信任调用方传入的派生值，入库前重新计算
            available_for_sale: self.derivation.derive_available_for_sale(row),
            source_file: row.source_file.clone(),
            sheet_name: row.sheet_name.clone(),
            row_number: row.row_number,
            batch_id: batch_id.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use crate::domain::catalog::{CatalogSnapshot, Product};
    use crate::domain::types::StockStatus;
    use crate::repository::StockRecordRepositoryImpl;
    use chrono::NaiveDate;
    use rusqlite::Connection;
    use std::sync::Mutex;

    fn setup() -> (StockImporter, Arc<StockRecordRepositoryImpl>, EntityResolver) {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO dealer (id, unique_id, name, alt_name) VALUES
                (1, 'D-001', 'Acme Pharma', NULL),
                (2, NULL, 'No Code Traders', NULL);
            INSERT INTO product (id, name) VALUES (10, 'Paracetamol 500mg');
            "#,
        )
        .unwrap();
        let repo = Arc::new(StockRecordRepositoryImpl::from_connection(Arc::new(Mutex::new(conn))));
        let resolver = EntityResolver::new(CatalogSnapshot::new(
            vec![
                Dealer {
                    id: 1,
                    unique_id: Some("D-001".to_string()),
                    name: "Acme Pharma".to_string(),
                    alt_name: None,
                },
                Dealer {
                    id: 2,
                    unique_id: None,
                    name: "No Code Traders".to_string(),
                    alt_name: None,
                },
            ],
            vec![Product {
                id: 10,
                name: "Paracetamol 500mg".to_string(),
            }],
        ));
        (StockImporter::new(repo.clone()), repo, resolver)
    }

    fn row(row_number: usize, dealer: &str, code: &str, invoice: Option<&str>) -> StockMovementRow {
        StockMovementRow {
            source_file: "stock.csv".to_string(),
            row_number,
            dealer_name: Some(dealer.to_string()),
            dealer_name_raw: Some(dealer.to_string()),
            product_code: Some(code.to_string()),
            product_name: Some("Paracetamol 500mg".to_string()),
            dispatch_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            invoice_id: invoice.map(str::to_string),
            quantity: Some(10),
            ..Default::default()
        }
    }

    #[test]
    fn test_import_and_reimport_is_idempotent() {
        let (importer, repo, resolver) = setup();
        let rows = vec![row(2, "Acme Pharma", "P-1", None), row(3, "Acme Pharma", "P-2", None)];

        let first = importer.import_rows(&rows, &resolver, &ImportOptions::default()).unwrap();
        assert_eq!((first.imported, first.skipped, first.errored), (2, 0, 0));
        assert_eq!(first.status(), ProcessedFileStatus::Success);

        let second = importer.import_rows(&rows, &resolver, &ImportOptions::default()).unwrap();
        assert_eq!((second.imported, second.skipped), (0, 2));
        assert_ne!(first.batch_id, second.batch_id);
        assert_eq!(repo.count_records().unwrap(), 2);
    }

    #[test]
    fn test_null_invoice_and_invoice_are_distinct() {
        let (importer, _repo, resolver) = setup();
        let rows = vec![
            row(2, "Acme Pharma", "P-1", None),
            row(3, "Acme Pharma", "P-1", Some("INV-1")),
            row(4, "Acme Pharma", "P-1", None),
        ];
        let summary = importer.import_rows(&rows, &resolver, &ImportOptions::default()).unwrap();
        assert_eq!(summary.imported, 2);
        assert_eq!(summary.skipped, 1);
        assert!(summary.skip_reasons[0].contains("第 2 行"));
    }

    #[test]
    fn test_unresolved_dealer_and_missing_unique_id_are_skipped() {
        let (importer, _repo, resolver) = setup();
        let rows = vec![
            row(2, "Unknown Dealer", "P-1", None),
            row(3, "No Code Traders", "P-1", None),
        ];
        let summary = importer.import_rows(&rows, &resolver, &ImportOptions::default()).unwrap();
        assert_eq!((summary.imported, summary.skipped, summary.errored), (0, 2, 0));
        assert_eq!(summary.total, 2);
    }

    #[test]
    fn test_blocked_row_stored_with_zero_available() {
        let (importer, repo, resolver) = setup();
        let mut r = row(2, "Acme Pharma", "P-1", Some("INV-9"));
        r.provided_available_for_sale = Some(40);
        r.available_for_sale = 40;
        importer.import_rows(&[r], &resolver, &ImportOptions::default()).unwrap();

        let key = NaturalKey {
            dealer_unique_id: "D-001".to_string(),
            product_code: "P-1".to_string(),
            dispatch_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            invoice_id: Some("INV-9".to_string()),
        };
        let stored = repo.find_by_natural_key(&key).unwrap().unwrap();
        assert_eq!(stored.status, StockStatus::Blocked);
        assert_eq!(stored.available_for_sale, 0);
        assert_eq!(stored.product_id, Some(10));
    }

    #[test]
    fn test_row_range_limits_rows() {
        let (importer, _repo, resolver) = setup();
        let rows: Vec<_> = (2..=6)
            .map(|n| row(n, "Acme Pharma", &format!("P-{}", n), None))
            .collect();
        let options = ImportOptions::with_row_range("3-4".parse().unwrap());
        let summary = importer.import_rows(&rows, &resolver, &options).unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.imported, 2);
    }

    #[test]
    fn test_skip_reasons_are_capped() {
        let (importer, _repo, resolver) = setup();
        let importer = importer.with_max_skip_reasons(3);
        let rows: Vec<_> = (2..12).map(|n| row(n, "Nobody", "P-1", None)).collect();
        let summary = importer.import_rows(&rows, &resolver, &ImportOptions::default()).unwrap();
        assert_eq!(summary.skipped, 10);
        assert_eq!(summary.skip_reasons.len(), 3);
    }

    #[test]
    fn test_row_range_parse() {
        assert_eq!("2-5".parse::<RowRange>().unwrap(), RowRange { start: 2, end: 5 });
        assert_eq!("7".parse::<RowRange>().unwrap(), RowRange { start: 7, end: 7 });
        assert!("5-2".parse::<RowRange>().is_err());
        assert!("0-2".parse::<RowRange>().is_err());
        assert!("a-b".parse::<RowRange>().is_err());
    }
}
