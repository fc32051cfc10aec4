// ==========================================
// 经销商库存同步系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少事件导入与轮询并发写入时的 busy 错误
// - 提供建表脚本（测试与 init-db 命令共用）
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 建表（幂等）
///
/// 说明：
/// - dealer / product 由外部目录系统维护，这里建表只为本地运行与测试
/// - dealer_stock_record 的自然键唯一索引对 NULL 做 IFNULL 归一，
///   保证 invoice_id 为空的两行也不会重复
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_scope (
            scope_id TEXT PRIMARY KEY,
            scope_type TEXT NOT NULL,
            scope_key TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(scope_type, scope_key)
        );

        INSERT OR IGNORE INTO config_scope (scope_id, scope_type, scope_key)
        VALUES ('global', 'GLOBAL', 'global');

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL REFERENCES config_scope(scope_id) ON DELETE CASCADE,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS dealer (
            id INTEGER PRIMARY KEY,
            unique_id TEXT UNIQUE,
            name TEXT NOT NULL,
            alt_name TEXT
        );

        CREATE TABLE IF NOT EXISTS product (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS dealer_stock_record (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dealer_unique_id TEXT NOT NULL,
            product_code TEXT NOT NULL,
            dispatch_date TEXT,
            invoice_id TEXT,
            dealer_id INTEGER NOT NULL REFERENCES dealer(id),
            product_id INTEGER REFERENCES product(id),
            dealer_name TEXT,
            product_name TEXT,
            lot_number TEXT,
            expiry_date TEXT,
            quantity INTEGER,
            sales_price REAL,
            status TEXT NOT NULL DEFAULT 'blocked' CHECK (status IN ('blocked', 'confirmed')),
            blocked_quantity INTEGER NOT NULL DEFAULT 0,
            out_for_delivery_quantity INTEGER NOT NULL DEFAULT 0,
            sold_quantity INTEGER NOT NULL DEFAULT 0,
            received_quantity INTEGER,
            available_for_sale INTEGER NOT NULL DEFAULT 0,
            source_file TEXT NOT NULL,
            sheet_name TEXT,
            source_row INTEGER NOT NULL,
            batch_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS ux_dealer_stock_natural_key
            ON dealer_stock_record (
                dealer_unique_id,
                product_code,
                IFNULL(dispatch_date, ''),
                IFNULL(invoice_id, '')
            );

        CREATE INDEX IF NOT EXISTS ix_dealer_stock_lot
            ON dealer_stock_record (dealer_unique_id, product_code, lot_number);

        CREATE TABLE IF NOT EXISTS processed_file (
            file_path TEXT PRIMARY KEY,
            file_id TEXT,
            file_size INTEGER,
            imported_count INTEGER NOT NULL DEFAULT 0,
            skipped_count INTEGER NOT NULL DEFAULT 0,
            errored_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL CHECK (status IN ('success', 'partial', 'failed')),
            error_message TEXT,
            batch_id TEXT,
            processed_at TEXT NOT NULL
        );
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_read_schema_version_without_table() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);
    }
}
