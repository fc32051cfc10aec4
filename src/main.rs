// ==========================================
// 经销商库存同步系统 - 命令行入口
// ==========================================
// 用法:
//   dealer-stock-sync serve                       启动轮询，Ctrl-C 停止
//   dealer-stock-sync run-once                    立即轮询一轮
//   dealer-stock-sync process <remote-path>...    按路径处理远程文件
//   dealer-stock-sync import <file> [--rows A-B]  本地文件导入（不写台账）
//   dealer-stock-sync init-db                     建表
//   dealer-stock-sync ledger [status]             列出已处理文件
//   dealer-stock-sync sellable [dealer-id]        可售库存汇总
// 数据库路径: DSS_DB_PATH 或用户数据目录
// ==========================================

use anyhow::{anyhow, bail, Context};
use dealer_stock_sync::app::{get_default_db_path, AppState};
use dealer_stock_sync::importer::{ImportOptions, RowRange};
use dealer_stock_sync::sync::FileNotification;
use dealer_stock_sync::{logging, ProcessedFileStatus};

const USAGE: &str = "用法: dealer-stock-sync <serve|run-once|process|import|init-db|ledger|sellable> [参数]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let mut args = std::env::args().skip(1);
    let command = args.next().ok_or_else(|| anyhow!(USAGE))?;
    let rest: Vec<String> = args.collect();

    let db_path = get_default_db_path();
    tracing::info!(
        version = dealer_stock_sync::VERSION,
        db_path = %db_path,
        "{} 启动",
        dealer_stock_sync::APP_NAME
    );

    match command.as_str() {
        "init-db" => {
            let _state = AppState::new(db_path.clone())?;
            println!("数据库已初始化: {}", db_path);
        }
        "serve" => serve(AppState::new(db_path)?).await?,
        "run-once" => {
            let state = AppState::new(db_path)?;
            let report = state.scheduler()?.run_once().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "process" => {
            if rest.is_empty() {
                bail!("process 需要至少一个远程文件路径");
            }
            let state = AppState::new(db_path)?;
            let importer = state.event_importer()?;
            let notifications = rest.into_iter().map(FileNotification::from_path).collect();
            for outcome in importer.process_many(notifications).await {
                match outcome {
                    Ok(outcome) => println!("{}", serde_json::to_string(&outcome)?),
                    Err(e) => eprintln!("处理失败: {}", e),
                }
            }
        }
        "import" => import_local(AppState::new(db_path)?, &rest).await?,
        "ledger" => {
            let status = match rest.first().map(String::as_str) {
                None => None,
                Some(raw @ ("success" | "partial" | "failed")) => Some(ProcessedFileStatus::from_db(raw)),
                Some(other) => bail!("未知状态: {}（success|partial|failed）", other),
            };
            let state = AppState::new(db_path)?;
            for file in state.ledger.list_by_status(status)? {
                println!("{}", serde_json::to_string(&file)?);
            }
        }
        "sellable" => {
            let state = AppState::new(db_path)?;
            let dealer = rest.first().map(String::as_str);
            for line in state.stock_repo.sellable_by_dealer_product_lot(dealer)? {
                println!("{}", serde_json::to_string(&line)?);
            }
        }
        other => bail!("未知命令: {}\n{}", other, USAGE),
    }

    Ok(())
}

async fn serve(state: AppState) -> anyhow::Result<()> {
    if !state.config.scheduler.enabled {
        bail!("轮询已在配置中关闭 (scheduler_enabled=false)");
    }
    let scheduler = state.scheduler()?;
    scheduler.start();

    tokio::signal::ctrl_c()
        .await
        .context("无法监听 Ctrl-C 信号")?;
    tracing::info!("收到停止信号，等待当前轮次结束");
    scheduler.stop_and_wait().await;
    Ok(())
}

async fn import_local(state: AppState, rest: &[String]) -> anyhow::Result<()> {
    let mut path = None;
    let mut options = ImportOptions::default();
    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        if arg == "--rows" {
            let raw = iter.next().ok_or_else(|| anyhow!("--rows 需要 START-END"))?;
            let range: RowRange = raw.parse().map_err(|e: String| anyhow!(e))?;
            options = ImportOptions::with_row_range(range);
        } else if path.is_none() {
            path = Some(arg.clone());
        } else {
            bail!("多余的参数: {}", arg);
        }
    }
    let path = path.ok_or_else(|| anyhow!("import 需要本地文件路径"))?;

    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("无法读取文件: {}", path))?;
    let filename = std::path::Path::new(&path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.clone());

    let pipeline = state.pipeline.clone();
    let summary = tokio::task::spawn_blocking(move || pipeline.import_bytes(&bytes, &filename, &options))
        .await??;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
