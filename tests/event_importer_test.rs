// ==========================================
// 推送触发导入测试
// ==========================================
// 测试目标: 台账短路 / 下载为空不记账 / 失败后重试
// ==========================================


use dealer_stock_sync::logging;
use dealer_stock_sync::repository::{ProcessedFileRepository, StockRecordRepository};
use dealer_stock_sync::sync::{
    EventImporter, FileNotification, FileOutcome, PollingScheduler, NO_ROWS_MESSAGE,
};
use dealer_stock_sync::ProcessedFileStatus;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{build_pipeline, create_test_db, scenario_a_csv, FakeRemoteSource, INBOX};

fn inbox_path(name: &str) -> String {
    format!("{}/{}", INBOX, name)
}

#[tokio::test]
async fn test_process_then_repeat_is_noop() {
    logging::init_test();
    let (_temp, db_path) = create_test_db().expect("Failed to create test db");
    let env = build_pipeline(&db_path);
    let source = Arc::new(FakeRemoteSource::new(INBOX));
    source.add_file("01A", "march.csv", scenario_a_csv().as_bytes());
    let importer = EventImporter::new(source.clone(), env.pipeline.clone());

    let first = importer
        .process_one_file(FileNotification::from_path(inbox_path("march.csv")))
        .await
        .unwrap();
    let record = match &first {
        FileOutcome::Processed(record) => record.clone(),
        other => panic!("expected Processed, got {:?}", other),
    };
    assert_eq!(record.status, ProcessedFileStatus::Success);
    assert_eq!(record.imported_count, 2);
    assert_eq!(first.ledger_status(), Some(ProcessedFileStatus::Success));

    let second = importer
        .process_one_file(FileNotification::from_path(inbox_path("march.csv")))
        .await
        .unwrap();
    assert_eq!(second, FileOutcome::AlreadyProcessed);

    // 第二次不下载、不新增记录、台账不变
    assert_eq!(source.downloads().len(), 1);
    assert_eq!(env.stock_repo.count_records().unwrap(), 2);
    let stored = env.ledger.find_by_path(&inbox_path("march.csv")).unwrap().unwrap();
    assert_eq!(stored.batch_id, record.batch_id);
}

#[tokio::test]
async fn test_file_id_is_preferred_for_download() {
    let (_temp, db_path) = create_test_db().expect("Failed to create test db");
    let env = build_pipeline(&db_path);
    let source = Arc::new(FakeRemoteSource::new(INBOX));
    source.add_file("01B", "april.csv", scenario_a_csv().as_bytes());
    let importer = EventImporter::new(source.clone(), env.pipeline.clone());

    let notification = FileNotification {
        file_path: inbox_path("april.csv"),
        file_id: Some("01B".to_string()),
        size: Some(scenario_a_csv().len() as i64),
    };
    let outcome = importer.process_one_file(notification).await.unwrap();

    assert_eq!(outcome.ledger_status(), Some(ProcessedFileStatus::Success));
    assert_eq!(source.downloads(), vec!["id:01B".to_string()]);
    let stored = env.ledger.find_by_path(&inbox_path("april.csv")).unwrap().unwrap();
    assert_eq!(stored.file_id.as_deref(), Some("01B"));
    assert_eq!(stored.file_size, Some(scenario_a_csv().len() as i64));
}

#[tokio::test]
async fn test_missing_download_writes_no_ledger() {
    let (_temp, db_path) = create_test_db().expect("Failed to create test db");
    let env = build_pipeline(&db_path);
    let source = Arc::new(FakeRemoteSource::new(INBOX));
    let importer = EventImporter::new(source.clone(), env.pipeline.clone());

    let outcome = importer
        .process_one_file(FileNotification::from_path(inbox_path("ghost.csv")))
        .await
        .unwrap();

    assert_eq!(outcome, FileOutcome::DownloadEmpty);
    assert_eq!(outcome.ledger_status(), None);
    assert!(env.ledger.find_by_path(&inbox_path("ghost.csv")).unwrap().is_none());
}

#[tokio::test]
async fn test_failed_file_can_be_reprocessed() {
    let (_temp, db_path) = create_test_db().expect("Failed to create test db");
    let env = build_pipeline(&db_path);
    let source = Arc::new(FakeRemoteSource::new(INBOX));
    source.add_file("01C", "may.csv", b"nothing tabular here\n");
    let importer = EventImporter::new(source.clone(), env.pipeline.clone());

    let first = importer
        .process_one_file(FileNotification::from_path(inbox_path("may.csv")))
        .await
        .unwrap();
    match first {
        FileOutcome::Processed(record) => {
            assert_eq!(record.status, ProcessedFileStatus::Failed);
            assert_eq!(record.error_message.as_deref(), Some(NO_ROWS_MESSAGE));
        }
        other => panic!("expected Processed, got {:?}", other),
    }

    // 上游修正文件后人工重试，failed 台账被覆盖
    source.replace_content("01C", "may.csv", scenario_a_csv().as_bytes());
    let retry = importer.reprocess(&inbox_path("may.csv")).await.unwrap();
    assert_eq!(retry.ledger_status(), Some(ProcessedFileStatus::Success));

    let stored = env.ledger.find_by_path(&inbox_path("may.csv")).unwrap().unwrap();
    assert_eq!(stored.status, ProcessedFileStatus::Success);
    assert_eq!(stored.error_message, None);
    assert_eq!(env.stock_repo.count_records().unwrap(), 2);
}

#[tokio::test]
async fn test_process_many_keeps_input_order() {
    let (_temp, db_path) = create_test_db().expect("Failed to create test db");
    let env = build_pipeline(&db_path);
    let source = Arc::new(FakeRemoteSource::new(INBOX));
    source.add_file("01D", "june.csv", scenario_a_csv().as_bytes());
    let importer = EventImporter::new(source.clone(), env.pipeline.clone());

    let results = importer
        .process_many(vec![
            FileNotification::from_path(inbox_path("june.csv")),
            FileNotification::from_path(inbox_path("missing.csv")),
        ])
        .await;

    assert_eq!(results.len(), 2);
    assert_eq!(
        results[0].as_ref().unwrap().ledger_status(),
        Some(ProcessedFileStatus::Success)
    );
    assert_eq!(results[1].as_ref().unwrap(), &FileOutcome::DownloadEmpty);
}

#[tokio::test]
async fn test_polled_and_pushed_paths_share_one_ledger_row() {
    let (_temp, db_path) = create_test_db().expect("Failed to create test db");
    let env = build_pipeline(&db_path);
    let source = Arc::new(FakeRemoteSource::new(INBOX));
    source.add_file("01E", "july.csv", scenario_a_csv().as_bytes());

    let scheduler = PollingScheduler::new(source.clone(), env.pipeline.clone(), Duration::from_secs(60));
    assert_eq!(scheduler.run_once().await.imported_files, 1);

    // 推送负载带前导斜杠，仍命中轮询写下的台账
    let importer = EventImporter::new(source.clone(), env.pipeline.clone());
    let outcome = importer
        .process_one_file(FileNotification {
            file_path: format!("/{}/july.csv", INBOX),
            file_id: Some("01E".to_string()),
            size: None,
        })
        .await
        .unwrap();

    assert_eq!(outcome, FileOutcome::AlreadyProcessed);
    assert_eq!(source.downloads(), vec!["id:01E".to_string()]);
    assert_eq!(env.ledger.list_by_status(None).unwrap().len(), 1);
}

#[tokio::test]
async fn test_pushed_path_is_ledgered_without_leading_slash() {
    let (_temp, db_path) = create_test_db().expect("Failed to create test db");
    let env = build_pipeline(&db_path);
    let source = Arc::new(FakeRemoteSource::new(INBOX));
    source.add_file("01F", "aug.csv", scenario_a_csv().as_bytes());
    let importer = EventImporter::new(source.clone(), env.pipeline.clone());

    let outcome = importer
        .process_one_file(FileNotification {
            file_path: format!("/{}/aug.csv", INBOX),
            file_id: Some("01F".to_string()),
            size: None,
        })
        .await
        .unwrap();

    assert_eq!(outcome.ledger_status(), Some(ProcessedFileStatus::Success));
    let stored = env.ledger.find_by_path(&inbox_path("aug.csv")).unwrap().unwrap();
    assert_eq!(stored.file_path, inbox_path("aug.csv"));
    assert!(env.ledger.find_by_path(&format!("/{}/aug.csv", INBOX)).unwrap().is_none());
}
