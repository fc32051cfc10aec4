// ==========================================
// 远程文档库连接器测试
// ==========================================
// 测试目标: 令牌缓存 / 站点缓存 / 文件夹解析与兜底查找 / 分页过滤 / 下载
// 工具: httpmock 模拟令牌接口与 drive REST 接口
// ==========================================

use dealer_stock_sync::config::RemoteSettings;
use dealer_stock_sync::logging;
use dealer_stock_sync::remote::{
    ClientCredentialsTokenProvider, GraphDriveConnector, RemoteError, RemoteFileSource,
};
use httpmock::prelude::*;
use serde_json::json;
use std::sync::Arc;

const TOKEN_PATH: &str = "/tenant-1/oauth2/v2.0/token";
const SITE_PATH: &str = "/v1.0/sites/contoso.example.com:/sites/dealers";
const DRIVE: &str = "/v1.0/sites/site-1/drive";

fn settings(server: &MockServer, folder_path: &str) -> RemoteSettings {
    RemoteSettings {
        authority_url: server.base_url(),
        api_base_url: server.url("/v1.0"),
        tenant_id: "tenant-1".to_string(),
        client_id: "client-1".to_string(),
        client_secret: "s3cret".to_string(),
        site_url: "https://contoso.example.com/sites/dealers".to_string(),
        folder_path: folder_path.to_string(),
        ..Default::default()
    }
}

fn connector(settings: &RemoteSettings) -> GraphDriveConnector {
    let http = GraphDriveConnector::build_http_client(settings).unwrap();
    let tokens = Arc::new(ClientCredentialsTokenProvider::new(http.clone(), settings).unwrap());
    GraphDriveConnector::new(http, tokens, settings)
}

async fn mock_token(server: &MockServer) -> httpmock::Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path(TOKEN_PATH)
                .header("content-type", "application/x-www-form-urlencoded");
            then.status(200).json_body(json!({
                "token_type": "Bearer",
                "expires_in": 3600,
                "access_token": "tok-1"
            }));
        })
        .await
}

async fn mock_site(server: &MockServer) -> httpmock::Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path(SITE_PATH)
                .header("authorization", "Bearer tok-1");
            then.status(200).json_body(json!({ "id": "site-1" }));
        })
        .await
}

#[tokio::test]
async fn test_list_files_caches_token_and_site() {
    logging::init_test();
    let server = MockServer::start_async().await;
    let token = mock_token(&server).await;
    let site = mock_site(&server).await;
    let folder = server
        .mock_async(|when, then| {
            when.method(GET).path(format!("{}/root:/DealerStock/Inbox", DRIVE));
            then.status(200)
                .json_body(json!({ "id": "folder-9", "name": "Inbox", "folder": { "childCount": 3 } }));
        })
        .await;
    let next_link = server.url("/v1.0/next-page");
    server
        .mock_async(|when, then| {
            when.method(GET).path(format!("{}/items/folder-9/children", DRIVE));
            then.status(200).json_body(json!({
                "value": [
                    { "id": "01A", "name": "jan.csv", "size": 120, "file": {} },
                    { "id": "01B", "name": "readme.pdf", "size": 80, "file": {} },
                    { "id": "01C", "name": "Archive", "folder": { "childCount": 0 } }
                ],
                "@odata.nextLink": next_link
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v1.0/next-page");
            then.status(200).json_body(json!({
                "value": [
                    { "id": "01D", "name": "feb.XLSX", "size": 4096, "file": {} }
                ]
            }));
        })
        .await;

    let settings = settings(&server, "/DealerStock/Inbox/");
    let connector = connector(&settings);
    assert_eq!(connector.folder_path(), "DealerStock/Inbox");

    let first = connector.list_files().await.unwrap();
    let second = connector.list_files().await.unwrap();

    let names: Vec<&str> = first.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["jan.csv", "feb.XLSX"]);
    assert_eq!(first, second);
    assert_eq!(first[1].size, Some(4096));

    token.assert_calls_async(1).await;
    site.assert_calls_async(1).await;
    folder.assert_calls_async(2).await;
}

#[tokio::test]
async fn test_folder_falls_back_to_breadth_first_search() {
    let server = MockServer::start_async().await;
    mock_token(&server).await;
    mock_site(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(format!("{}/root/children", DRIVE));
            then.status(200).json_body(json!({
                "value": [
                    { "id": "f0", "name": "Other", "folder": {} },
                    { "id": "f1", "name": "dealer  stock (shared)", "folder": {} },
                    { "id": "x1", "name": "dealer stock.csv", "file": {} }
                ]
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(format!("{}/items/f1/children", DRIVE));
            then.status(200).json_body(json!({
                "value": [ { "id": "f2", "name": "INBOX", "folder": {} } ]
            }));
        })
        .await;

    // 直接路径解析全部 404，转为逐层查找
    let settings = settings(&server, "Dealer Stock/Inbox");
    let connector = connector(&settings);

    assert_eq!(connector.resolve_folder_id().await.unwrap(), "f2");
}

#[tokio::test]
async fn test_unknown_folder_is_not_found() {
    let server = MockServer::start_async().await;
    mock_token(&server).await;
    mock_site(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(format!("{}/root/children", DRIVE));
            then.status(200).json_body(json!({ "value": [] }));
        })
        .await;

    let settings = settings(&server, "Missing");
    let connector = connector(&settings);

    let err = connector.list_files().await.unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {:?}", err);
}

#[tokio::test]
async fn test_download_by_id_and_path() {
    let server = MockServer::start_async().await;
    mock_token(&server).await;
    mock_site(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(format!("{}/items/01A/content", DRIVE));
            then.status(200).body("Dealer,Product Code\nAcme,P-1\n");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path(format!("{}/root:/DealerStock/Inbox/jan.csv:/content", DRIVE));
            then.status(200).body("by-path");
        })
        .await;

    let settings = settings(&server, "DealerStock/Inbox");
    let connector = connector(&settings);

    let by_id = connector.download_file("01A").await.unwrap();
    assert!(by_id.starts_with(b"Dealer,Product Code"));
    let by_path = connector
        .download_by_path("/DealerStock/Inbox/jan.csv")
        .await
        .unwrap();
    assert_eq!(by_path, b"by-path".to_vec());
    assert!(connector.download_file("missing").await.is_none());
}

#[tokio::test]
async fn test_unauthorized_response_drops_cached_token() {
    let server = MockServer::start_async().await;
    let token = mock_token(&server).await;
    mock_site(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(format!("{}/items/revoked/content", DRIVE));
            then.status(401).body("token revoked");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(format!("{}/items/01A/content", DRIVE));
            then.status(200).body("ok");
        })
        .await;

    let settings = settings(&server, "DealerStock/Inbox");
    let connector = connector(&settings);

    let err = connector.try_download_file("revoked").await.unwrap_err();
    assert!(matches!(err, RemoteError::Auth(_)));
    assert_eq!(connector.download_file("01A").await.unwrap(), b"ok".to_vec());

    token.assert_calls_async(2).await;
}

#[tokio::test]
async fn test_token_endpoint_rejection_is_auth_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(TOKEN_PATH);
            then.status(400)
                .json_body(json!({ "error": "invalid_client" }));
        })
        .await;

    let settings = settings(&server, "DealerStock/Inbox");
    let connector = connector(&settings);

    match connector.list_files().await {
        Err(RemoteError::Auth(message)) => assert!(message.contains("invalid_client")),
        other => panic!("expected Auth error, got {:?}", other),
    }
}
