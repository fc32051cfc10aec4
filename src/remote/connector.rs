// ==========================================
// 经销商库存同步系统 - 远程文档库连接器
// ==========================================
// 职责: 站点解析 / 文件夹解析 / 文件列表 / 文件下载
// 规则:
//   - 站点 id 一次解析，连接器生命周期内缓存
//   - 文件夹先按多种路径编码直接解析，失败后从根目录广度优先查找
//   - 列表只保留已识别扩展名的文件
//   - 下载失败返回 None，重试策略由调用方决定
// ==========================================

use crate::config::RemoteSettings;
use crate::importer::file_parser::is_supported_file;
use crate::remote::error::{RemoteError, RemoteResult};
use crate::remote::models::{DriveItem, DriveItemPage, RemoteFile, SiteResponse};
use crate::remote::token::TokenProvider;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

// 分页上限，防止 nextLink 异常循环
const MAX_PAGES: usize = 200;

// ==========================================
// RemoteFileSource Trait
// ==========================================
// 实现者: GraphDriveConnector；驱动层测试可替换为内存实现
#[async_trait]
pub trait RemoteFileSource: Send + Sync {
    /// 轮询文件夹路径（台账路径前缀）
    fn folder_path(&self) -> String;

    /// 列出文件夹下的数据文件
    async fn list_files(&self) -> RemoteResult<Vec<RemoteFile>>;

    /// 按文件 id 下载，失败返回 None
    async fn download_file(&self, file_id: &str) -> Option<Vec<u8>>;

    /// 按路径下载，失败返回 None
    async fn download_by_path(&self, path: &str) -> Option<Vec<u8>>;
}

pub struct GraphDriveConnector {
    http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    api_base_url: String,
    site_url: String,
    folder_path: String,
    site_id: OnceCell<String>,
}

impl GraphDriveConnector {
    pub fn new(
        http: reqwest::Client,
        tokens: Arc<dyn TokenProvider>,
        settings: &RemoteSettings,
    ) -> Self {
        Self {
            http,
            tokens,
            api_base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            site_url: settings.site_url.trim().to_string(),
            folder_path: settings.normalized_folder_path(),
            site_id: OnceCell::new(),
        }
    }

    /// 按配置构建带超时的 HTTP 客户端
    pub fn build_http_client(settings: &RemoteSettings) -> RemoteResult<reqwest::Client> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        Ok(client)
    }

    // ==========================================
    // HTTP 基础
    // ==========================================

    async fn get(&self, url: &str) -> RemoteResult<reqwest::Response> {
        let token = self.tokens.access_token().await?;
        let response = self.http.get(url).bearer_auth(token).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                // 令牌可能被提前吊销，丢弃缓存让下次请求重新换取
                self.tokens.invalidate().await;
                Err(RemoteError::Auth(format!("{} ({}): {}", status.as_u16(), url, body)))
            }
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound(url.to_string())),
            _ => Err(RemoteError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            }),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> RemoteResult<T> {
        let response = self.get(url).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::InvalidResponse(format!("{}: {}", url, e)))
    }

    /// 读取全部分页（跟随 @odata.nextLink）
    async fn get_all_items(&self, first_url: &str) -> RemoteResult<Vec<DriveItem>> {
        let mut items = Vec::new();
        let mut next = Some(first_url.to_string());
        let mut pages = 0usize;
        while let Some(url) = next {
            if pages >= MAX_PAGES {
                warn!(url = %first_url, pages, "分页数超过上限，截断");
                break;
            }
            let page: DriveItemPage = self.get_json(&url).await?;
            items.extend(page.value);
            next = page.next_link;
            pages += 1;
        }
        Ok(items)
    }

    // ==========================================
    // 站点解析
    // ==========================================

    fn site_lookup_url(&self) -> RemoteResult<String> {
        let parsed = Url::parse(&self.site_url)
            .map_err(|e| RemoteError::Config(format!("site_url 非法 ({}): {}", self.site_url, e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| RemoteError::Config(format!("site_url 缺少主机名: {}", self.site_url)))?;
        let path = parsed.path().trim_end_matches('/');
        if path.is_empty() {
            Ok(format!("{}/sites/{}", self.api_base_url, host))
        } else {
            Ok(format!("{}/sites/{}:{}", self.api_base_url, host, path))
        }
    }

    /// 站点 id（首次调用时解析并缓存）
    pub async fn site_id(&self) -> RemoteResult<String> {
        let id = self
            .site_id
            .get_or_try_init(|| async {
                let url = self.site_lookup_url()?;
                let site: SiteResponse = self.get_json(&url).await?;
                info!(site_url = %self.site_url, site_id = %site.id, "站点解析完成");
                Ok::<String, RemoteError>(site.id)
            })
            .await?;
        Ok(id.clone())
    }

    fn drive_url(&self, site_id: &str) -> String {
        format!("{}/sites/{}/drive", self.api_base_url, site_id)
    }

    // ==========================================
    // 文件夹解析
    // ==========================================

    /// 文件夹 id；路径为空时为文档库根目录
    #[instrument(skip(self), fields(folder_path = %self.folder_path))]
    pub async fn resolve_folder_id(&self) -> RemoteResult<String> {
        let site_id = self.site_id().await?;
        let drive = self.drive_url(&site_id);

        if self.folder_path.is_empty() {
            let root: DriveItem = self.get_json(&format!("{}/root", drive)).await?;
            return Ok(root.id);
        }

        for variant in folder_path_variants(&self.folder_path) {
            let url = format!("{}/root:/{}", drive, variant);
            match self.get_json::<DriveItem>(&url).await {
                Ok(item) if item.is_folder() => {
                    debug!(variant = %variant, folder_id = %item.id, "文件夹直接解析成功");
                    return Ok(item.id);
                }
                Ok(_) => debug!(variant = %variant, "路径指向的不是文件夹"),
                Err(e) if e.is_not_found() => debug!(variant = %variant, "路径变体未命中"),
                Err(e) => return Err(e),
            }
        }

        warn!(folder_path = %self.folder_path, "文件夹直接解析失败，改为广度优先查找");
        self.find_folder_bfs(&drive).await
    }

    /// 从根目录逐层匹配：文件夹名与期望段忽略大小写、任一方向子串
    async fn find_folder_bfs(&self, drive: &str) -> RemoteResult<String> {
        let segments: Vec<String> = self
            .folder_path
            .split('/')
            .map(normalize_segment)
            .filter(|s| !s.is_empty())
            .collect();

        let mut frontier = vec![format!("{}/root/children", drive)];
        for (depth, segment) in segments.iter().enumerate() {
            let mut matches = Vec::new();
            for children_url in &frontier {
                for item in self.get_all_items(children_url).await? {
                    if item.is_folder() && segment_matches(&item.name, segment) {
                        matches.push(item);
                    }
                }
            }
            if matches.is_empty() {
                break;
            }
            if depth + 1 == segments.len() {
                let found = &matches[0];
                info!(folder_id = %found.id, name = %found.name, "广度优先查找命中文件夹");
                return Ok(found.id.clone());
            }
            frontier = matches
                .iter()
                .map(|item| format!("{}/items/{}/children", drive, item.id))
                .collect();
        }

        Err(RemoteError::NotFound(format!("文件夹 {}", self.folder_path)))
    }

    // ==========================================
    // 下载
    // ==========================================

    /// 按文件 id 下载（整体读入内存）
    pub async fn try_download_file(&self, file_id: &str) -> RemoteResult<Vec<u8>> {
        let site_id = self.site_id().await?;
        let url = format!(
            "{}/items/{}/content",
            self.drive_url(&site_id),
            urlencoding::encode(file_id)
        );
        let bytes = self.get(&url).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// 按相对 drive 根目录的路径下载（整体读入内存）
    pub async fn try_download_by_path(&self, path: &str) -> RemoteResult<Vec<u8>> {
        let site_id = self.site_id().await?;
        let url = format!(
            "{}/root:/{}:/content",
            self.drive_url(&site_id),
            encode_path_segments(path)
        );
        let bytes = self.get(&url).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl RemoteFileSource for GraphDriveConnector {
    fn folder_path(&self) -> String {
        self.folder_path.clone()
    }

    #[instrument(skip(self), fields(folder_path = %self.folder_path))]
    async fn list_files(&self) -> RemoteResult<Vec<RemoteFile>> {
        let folder_id = self.resolve_folder_id().await?;
        let site_id = self.site_id().await?;
        let url = format!("{}/items/{}/children", self.drive_url(&site_id), folder_id);

        let files: Vec<RemoteFile> = self
            .get_all_items(&url)
            .await?
            .into_iter()
            .filter(|item| item.is_file() && is_supported_file(&item.name))
            .map(RemoteFile::from)
            .collect();
        info!(count = files.len(), "远程文件列表获取完成");
        Ok(files)
    }

    async fn download_file(&self, file_id: &str) -> Option<Vec<u8>> {
        match self.try_download_file(file_id).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(file_id = %file_id, error = %e, "文件下载失败");
                None
            }
        }
    }

    async fn download_by_path(&self, path: &str) -> Option<Vec<u8>> {
        match self.try_download_by_path(path).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(path = %path, error = %e, "按路径下载失败");
                None
            }
        }
    }
}

// ==========================================
// 路径工具
// ==========================================

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_segment(s: &str) -> String {
    collapse_whitespace(s).to_lowercase()
}

fn segment_matches(folder_name: &str, expected: &str) -> bool {
    let name = normalize_segment(folder_name);
    !name.is_empty() && (name.contains(expected) || expected.contains(&name))
}

fn encode_path_segments(path: &str) -> String {
    path.trim_matches('/')
        .split('/')
        .map(|seg| urlencoding::encode(seg).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// 文件夹路径变体（去重，保持顺序）: 原样 / 逐段编码 / 逐段 trim / 合并空白
pub fn folder_path_variants(folder_path: &str) -> Vec<String> {
    let segments: Vec<&str> = folder_path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let candidates = [
        segments.join("/"),
        segments
            .iter()
            .map(|s| urlencoding::encode(s).into_owned())
            .collect::<Vec<_>>()
            .join("/"),
        segments.iter().map(|s| s.trim()).collect::<Vec<_>>().join("/"),
        segments
            .iter()
            .map(|s| collapse_whitespace(s))
            .collect::<Vec<_>>()
            .join("/"),
    ];

    let mut variants: Vec<String> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !candidate.is_empty() && !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }
    variants
}
