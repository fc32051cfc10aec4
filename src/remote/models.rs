// ==========================================
// 经销商库存同步系统 - 远程文档库数据模型
// ==========================================
// Graph 风格 drive REST 接口的响应结构 + 对外暴露的 RemoteFile
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 远程文件（只含已识别的数据交换格式）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub size: Option<i64>,
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SiteResponse {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FolderFacet {}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FileFacet {}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DriveItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(rename = "lastModifiedDateTime", default)]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub folder: Option<FolderFacet>,
    #[serde(default)]
    pub file: Option<FileFacet>,
}

impl DriveItem {
    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }

    pub fn is_file(&self) -> bool {
        self.file.is_some()
    }
}

impl From<DriveItem> for RemoteFile {
    fn from(item: DriveItem) -> Self {
        Self {
            id: item.id,
            name: item.name,
            size: item.size,
            modified_at: item.last_modified,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DriveItemPage {
    #[serde(default)]
    pub value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink", default)]
    pub next_link: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_item_page_deserialize() {
        let body = serde_json::json!({
            "value": [
                {
                    "id": "01A",
                    "name": "jan.csv",
                    "size": 2048,
                    "lastModifiedDateTime": "2024-03-01T08:00:00Z",
                    "file": { "mimeType": "text/csv" }
                },
                { "id": "01B", "name": "Archive", "folder": { "childCount": 3 } }
            ],
            "@odata.nextLink": "https://graph.example/next"
        });
        let page: DriveItemPage = serde_json::from_value(body).unwrap();

        assert_eq!(page.value.len(), 2);
        assert!(page.value[0].is_file());
        assert!(page.value[1].is_folder());
        assert_eq!(page.next_link.as_deref(), Some("https://graph.example/next"));

        let file = RemoteFile::from(page.value[0].clone());
        assert_eq!(file.size, Some(2048));
        assert!(file.modified_at.is_some());
    }
}
