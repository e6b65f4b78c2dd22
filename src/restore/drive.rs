// restoretool/src/restore/drive.rs
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::errors::StoreError;
use crate::google::TokenSource;
use crate::model::CandidateFile;

const GOOGLE_API_BASE: &str = "https://www.googleapis.com/";
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const LIST_FIELDS: &str = "nextPageToken, files(id, name, createdTime, size, parents)";
const PAGE_SIZE: &str = "1000";

/// Which files count as candidates for a batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryQuery {
    pub name_marker: String,
}

impl DiscoveryQuery {
    pub fn new(name_marker: impl Into<String>) -> Self {
        Self {
            name_marker: name_marker.into(),
        }
    }

    /// Not trashed, not a folder, name contains the marker.
    pub fn to_drive_query(&self) -> String {
        format!(
            "trashed = false and mimeType != '{}' and name contains '{}'",
            FOLDER_MIME_TYPE,
            escape_query_literal(&self.name_marker)
        )
    }
}

fn escape_query_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FileMetadata {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Matching files ordered by creation time, oldest first.
    async fn list(&self, query: &DiscoveryQuery) -> Result<Vec<CandidateFile>, StoreError>;

    /// Writes the file's bytes to `destination`, returning the byte count.
    async fn download(&self, file_id: &str, destination: &Path) -> Result<u64, StoreError>;

    async fn delete(&self, file_id: &str) -> Result<(), StoreError>;

    async fn get_metadata(&self, file_id: &str, fields: &str) -> Result<FileMetadata, StoreError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListPage {
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    files: Vec<CandidateFile>,
}

/// Google Drive v3 over REST.
#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    tokens: Arc<dyn TokenSource>,
}

impl DriveClient {
    pub fn new(http: Client, tokens: Arc<dyn TokenSource>) -> Result<Self, StoreError> {
        Self::with_base_url(http, tokens, Url::parse(GOOGLE_API_BASE)?)
    }

    pub fn with_base_url(
        http: Client,
        tokens: Arc<dyn TokenSource>,
        base_url: Url,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            http,
            base_url,
            tokens,
        })
    }

    fn files_url(&self, file_id: Option<&str>) -> Result<Url, StoreError> {
        let path = match file_id {
            Some(id) => format!("drive/v3/files/{}", id),
            None => "drive/v3/files".to_string(),
        };
        Ok(self.base_url.join(&path)?)
    }

    async fn bearer(&self) -> Result<String, StoreError> {
        Ok(format!("Bearer {}", self.tokens.access_token().await?))
    }
}

async fn ensure_success(res: Response) -> Result<Response, StoreError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    Err(StoreError::Api { status, body })
}

#[async_trait]
impl RemoteStore for DriveClient {
    async fn list(&self, query: &DiscoveryQuery) -> Result<Vec<CandidateFile>, StoreError> {
        let q = query.to_drive_query();
        info!(query = %q, "executing Drive query");

        let url = self.files_url(None)?;
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("q", q.as_str()),
                ("pageSize", PAGE_SIZE),
                ("fields", LIST_FIELDS),
                ("orderBy", "createdTime"),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }

            let res = self
                .http
                .get(url.clone())
                .header("Authorization", self.bearer().await?)
                .query(&params)
                .send()
                .await?;
            let page: FileListPage = ensure_success(res).await?.json().await?;
            debug!(count = page.files.len(), "Drive list page received");
            files.extend(page.files);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        info!(count = files.len(), "Drive API returned files");
        Ok(files)
    }

    async fn download(&self, file_id: &str, destination: &Path) -> Result<u64, StoreError> {
        if let Some(parent_dir) = destination.parent() {
            if !parent_dir.exists() {
                tokio::fs::create_dir_all(parent_dir).await?;
            }
        }

        let res = self
            .http
            .get(self.files_url(Some(file_id))?)
            .header("Authorization", self.bearer().await?)
            .query(&[("alt", "media")])
            .send()
            .await?;
        let mut res = ensure_success(res).await?;

        let mut output_file = File::create(destination).await?;
        let mut total_bytes_downloaded = 0u64;
        while let Some(bytes_chunk) = res.chunk().await? {
            output_file.write_all(&bytes_chunk).await?;
            total_bytes_downloaded += bytes_chunk.len() as u64;
        }
        output_file.flush().await?;

        Ok(total_bytes_downloaded)
    }

    async fn delete(&self, file_id: &str) -> Result<(), StoreError> {
        let res = self
            .http
            .delete(self.files_url(Some(file_id))?)
            .header("Authorization", self.bearer().await?)
            .send()
            .await?;
        ensure_success(res).await?;
        Ok(())
    }

    async fn get_metadata(&self, file_id: &str, fields: &str) -> Result<FileMetadata, StoreError> {
        let res = self
            .http
            .get(self.files_url(Some(file_id))?)
            .header("Authorization", self.bearer().await?)
            .query(&[("fields", fields)])
            .send()
            .await?;
        Ok(ensure_success(res).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google::StaticToken;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> DriveClient {
        let base = Url::parse(&format!("{}/", server.uri())).unwrap();
        DriveClient::with_base_url(Client::new(), Arc::new(StaticToken("test-token")), base).unwrap()
    }

    #[test]
    fn discovery_query_matches_filter() {
        let q = DiscoveryQuery::new("Susenas2025M").to_drive_query();
        assert_eq!(
            q,
            "trashed = false and mimeType != 'application/vnd.google-apps.folder' and name contains 'Susenas2025M'"
        );
    }

    #[test]
    fn discovery_query_escapes_quotes() {
        let q = DiscoveryQuery::new("o'brien").to_drive_query();
        assert!(q.ends_with("name contains 'o\\'brien'"));
    }

    #[tokio::test]
    async fn list_follows_page_tokens_in_order() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("pageToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{"id": "b", "name": "Susenas2025M_b.7z", "size": "20480"}]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("orderBy", "createdTime"))
            .and(header("Authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "nextPageToken": "page-2",
                "files": [{"id": "a", "name": "Susenas2025M_a.7z", "size": "10240"}]
            })))
            .mount(&server)
            .await;

        let files = client(&server)
            .await
            .list(&DiscoveryQuery::new("Susenas2025M"))
            .await
            .unwrap();
        let ids: Vec<_> = files.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(files[1].size, 20480);
    }

    #[tokio::test]
    async fn list_error_surfaces_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(403).set_body_string("insufficient permissions"))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .list(&DiscoveryQuery::new("x"))
            .await
            .unwrap_err();
        match err {
            StoreError::Api { status, body } => {
                assert_eq!(status, 403);
                assert!(body.contains("insufficient"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn download_writes_body_to_destination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/abc"))
            .and(query_param("alt", "media"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"7z-archive-bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("archive.7z");
        let written = client(&server).await.download("abc", &dest).await.unwrap();

        assert_eq!(written, 16);
        assert_eq!(std::fs::read(&dest).unwrap(), b"7z-archive-bytes");
    }

    #[tokio::test]
    async fn delete_and_metadata_hit_file_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/drive/v3/files/abc"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/folder-1"))
            .and(query_param("fields", "id, name"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "folder-1", "name": "3201"})),
            )
            .mount(&server)
            .await;

        let drive = client(&server).await;
        drive.delete("abc").await.unwrap();
        let meta = drive.get_metadata("folder-1", "id, name").await.unwrap();
        assert_eq!(meta.name.as_deref(), Some("3201"));
        assert!(meta.parents.is_empty());
    }
}
