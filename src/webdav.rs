use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, ETAG, IF_MATCH};
use reqwest::{Client, Method, Response, StatusCode, Url};
use std::time::Duration;

use crate::{
    config::StoreConfig,
    error::{Result, StoreError},
    paths,
    store::RemoteStore,
    types::{DirectoryEntry, DirectoryListing, FileContent},
};

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:resourcetype/>
    <d:getcontentlength/>
    <d:getlastmodified/>
    <d:creationdate/>
  </d:prop>
</d:propfind>"#;

/// WebDAV-backed document store
///
/// - `PROPFIND` (depth 1) for listings
/// - `GET` / `PUT` for whole documents, `If-Match` for conditional writes
/// - `MKCOL` for collections
#[derive(Clone)]
pub struct WebDavStore {
    client: Client,
    base_url: Url,
}

/// One `<response>` element of a multistatus body
#[derive(Debug, Default, PartialEq)]
struct PropEntry {
    href: String,
    is_collection: bool,
    content_length: Option<u64>,
    last_modified: Option<String>,
    created_at: Option<String>,
}

#[derive(Clone, Copy)]
enum Field {
    Href,
    ContentLength,
    LastModified,
    CreationDate,
}

impl WebDavStore {
    /// Create a store from connection settings
    ///
    /// Basic credentials are attached to every request.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| StoreError::InvalidConfig {
            message: format!("base_url {:?}: {}", config.base_url, e),
        })?;

        let mut headers = HeaderMap::new();
        if let Some(user) = &config.username {
            let password = config.password.as_deref().unwrap_or_default();
            let token = base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", user, password));
            let mut value = HeaderValue::from_str(&format!("Basic {}", token)).map_err(|_| {
                StoreError::InvalidConfig {
                    message: "credentials contain characters not allowed in a header".to_string(),
                }
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, base_url })
    }

    /// Resolve a store path against the base collection
    fn url_for(&self, path: &str) -> Url {
        let base = self.base_url.path().trim_end_matches('/');
        let full = format!("{}/{}", base, paths::encode_path(path.trim_start_matches('/')));
        let mut url = self.base_url.clone();
        url.set_path(&full);
        url
    }

    /// Convert an `href` from a multistatus body back to a store path
    ///
    /// Servers answer with absolute paths (sometimes full URLs) that include
    /// the base collection; the prefix is removed, the encoding is kept.
    fn strip_base_path(&self, href: &str) -> String {
        let href_path = match Url::parse(href) {
            Ok(url) => url.path().to_string(),
            Err(_) => href.to_string(),
        };
        let base = self.base_url.path().trim_end_matches('/');

        let relative = match href_path.strip_prefix(base).filter(at_segment_boundary) {
            Some(rest) => rest.to_string(),
            None => {
                let decoded = paths::decode(&href_path);
                match decoded
                    .strip_prefix(paths::decode(base).as_str())
                    .filter(at_segment_boundary)
                {
                    Some(rest) => rest.to_string(),
                    None => href_path.clone(),
                }
            }
        };

        if relative.starts_with('/') {
            relative
        } else {
            format!("/{}", relative)
        }
    }

    fn to_entry(&self, prop: PropEntry) -> DirectoryEntry {
        let path = self.strip_base_path(&prop.href);
        let name = paths::file_name(&path);
        let entry = if prop.is_collection {
            DirectoryEntry::directory(name, path)
        } else {
            DirectoryEntry::file(name, path, prop.content_length)
        };
        entry.with_timestamps(prop.last_modified, prop.created_at)
    }

    async fn error_for(response: Response, path: &str) -> StoreError {
        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => StoreError::not_found(path),
            StatusCode::PRECONDITION_FAILED => StoreError::PreconditionFailed {
                path: path.to_string(),
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::RemoteUnavailable {
                status: status.as_u16(),
                message: format!("access to {} was rejected", path),
            },
            status if status.is_server_error() => StoreError::RemoteUnavailable {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            },
            status => StoreError::protocol(format!(
                "Unexpected status {} for {}: {}",
                status,
                path,
                response.text().await.unwrap_or_default()
            )),
        }
    }
}

fn at_segment_boundary(rest: &&str) -> bool {
    rest.is_empty() || rest.starts_with('/')
}

fn dav_method(name: &'static str) -> Result<Method> {
    Method::from_bytes(name.as_bytes())
        .map_err(|_| StoreError::protocol(format!("invalid HTTP method {}", name)))
}

/// Parse a `207 Multi-Status` body
///
/// Element prefixes vary between servers (`d:`, `D:`, `lp1:`), so only local
/// names are matched.
fn parse_multistatus(body: &str) -> Result<Vec<PropEntry>> {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<PropEntry> = None;
    let mut field: Option<Field> = None;
    let mut saw_root = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"multistatus" => saw_root = true,
                b"response" => current = Some(PropEntry::default()),
                b"href" => field = Some(Field::Href),
                b"getcontentlength" => field = Some(Field::ContentLength),
                b"getlastmodified" => field = Some(Field::LastModified),
                b"creationdate" => field = Some(Field::CreationDate),
                b"collection" => {
                    if let Some(entry) = current.as_mut() {
                        entry.is_collection = true;
                    }
                }
                _ => {}
            },
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"collection" {
                    if let Some(entry) = current.as_mut() {
                        entry.is_collection = true;
                    }
                }
            }
            Event::Text(t) => {
                if let (Some(entry), Some(f)) = (current.as_mut(), field) {
                    let text = t.unescape()?.trim().to_string();
                    match f {
                        Field::Href => entry.href = text,
                        Field::ContentLength => entry.content_length = text.parse().ok(),
                        Field::LastModified => entry.last_modified = Some(text),
                        Field::CreationDate => entry.created_at = Some(text),
                    }
                }
            }
            Event::End(e) => {
                field = None;
                if e.local_name().as_ref() == b"response" {
                    let entry = current
                        .take()
                        .ok_or_else(|| StoreError::protocol("unbalanced <response> element"))?;
                    if entry.href.is_empty() {
                        return Err(StoreError::protocol("<response> without <href>"));
                    }
                    entries.push(entry);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(StoreError::protocol("body is not a DAV multistatus document"));
    }
    if current.is_some() {
        return Err(StoreError::protocol("truncated multistatus body"));
    }
    Ok(entries)
}

#[async_trait]
impl RemoteStore for WebDavStore {
    async fn list(&self, path: &str) -> Result<DirectoryListing> {
        let url = self.url_for(&paths::normalize(path, true));
        tracing::debug!("PROPFIND {}", url);

        let response = self
            .client
            .request(dav_method("PROPFIND")?, url)
            .header("Depth", "1")
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(PROPFIND_BODY)
            .send()
            .await?;

        match response.status() {
            StatusCode::MULTI_STATUS | StatusCode::OK => {
                let body = response.text().await?;
                let entries = parse_multistatus(&body)?
                    .into_iter()
                    .map(|prop| self.to_entry(prop))
                    .collect();

                Ok(DirectoryListing {
                    path: path.to_string(),
                    entries,
                })
            }
            _ => Err(Self::error_for(response, path).await),
        }
    }

    async fn fetch_file(&self, path: &str) -> Result<FileContent> {
        let url = self.url_for(path);
        tracing::debug!("GET {}", url);

        let response = self.client.get(url.clone()).send().await?;

        match response.status() {
            StatusCode::OK => {
                let etag = response
                    .headers()
                    .get(ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);

                let content = response.bytes().await?;

                Ok(FileContent {
                    content,
                    source_path: url.to_string(),
                    etag,
                })
            }
            _ => Err(Self::error_for(response, path).await),
        }
    }

    async fn put_file(
        &self,
        path: &str,
        content: Bytes,
        if_match: Option<&str>,
    ) -> Result<Option<String>> {
        let url = self.url_for(path);
        tracing::debug!("PUT {} ({} bytes)", url, content.len());

        let mut request = self.client.put(url).body(content);
        if let Some(etag) = if_match {
            request = request.header(IF_MATCH, etag);
        }
        let response = request.send().await?;

        if response.status().is_success() {
            Ok(response
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(String::from))
        } else {
            Err(Self::error_for(response, path).await)
        }
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let url = self.url_for(&paths::normalize(path, true));
        tracing::debug!("MKCOL {}", url);

        let response = self.client.request(dav_method("MKCOL")?, url).send().await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::METHOD_NOT_ALLOWED => {
                tracing::debug!("collection {} already exists", path);
                Ok(())
            }
            _ => Err(Self::error_for(response, path).await),
        }
    }

    fn identifier(&self) -> String {
        format!("webdav://{}{}", self.base_url.host_str().unwrap_or(""), self.base_url.path())
    }
}
