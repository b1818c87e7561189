//! OpenStack Swift backend over `reqwest`.
//!
//! Authentication supports TempAuth-style v1 endpoints and Keystone v2/v3
//! password auth, picked from the auth URL's version component. The storage
//! URL and token are kept in a session that is refreshed once when a request
//! comes back `401 Unauthorized`.

use super::{
    BulkDeleteSummary, ByteRange, ByteStream, Capabilities, ListOptions, ObjectStore,
    ObjectTarget, PutOptions, StoreError, StoreResult,
};
use crate::models::{manifest::ManifestRef, object::ObjectInfo};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::TryStreamExt;
use reqwest::{
    Client, Method, RequestBuilder, Response, StatusCode, Url,
    header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, HeaderMap, LAST_MODIFIED, RANGE},
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::{io, time::Duration};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Tracing target for Swift client operations.
pub const TRACING_TARGET: &str = "segment_fs::swift";

const USER_AGENT: &str = "segment-fs";
const OBJECT_MANIFEST: &str = "x-object-manifest";
const AUTH_TOKEN: &str = "x-auth-token";
const LISTING_LIMIT: usize = 10_000;

/// Connection settings for a Swift cluster.
#[derive(Clone, Default)]
pub struct SwiftConfig {
    pub username: String,
    pub password: String,
    pub auth_url: String,
    pub tenant: String,
    pub tenant_id: String,
    pub domain: String,
    pub domain_id: String,
    pub region: String,
    pub insecure_skip_verify: bool,
    pub connect_timeout: Duration,
    pub timeout: Duration,
}

impl std::fmt::Debug for SwiftConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwiftConfig")
            .field("username", &self.username)
            .field("auth_url", &self.auth_url)
            .field("tenant", &self.tenant)
            .field("tenant_id", &self.tenant_id)
            .field("domain", &self.domain)
            .field("domain_id", &self.domain_id)
            .field("region", &self.region)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AuthVersion {
    V1,
    V2,
    V3,
}

impl AuthVersion {
    fn detect(auth_url: &str) -> Self {
        let url = auth_url.trim_end_matches('/');
        if url.ends_with("/v3") || url.contains("/v3/") {
            AuthVersion::V3
        } else if url.ends_with("/v2.0") || url.contains("/v2.0/") {
            AuthVersion::V2
        } else {
            AuthVersion::V1
        }
    }
}

#[derive(Clone, Debug)]
struct Session {
    storage_url: Url,
    token: String,
}

/// Swift client holding an authenticated session.
pub struct SwiftStore {
    http: Client,
    config: SwiftConfig,
    session: RwLock<Session>,
}

impl std::fmt::Debug for SwiftStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwiftStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SwiftStore {
    /// Build the HTTP client and authenticate.
    pub async fn connect(config: SwiftConfig) -> StoreResult<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()?;

        let session = authenticate(&http, &config).await?;
        info!(
            target: TRACING_TARGET,
            storage_url = %session.storage_url,
            "Swift session established"
        );

        Ok(Self {
            http,
            config,
            session: RwLock::new(session),
        })
    }

    async fn reauthenticate(&self) -> StoreResult<Session> {
        debug!(target: TRACING_TARGET, "token rejected, re-authenticating");
        let session = authenticate(&self.http, &self.config).await?;
        *self.session.write().await = session.clone();
        Ok(session)
    }

    /// Send a request built against the current session, refreshing the
    /// token once on `401`. Non-success statuses become errors.
    async fn send<F>(&self, build: F) -> StoreResult<Response>
    where
        F: Fn(&Client, &Url) -> StoreResult<RequestBuilder>,
    {
        let session = self.session.read().await.clone();
        let response = build(&self.http, &session.storage_url)?
            .header(AUTH_TOKEN, &session.token)
            .send()
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check(response).await;
        }

        let session = self.reauthenticate().await?;
        let response = build(&self.http, &session.storage_url)?
            .header(AUTH_TOKEN, &session.token)
            .send()
            .await?;
        check(response).await
    }

    async fn list_page(
        &self,
        container: &str,
        options: &ListOptions,
        marker: Option<&str>,
    ) -> StoreResult<Vec<ListingEntry>> {
        let limit = LISTING_LIMIT.to_string();
        let delimiter = options.delimiter.map(String::from);
        let response = self
            .send(|http, base| {
                let mut query = vec![
                    ("format", "json"),
                    ("limit", limit.as_str()),
                    ("prefix", options.prefix.as_str()),
                ];
                if let Some(delimiter) = delimiter.as_deref() {
                    query.push(("delimiter", delimiter));
                }
                if let Some(marker) = marker {
                    query.push(("marker", marker));
                }
                Ok(http.get(object_url(base, container, None)?).query(&query))
            })
            .await?;
        Ok(response.json().await?)
    }
}

async fn check(response: Response) -> StoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::from_status(status.as_u16(), body))
}

/// `<storage url>/<container>[/<object path>]`, each component escaped.
fn object_url(base: &Url, container: &str, name: Option<&str>) -> StoreResult<Url> {
    let mut url = base.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| StoreError::InvalidResponse(format!("storage url {base} has no path")))?;
        segments.pop_if_empty().push(container);
        if let Some(name) = name {
            segments.extend(name.split('/'));
        }
    }
    Ok(url)
}

/// Escaped `/<container>/<object>` path as used by copy and bulk delete.
fn object_path(container: &str, name: &str) -> StoreResult<String> {
    let base = Url::parse("http://localhost/")
        .map_err(|err| StoreError::InvalidResponse(err.to_string()))?;
    Ok(object_url(&base, container, Some(name))?.path().to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn object_info(name: &str, headers: &HeaderMap) -> ObjectInfo {
    let last_modified = header_str(headers, LAST_MODIFIED.as_str())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|v| v.with_timezone(&Utc))
        .unwrap_or_default();
    ObjectInfo {
        name: name.to_string(),
        bytes: header_str(headers, CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        content_type: header_str(headers, CONTENT_TYPE.as_str())
            .unwrap_or_default()
            .to_string(),
        last_modified,
        etag: header_str(headers, ETAG.as_str()).map(|v| v.trim_matches('"').to_string()),
        manifest: header_str(headers, OBJECT_MANIFEST).and_then(ManifestRef::parse),
        pseudo_directory: false,
    }
}

/// One entry of a JSON container listing.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListingEntry {
    Subdir {
        subdir: String,
    },
    Object {
        name: String,
        bytes: u64,
        #[serde(default)]
        content_type: String,
        #[serde(default)]
        last_modified: String,
        #[serde(default)]
        hash: Option<String>,
    },
}

impl ListingEntry {
    fn name(&self) -> &str {
        match self {
            ListingEntry::Subdir { subdir } => subdir,
            ListingEntry::Object { name, .. } => name,
        }
    }

    fn into_info(self) -> ObjectInfo {
        match self {
            ListingEntry::Subdir { subdir } => ObjectInfo::subdir(subdir),
            ListingEntry::Object {
                name,
                bytes,
                content_type,
                last_modified,
                hash,
            } => ObjectInfo {
                name,
                bytes,
                content_type,
                last_modified: parse_listing_time(&last_modified),
                etag: hash,
                manifest: None,
                pseudo_directory: false,
            },
        }
    }
}

/// Listings report UTC times without an offset, e.g. `2016-11-03T12:34:56.123456`.
fn parse_listing_time(value: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|t| t.and_utc())
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct BulkDeleteResponse {
    #[serde(rename = "Number Deleted", default)]
    deleted: u64,
    #[serde(rename = "Number Not Found", default)]
    not_found: u64,
    #[serde(rename = "Response Status", default)]
    status: String,
    #[serde(rename = "Errors", default)]
    errors: Vec<(String, String)>,
}

#[async_trait]
impl ObjectStore for SwiftStore {
    async fn create_container(&self, container: &str) -> StoreResult<()> {
        self.send(|http, base| {
            Ok(http
                .put(object_url(base, container, None)?)
                .header(CONTENT_LENGTH, 0))
        })
        .await?;
        Ok(())
    }

    async fn head_object(&self, container: &str, name: &str) -> StoreResult<ObjectInfo> {
        let response = self
            .send(|http, base| Ok(http.head(object_url(base, container, Some(name))?)))
            .await?;
        Ok(object_info(name, response.headers()))
    }

    async fn get_object(
        &self,
        container: &str,
        name: &str,
        range: Option<ByteRange>,
    ) -> StoreResult<Bytes> {
        let response = self
            .send(|http, base| {
                let request = http.get(object_url(base, container, Some(name))?);
                Ok(match range {
                    Some(range) => request.header(RANGE, range.header_value()),
                    None => request,
                })
            })
            .await?;
        Ok(response.bytes().await?)
    }

    async fn open_object(
        &self,
        container: &str,
        name: &str,
        offset: u64,
    ) -> StoreResult<ByteStream> {
        let response = self
            .send(|http, base| {
                Ok(http
                    .get(object_url(base, container, Some(name))?)
                    .header(RANGE, ByteRange::from(offset).header_value()))
            })
            .await?;
        Ok(Box::pin(response.bytes_stream().map_err(io::Error::other)))
    }

    async fn put_object(
        &self,
        container: &str,
        name: &str,
        body: Bytes,
        options: PutOptions,
    ) -> StoreResult<()> {
        debug!(target: TRACING_TARGET, container, name, size = body.len(), "PUT object");
        self.send(|http, base| {
            let mut request = http
                .put(object_url(base, container, Some(name))?)
                .header(CONTENT_TYPE, options.content_type.as_str())
                .body(body.clone());
            if let Some(manifest) = &options.manifest {
                request = request.header(OBJECT_MANIFEST, manifest.header_value());
            }
            Ok(request)
        })
        .await?;
        Ok(())
    }

    async fn copy_object(&self, from: &ObjectTarget, to: &ObjectTarget) -> StoreResult<()> {
        let source = object_path(&from.container, &from.name)?;
        self.send(|http, base| {
            Ok(http
                .put(object_url(base, &to.container, Some(&to.name))?)
                .header("x-copy-from", source.as_str())
                .header(CONTENT_LENGTH, 0))
        })
        .await?;
        Ok(())
    }

    async fn delete_object(&self, container: &str, name: &str) -> StoreResult<()> {
        self.send(|http, base| Ok(http.delete(object_url(base, container, Some(name))?)))
            .await?;
        Ok(())
    }

    async fn bulk_delete(&self, targets: &[ObjectTarget]) -> StoreResult<BulkDeleteSummary> {
        let mut body = String::new();
        for target in targets {
            body.push_str(&object_path(&target.container, &target.name)?);
            body.push('\n');
        }

        let response = self
            .send(|http, base| {
                let mut url = base.clone();
                url.set_query(Some("bulk-delete"));
                Ok(http
                    .request(Method::POST, url)
                    .header(CONTENT_TYPE, "text/plain")
                    .header("accept", "application/json")
                    .body(body.clone()))
            })
            .await?;
        let result: BulkDeleteResponse = response.json().await?;

        let mut errors = result.errors;
        if errors.is_empty() && !result.status.starts_with('2') {
            errors.push((String::new(), result.status));
        }
        Ok(BulkDeleteSummary {
            deleted: result.deleted,
            not_found: result.not_found,
            errors,
        })
    }

    async fn list_objects(
        &self,
        container: &str,
        options: &ListOptions,
    ) -> StoreResult<Vec<ObjectInfo>> {
        let mut entries = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = self.list_page(container, options, marker.as_deref()).await?;
            let complete = page.len() < LISTING_LIMIT;
            marker = page.last().map(|entry| entry.name().to_string());
            entries.extend(page.into_iter().map(ListingEntry::into_info));
            if complete || marker.is_none() {
                return Ok(entries);
            }
        }
    }

    /// `GET /info` on the cluster root; not authenticated.
    async fn capabilities(&self) -> StoreResult<Capabilities> {
        let mut url = self.session.read().await.storage_url.clone();
        url.set_path("/info");
        url.set_query(None);
        let response = check(self.http.get(url).send().await?).await?;
        let info: Map<String, Value> = response.json().await?;
        Ok(Capabilities {
            bulk_delete: info.contains_key("bulk_delete"),
        })
    }
}

async fn authenticate(http: &Client, config: &SwiftConfig) -> StoreResult<Session> {
    match AuthVersion::detect(&config.auth_url) {
        AuthVersion::V1 => authenticate_v1(http, config).await,
        AuthVersion::V2 => authenticate_v2(http, config).await,
        AuthVersion::V3 => authenticate_v3(http, config).await,
    }
}

fn parse_storage_url(value: &str) -> StoreResult<Url> {
    Url::parse(value)
        .map_err(|err| StoreError::Auth(format!("invalid storage url `{value}`: {err}")))
}

async fn authenticate_v1(http: &Client, config: &SwiftConfig) -> StoreResult<Session> {
    let user = if config.tenant.is_empty() {
        config.username.clone()
    } else {
        format!("{}:{}", config.tenant, config.username)
    };
    let response = http
        .get(&config.auth_url)
        .header("x-auth-user", user)
        .header("x-auth-key", &config.password)
        .send()
        .await?;
    let response = check(response).await.map_err(auth_error)?;

    let headers = response.headers();
    let storage_url = header_str(headers, "x-storage-url")
        .ok_or_else(|| StoreError::Auth("response has no X-Storage-Url".into()))?;
    let token = header_str(headers, AUTH_TOKEN)
        .ok_or_else(|| StoreError::Auth("response has no X-Auth-Token".into()))?;
    Ok(Session {
        storage_url: parse_storage_url(storage_url)?,
        token: token.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct V2Response {
    access: V2Access,
}

#[derive(Debug, Deserialize)]
struct V2Access {
    token: V2Token,
    #[serde(rename = "serviceCatalog", default)]
    service_catalog: Vec<CatalogEntry<V2Endpoint>>,
}

#[derive(Debug, Deserialize)]
struct V2Token {
    id: String,
}

#[derive(Debug, Deserialize)]
struct V2Endpoint {
    #[serde(default)]
    region: String,
    #[serde(rename = "publicURL")]
    public_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(bound = "E: Deserialize<'de>")]
struct CatalogEntry<E> {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    endpoints: Vec<E>,
}

async fn authenticate_v2(http: &Client, config: &SwiftConfig) -> StoreResult<Session> {
    let mut auth = json!({
        "passwordCredentials": {
            "username": config.username,
            "password": config.password,
        }
    });
    if !config.tenant.is_empty() {
        auth["tenantName"] = json!(config.tenant);
    }
    if !config.tenant_id.is_empty() {
        auth["tenantId"] = json!(config.tenant_id);
    }

    let url = format!("{}/tokens", config.auth_url.trim_end_matches('/'));
    let response = http.post(url).json(&json!({ "auth": auth })).send().await?;
    let response = check(response).await.map_err(auth_error)?;
    let body: V2Response = response.json().await?;

    let endpoint = body
        .access
        .service_catalog
        .iter()
        .filter(|entry| entry.kind == "object-store")
        .flat_map(|entry| entry.endpoints.iter())
        .find(|endpoint| config.region.is_empty() || endpoint.region == config.region)
        .ok_or_else(|| StoreError::Auth("no object-store endpoint in catalog".into()))?;
    Ok(Session {
        storage_url: parse_storage_url(&endpoint.public_url)?,
        token: body.access.token.id,
    })
}

#[derive(Debug, Deserialize)]
struct V3Response {
    token: V3Token,
}

#[derive(Debug, Deserialize)]
struct V3Token {
    #[serde(default)]
    catalog: Vec<CatalogEntry<V3Endpoint>>,
}

#[derive(Debug, Deserialize)]
struct V3Endpoint {
    interface: String,
    #[serde(default)]
    region: String,
    url: String,
}

fn v3_domain(config: &SwiftConfig) -> Value {
    if !config.domain_id.is_empty() {
        json!({ "id": config.domain_id })
    } else if !config.domain.is_empty() {
        json!({ "name": config.domain })
    } else {
        json!({ "id": "default" })
    }
}

async fn authenticate_v3(http: &Client, config: &SwiftConfig) -> StoreResult<Session> {
    let domain = v3_domain(config);
    let mut request = json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": {
                    "user": {
                        "name": config.username,
                        "password": config.password,
                        "domain": domain.clone(),
                    }
                }
            }
        }
    });
    if !config.tenant_id.is_empty() {
        request["auth"]["scope"] = json!({ "project": { "id": config.tenant_id } });
    } else if !config.tenant.is_empty() {
        request["auth"]["scope"] =
            json!({ "project": { "name": config.tenant, "domain": domain } });
    }

    let url = format!("{}/auth/tokens", config.auth_url.trim_end_matches('/'));
    let response = http.post(url).json(&request).send().await?;
    let response = check(response).await.map_err(auth_error)?;
    let token = header_str(response.headers(), "x-subject-token")
        .ok_or_else(|| StoreError::Auth("response has no X-Subject-Token".into()))?
        .to_string();
    let body: V3Response = response.json().await?;

    let endpoint = body
        .token
        .catalog
        .iter()
        .filter(|entry| entry.kind == "object-store")
        .flat_map(|entry| entry.endpoints.iter())
        .filter(|endpoint| endpoint.interface == "public")
        .find(|endpoint| config.region.is_empty() || endpoint.region == config.region)
        .ok_or_else(|| StoreError::Auth("no public object-store endpoint in catalog".into()))?;
    Ok(Session {
        storage_url: parse_storage_url(&endpoint.url)?,
        token,
    })
}

fn auth_error(err: StoreError) -> StoreError {
    match err {
        StoreError::Status { status, body } => StoreError::Auth(format!("status {status}: {body}")),
        StoreError::NotFound => StoreError::Auth("auth endpoint not found".into()),
        other => other,
    }
}
