//! Google Cloud Storage driver (JSON API).
//!
//! Talks to the GCS JSON API over HTTPS. Authentication goes through
//! `gcp_auth`: an explicit service-account key file when configured,
//! otherwise the ambient credential chain (metadata server, gcloud
//! config). Object resources report `md5Hash` base64-encoded, which is
//! exactly the manifest digest encoding.

use ringvault_ports::{BoxFuture, StoragePort, StoredObject};
use ringvault_shared::{
    retry_async, ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result, RetryPolicy,
    WorkerPool,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
const DEFAULT_BASE_URL: &str = "https://storage.googleapis.com";

/// Storage driver backed by the GCS JSON API.
#[derive(Clone)]
pub struct GcsStorage {
    bucket: String,
    client: reqwest::Client,
    auth: Arc<dyn gcp_auth::TokenProvider>,
    base_url: String,
    pool: WorkerPool,
    retry: RetryPolicy,
}

impl GcsStorage {
    /// Create a driver for one bucket.
    ///
    /// `key_file` selects an explicit service account; without it the
    /// ambient credential chain is used.
    pub async fn new(bucket: &str, key_file: Option<&Path>) -> Result<Self> {
        let auth: Arc<dyn gcp_auth::TokenProvider> = match key_file {
            Some(path) => {
                let account =
                    gcp_auth::CustomServiceAccount::from_file(path).map_err(auth_error)?;
                Arc::new(account)
            },
            None => gcp_auth::provider().await.map_err(auth_error)?,
        };
        Ok(Self {
            bucket: bucket.to_owned(),
            client: reqwest::Client::new(),
            auth,
            base_url: DEFAULT_BASE_URL.to_owned(),
            pool: WorkerPool::with_default_width(),
            retry: RetryPolicy::default(),
        })
    }

    /// Point the driver at a different endpoint (tests, emulators).
    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_owned();
        self
    }

    async fn bearer(&self) -> Result<String> {
        let token = self
            .auth
            .token(&[STORAGE_SCOPE])
            .await
            .map_err(auth_error)?;
        Ok(format!("Bearer {}", token.as_str()))
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.base_url,
            self.bucket,
            percent_encode(path)
        )
    }

    fn list_url(&self, prefix: &str, page_token: Option<&str>) -> String {
        let mut url = format!(
            "{}/storage/v1/b/{}/o?prefix={}",
            self.base_url,
            self.bucket,
            percent_encode(prefix)
        );
        if let Some(token) = page_token {
            url.push_str("&pageToken=");
            url.push_str(&percent_encode(token));
        }
        url
    }

    fn upload_url(&self, path: &str) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.base_url,
            self.bucket,
            percent_encode(path)
        )
    }

    async fn send_checked(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .header("Authorization", self.bearer().await?)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }

    async fn get_resource(&self, ctx: &RequestContext, path: &str) -> Result<ObjectResource> {
        let url = self.object_url(path);
        retry_async(ctx, self.retry, "gcs.get", || async {
            let response = self.send_checked(self.client.get(&url)).await?;
            response
                .json::<ObjectResource>()
                .await
                .map_err(transport_error)
        })
        .await
    }

    async fn put_bytes(
        &self,
        ctx: &RequestContext,
        path: &str,
        body: Vec<u8>,
    ) -> Result<ObjectResource> {
        let url = self.upload_url(path);
        retry_async(ctx, self.retry, "gcs.upload", || {
            let body = body.clone();
            let url = url.clone();
            async move {
                let response = self
                    .send_checked(
                        self.client
                            .post(&url)
                            .header("Content-Type", "application/octet-stream")
                            .body(body),
                    )
                    .await?;
                response
                    .json::<ObjectResource>()
                    .await
                    .map_err(transport_error)
            }
        })
        .await
    }
}

/// One object resource as returned by the JSON API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource {
    name: String,
    #[serde(default)]
    size: String,
    #[serde(default)]
    md5_hash: String,
    #[serde(default)]
    time_created: Option<String>,
    #[serde(default)]
    updated: Option<String>,
}

impl ObjectResource {
    fn into_stored(self) -> StoredObject {
        StoredObject {
            size: self.size.parse().unwrap_or(0),
            hash: self.md5_hash,
            created_ms: self.time_created.as_deref().and_then(parse_rfc3339_ms),
            modified_ms: self.updated.as_deref().and_then(parse_rfc3339_ms),
            name: self.name,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ObjectResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

impl StoragePort for GcsStorage {
    fn provider(&self) -> &str {
        "gcs"
    }

    fn list(
        &self,
        ctx: &RequestContext,
        prefix: String,
    ) -> BoxFuture<'_, Result<Vec<StoredObject>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let mut objects = Vec::new();
            let mut page_token: Option<String> = None;
            loop {
                ctx.ensure_not_cancelled("gcs.list")?;
                let url = self.list_url(&prefix, page_token.as_deref());
                let page: ListResponse = retry_async(&ctx, self.retry, "gcs.list", || async {
                    let response = self.send_checked(self.client.get(&url)).await?;
                    response.json::<ListResponse>().await.map_err(transport_error)
                })
                .await?;
                objects.extend(page.items.into_iter().map(ObjectResource::into_stored));
                match page.next_page_token {
                    Some(token) => page_token = Some(token),
                    None => return Ok(objects),
                }
            }
        })
    }

    fn get(&self, ctx: &RequestContext, path: String) -> BoxFuture<'_, Result<StoredObject>> {
        let ctx = ctx.clone();
        Box::pin(async move { Ok(self.get_resource(&ctx, &path).await?.into_stored()) })
    }

    fn get_as_bytes(&self, ctx: &RequestContext, path: String) -> BoxFuture<'_, Result<Vec<u8>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let url = format!("{}?alt=media", self.object_url(&path));
            retry_async(&ctx, self.retry, "gcs.get_media", || async {
                let response = self.send_checked(self.client.get(&url)).await?;
                let bytes = response.bytes().await.map_err(transport_error)?;
                Ok(bytes.to_vec())
            })
            .await
        })
    }

    fn get_as_string(&self, ctx: &RequestContext, path: String) -> BoxFuture<'_, Result<String>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let bytes = self.get_as_bytes(&ctx, path).await?;
            String::from_utf8(bytes).map_err(|error| {
                ErrorEnvelope::expected(
                    ErrorCode::invalid_input(),
                    format!("object is not UTF-8: {error}"),
                )
            })
        })
    }

    fn upload_from_string(
        &self,
        ctx: &RequestContext,
        path: String,
        content: String,
    ) -> BoxFuture<'_, Result<StoredObject>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let resource = self.put_bytes(&ctx, &path, content.into_bytes()).await?;
            Ok(resource.into_stored())
        })
    }

    fn upload_file(
        &self,
        ctx: &RequestContext,
        local: PathBuf,
        dest: String,
    ) -> BoxFuture<'_, Result<StoredObject>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let body = tokio::fs::read(&local).await.map_err(ErrorEnvelope::from)?;
            let resource = self.put_bytes(&ctx, &dest, body).await?;
            Ok(resource.into_stored())
        })
    }

    fn upload_many(
        &self,
        ctx: &RequestContext,
        srcs: Vec<PathBuf>,
        dest_prefix: String,
    ) -> BoxFuture<'_, Result<Vec<StoredObject>>> {
        let pool = self.pool;
        // Each pool worker clones the driver, giving it its own handle
        // onto the shared connection pool of the HTTP client.
        let driver = self.clone();
        let caller_ctx = ctx.clone();
        let worker_ctx = ctx.clone();
        Box::pin(async move {
            pool.map(&caller_ctx, srcs, move |src| {
                let driver = driver.clone();
                let ctx = worker_ctx.clone();
                let dest_prefix = dest_prefix.clone();
                async move {
                    let basename = src
                        .file_name()
                        .map(|name| name.to_string_lossy().to_string())
                        .ok_or_else(|| {
                            ErrorEnvelope::expected(
                                ErrorCode::invalid_input(),
                                format!("{} has no file name", src.display()),
                            )
                        })?;
                    driver
                        .upload_file(&ctx, src, format!("{dest_prefix}/{basename}"))
                        .await
                }
            })
            .await
        })
    }

    fn download_many(
        &self,
        ctx: &RequestContext,
        srcs: Vec<String>,
        dest_dir: PathBuf,
    ) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            tokio::fs::create_dir_all(&dest_dir)
                .await
                .map_err(ErrorEnvelope::from)?;
            for src in srcs {
                let bytes = self.get_as_bytes(&ctx, src.clone()).await?;
                let basename = src.rsplit('/').next().unwrap_or(&src).to_owned();
                tokio::fs::write(dest_dir.join(basename), bytes)
                    .await
                    .map_err(ErrorEnvelope::from)?;
            }
            Ok(())
        })
    }

    fn delete(&self, ctx: &RequestContext, path: String) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let url = self.object_url(&path);
            retry_async(&ctx, self.retry, "gcs.delete", || async {
                self.send_checked(self.client.delete(&url)).await?;
                Ok(())
            })
            .await
        })
    }

    fn path_prefix(&self) -> String {
        String::new()
    }
}

fn auth_error(error: impl std::fmt::Display) -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::auth(),
        format!("GCS authentication failed: {error}"),
        ErrorClass::NonRetriable,
    )
}

fn transport_error(error: reqwest::Error) -> ErrorEnvelope {
    ErrorEnvelope::transient(format!("GCS request failed: {error}"))
}

fn status_error(status: reqwest::StatusCode, body: &str) -> ErrorEnvelope {
    let detail = body.chars().take(200).collect::<String>();
    let message = format!("GCS returned {status}: {detail}");
    match status.as_u16() {
        401 | 403 => ErrorEnvelope::unexpected(ErrorCode::auth(), message, ErrorClass::NonRetriable),
        404 => ErrorEnvelope::expected(ErrorCode::not_found(), message),
        409 | 412 => {
            ErrorEnvelope::unexpected(ErrorCode::conflict(), message, ErrorClass::NonRetriable)
        },
        408 | 429 => ErrorEnvelope::transient(message),
        code if code >= 500 => ErrorEnvelope::transient(message),
        _ => ErrorEnvelope::unexpected(ErrorCode::io(), message, ErrorClass::NonRetriable),
    }
}

fn percent_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            },
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// Parse an RFC 3339 timestamp into milliseconds since the epoch.
///
/// Handles the `Z` suffix and numeric offsets; fractional seconds are
/// truncated to millisecond precision.
fn parse_rfc3339_ms(raw: &str) -> Option<u64> {
    let (date, time) = raw.split_once('T')?;
    let mut date_parts = date.split('-');
    let year: i64 = date_parts.next()?.parse().ok()?;
    let month: u32 = date_parts.next()?.parse().ok()?;
    let day: u32 = date_parts.next()?.parse().ok()?;

    let (clock, offset_minutes) = split_offset(time)?;
    let mut clock_parts = clock.split(':');
    let hour: u64 = clock_parts.next()?.parse().ok()?;
    let minute: u64 = clock_parts.next()?.parse().ok()?;
    let second_field = clock_parts.next()?;
    let (second_str, millis) = match second_field.split_once('.') {
        Some((whole, frac)) => {
            let frac_ms: u64 = format!("{frac}000").get(0..3)?.parse().ok()?;
            (whole, frac_ms)
        },
        None => (second_field, 0),
    };
    let second: u64 = second_str.parse().ok()?;

    let days = days_from_civil(year, month, day);
    let seconds = days
        .checked_mul(86_400)?
        .checked_add(i64::try_from(hour * 3_600 + minute * 60 + second).ok()?)?
        .checked_sub(i64::from(offset_minutes) * 60)?;
    let ms = seconds.checked_mul(1_000)?.checked_add(i64::try_from(millis).ok()?)?;
    u64::try_from(ms).ok()
}

fn split_offset(time: &str) -> Option<(&str, i32)> {
    if let Some(clock) = time.strip_suffix('Z') {
        return Some((clock, 0));
    }
    for (position, ch) in time.char_indices().skip(1) {
        if ch == '+' || ch == '-' {
            let (clock, offset) = time.split_at(position);
            let sign = if ch == '-' { -1 } else { 1 };
            let (hours, minutes) = offset[1..].split_once(':')?;
            let total = hours.parse::<i32>().ok()? * 60 + minutes.parse::<i32>().ok()?;
            return Some((clock, sign * total));
        }
    }
    Some((time, 0))
}

// Howard Hinnant's civil-from-days inverse: days since 1970-01-01.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = i64::from((month + 9) % 12);
    let doy = (153 * mp + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}
