//! # 获取模块
//!
//! ## 设计思路
//!
//! 组件只依赖 `ImageFetcher` trait：给一个地址，返回字节与 MIME。
//! 生产实现是基于 reqwest 的 `HttpFetcher`；测试中可以注入脚本化实现来精确控制完成时机。
//!
//! ## 实现思路
//!
//! - 相对路径按 `base_url` 解析，仅允许 HTTP/HTTPS。
//! - 手动跟随重定向，限制次数。
//! - 非 2xx 一律视为失败；不做自动重试，新的加载只由新的来源触发。
//! - 流式读取：首包/分块分别超时，按 Content-Length 与累计字节双重限制体积。
//! - 声明了 `image/*` 的响应以声明为准（SVG 等格式没有 magic bytes）；
//!   缺少类型或为 `application/octet-stream` 时才用 magic bytes 识别。
//! - 可选的 LRU 响应缓存，按 TTL 与总字节数淘汰，超过预算的单个响应不入缓存。

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lru::LruCache;

use super::source::RawImageData;
use super::{ImageError, LoaderConfig};

const STREAM_SIGNATURE_PROBE_BYTES: usize = 4096;
const BUFFER_INITIAL_CAPACITY: usize = 16 * 1024;
const FALLBACK_MIME: &str = "application/octet-stream";

/// 图片字节获取接口。
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// 获取 `source` 指向的图片字节。任何非成功响应都返回错误。
    async fn fetch(&self, source: &str) -> Result<RawImageData, ImageError>;
}

struct CachedResponse {
    created_at: Instant,
    data: RawImageData,
}

/// 条目数与总字节数双重受限的响应缓存。
struct ResponseCache {
    entries: LruCache<String, CachedResponse>,
    total_bytes: u64,
    max_bytes: u64,
}

impl ResponseCache {
    fn new(capacity: NonZeroUsize, max_bytes: u64) -> Self {
        Self {
            entries: LruCache::new(capacity),
            total_bytes: 0,
            max_bytes,
        }
    }

    fn get(&mut self, key: &str, ttl: Duration) -> Option<RawImageData> {
        let expired = self.entries.peek(key)?.created_at.elapsed() > ttl;
        if expired {
            self.remove(key);
            return None;
        }

        self.entries.get(key).map(|entry| entry.data.clone())
    }

    fn insert(&mut self, key: String, data: &RawImageData) {
        let size = data.bytes.len() as u64;
        if size > self.max_bytes {
            log::debug!("📦 响应过大，不写入缓存 - {} bytes", size);
            return;
        }

        let entry = CachedResponse {
            created_at: Instant::now(),
            data: data.clone(),
        };
        // push 在容量已满或键已存在时返回被替换的条目
        if let Some((_, old)) = self.entries.push(key, entry) {
            self.total_bytes -= old.data.bytes.len() as u64;
        }
        self.total_bytes += size;

        while self.total_bytes > self.max_bytes {
            let Some((_, evicted)) = self.entries.pop_lru() else {
                break;
            };
            self.total_bytes -= evicted.data.bytes.len() as u64;
        }
    }

    fn remove(&mut self, key: &str) {
        if let Some(old) = self.entries.pop(key) {
            self.total_bytes -= old.data.bytes.len() as u64;
        }
    }
}

/// 基于 reqwest 的获取实现。
pub struct HttpFetcher {
    config: Arc<LoaderConfig>,
    client: reqwest::Client,
    cache: Option<Mutex<ResponseCache>>,
}

impl HttpFetcher {
    /// # 示例
    /// ```rust,no_run
    /// use std::sync::Arc;
    /// use opt_image::image_loader::{HttpFetcher, LoaderConfig};
    ///
    /// let fetcher = HttpFetcher::new(Arc::new(LoaderConfig::default()))?;
    /// # Ok::<(), opt_image::image_loader::ImageError>(())
    /// ```
    pub fn new(config: Arc<LoaderConfig>) -> Result<Self, ImageError> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.download_timeout))
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ImageError::Network(format!("无法创建 HTTP 客户端：{}", e)))?;

        let cache = NonZeroUsize::new(config.cache_entries)
            .filter(|_| config.cache_max_bytes > 0)
            .map(|cap| Mutex::new(ResponseCache::new(cap, config.cache_max_bytes)));

        Ok(Self {
            config,
            client,
            cache,
        })
    }

    /// 把来源解析为绝对 URL。
    fn resolve_url(&self, source: &str) -> Result<reqwest::Url, ImageError> {
        // join 对绝对地址原样返回，因此有 base_url 时统一走 join
        let url = match self.config.base_url.as_deref() {
            Some(base) => reqwest::Url::parse(base).and_then(|base| base.join(source)),
            None => reqwest::Url::parse(source),
        }
        .map_err(|e| ImageError::InvalidFormat(format!("URL 解析失败（{}）：{}", source, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ImageError::InvalidFormat(format!(
                "仅支持 HTTP/HTTPS：{}",
                url.scheme()
            )));
        }

        Ok(url)
    }

    async fn download(&self, url: reqwest::Url) -> Result<RawImageData, ImageError> {
        let config = &self.config;
        let mut current_url = url;

        for redirect_count in 0..=config.max_redirects {
            let response = self
                .client
                .get(current_url.clone())
                .header(reqwest::header::USER_AGENT, config.user_agent.as_str())
                .header(
                    reqwest::header::ACCEPT,
                    "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8",
                )
                .send()
                .await
                .map_err(|e| self.map_reqwest_error(e, current_url.as_str()))?;

            if response.status().is_redirection() {
                if redirect_count >= config.max_redirects {
                    return Err(ImageError::Network(format!(
                        "重定向次数超过限制（{}）",
                        config.max_redirects
                    )));
                }

                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .ok_or_else(|| ImageError::Network("重定向响应缺少 Location 头".to_string()))?
                    .to_str()
                    .map_err(|e| ImageError::InvalidFormat(format!("重定向地址无效：{}", e)))?;

                let next_url = current_url
                    .join(location)
                    .map_err(|e| ImageError::InvalidFormat(format!("重定向 URL 解析失败：{}", e)))?;

                if next_url.scheme() != "http" && next_url.scheme() != "https" {
                    return Err(ImageError::InvalidFormat("重定向目标仅支持 HTTP/HTTPS".to_string()));
                }

                log::debug!("↪️ 跳转到: {}", redact_url_for_log(next_url.as_str()));
                current_url = next_url;
                continue;
            }

            if !response.status().is_success() {
                return Err(ImageError::HttpStatus(response.status().as_u16()));
            }

            let declared_mime = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|ct| ct.to_str().ok())
                .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
                .filter(|ct| !ct.is_empty());

            if let Some(ct) = &declared_mime {
                if !is_image_content_type(ct) && ct != FALLBACK_MIME {
                    return Err(ImageError::InvalidFormat(format!("不是图片类型：{}", ct)));
                }
            }

            let total_len = response.content_length();
            if let Some(size) = total_len {
                if size > config.max_file_size {
                    return Err(ImageError::ResourceLimit(format!(
                        "文件过大：{:.2} MB（限制：{:.2} MB）",
                        size as f64 / 1024.0 / 1024.0,
                        config.max_file_size as f64 / 1024.0 / 1024.0
                    )));
                }
            }

            let declared_image = declared_mime.as_deref().is_some_and(is_image_content_type);
            let sniff = config.validate_signature && !declared_image;

            let bytes = self.read_body(response, total_len, sniff).await?;
            let mime = if declared_image {
                declared_mime.unwrap_or_else(|| FALLBACK_MIME.to_string())
            } else {
                infer::get(&bytes)
                    .map(|kind| kind.mime_type().to_string())
                    .unwrap_or_else(|| FALLBACK_MIME.to_string())
            };

            log::debug!("✅ 下载完成 - {} bytes ({})", bytes.len(), mime);
            return Ok(RawImageData { bytes, mime });
        }

        Err(ImageError::Network("下载流程异常结束".to_string()))
    }

    async fn read_body(
        &self,
        mut response: reqwest::Response,
        total_len: Option<u64>,
        sniff: bool,
    ) -> Result<Bytes, ImageError> {
        let config = &self.config;
        let initial_capacity = total_len
            .map(|len| len.min(config.max_file_size).min(usize::MAX as u64) as usize)
            .filter(|len| *len > 0)
            .unwrap_or(BUFFER_INITIAL_CAPACITY);
        let mut buffer = BytesMut::with_capacity(initial_capacity);
        let mut signature_validated = !sniff;
        let mut received_first_chunk = false;

        loop {
            let read_timeout = if received_first_chunk {
                Duration::from_millis(config.stream_chunk_timeout_ms)
            } else {
                Duration::from_millis(config.stream_first_byte_timeout_ms)
            };

            let next_chunk = tokio::time::timeout(read_timeout, response.chunk())
                .await
                .map_err(|_| {
                    if received_first_chunk {
                        ImageError::Timeout("下载数据流读取超时".to_string())
                    } else {
                        ImageError::Timeout("下载首包超时".to_string())
                    }
                })?
                .map_err(|e| ImageError::Network(format!("下载失败：{}", e)))?;

            let Some(chunk) = next_chunk else {
                break;
            };
            received_first_chunk = true;

            if (buffer.len() + chunk.len()) as u64 > config.max_file_size {
                return Err(ImageError::ResourceLimit("下载后文件超过大小限制".to_string()));
            }
            buffer.extend_from_slice(&chunk);

            if !signature_validated {
                signature_validated =
                    validate_stream_signature_probe(&buffer, STREAM_SIGNATURE_PROBE_BYTES)?;
            }
        }

        if !signature_validated {
            validate_image_signature(&buffer)?;
        }

        Ok(buffer.freeze())
    }

    fn map_reqwest_error(&self, e: reqwest::Error, url: &str) -> ImageError {
        let err_msg = e.to_string().replace(url, &redact_url_for_log(url));

        if e.is_timeout() {
            ImageError::Timeout(format!("下载超时（{}秒）", self.config.download_timeout))
        } else if e.is_connect() {
            ImageError::Network(format!("无法连接：{}", err_msg))
        } else {
            ImageError::Network(format!("请求失败：{}", err_msg))
        }
    }

    fn cached(&self, key: &str) -> Option<RawImageData> {
        let mut cache = self.cache.as_ref()?.lock().ok()?;
        cache.get(key, Duration::from_secs(self.config.cache_ttl_secs))
    }

    fn store(&self, key: String, data: &RawImageData) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let Ok(mut cache) = cache.lock() else {
            return;
        };

        cache.insert(key, data);
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, source: &str) -> Result<RawImageData, ImageError> {
        let url = self.resolve_url(source)?;
        let key = url.to_string();

        if let Some(hit) = self.cached(&key) {
            log::debug!("♻️ 命中下载缓存 - URL: {}", redact_url_for_log(&key));
            return Ok(hit);
        }

        log::info!("🌐 开始获取图片 - URL: {}", redact_url_for_log(&key));
        let data = self.download(url).await?;
        self.store(key, &data);

        Ok(data)
    }
}

fn is_image_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|base| base.trim().to_ascii_lowercase().starts_with("image/"))
        .unwrap_or(false)
}

/// 去掉查询串与片段，避免把令牌写进日志。
pub(crate) fn redact_url_for_log(url: &str) -> String {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return url.split(['?', '#']).next().unwrap_or_default().to_string();
    };

    let host = parsed.host_str().unwrap_or("<unknown-host>");
    let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();

    format!("{}://{}{}{}", parsed.scheme(), host, port, parsed.path())
}

fn validate_image_signature(bytes: &[u8]) -> Result<(), ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::InvalidFormat("图片内容为空".to_string()));
    }

    let kind = infer::get(bytes)
        .ok_or_else(|| ImageError::InvalidFormat("无法识别图片类型".to_string()))?;

    if kind.matcher_type() != infer::MatcherType::Image {
        return Err(ImageError::InvalidFormat(format!(
            "文件签名不是图片类型：{}",
            kind.mime_type()
        )));
    }

    Ok(())
}

/// 流式阶段的签名探测。
///
/// - `Ok(true)`：已识别为图片
/// - `Ok(false)`：字节不足，继续读取
/// - `Err(...)`：已识别为非图片，或超过探测上限仍无法识别
fn validate_stream_signature_probe(bytes: &[u8], probe_limit: usize) -> Result<bool, ImageError> {
    if bytes.is_empty() {
        return Ok(false);
    }

    if let Some(kind) = infer::get(bytes) {
        if kind.matcher_type() != infer::MatcherType::Image {
            return Err(ImageError::InvalidFormat(format!(
                "下载内容不是图片类型：{}",
                kind.mime_type()
            )));
        }
        return Ok(true);
    }

    if bytes.len() >= probe_limit {
        return Err(ImageError::InvalidFormat(format!(
            "下载前 {} 字节内无法识别图片类型",
            probe_limit
        )));
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbaImage::new(2, 2);
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    /// 单连接测试服务器：读取请求后返回固定响应。
    fn serve_once(head: String, body: Vec<u8>) -> (u16, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server failed");
        let port = listener.local_addr().expect("read local addr failed").port();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept failed");
            let mut req_buf = [0u8; 2048];
            let n = stream.read(&mut req_buf).unwrap_or(0);

            stream.write_all(head.as_bytes()).expect("write headers failed");
            stream.write_all(&body).expect("write body failed");
            stream.flush().expect("flush failed");

            String::from_utf8_lossy(&req_buf[..n]).to_string()
        });

        (port, server)
    }

    fn fetcher_for(port: u16) -> HttpFetcher {
        let config = LoaderConfig {
            base_url: Some(format!("http://127.0.0.1:{}/", port)),
            cache_entries: 0,
            ..LoaderConfig::default()
        };
        HttpFetcher::new(Arc::new(config)).expect("fetcher init failed")
    }

    #[tokio::test]
    async fn fetches_relative_path_against_base_url() {
        let body = png_bytes();
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let (port, server) = serve_once(head, body.clone());

        let data = fetcher_for(port).fetch("/logos/acme.png").await.unwrap();
        let request = server.join().expect("server thread failed");

        assert!(request.starts_with("GET /logos/acme.png "));
        assert_eq!(data.bytes.as_ref(), body.as_slice());
        assert_eq!(data.mime, "image/png");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let head = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string();
        let (port, server) = serve_once(head, Vec::new());

        let result = fetcher_for(port).fetch("missing.png").await;
        server.join().expect("server thread failed");

        assert_eq!(result.unwrap_err(), ImageError::HttpStatus(404));
    }

    #[tokio::test]
    async fn declared_svg_is_accepted_without_magic_bytes() {
        let body = br#"<svg xmlns="http://www.w3.org/2000/svg" width="8" height="8"></svg>"#.to_vec();
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: image/svg+xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let (port, server) = serve_once(head, body.clone());

        let data = fetcher_for(port).fetch("/logos/acme.svg").await.unwrap();
        server.join().expect("server thread failed");

        assert_eq!(data.bytes.as_ref(), body.as_slice());
        assert_eq!(data.mime, "image/svg+xml");
    }

    #[tokio::test]
    async fn octet_stream_body_is_sniffed() {
        let body = b"hello world".to_vec();
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let (port, server) = serve_once(head, body);

        let result = fetcher_for(port).fetch("/download").await;
        server.join().expect("server thread failed");

        assert!(matches!(result, Err(ImageError::InvalidFormat(_))));
    }

    #[tokio::test]
    async fn octet_stream_png_gets_sniffed_mime() {
        let body = png_bytes();
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let (port, server) = serve_once(head, body);

        let data = fetcher_for(port).fetch("/download").await.unwrap();
        server.join().expect("server thread failed");

        assert_eq!(data.mime, "image/png");
    }

    #[tokio::test]
    async fn rejects_declared_html_content_type() {
        let body = b"<html></html>".to_vec();
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let (port, server) = serve_once(head, body);

        let result = fetcher_for(port).fetch("/index.html").await;
        server.join().expect("server thread failed");

        assert!(matches!(result, Err(ImageError::InvalidFormat(_))));
    }

    #[tokio::test]
    async fn rejects_oversized_content_length() {
        let head = "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: 4096\r\nConnection: close\r\n\r\n".to_string();
        let (port, server) = serve_once(head, Vec::new());

        let config = LoaderConfig {
            base_url: Some(format!("http://127.0.0.1:{}/", port)),
            max_file_size: 1024,
            ..LoaderConfig::default()
        };
        let fetcher = HttpFetcher::new(Arc::new(config)).unwrap();

        let result = fetcher.fetch("/big.png").await;
        server.join().expect("server thread failed");

        assert!(matches!(result, Err(ImageError::ResourceLimit(_))));
    }

    #[tokio::test]
    async fn second_fetch_is_served_from_cache() {
        let body = png_bytes();
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let (port, server) = serve_once(head, body);

        let config = LoaderConfig {
            base_url: Some(format!("http://127.0.0.1:{}/", port)),
            ..LoaderConfig::default()
        };
        let fetcher = HttpFetcher::new(Arc::new(config)).unwrap();

        let first = fetcher.fetch("/a.png").await.unwrap();
        server.join().expect("server thread failed");
        // 服务器已退出，第二次只能命中缓存
        let second = fetcher.fetch("/a.png").await.unwrap();

        assert_eq!(first.bytes, second.bytes);
    }

    #[tokio::test]
    async fn body_over_cache_budget_is_not_cached() {
        let body = png_bytes();
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let (port, server) = serve_once(head, body.clone());

        let config = LoaderConfig {
            base_url: Some(format!("http://127.0.0.1:{}/", port)),
            cache_max_bytes: body.len() as u64 - 1,
            ..LoaderConfig::default()
        };
        let fetcher = HttpFetcher::new(Arc::new(config)).unwrap();

        fetcher.fetch("/a.png").await.unwrap();
        server.join().expect("server thread failed");
        // 没有进入缓存，只能再次请求已关闭的服务器
        assert!(fetcher.fetch("/a.png").await.is_err());
    }

    fn raw(len: usize) -> RawImageData {
        RawImageData {
            bytes: Bytes::from(vec![0_u8; len]),
            mime: "image/png".to_string(),
        }
    }

    #[test]
    fn cache_evicts_oldest_entries_to_stay_within_byte_budget() {
        let ttl = Duration::from_secs(60);
        let mut cache = ResponseCache::new(NonZeroUsize::new(8).unwrap(), 100);

        cache.insert("a".to_string(), &raw(40));
        cache.insert("b".to_string(), &raw(40));
        cache.insert("c".to_string(), &raw(40));

        assert!(cache.get("a", ttl).is_none());
        assert!(cache.get("b", ttl).is_some());
        assert!(cache.get("c", ttl).is_some());
        assert_eq!(cache.total_bytes, 80);

        // 覆盖同一个键不会重复计数
        cache.insert("c".to_string(), &raw(10));
        assert_eq!(cache.total_bytes, 50);
    }

    #[tokio::test]
    async fn relative_path_without_base_url_fails() {
        let fetcher = HttpFetcher::new(Arc::new(LoaderConfig::default())).unwrap();
        let result = fetcher.fetch("logos/acme.png").await;

        assert!(matches!(result, Err(ImageError::InvalidFormat(_))));
    }

    #[test]
    fn redact_url_for_log_removes_query_and_fragment() {
        let redacted = redact_url_for_log("https://example.com:8443/path/img.png?token=abc123#hash");
        assert_eq!(redacted, "https://example.com:8443/path/img.png");
        assert_eq!(redact_url_for_log("/a.png?sig=1"), "/a.png");
    }

    #[test]
    fn stream_signature_probe_recognizes_png_header() {
        let png_signature = [137_u8, 80, 78, 71, 13, 10, 26, 10, 0, 0, 0, 13];
        assert!(matches!(validate_stream_signature_probe(&png_signature, 64), Ok(true)));
    }

    #[test]
    fn stream_signature_probe_waits_for_more_bytes() {
        assert!(matches!(validate_stream_signature_probe(b"ab", 64), Ok(false)));
    }

    #[test]
    fn content_type_parser_accepts_image_with_params() {
        assert!(is_image_content_type("image/png; charset=utf-8"));
        assert!(is_image_content_type("IMAGE/JPEG"));
        assert!(!is_image_content_type("text/html; charset=utf-8"));
    }
}
