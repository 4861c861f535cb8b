//! # 配置模块
//!
//! ## 设计思路
//!
//! 分为两层：
//! - `LoaderConfig`：与具体组件实例无关的加载策略（网络、体积、探测、缓存），可持久化为 JSON。
//! - `ImageProps`：单个组件实例的输入（来源、回退图、占位图、显示属性），
//!   用枚举化的字段代替“任意属性包”，调用方能传什么在类型上一目了然。
//!
//! ## 实现思路
//!
//! - `LoaderConfig` 每个字段都带 `#[serde(default)]`，旧配置文件缺字段时自动补默认值。
//! - `validate` 集中做区间校验，避免非法值流入下载流程。
//! - `ImageProps` 提供链式构造方法，便于调用侧书写。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ImageError;

/// 1×1 透明 GIF，作为默认占位图。
pub const DEFAULT_PLACEHOLDER: &str =
    "data:image/gif;base64,R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7";

/// 加载策略配置。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// 相对路径的解析基准（相当于页面 origin）。为空时相对路径一律视为获取失败。
    pub base_url: Option<String>,
    /// 单张图片允许的最大体积（字节）。
    pub max_file_size: u64,
    /// 整体请求超时（秒）。
    pub download_timeout: u64,
    /// 建立连接超时（秒）。
    pub connect_timeout: u64,
    /// 首包超时（毫秒）。
    pub stream_first_byte_timeout_ms: u64,
    /// 分块读取超时（毫秒）。
    pub stream_chunk_timeout_ms: u64,
    /// 最大重定向次数。
    pub max_redirects: usize,
    /// 是否通过 magic bytes 校验响应体确实是图片。
    pub validate_signature: bool,
    /// 临时资源提交后是否立即探测尺寸，并据此派发 load / error 事件。
    pub verify_decoded: bool,
    /// 探测阶段允许的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 响应缓存条目数，0 表示关闭缓存。
    pub cache_entries: usize,
    /// 响应缓存有效期（秒）。
    pub cache_ttl_secs: u64,
    /// 响应缓存总字节上限，0 表示关闭缓存。单个响应超过该值时不缓存。
    pub cache_max_bytes: u64,
    /// 请求使用的 User-Agent。
    pub user_agent: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            max_file_size: 20 * 1024 * 1024,
            download_timeout: 30,
            connect_timeout: 8,
            stream_first_byte_timeout_ms: 10_000,
            stream_chunk_timeout_ms: 15_000,
            max_redirects: 5,
            validate_signature: true,
            verify_decoded: true,
            max_decoded_pixels: 40_000_000,
            cache_entries: 32,
            cache_ttl_secs: 60,
            cache_max_bytes: 64 * 1024 * 1024,
            user_agent: concat!("opt-image/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl LoaderConfig {
    /// 校验配置区间。
    ///
    /// # 示例
    /// ```rust
    /// use opt_image::image_loader::LoaderConfig;
    ///
    /// let config = LoaderConfig::default();
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn validate(&self) -> Result<(), ImageError> {
        if self.max_file_size == 0 {
            return Err(ImageError::InvalidFormat("max_file_size 不能为 0".to_string()));
        }
        if !(1..=300).contains(&self.download_timeout) {
            return Err(ImageError::InvalidFormat("download_timeout 必须在 1~300 秒之间".to_string()));
        }
        if !(1..=120).contains(&self.connect_timeout) {
            return Err(ImageError::InvalidFormat("connect_timeout 必须在 1~120 秒之间".to_string()));
        }
        if !(100..=120_000).contains(&self.stream_first_byte_timeout_ms) {
            return Err(ImageError::InvalidFormat(
                "stream_first_byte_timeout_ms 必须在 100~120000 毫秒之间".to_string(),
            ));
        }
        if !(100..=120_000).contains(&self.stream_chunk_timeout_ms) {
            return Err(ImageError::InvalidFormat(
                "stream_chunk_timeout_ms 必须在 100~120000 毫秒之间".to_string(),
            ));
        }
        if self.max_redirects > 20 {
            return Err(ImageError::InvalidFormat("max_redirects 不能超过 20".to_string()));
        }
        if self.max_decoded_pixels == 0 {
            return Err(ImageError::InvalidFormat("max_decoded_pixels 不能为 0".to_string()));
        }
        if let Some(base) = &self.base_url {
            let parsed = reqwest::Url::parse(base)
                .map_err(|e| ImageError::InvalidFormat(format!("base_url 格式错误：{}", e)))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(ImageError::InvalidFormat("base_url 仅支持 HTTP/HTTPS".to_string()));
            }
        }
        Ok(())
    }
}

/// 透传给图片元素的显示属性。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayAttributes {
    pub id: Option<String>,
    pub class_name: Option<String>,
    pub style: Option<String>,
    pub title: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// `lazy` / `eager`
    pub loading: Option<String>,
    /// `async` / `sync` / `auto`
    pub decoding: Option<String>,
    pub referrer_policy: Option<String>,
    pub cross_origin: Option<String>,
    pub draggable: Option<bool>,
    /// `data-*` 属性，键不含 `data-` 前缀。
    pub data: BTreeMap<String, String>,
}

/// 单个图片组件实例的输入。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageProps {
    /// 图片地址：绝对 URL、data/blob URL、相对路径或空。
    pub source: Option<String>,
    pub alt: Option<String>,
    /// 加载失败时显示的图片。
    pub fallback_source: Option<String>,
    /// 加载过程中显示的图片。
    pub placeholder: String,
    /// 为 true 时，加载完成前（或失败后）不渲染任何内容。
    pub reveal_only_when_loaded: bool,
    pub attributes: DisplayAttributes,
}

impl Default for ImageProps {
    fn default() -> Self {
        Self {
            source: None,
            alt: None,
            fallback_source: None,
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
            reveal_only_when_loaded: false,
            attributes: DisplayAttributes::default(),
        }
    }
}

impl ImageProps {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::default()
        }
    }

    pub fn alt(mut self, alt: impl Into<String>) -> Self {
        self.alt = Some(alt.into());
        self
    }

    pub fn fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback_source = Some(fallback.into());
        self
    }

    pub fn placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    pub fn reveal_only_when_loaded(mut self, reveal: bool) -> Self {
        self.reveal_only_when_loaded = reveal;
        self
    }

    pub fn class_name(mut self, class_name: impl Into<String>) -> Self {
        self.attributes.class_name = Some(class_name.into());
        self
    }

    pub fn style(mut self, style: impl Into<String>) -> Self {
        self.attributes.style = Some(style.into());
        self
    }

    /// 回退图非空时才视为存在。
    pub(crate) fn effective_fallback(&self) -> Option<&str> {
        self.fallback_source.as_deref().filter(|s| !s.is_empty())
    }
}
