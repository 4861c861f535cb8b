//! # 来源识别与中间模型
//!
//! ## 设计思路
//!
//! 把“外部传入的字符串”先归类为 `ImageSource`，再由组件按类别决定解析策略：
//! - `Missing`：直接进入错误态，不做任何 I/O
//! - `Remote` / `Inline`：直接交给宿主渲染，加载器自身不发请求
//! - `Relative`：需要手动获取字节并包装为临时资源
//!
//! `RawImageData` 是获取阶段的输出，仅包含字节与 MIME。

use bytes::Bytes;

/// 图片来源分类。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// 未提供地址（`None` 或空串）。
    Missing,
    /// `http(s)://` 绝对地址，由宿主原生加载。
    Remote(String),
    /// `data:` 或 `blob:` 地址，已经是可直接渲染的资源。
    Inline(String),
    /// 相对路径或其他需要手动获取的地址。
    Relative(String),
}

impl ImageSource {
    /// 按前缀规则归类输入地址。
    ///
    /// # 示例
    /// ```rust
    /// use opt_image::image_loader::ImageSource;
    ///
    /// assert!(matches!(ImageSource::classify(Some("/logos/acme.png")), ImageSource::Relative(_)));
    /// assert!(matches!(ImageSource::classify(Some("https://cdn.example.com/a.png")), ImageSource::Remote(_)));
    /// assert_eq!(ImageSource::classify(Some("")), ImageSource::Missing);
    /// ```
    pub fn classify(source: Option<&str>) -> Self {
        let Some(source) = source.filter(|s| !s.is_empty()) else {
            return Self::Missing;
        };

        // 含 blob: 片段的 http 地址不能直接交给宿主
        if is_absolute_http(source) && !source.contains("blob:") {
            return Self::Remote(source.to_string());
        }

        if is_inline(source) {
            return Self::Inline(source.to_string());
        }

        Self::Relative(source.to_string())
    }
}

fn has_prefix_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn is_absolute_http(source: &str) -> bool {
    has_prefix_ignore_case(source, "http://") || has_prefix_ignore_case(source, "https://")
}

fn is_inline(source: &str) -> bool {
    has_prefix_ignore_case(source, "data:") || has_prefix_ignore_case(source, "blob:")
}

/// 获取阶段输出：原始字节与 MIME 类型。
#[derive(Debug, Clone)]
pub struct RawImageData {
    pub bytes: Bytes,
    pub mime: String,
}
