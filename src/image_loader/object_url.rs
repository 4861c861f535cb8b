//! # 临时资源地址（Object URL）
//!
//! ## 设计思路
//!
//! 手动获取的图片字节需要包装成一个可渲染的短期地址（`blob:opt-image/<n>`）。
//! 这类地址占用内存，必须显式释放，否则会随着来源反复切换而无限累积。
//!
//! ## 实现思路
//!
//! - `ObjectUrlStore` 是共享注册表，按地址保存字节与 MIME。
//! - `ObjectUrl` 是独占句柄（RAII）：构造即登记，`Drop` 时自动注销，且只注销一次。
//!   句柄不可 `Clone`，保证“同一时刻最多一个拥有者”。
//! - 注册表本身可 `Clone`（内部 `Arc`），供渲染侧按地址读取字节。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;

const OBJECT_URL_PREFIX: &str = "blob:opt-image/";

/// 注册表中保存的资源。
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub bytes: Bytes,
    pub mime: String,
}

#[derive(Debug, Default)]
struct StoreInner {
    next_id: AtomicU64,
    blobs: Mutex<HashMap<String, StoredBlob>>,
}

/// 临时资源注册表。
#[derive(Debug, Clone, Default)]
pub struct ObjectUrlStore {
    inner: Arc<StoreInner>,
}

impl ObjectUrlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记字节并返回独占句柄。
    ///
    /// # 示例
    /// ```rust
    /// use opt_image::image_loader::ObjectUrlStore;
    ///
    /// let store = ObjectUrlStore::new();
    /// let handle = store.create(vec![1_u8, 2, 3].into(), "image/png");
    /// assert_eq!(store.live_count(), 1);
    /// drop(handle);
    /// assert_eq!(store.live_count(), 0);
    /// ```
    pub fn create(&self, bytes: Bytes, mime: &str) -> ObjectUrl {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let url = format!("{}{}", OBJECT_URL_PREFIX, id);

        self.blobs().insert(
            url.clone(),
            StoredBlob {
                bytes,
                mime: mime.to_string(),
            },
        );
        log::debug!("🧩 创建临时资源 - {}", url);

        ObjectUrl {
            url,
            store: self.clone(),
            revoked: false,
        }
    }

    /// 按地址读取资源；已释放的地址返回 `None`。
    pub fn get(&self, url: &str) -> Option<StoredBlob> {
        self.blobs().get(url).cloned()
    }

    /// 当前仍存活的临时资源数量。
    pub fn live_count(&self) -> usize {
        self.blobs().len()
    }

    /// 把临时资源导出为 base64 data URL（进程外的渲染方无法访问 `blob:` 地址）。
    pub fn export_data_url(&self, url: &str) -> Option<String> {
        let blob = self.get(url)?;
        Some(format!(
            "data:{};base64,{}",
            blob.mime,
            general_purpose::STANDARD.encode(&blob.bytes)
        ))
    }

    pub fn is_object_url(url: &str) -> bool {
        url.starts_with(OBJECT_URL_PREFIX)
    }

    fn revoke(&self, url: &str) -> bool {
        let removed = self.blobs().remove(url).is_some();
        if removed {
            log::debug!("🧹 释放临时资源 - {}", url);
        }
        removed
    }

    fn blobs(&self) -> MutexGuard<'_, HashMap<String, StoredBlob>> {
        self.inner.blobs.lock().unwrap_or_else(|poisoned| {
            log::warn!("⚠️ 临时资源注册表锁已中毒，继续使用内部数据");
            poisoned.into_inner()
        })
    }
}

/// 临时资源的独占句柄，离开作用域时自动释放。
#[derive(Debug)]
pub struct ObjectUrl {
    url: String,
    store: ObjectUrlStore,
    revoked: bool,
}

impl ObjectUrl {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// 提前释放资源。
    pub fn revoke(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.revoked {
            self.revoked = true;
            self.store.revoke(&self.url);
        }
    }
}

impl Drop for ObjectUrl {
    fn drop(&mut self) {
        self.release();
    }
}
