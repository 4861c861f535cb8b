//! # 加载状态
//!
//! `ImageLoadState` 是单个组件实例的全部可变状态，只在组件内部的互斥锁下修改。
//! `generation` 是防竞态的令牌：每接受一次新来源就自增，异步结果提交前必须核对。

use serde::Serialize;

use super::object_url::ObjectUrl;
use super::probe::ImageDimensions;
use super::ImageError;

pub struct ImageLoadState {
    /// 最近一次接受的来源；用于判断来源是否真的变化。
    pub requested_source: Option<String>,
    /// 当前提交给渲染的地址（占位图 / 直连地址 / 临时资源地址 / 回退图）。
    pub resolved_source: String,
    pub is_loading: bool,
    pub has_error: bool,
    /// 本实例独占的临时资源，替换或卸载前必须释放。
    pub owned_resource: Option<ObjectUrl>,
    /// 0 表示尚未接受过任何来源。
    pub generation: u64,
    pub mounted: bool,
    pub natural_size: Option<ImageDimensions>,
    pub last_error: Option<ImageError>,
}

impl ImageLoadState {
    pub fn new(placeholder: &str) -> Self {
        Self {
            requested_source: None,
            resolved_source: placeholder.to_string(),
            is_loading: true,
            has_error: false,
            owned_resource: None,
            generation: 0,
            mounted: true,
            natural_size: None,
            last_error: None,
        }
    }

    /// 来源是否与上一次相同（首次请求永远视为变化）。
    pub fn is_same_request(&self, source: Option<&str>) -> bool {
        self.generation > 0 && self.requested_source.as_deref() == source
    }

    /// 异步结果是否仍然有效。
    pub fn is_current(&self, generation: u64) -> bool {
        self.mounted && self.generation == generation
    }

    /// 释放持有的临时资源（若有）。
    pub fn release_resource(&mut self) {
        if let Some(handle) = self.owned_resource.take() {
            handle.revoke();
        }
    }

    pub fn snapshot(&self) -> LoadSnapshot {
        LoadSnapshot {
            requested_source: self.requested_source.clone(),
            resolved_source: self.resolved_source.clone(),
            is_loading: self.is_loading,
            has_error: self.has_error,
            owned_resource: self.owned_resource.as_ref().map(|h| h.url().to_string()),
            natural_size: self.natural_size,
            error_code: self.last_error.as_ref().map(ImageError::code),
            mounted: self.mounted,
        }
    }
}

/// 对外可观察的状态快照。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSnapshot {
    pub requested_source: Option<String>,
    pub resolved_source: String,
    pub is_loading: bool,
    pub has_error: bool,
    pub owned_resource: Option<String>,
    pub natural_size: Option<ImageDimensions>,
    pub error_code: Option<&'static str>,
    pub mounted: bool,
}
