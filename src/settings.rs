use std::fs;
use std::path::Path;

use crate::error::AppError;
use crate::image_loader::LoaderConfig;

/// 读取 JSON 配置；文件不存在时返回默认配置。
pub fn load_config(path: &Path) -> Result<LoaderConfig, AppError> {
    if !path.exists() {
        log::info!("配置文件不存在，使用默认配置: {}", path.display());
        return Ok(LoaderConfig::default());
    }

    let content = fs::read_to_string(path)?;
    let config = serde_json::from_str::<LoaderConfig>(&content)
        .map_err(|e| AppError::Config(format!("解析配置文件失败: {}", e)))?;
    config.validate()?;

    Ok(config)
}

/// 以格式化 JSON 写出配置，必要时创建父目录。
pub fn save_config(path: &Path, config: &LoaderConfig) -> Result<(), AppError> {
    config.validate()?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| AppError::Config(format!("序列化配置失败: {}", e)))?;
    fs::write(path, content)?;

    Ok(())
}
