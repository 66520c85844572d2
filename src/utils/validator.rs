use anyhow::Result;
use url::Url;

use crate::config::Config;
use crate::core::error::DownloadError;
use crate::core::task::state::TransferRequest;

pub fn is_valid_url(url: &str) -> bool {
    matches!(Url::parse(url), Ok(parsed) if matches!(parsed.scheme(), "http" | "https"))
}

/// 提交前的同步校验，失败的请求不会进入队列
pub fn validate_request(request: &TransferRequest) -> Result<(), DownloadError> {
    if request.url.trim().is_empty() {
        return Err(DownloadError::Validation("URL不能为空".to_string()));
    }
    if !is_valid_url(request.url.trim()) {
        return Err(DownloadError::Validation(format!("无效的URL: {}", request.url)));
    }
    if request.destination.as_os_str().is_empty() {
        return Err(DownloadError::Validation("目标路径不能为空".to_string()));
    }
    if request.destination.file_name().is_none() {
        return Err(DownloadError::Validation(format!(
            "目标路径不是文件: {:?}",
            request.destination
        )));
    }
    Ok(())
}

pub fn validate_priority(priority: i32) -> Result<()> {
    if !(0..=10).contains(&priority) {
        anyhow::bail!("优先级必须在 0 到 10 之间");
    }
    Ok(())
}

pub fn validate_urls(urls: &[String]) -> Result<()> {
    if urls.is_empty() {
        anyhow::bail!("URL列表不能为空");
    }
    if let Some(bad) = urls.iter().find(|u| !is_valid_url(u)) {
        anyhow::bail!("无效的URL: {}", bad);
    }
    Ok(())
}

pub fn validate_config(config: &Config) -> Result<()> {
    config.validate()?;
    validate_priority(config.default_priority)
}
