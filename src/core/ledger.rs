use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::DownloadError;
use crate::core::task::state::{TransferDescriptor, TransferStatus};

/// 任务记录文件：每次生命周期变化时整体写入一次 JSON
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件不存在时返回空列表
    pub fn load(&self) -> Result<Vec<TransferDescriptor>, DownloadError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&data)
            .map_err(|e| DownloadError::Storage(format!("任务记录格式错误 {:?}: {}", self.path, e)))
    }

    /// 先写临时文件再重命名，中途退出不会留下半个 JSON
    pub fn save<'a, I>(&self, descriptors: I) -> Result<(), DownloadError>
    where
        I: IntoIterator<Item = &'a TransferDescriptor>,
    {
        let mut records: Vec<&TransferDescriptor> = descriptors.into_iter().collect();
        records.sort_by_key(|d| d.created_at);
        let json = serde_json::to_string_pretty(&records)
            .map_err(|e| DownloadError::Storage(format!("无法序列化任务记录: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// 把上次进程留下的记录转换成可以继续调度的状态。
/// 执行中/排队中的任务没有执行器了：自动恢复时重新排队，否则转为暂停。
pub fn restore(records: Vec<TransferDescriptor>, auto_resume: bool) -> Vec<TransferDescriptor> {
    records
        .into_iter()
        .map(|mut d| {
            if matches!(d.status, TransferStatus::Active | TransferStatus::Queued) {
                d.status = if auto_resume {
                    TransferStatus::Queued
                } else {
                    TransferStatus::Paused
                };
                d.resume_allowed = true;
                d.speed_bps = 0;
                d.eta_seconds = None;
            } else if d.status == TransferStatus::Paused {
                d.resume_allowed = true;
                d.speed_bps = 0;
                d.eta_seconds = None;
            }
            d
        })
        .collect()
}
