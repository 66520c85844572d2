mod progress;

use std::fmt;
use std::time::Duration;

use crate::core::task::state::{TransferDescriptor, TransferStatus};
pub use progress::ProgressManager;

pub fn print_success(message: &str) {
    println!("✓ {}", message);
}

pub fn print_error(message: &str) {
    eprintln!("✗ {}", message);
}

/// 一次运行结束时的统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadSummary {
    pub total_files: usize,
    pub total_size: u64,
    pub elapsed_time: Duration,
    pub success_count: usize,
    pub failed_count: usize,
    pub cancelled_count: usize,
    pub paused_count: usize,
}

impl DownloadSummary {
    /// 被重试替代的失败记录不计入失败数
    pub fn from_descriptors(descriptors: &[TransferDescriptor], elapsed_time: Duration) -> Self {
        let mut summary = DownloadSummary {
            elapsed_time,
            ..Default::default()
        };
        for descriptor in descriptors {
            if descriptor.retried_by.is_some() {
                continue;
            }
            summary.total_files += 1;
            summary.total_size += descriptor.bytes_transferred;
            match descriptor.status {
                TransferStatus::Completed => summary.success_count += 1,
                TransferStatus::Failed => summary.failed_count += 1,
                TransferStatus::Cancelled => summary.cancelled_count += 1,
                TransferStatus::Paused | TransferStatus::Queued | TransferStatus::Active => {
                    summary.paused_count += 1
                }
            }
        }
        summary
    }
}

impl fmt::Display for DownloadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n下载摘要:")?;
        writeln!(f, "总文件数: {}", self.total_files)?;
        writeln!(f, "总大小: {}", format_size(self.total_size))?;
        writeln!(f, "耗时: {:.2}秒", self.elapsed_time.as_secs_f64())?;
        writeln!(f, "成功: {}", self.success_count)?;
        writeln!(f, "失败: {}", self.failed_count)?;
        writeln!(f, "取消: {}", self.cancelled_count)?;
        writeln!(f, "未完成: {}", self.paused_count)?;
        Ok(())
    }
}

pub fn format_size(size: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

pub fn format_speed(speed: u64) -> String {
    if speed > 1024 * 1024 {
        format!("{:.2} MB/s", speed as f64 / (1024.0 * 1024.0))
    } else if speed > 1024 {
        format!("{:.2} KB/s", speed as f64 / 1024.0)
    } else {
        format!("{} B/s", speed)
    }
}

pub fn format_eta(eta_seconds: Option<u64>) -> String {
    match eta_seconds {
        Some(seconds) if seconds > 3600 => {
            format!("{}h{}m", seconds / 3600, (seconds % 3600) / 60)
        }
        Some(seconds) if seconds > 60 => format!("{}m{}s", seconds / 60, seconds % 60),
        Some(seconds) => format!("{}s", seconds),
        None => "未知".to_string(),
    }
}
