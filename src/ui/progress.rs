use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{format_eta, format_speed};
use crate::core::events::{EventKind, TransferEvent};
use crate::core::task::state::TransferId;

const BAR_TEMPLATE: &str = "{prefix:20} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}";

// 结构体：ProgressManager
// 按任务 id 管理进度条，由事件总线驱动
pub struct ProgressManager {
    multi: MultiProgress,
    progress_bars: Arc<Mutex<HashMap<TransferId, ProgressBar>>>,
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressManager {
    pub fn new() -> Self {
        ProgressManager {
            multi: MultiProgress::new(),
            progress_bars: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn style() -> ProgressStyle {
        match ProgressStyle::with_template(BAR_TEMPLATE) {
            Ok(style) => style.progress_chars("=> "),
            Err(e) => {
                log::warn!("进度条模板无效: {}", e);
                ProgressStyle::default_bar()
            }
        }
    }

    // 添加进度条；同一任务重复添加时复用已有的
    pub async fn add_progress_bar(&self, id: TransferId, total: u64, msg: &str) {
        let mut bars = self.progress_bars.lock().await;
        bars.entry(id).or_insert_with(|| {
            let pb = self.multi.add(ProgressBar::new(total));
            pb.set_style(Self::style());
            pb.set_prefix(msg.to_string());
            pb
        });
    }

    pub async fn len(&self) -> usize {
        self.progress_bars.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 把一条事件映射到对应任务的进度条
    pub async fn apply(&self, event: &TransferEvent) {
        let name = event
            .snapshot
            .destination()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| event.id.to_string());
        self.add_progress_bar(event.id, event.total_size, &name).await;

        let bars = self.progress_bars.lock().await;
        let pb = match bars.get(&event.id) {
            Some(pb) => pb,
            None => return,
        };
        if event.total_size > 0 {
            pb.set_length(event.total_size);
        }
        pb.set_position(event.bytes_transferred);

        match event.kind {
            EventKind::Queued => pb.set_message("排队中"),
            EventKind::Active | EventKind::Progress => {
                let percentage = if event.total_size > 0 {
                    (event.bytes_transferred as f64 / event.total_size as f64 * 100.0) as u32
                } else {
                    0
                };
                pb.set_message(format!(
                    "{}% | {} | ETA:{}",
                    percentage,
                    format_speed(event.speed_bps),
                    format_eta(event.eta_seconds)
                ));
            }
            EventKind::Paused => pb.set_message("已暂停"),
            EventKind::Completed => pb.finish_with_message("完成"),
            EventKind::Failed => pb.abandon_with_message(format!(
                "失败: {}",
                event.error_reason.as_deref().unwrap_or("unknown")
            )),
            EventKind::Cancelled => pb.abandon_with_message("已取消"),
        }
    }

    /// 在进度条上方输出一行，不打乱进度条
    pub fn println(&self, msg: &str) {
        if self.multi.println(msg).is_err() {
            log::info!("{}", msg);
        }
    }

    /// 结束所有仍在显示的进度条
    pub async fn finish(&self) {
        let bars = self.progress_bars.lock().await;
        for pb in bars.values() {
            if !pb.is_finished() {
                pb.abandon();
            }
        }
    }
}
