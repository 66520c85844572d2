use actix::prelude::*;
use anyhow::Context as _;
use clap::Parser;
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute, terminal,
};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

use galadown::cli::{self, Args};
use galadown::config::{Config, SharedConfig};
use galadown::core::task::{AwcFetcher, DirectLinkProvider, HttpFetcher, LinkProvider, TransferRequest};
use galadown::core::task::state::{TransferId, TransferStatus};
use galadown::core::{
    CancelTransfer, DownloadManagerActor, EventBus, EventKind, Ledger, ListAll, PauseTransfer,
    ResumeTransfer, RetryPolicy, RetryTransfer, Shutdown, SubmitTransfer, TransferEvent,
};
use galadown::ui::{print_error, print_success, DownloadSummary, ProgressManager};
use galadown::utils::logger::{init_logger, DEFAULT_LOG_FILE, DEFAULT_MAX_LOG_SIZE};

const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(100);
const TOKEN_ENV: &str = "GALADOWN_TOKEN";

#[actix::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Err(e) = init_logger(DEFAULT_LOG_FILE, args.log_level(), DEFAULT_MAX_LOG_SIZE) {
        eprintln!("无法初始化日志: {}", e);
    }
    log::info!(
        "galadown {} ({}) 启动",
        env!("CARGO_PKG_VERSION"),
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown")
    );

    // --edit 逻辑：确保配置文件存在后打开编辑器
    if args.edit_config {
        Config::load(&args.config)?;
        cli::open_config_in_editor(&args.config);
        return Ok(());
    }

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            log::error!("参数解析失败: {}", e);
            print_error(&format!("参数解析失败: {}", e));
            std::process::exit(1);
        }
    };

    // 没有给出URL时只继续上次未完成的任务
    let urls = if args.urls.is_empty() && args.file.is_none() {
        Vec::new()
    } else {
        match args.get_urls() {
            Ok(urls) => urls,
            Err(e) => {
                log::error!("获取URL列表失败: {}", e);
                print_error(&format!("获取URL列表失败: {}", e));
                std::process::exit(1);
            }
        }
    };

    log::info!("配置文件路径: {}", args.config);
    log::info!("{}", config.get_summary());
    println!("{}", config.get_summary());

    let events = EventBus::new();
    let (_subscription, event_rx) = events.subscribe_channel();
    let download_manager = start_manager(&args, &config, events);
    log::info!("下载管理器已启动");

    submit_urls(&download_manager, &args, &config, &urls).await?;

    let restored = download_manager
        .send(ListAll)
        .await?
        .iter()
        .filter(|d| matches!(d.status, TransferStatus::Queued | TransferStatus::Active))
        .count();
    if urls.is_empty() && restored == 0 {
        print_error("没有可下载的任务");
        download_manager.send(Shutdown).await?;
        return Ok(());
    }

    println!("\n开始下载... (按 'p' 暂停, 'r' 恢复, 'c' 取消, 'q' 退出)");
    let started = Instant::now();

    terminal::enable_raw_mode()?;
    execute!(std::io::stdout(), cursor::Hide)?;
    let progress = ProgressManager::new();
    let policy = RetryPolicy::from_config(&config);

    let result = run_download_loop(&download_manager, &progress, &policy, event_rx).await;

    // 恢复终端
    execute!(std::io::stdout(), cursor::Show)?;
    terminal::disable_raw_mode()?;
    progress.finish().await;

    let all = download_manager.send(ListAll).await?;
    // Active 的任务会被暂停并写入任务记录，下次启动继续
    download_manager.send(Shutdown).await?;
    result?;

    let summary = DownloadSummary::from_descriptors(&all, started.elapsed());
    println!("{}", summary);
    if summary.paused_count > 0 && !config.state_file.trim().is_empty() {
        println!("未完成的任务已保存，下次启动时继续");
    }
    log::info!(
        "下载结束 - 成功: {}, 失败: {}, 取消: {}, 未完成: {}",
        summary.success_count,
        summary.failed_count,
        summary.cancelled_count,
        summary.paused_count
    );

    Ok(())
}

fn start_manager(args: &Args, config: &Config, events: EventBus) -> Addr<DownloadManagerActor> {
    let settings = Arc::new(SharedConfig::new(config.clone()));
    let token = args.token.clone().or_else(|| std::env::var(TOKEN_ENV).ok());
    let links: Rc<dyn LinkProvider> = Rc::new(DirectLinkProvider::with_token(token));
    let fetcher: Rc<dyn HttpFetcher> = Rc::new(AwcFetcher::new(
        &config.user_agent,
        Duration::from_secs(config.timeout),
    ));

    let mut manager = DownloadManagerActor::new(settings, links, fetcher, events);
    if !config.state_file.trim().is_empty() {
        manager = manager.with_ledger(Ledger::new(&config.state_file), config.auto_resume_on_startup);
    }
    manager.start()
}

/// 为每个URL提交一个任务；单个URL失败不影响其它URL
async fn submit_urls(
    download_manager: &Addr<DownloadManagerActor>,
    args: &Args,
    config: &Config,
    urls: &[String],
) -> anyhow::Result<()> {
    for url in urls {
        let destination = match cli::destination_for(url, args.file_name.as_deref(), config) {
            Ok(destination) => destination,
            Err(e) => {
                print_error(&format!("{}: {}", url, e));
                continue;
            }
        };
        let mut request = TransferRequest::new(url.clone(), destination.clone()).with_kind(args.kind);
        if let Some(item) = &args.item_ref {
            request = request.with_item_ref(item.clone());
        }

        let submitted = download_manager
            .send(SubmitTransfer {
                request,
                priority: config.default_priority,
            })
            .await
            .context("下载管理器已停止")?;
        match submitted {
            Ok(id) => {
                log::info!("创建下载任务 {}: {} -> {:?}", id, url, destination);
                print_success(&format!("创建下载任务: {}", destination.display()));
            }
            Err(e) => {
                log::error!("创建下载任务失败: {} - {}", url, e);
                print_error(&format!("创建下载任务失败: {} - {}", url, e));
            }
        }
    }
    Ok(())
}

/// 待执行的自动重试
struct PendingRetry {
    due: Instant,
    id: TransferId,
    attempt: usize,
}

/// 运行下载主循环：处理键盘输入、刷新进度条、安排自动重试
async fn run_download_loop(
    download_manager: &Addr<DownloadManagerActor>,
    progress: &ProgressManager,
    policy: &RetryPolicy,
    mut event_rx: UnboundedReceiver<TransferEvent>,
) -> anyhow::Result<()> {
    // 每个任务所在重试链已经重试过的次数
    let mut attempts: HashMap<TransferId, usize> = HashMap::new();
    let mut retries: Vec<PendingRetry> = Vec::new();
    // 用户主动暂停后，暂停的任务也算未结束
    let mut held = false;

    loop {
        // 处理键盘输入；poll 不等待，避免阻塞 actor 所在线程
        while event::poll(Duration::ZERO)? {
            let key = match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => key,
                _ => continue,
            };
            let ctrl_c = key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL);
            match key.code {
                KeyCode::Char('q') | KeyCode::Char('Q') => {
                    log::info!("用户主动退出下载");
                    return Ok(());
                }
                _ if ctrl_c => {
                    log::info!("用户主动退出下载");
                    return Ok(());
                }
                KeyCode::Char('p') | KeyCode::Char('P') => {
                    for d in download_manager.send(ListAll).await? {
                        if d.can_pause() {
                            download_manager.do_send(PauseTransfer(d.id));
                        }
                    }
                    held = true;
                    progress.println("已暂停所有下载任务 (按 'r' 恢复)");
                    log::info!("用户暂停所有下载任务");
                }
                KeyCode::Char('r') | KeyCode::Char('R') => {
                    for d in download_manager.send(ListAll).await? {
                        if d.status == TransferStatus::Paused {
                            download_manager.do_send(ResumeTransfer(d.id));
                        }
                    }
                    held = false;
                    progress.println("已恢复所有下载任务");
                    log::info!("用户恢复所有下载任务");
                }
                KeyCode::Char('c') | KeyCode::Char('C') => {
                    for d in download_manager.send(ListAll).await? {
                        if d.can_cancel() {
                            download_manager.do_send(CancelTransfer(d.id));
                        }
                    }
                    retries.clear();
                    progress.println("已取消所有下载任务");
                    log::info!("用户取消所有下载任务");
                }
                _ => {}
            }
        }

        // 事件驱动进度条；失败的任务按策略安排重试
        while let Ok(event) = event_rx.try_recv() {
            progress.apply(&event).await;
            if event.kind != EventKind::Failed {
                continue;
            }
            let reason = match &event.snapshot.error {
                Some(reason) => reason,
                None => continue,
            };
            let attempt = attempts.get(&event.id).copied().unwrap_or(0);
            if policy.should_retry(reason, attempt) {
                let delay = policy.delay_for(attempt);
                log::info!("任务 {} 将在 {:?} 后第 {} 次重试", event.id, delay, attempt + 1);
                retries.push(PendingRetry {
                    due: Instant::now() + delay,
                    id: event.id,
                    attempt: attempt + 1,
                });
            }
        }

        let now = Instant::now();
        let (due, waiting): (Vec<_>, Vec<_>) = retries.drain(..).partition(|r| r.due <= now);
        retries = waiting;
        for retry in due {
            match download_manager.send(RetryTransfer(retry.id)).await? {
                Ok(next) => {
                    attempts.insert(next, retry.attempt);
                }
                // 用户已手动恢复或重试
                Err(e) => log::warn!("自动重试 {} 未执行: {}", retry.id, e),
            }
        }

        // 检查是否所有任务都结束
        let all = download_manager.send(ListAll).await?;
        let live = all.iter().any(|d| match d.status {
            TransferStatus::Queued | TransferStatus::Active => true,
            TransferStatus::Paused => held,
            _ => false,
        });
        if !live && retries.is_empty() {
            return Ok(());
        }

        tokio::time::sleep(PROGRESS_UPDATE_INTERVAL).await;
    }
}
