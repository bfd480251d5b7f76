//! 离线批量导入：扫描本地图片，走与 API 相同的上传管线写入知识库

use clap::Parser;
use dm_core::{AppConfig, ProcessingStatus, UploadFile};
use dm_llm::{make_providers, ProviderConfig};
use dm_queue::{Pipeline, PipelineHandle, PipelineNotice, UploadQueue};
use dm_store::DocumentStore;
use dotenv::dotenv;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

/// 没有通知时也定期检查队列状态
const SETTLE_POLL: Duration = Duration::from_secs(1);
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

#[derive(Parser)]
#[command(name = "documind-worker")]
#[command(about = "Import interview note images into the DocuMind library")]
#[command(version)]
struct Cli {
    /// 图片文件或目录（目录只扫描一层）
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// 配置文件路径，缺省读取 DOCUMIND_CONFIG 或 configs/default.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    completed: usize,
    failed: usize,
    aborted: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenv().ok();
    let cli = Cli::parse();

    let cfg = AppConfig::load(cli.config.as_deref())?;
    let providers = make_providers(ProviderConfig::from_app(&cfg.provider)?)?;
    let records = DocumentStore::from_config(&cfg.store)?;

    let files = collect_files(&cli.paths)?;
    if files.is_empty() {
        tracing::warn!("no image files found");
        return Ok(());
    }

    let pipeline = Pipeline::new(providers.extractor, records);
    let mut notices = pipeline.subscribe();
    let handle = pipeline.spawn();

    let outcome = handle.queue().enqueue(files).await;
    for name in &outcome.rejected {
        tracing::warn!(file_name = %name, "skipped non-image file");
    }
    tracing::info!(accepted = outcome.accepted.len(), "files queued");

    let summary = drain(&handle, &mut notices, &outcome.accepted).await;
    handle.shutdown().await;

    println!(
        "completed: {}, failed: {}, aborted: {}",
        summary.completed, summary.failed, summary.aborted
    );
    if summary.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// 通知只用于日志；完成与否以队列快照为准，漏收通知也不会卡住
async fn drain(
    handle: &PipelineHandle,
    notices: &mut broadcast::Receiver<PipelineNotice>,
    accepted: &[Uuid],
) -> Summary {
    loop {
        if let Some(summary) = settled(&*handle.queue().snapshot().await, accepted) {
            return summary;
        }
        match tokio::time::timeout(SETTLE_POLL, notices.recv()).await {
            Ok(Ok(PipelineNotice::Started { file_name, .. })) => {
                tracing::info!(file_name = %file_name, "processing");
            }
            Ok(Ok(PipelineNotice::Committed(record))) => {
                tracing::info!(record_id = %record.id, title = %record.title, "saved");
            }
            Ok(Ok(PipelineNotice::Failed { id, message })) => {
                tracing::error!(item_id = %id, error = %message, "failed");
            }
            Ok(Ok(PipelineNotice::Aborted { id })) => {
                tracing::warn!(item_id = %id, "aborted");
            }
            Ok(Ok(PipelineNotice::Idle)) | Err(_) => {}
            Ok(Err(RecvError::Lagged(n))) => {
                tracing::warn!(skipped = n, "notice stream lagged");
            }
            Ok(Err(RecvError::Closed)) => {
                return settled(&*handle.queue().snapshot().await, accepted).unwrap_or_default();
            }
        }
    }
}

/// 所有条目都到达终态时返回汇总；已不在队列中的算作中止
fn settled(queue: &UploadQueue, accepted: &[Uuid]) -> Option<Summary> {
    let mut summary = Summary::default();
    for id in accepted {
        match queue.get(*id).map(|i| i.status) {
            Some(ProcessingStatus::Completed) => summary.completed += 1,
            Some(ProcessingStatus::Error) => summary.failed += 1,
            None => summary.aborted += 1,
            Some(_) => return None,
        }
    }
    Some(summary)
}

/// 按扩展名推断 MIME；未知扩展名返回 None
fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

fn collect_files(paths: &[PathBuf]) -> anyhow::Result<Vec<UploadFile>> {
    let mut out = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            entries.sort();
            for entry in entries {
                if let Some(mime) = mime_for_path(&entry) {
                    out.push(UploadFile::from_path(entry, mime));
                }
            }
        } else {
            // 显式指定的文件交给队列判断是否为图片
            let mime = mime_for_path(path).unwrap_or("application/octet-stream");
            out.push(UploadFile::from_path(path.clone(), mime));
        }
    }
    Ok(out)
}

fn init_tracing() {
    let fmt_layer = fmt::layer().with_target(false);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}
