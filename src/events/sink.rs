use crate::{
    constants::ICON_PLACEHOLDER,
    events::model::{LogEvent, LogLevel},
};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait LogSink: Send + Sync {
    async fn handle(&self, event: &LogEvent);
    async fn flush(&self) {}
}

pub struct ConsoleSink {
    level_filter: Option<LogLevel>,
}

impl ConsoleSink {
    pub fn new(level_filter: Option<LogLevel>) -> Self {
        Self { level_filter }
    }
}

#[async_trait]
impl LogSink for ConsoleSink {
    async fn handle(&self, event: &LogEvent) {
        let meta = event.meta();
        if meta.suppress_console {
            return;
        }
        if let Some(min) = self.level_filter {
            if meta.level < min {
                return;
            }
        }
        let line = match event {
            LogEvent::TrustDecision(td) => format!(
                "TRUST role={:?} decision={} reason={} fp={} pinned_match={:?} peer={:?}",
                td.role,
                td.decision,
                td.reason,
                td.fingerprint.as_deref().unwrap_or("-"),
                td.pinned_fingerprint_match,
                td.peer_addr
            ),
            LogEvent::Network(n) => format!(
                "NET [{}] action={} addr={:?} detail={:?}",
                n.meta.component, n.action, n.addr, n.detail
            ),
            LogEvent::Message(m) => format!(
                "MSG type={} outcome={} detail={:?}",
                m.msg_type, m.outcome, m.detail
            ),
            LogEvent::System(s) => format!(
                "SYS [{}] action={} detail={:?}",
                s.meta.component, s.action, s.detail
            ),
        };
        match meta.level {
            LogLevel::Warn | LogLevel::Error => eprintln!("{}{}", ICON_PLACEHOLDER, line),
            _ => println!("{}{}", ICON_PLACEHOLDER, line),
        }
    }
}

/// Appends events as JSON lines, rotating `<file>.1..N` once `max_size_bytes` is reached.
pub struct JsonFileSink {
    path: PathBuf,
    rotate: bool,
    max_size_bytes: u64,
    max_backups: u32,
    writer: tokio::sync::Mutex<Option<tokio::fs::File>>,
}

impl JsonFileSink {
    pub async fn new<P: Into<PathBuf>>(
        path: P,
        rotate: bool,
        max_size_bytes: u64,
        max_backups: u32,
    ) -> std::io::Result<Self> {
        let pb = path.into();
        if let Some(parent) = pb.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&pb)
            .await
            .ok();
        Ok(Self {
            path: pb,
            rotate,
            max_size_bytes,
            max_backups,
            writer: tokio::sync::Mutex::new(file),
        })
    }

    fn backup_path(&self, idx: u32) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{}", idx));
        PathBuf::from(name)
    }

    async fn rotate_if_needed(&self) {
        if !self.rotate || self.max_backups == 0 {
            return;
        }
        if let Ok(meta) = tokio::fs::metadata(&self.path).await {
            if meta.len() >= self.max_size_bytes {
                let _ = self.perform_rotation().await;
            }
        }
    }

    async fn perform_rotation(&self) -> std::io::Result<()> {
        let mut guard = self.writer.lock().await;
        *guard = None;
        let _ = tokio::fs::remove_file(self.backup_path(self.max_backups)).await;
        for idx in (1..self.max_backups).rev() {
            let from = self.backup_path(idx);
            if tokio::fs::metadata(&from).await.is_ok() {
                let _ = tokio::fs::rename(&from, self.backup_path(idx + 1)).await;
            }
        }
        tokio::fs::rename(&self.path, self.backup_path(1)).await?;
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        *guard = Some(file);
        Ok(())
    }
}

#[async_trait]
impl LogSink for JsonFileSink {
    async fn handle(&self, event: &LogEvent) {
        self.rotate_if_needed().await;
        if let Ok(mut json) = serde_json::to_string(event) {
            json.push('\n');
            let mut guard = self.writer.lock().await;
            if let Some(f) = guard.as_mut() {
                let _ = f.write_all(json.as_bytes()).await;
            }
        }
    }
    async fn flush(&self) {
        let mut guard = self.writer.lock().await;
        if let Some(f) = guard.as_mut() {
            let _ = f.flush().await;
            let _ = f.sync_all().await;
        }
    }
}
