use crate::config::LoggingConfig;
use crate::constants::{
    DEFAULT_EVENT_LOG_MAX_BYTES, DEFAULT_EVENT_LOG_PATH, DEFAULT_EVENT_LOG_ROTATE, EVENT_QUEUE_CAPACITY,
};
use crate::events::dispatcher::init_events;
use crate::events::sink::{ConsoleSink, JsonFileSink, LogSink};
use std::sync::Arc;

/// Install the global dispatcher with the sinks described by `[logging]`.
pub async fn init_events_from_config(logging: Option<&LoggingConfig>) {
    init_events(sinks_from_config(logging).await, EVENT_QUEUE_CAPACITY).await;
}

/// Console sink unless disabled, plus the rotating JSON file sink when its file can be opened.
pub async fn sinks_from_config(logging: Option<&LoggingConfig>) -> Vec<Arc<dyn LogSink>> {
    let mut sinks: Vec<Arc<dyn LogSink>> = Vec::new();

    if !logging.and_then(|l| l.disable_console).unwrap_or(false) {
        sinks.push(Arc::new(ConsoleSink::new(None)));
    }

    let json_path = logging
        .and_then(|l| l.json_path.clone())
        .unwrap_or_else(|| DEFAULT_EVENT_LOG_PATH.into());
    let max_bytes = logging
        .and_then(|l| l.json_max_bytes)
        .unwrap_or(DEFAULT_EVENT_LOG_MAX_BYTES);
    let rotate = logging
        .and_then(|l| l.json_rotate)
        .unwrap_or(DEFAULT_EVENT_LOG_ROTATE);
    if let Ok(json_sink) = JsonFileSink::new(&json_path, true, max_bytes as u64, rotate).await {
        sinks.push(Arc::new(json_sink));
    }
    sinks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logging_section_selects_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events").join("bridge.jsonl");
        let mut logging = LoggingConfig {
            json_path: Some(path.display().to_string()),
            disable_console: Some(true),
            ..LoggingConfig::default()
        };
        assert_eq!(sinks_from_config(Some(&logging)).await.len(), 1);
        assert!(path.exists());

        logging.disable_console = None;
        assert_eq!(sinks_from_config(Some(&logging)).await.len(), 2);
    }
}
