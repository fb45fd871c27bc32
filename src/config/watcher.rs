//! Config-file change detection driving hot reload.
//!
//! A fixed-interval mtime poll over the config path.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::config::loader;
use crate::config::model::Config;

/// Poll `path` every `interval`; when its mtime changes, reparse and hand
/// the new config to `on_change`. A config that fails to parse or validate
/// is logged and discarded, leaving the running state untouched.
pub async fn watch<F>(path: PathBuf, interval: Duration, mut on_change: F)
where
    F: FnMut(Config) + Send,
{
    let mut last_modified = modified_at(&path).await;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so an unchanged file does
    // not trigger a reload at startup.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(modified) = modified_at(&path).await else {
            continue;
        };
        if last_modified == Some(modified) {
            continue;
        }
        last_modified = Some(modified);
        tracing::info!(path = %path.display(), "config change detected, reloading");
        match loader::load(&path) {
            Ok(config) => {
                on_change(config);
                tracing::info!("config reloaded");
            }
            Err(err) => {
                tracing::warn!(error = %err, "config reload failed, keeping current state");
            }
        }
    }
}

async fn modified_at(path: &PathBuf) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}
