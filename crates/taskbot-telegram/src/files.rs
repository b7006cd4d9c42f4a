//! Attachment storage.
//!
//! Photos and documents are downloaded from Telegram into a publicly served
//! directory so the spreadsheet can link to them.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::FileId;
use tracing::{debug, info, warn};

use crate::error::{Result, TelegramError};

/// Subdirectory (and URL segment) for stored attachments.
pub const FILES_SUBDIR: &str = "telegram_files";

/// A directory served at a public base URL.
#[derive(Debug, Clone)]
pub struct PublicFiles {
    dir: PathBuf,
    base_url: String,
}

impl PublicFiles {
    pub fn new(dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Storage configured from settings, if a public URL is set.
    pub fn from_settings(settings: &taskbot_core::Settings) -> Option<Self> {
        settings
            .public_files_url
            .as_ref()
            .map(|url| Self::new(&settings.public_files_dir, url.as_str()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` under a fresh name and return its public link.
    ///
    /// `source_path` is the path Telegram reported; only its extension is kept.
    pub async fn save(&self, bytes: &[u8], source_path: &str, now: DateTime<Utc>) -> Result<String> {
        let name = file_name(source_path, now);
        let target_dir = self.dir.join(FILES_SUBDIR);
        tokio::fs::create_dir_all(&target_dir).await?;
        tokio::fs::write(target_dir.join(&name), bytes).await?;

        let link = self.link_for(&name);
        debug!(path = %target_dir.join(&name).display(), bytes = bytes.len(), "Attachment stored");
        Ok(link)
    }

    /// Public link for a stored file name.
    pub fn link_for(&self, name: &str) -> String {
        format!("{}/{FILES_SUBDIR}/{name}", self.base_url)
    }
}

/// `{timestamp}_{id}.{ext}`, with `file` as the fallback extension.
pub fn file_name(source_path: &str, now: DateTime<Utc>) -> String {
    let extension = Path::new(source_path)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("file");
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}.{extension}", now.format("%Y-%m-%d_%H-%M-%S"), &id[..8])
}

/// Download a Telegram file into memory, returning its bytes and server path.
pub async fn download(bot: &Bot, file_id: &str) -> Result<(Vec<u8>, String)> {
    let file = bot.get_file(FileId(file_id.to_string())).await?;
    let mut buffer = Vec::with_capacity(file.size as usize);
    bot.download_file(&file.path, &mut buffer)
        .await
        .map_err(|e| TelegramError::DownloadFailed(e.to_string()))?;
    Ok((buffer, file.path))
}

/// Store attachments concurrently and collect public links in input order.
///
/// Failed downloads are logged and skipped. Without storage nothing is linked.
pub async fn resolve_links(
    bot: &Bot,
    files: Option<&PublicFiles>,
    file_ids: &[String],
) -> Vec<String> {
    if file_ids.is_empty() {
        return Vec::new();
    }
    let Some(files) = files else {
        warn!(count = file_ids.len(), "Attachments skipped: public file storage not configured");
        return Vec::new();
    };

    let stored = join_all(file_ids.iter().map(|file_id| async move {
        let (bytes, path) = download(bot, file_id).await?;
        files.save(&bytes, &path, Utc::now()).await
    }))
    .await;

    let mut links = Vec::with_capacity(file_ids.len());
    for (file_id, result) in file_ids.iter().zip(stored) {
        match result {
            Ok(link) => links.push(link),
            Err(e) => warn!(file_id = %file_id, error = %e, "Failed to store attachment"),
        }
    }
    info!(requested = file_ids.len(), stored = links.len(), "Attachments processed");
    links
}
