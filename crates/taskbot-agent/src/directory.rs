//! Directory of approved executors.
//!
//! The directory lives in a spreadsheet maintained by hand. Only rows whose
//! approval column reads [`APPROVED_MARK`] are offered to the model. Reads are
//! cached for [`directory_ttl`]; when the sheet is unreachable the codes from
//! the environment are used instead.

use std::sync::Arc;

use chrono::Duration;
use taskbot_core::{Clock, KeyedStore};
use tracing::{debug, info, warn};

use crate::error::{AgentError, Result};
use crate::sheets::ValuesReader;

/// Approval value in column G.
pub const APPROVED_MARK: &str = "Подтверждаю";

/// How long a directory read is reused.
pub fn directory_ttl() -> Duration {
    Duration::hours(1)
}

const CACHE_KEY: &str = "approved_executors";

// Zero-based columns of the directory sheet.
const NAME_COLUMN: usize = 2;
const CODE_COLUMN: usize = 3;
const TELEGRAM_COLUMN: usize = 5;
const APPROVAL_COLUMN: usize = 6;

/// One approved executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executor {
    pub name: String,
    /// Code written into the task row, e.g. `ИТ ВУ`.
    pub short_code: String,
    pub tg_username: String,
}

impl Executor {
    /// Executor known only by its code.
    pub fn from_code(code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            name: code.clone(),
            short_code: code,
            tg_username: String::new(),
        }
    }

    /// Line for the system prompt.
    pub fn prompt_line(&self) -> String {
        let mut line = format!("- {}", self.short_code);
        if self.name != self.short_code {
            line.push_str(&format!(" ({})", self.name));
        }
        if !self.tg_username.is_empty() {
            line.push_str(&format!(", {}", self.tg_username));
        }
        line
    }
}

/// Parse directory rows. The first row is a header.
///
/// Rows need a code, a Telegram username and the approval mark; the name
/// falls back to the code.
pub fn parse_directory(rows: &[Vec<String>]) -> Vec<Executor> {
    let cell = |row: &Vec<String>, index: usize| {
        row.get(index).map(|c| c.trim().to_string()).unwrap_or_default()
    };

    rows.iter()
        .skip(1)
        .filter(|row| row.len() > APPROVAL_COLUMN)
        .filter(|row| cell(row, APPROVAL_COLUMN) == APPROVED_MARK)
        .filter_map(|row| {
            let short_code = cell(row, CODE_COLUMN);
            let tg_username = cell(row, TELEGRAM_COLUMN);
            if short_code.is_empty() || tg_username.is_empty() {
                return None;
            }
            let name = Some(cell(row, NAME_COLUMN))
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| short_code.clone());
            Some(Executor {
                name,
                short_code,
                tg_username,
            })
        })
        .collect()
}

/// Where the directory sheet lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySource {
    pub spreadsheet_id: String,
    pub range: String,
}

/// Cached executor directory with an environment fallback.
pub struct ExecutorDirectory {
    reader: Option<Arc<dyn ValuesReader>>,
    source: Option<DirectorySource>,
    fallback: Vec<Executor>,
    cache: KeyedStore<Vec<Executor>>,
}

impl ExecutorDirectory {
    /// Directory that always returns `codes`.
    pub fn fixed(codes: Vec<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            reader: None,
            source: None,
            fallback: codes.into_iter().map(Executor::from_code).collect(),
            cache: KeyedStore::new(clock).with_ttl(directory_ttl()),
        }
    }

    /// Directory read from `source`, falling back to `codes`.
    pub fn from_sheet(
        reader: Arc<dyn ValuesReader>,
        source: DirectorySource,
        codes: Vec<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            reader: Some(reader),
            source: Some(source),
            ..Self::fixed(codes, clock)
        }
    }

    /// Approved executors, from cache when fresh.
    ///
    /// Read failures and empty sheets fall back to the environment codes and
    /// are not cached.
    pub async fn approved(&self) -> Vec<Executor> {
        if let Some(cached) = self.cache.get(CACHE_KEY).await {
            return cached;
        }
        if self.source.is_none() {
            return self.fallback.clone();
        }
        match self.fetch().await {
            Ok(executors) if !executors.is_empty() => executors,
            Ok(_) => {
                warn!("Executor directory has no approved rows, using configured codes");
                self.fallback.clone()
            }
            Err(e) => {
                warn!(error = %e, "Failed to read executor directory, using configured codes");
                self.fallback.clone()
            }
        }
    }

    /// Drop the cache and read the sheet again.
    pub async fn refresh(&self) -> Result<Vec<Executor>> {
        self.cache.remove(CACHE_KEY).await;
        self.fetch().await
    }

    async fn fetch(&self) -> Result<Vec<Executor>> {
        let (Some(reader), Some(source)) = (self.reader.as_ref(), self.source.as_ref()) else {
            return Err(AgentError::Configuration(
                "Executor directory sheet is not configured".into(),
            ));
        };

        let rows = reader
            .read_values(&source.spreadsheet_id, &source.range)
            .await?;
        let executors = parse_directory(&rows);
        debug!(rows = rows.len(), approved = executors.len(), "Executor directory parsed");

        if !executors.is_empty() {
            self.cache.insert(CACHE_KEY, executors.clone()).await;
            info!(count = executors.len(), "Executor directory refreshed");
        }
        Ok(executors)
    }
}
