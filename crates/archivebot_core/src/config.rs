use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "archivebot/0.1";
pub const DEFAULT_FLAGGED_CATEGORY: &str = "Articles flagged to be archived";
pub const DEFAULT_ARCHIVED_CATEGORY: &str = "Articles Archived";
pub const DEFAULT_FLAGGED_TEMPLATE: &str = "Archive recommendation";
pub const DEFAULT_ARCHIVED_TEMPLATE: &str = "Archived";
pub const DEFAULT_ARCHIVE_NAMESPACE: &str = "Archive";
pub const DEFAULT_CHECKPOINT_PAGE: &str = "Powerpedia:ARCHIVE_BOT";
pub const DEFAULT_MIN_AGE_DAYS: i64 = 30;
pub const DEFAULT_BATCH_SIZE: usize = 20;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BotConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub archive: ArchiveSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ArchiveSection {
    pub flagged_category: Option<String>,
    pub archived_category: Option<String>,
    pub flagged_template: Option<String>,
    pub archived_template: Option<String>,
    pub archive_namespace: Option<String>,
    pub checkpoint_page: Option<String>,
    pub min_age_days: Option<i64>,
    pub batch_size: Option<usize>,
}

impl BotConfig {
    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        if let Ok(value) = env::var("WIKI_USER_AGENT") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.wiki
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn flagged_category(&self) -> &str {
        self.archive
            .flagged_category
            .as_deref()
            .unwrap_or(DEFAULT_FLAGGED_CATEGORY)
    }

    pub fn archived_category(&self) -> &str {
        self.archive
            .archived_category
            .as_deref()
            .unwrap_or(DEFAULT_ARCHIVED_CATEGORY)
    }

    pub fn flagged_template(&self) -> &str {
        self.archive
            .flagged_template
            .as_deref()
            .unwrap_or(DEFAULT_FLAGGED_TEMPLATE)
    }

    pub fn archived_template(&self) -> &str {
        self.archive
            .archived_template
            .as_deref()
            .unwrap_or(DEFAULT_ARCHIVED_TEMPLATE)
    }

    pub fn archive_namespace(&self) -> &str {
        self.archive
            .archive_namespace
            .as_deref()
            .unwrap_or(DEFAULT_ARCHIVE_NAMESPACE)
    }

    pub fn checkpoint_page(&self) -> &str {
        self.archive
            .checkpoint_page
            .as_deref()
            .unwrap_or(DEFAULT_CHECKPOINT_PAGE)
    }

    pub fn min_age_days(&self) -> i64 {
        self.archive.min_age_days.unwrap_or(DEFAULT_MIN_AGE_DAYS)
    }

    pub fn batch_size(&self) -> usize {
        self.archive.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }
}

/// Load and parse a BotConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<BotConfig> {
    if !config_path.exists() {
        return Ok(BotConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: BotConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}
