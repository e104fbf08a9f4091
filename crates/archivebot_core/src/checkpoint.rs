use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::{WikiApi, WikiError};

const CREATE_SUMMARY: &str = "Create archive checkpoint page";
const UPDATE_SUMMARY: &str = "Record last archived page";
const CLEAR_SUMMARY: &str = "Clear archive checkpoint";

/// Last page the archival run finished with, stored as a JSON object on a
/// wiki page so interrupted runs can resume mid-category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub title: String,
    pub user: String,
    pub time: String,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    page_title: String,
}

impl CheckpointStore {
    pub fn new(page_title: &str) -> Self {
        Self {
            page_title: page_title.to_string(),
        }
    }

    /// Reads the stored checkpoint. A missing checkpoint page is created
    /// empty so later saves are plain edits; anything unparsable is treated
    /// as no checkpoint rather than an error.
    pub fn load<A: WikiApi>(&self, api: &mut A) -> Result<Option<Checkpoint>> {
        match api.fetch_page_text(&self.page_title) {
            Ok(text) => Ok(parse_checkpoint(&text)),
            Err(WikiError::PageNotFound(_)) => {
                info!("checkpoint page {} does not exist, creating it", self.page_title);
                api.save_page_text(&self.page_title, "", CREATE_SUMMARY)
                    .with_context(|| {
                        format!("failed to create checkpoint page {}", self.page_title)
                    })?;
                Ok(None)
            }
            Err(error) => Err(error)
                .with_context(|| format!("failed to load checkpoint from {}", self.page_title)),
        }
    }

    /// Reads the stored checkpoint without touching the wiki. Used by dry
    /// runs, where a missing checkpoint page must not be created.
    pub fn peek<A: WikiApi>(&self, api: &mut A) -> Result<Option<Checkpoint>> {
        match api.fetch_page_text(&self.page_title) {
            Ok(text) => Ok(parse_checkpoint(&text)),
            Err(WikiError::PageNotFound(_)) => Ok(None),
            Err(error) => Err(error)
                .with_context(|| format!("failed to load checkpoint from {}", self.page_title)),
        }
    }

    /// Records `processed_title` as the new checkpoint. The stored user and
    /// time come from the latest revision of the processed page, fetched
    /// after the archival edits so the record reflects what the bot wrote.
    pub fn save<A: WikiApi>(&self, api: &mut A, processed_title: &str) -> Result<Checkpoint> {
        let revision = api
            .fetch_latest_revision(processed_title)
            .with_context(|| format!("failed to fetch latest revision of {processed_title}"))?;
        let checkpoint = Checkpoint {
            title: processed_title.to_string(),
            user: revision.user,
            time: revision.timestamp,
        };
        let record =
            serde_json::to_string(&checkpoint).context("failed to encode checkpoint record")?;
        api.save_page_text(&self.page_title, &record, UPDATE_SUMMARY)
            .with_context(|| format!("failed to save checkpoint to {}", self.page_title))?;
        debug!("checkpoint now at {}", checkpoint.title);
        Ok(checkpoint)
    }

    /// Blanks the checkpoint page so the next run starts from scratch.
    pub fn clear<A: WikiApi>(&self, api: &mut A) -> Result<()> {
        api.save_page_text(&self.page_title, "", CLEAR_SUMMARY)
            .with_context(|| format!("failed to clear checkpoint page {}", self.page_title))?;
        Ok(())
    }
}

/// Decodes a checkpoint record from page text. Older records were written
/// with single-quoted keys, so quotes are normalized before JSON decoding.
pub fn parse_checkpoint(text: &str) -> Option<Checkpoint> {
    let normalized = text.trim().replace('\'', "\"");
    if normalized.is_empty() {
        return None;
    }
    match serde_json::from_str::<Checkpoint>(&normalized) {
        Ok(checkpoint) if !checkpoint.title.trim().is_empty() => Some(checkpoint),
        Ok(_) => {
            debug!("checkpoint record has an empty title, ignoring it");
            None
        }
        Err(error) => {
            warn!("checkpoint record is not parsable, starting from scratch: {error}");
            None
        }
    }
}
