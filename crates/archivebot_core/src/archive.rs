use std::env;

use anyhow::{Context, Result, bail};
use chrono::{Duration, Local, NaiveDate};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::client::{MediaWikiClient, MediaWikiClientConfig, PageRef, WikiApi, WikiError, WikiResult};
use crate::config::BotConfig;
use crate::eligibility::{Eligibility, evaluate, recommendation_date};
use crate::template::{format_marker, marker_date_text, rewrite_markers, scan_markers};

const ARCHIVE_SUMMARY: &str = "Mark page as archived";

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    /// Ignore the stored checkpoint and walk the category from the start.
    pub full: bool,
    /// Stop after scanning this many pages.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageOutcome {
    pub title: String,
    pub action: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub dry_run: bool,
    pub batches: usize,
    pub scanned: usize,
    pub eligible: usize,
    pub archived: usize,
    pub moved: usize,
    pub skipped: usize,
    pub move_failures: usize,
    pub errors: Vec<String>,
    pub pages: Vec<PageOutcome>,
    pub checkpoint: Option<Checkpoint>,
    pub request_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckMarker {
    pub args: String,
    pub date: Option<String>,
    pub old_enough: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub title: String,
    pub eligibility: Eligibility,
    pub cutoff: String,
    pub markers: Vec<CheckMarker>,
}

/// Walks a category in batches, carrying the continuation cursor between
/// requests. The cursor starts from a stored checkpoint title when resuming,
/// so an interrupted run picks up mid-category instead of at the front.
#[derive(Debug, Clone)]
pub struct CategoryPager {
    category: String,
    cursor: Option<String>,
    batch_size: usize,
    exhausted: bool,
}

impl CategoryPager {
    pub fn new(category: &str, batch_size: usize) -> Self {
        Self {
            category: category.to_string(),
            cursor: None,
            batch_size,
            exhausted: false,
        }
    }

    pub fn resume_from(category: &str, checkpoint: Option<&Checkpoint>, batch_size: usize) -> Self {
        let mut pager = Self::new(category, batch_size);
        pager.cursor = checkpoint
            .map(|checkpoint| checkpoint.title.clone())
            .filter(|title| !title.is_empty());
        pager
    }

    /// Fetches the next batch of members. Returns `None` once the listing is
    /// exhausted; the first call returns `Some` even for an empty category.
    pub fn next_page<A: WikiApi>(&mut self, api: &mut A) -> WikiResult<Option<Vec<PageRef>>> {
        if self.exhausted {
            return Ok(None);
        }
        let page = api.fetch_category_members(&self.category, self.cursor.as_deref(), self.batch_size)?;
        self.cursor = page.next_cursor;
        if self.cursor.is_none() {
            self.exhausted = true;
        }
        Ok(Some(page.members))
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    pub new_title: String,
    pub moved: bool,
    pub move_failure: Option<String>,
    pub markers_rewritten: usize,
}

/// Rewrites the flagged markers and category on a page, saves it, then moves
/// it into the archive namespace. A failed move is reported in the outcome
/// rather than as an error: the saved edit already happened, and the page is
/// merely left at its old title.
pub fn archive_page<A: WikiApi>(
    api: &mut A,
    config: &BotConfig,
    page: &PageRef,
    text: &str,
    today: NaiveDate,
) -> Result<ArchiveOutcome> {
    let replacement = format_marker(config.archived_template(), &marker_date_text(today));
    let (rewritten, markers_rewritten) = rewrite_markers(text, config.flagged_template(), &replacement);
    let rewritten = rewritten.replace(config.flagged_category(), config.archived_category());

    api.save_page_text(&page.title, &rewritten, ARCHIVE_SUMMARY)
        .with_context(|| format!("failed to save rewritten text of {}", page.title))?;
    debug!("rewrote {} markers on {}", markers_rewritten, page.title);

    let new_title = format!("{}:{}", config.archive_namespace(), page.base_title());
    let reason = format!(
        "Move namespace from {} to {}",
        page.namespace,
        config.archive_namespace()
    );
    match api.move_page(&page.title, &new_title, &reason) {
        Ok(()) => {
            info!("archived {} as {new_title}", page.title);
            Ok(ArchiveOutcome {
                new_title,
                moved: true,
                move_failure: None,
                markers_rewritten,
            })
        }
        Err(WikiError::DestinationExists(_)) => {
            warn!("{new_title} already exists, leaving {} in place", page.title);
            Ok(ArchiveOutcome {
                new_title,
                moved: false,
                move_failure: Some("destination already exists".to_string()),
                markers_rewritten,
            })
        }
        Err(error) => {
            warn!("failed to move {} to {new_title}: {error}", page.title);
            Ok(ArchiveOutcome {
                new_title,
                moved: false,
                move_failure: Some(error.to_string()),
                markers_rewritten,
            })
        }
    }
}

pub fn run_archival(config: &BotConfig, options: &RunOptions) -> Result<RunReport> {
    let mut client = client_from_config(config)?;
    let today = Local::now().date_naive();
    if options.dry_run {
        return run_archival_with_api(config, options, today, &mut client, None);
    }
    let username = env::var("WIKI_BOT_USER")
        .map_err(|_| anyhow::anyhow!("WIKI_BOT_USER is required for an archival run"))?;
    let password = env::var("WIKI_BOT_PASS")
        .map_err(|_| anyhow::anyhow!("WIKI_BOT_PASS is required for an archival run"))?;
    run_archival_with_api(config, options, today, &mut client, Some((&username, &password)))
}

/// Drives one archival run: resume from the checkpoint, page through the
/// flagged category, and archive every page whose marker is old enough.
/// Failures on individual pages are recorded and skipped; a malformed
/// category listing aborts the run so a wrong cursor never loops.
pub fn run_archival_with_api<A: WikiApi>(
    config: &BotConfig,
    options: &RunOptions,
    today: NaiveDate,
    api: &mut A,
    credentials: Option<(&str, &str)>,
) -> Result<RunReport> {
    let mut report = RunReport {
        success: true,
        dry_run: options.dry_run,
        batches: 0,
        scanned: 0,
        eligible: 0,
        archived: 0,
        moved: 0,
        skipped: 0,
        move_failures: 0,
        errors: Vec::new(),
        pages: Vec::new(),
        checkpoint: None,
        request_count: 0,
    };

    if !options.dry_run {
        let (username, password) = credentials
            .ok_or_else(|| anyhow::anyhow!("bot credentials are required to archive pages"))?;
        api.login(username, password)?;
    }

    let store = CheckpointStore::new(config.checkpoint_page());
    let checkpoint = if options.full {
        None
    } else if options.dry_run {
        store.peek(api)?
    } else {
        store.load(api)?
    };
    if let Some(checkpoint) = &checkpoint {
        info!("resuming category walk from {}", checkpoint.title);
    }

    let mut pager = CategoryPager::resume_from(config.flagged_category(), checkpoint.as_ref(), config.batch_size());
    let mut last_checkpoint = checkpoint;

    'batches: loop {
        let members = match pager.next_page(api) {
            Ok(Some(members)) => members,
            Ok(None) => break,
            Err(error) => {
                return Err(error).with_context(|| {
                    format!("category listing failed for {}", config.flagged_category())
                });
            }
        };
        report.batches += 1;
        for member in members {
            if let Some(limit) = options.limit
                && report.scanned >= limit
            {
                info!("page limit {limit} reached, stopping the walk");
                break 'batches;
            }
            report.scanned += 1;
            let advanced = process_page(config, options, today, api, &member, &mut report);
            if advanced && !options.dry_run {
                match store.save(api, &member.title) {
                    Ok(saved) => last_checkpoint = Some(saved),
                    Err(error) => {
                        warn!("failed to update checkpoint after {}: {error}", member.title);
                    }
                }
            }
        }
    }

    report.checkpoint = last_checkpoint;
    report.request_count = api.request_count();
    report.success = report.errors.is_empty();
    Ok(report)
}

/// Handles one category member. Returns whether the walk position may
/// advance past this page; fetch and save failures keep the old checkpoint
/// so the page is retried on the next run.
fn process_page<A: WikiApi>(
    config: &BotConfig,
    options: &RunOptions,
    today: NaiveDate,
    api: &mut A,
    member: &PageRef,
    report: &mut RunReport,
) -> bool {
    let text = match api.fetch_page_text(&member.title) {
        Ok(text) => text,
        Err(WikiError::PageNotFound(_)) => {
            warn!("{} is listed in the category but has no content", member.title);
            report.pages.push(PageOutcome {
                title: member.title.clone(),
                action: "missing".to_string(),
                detail: None,
            });
            return false;
        }
        Err(error) => {
            warn!("failed to fetch {}: {error}", member.title);
            report.errors.push(format!("{}: {error}", member.title));
            report.pages.push(PageOutcome {
                title: member.title.clone(),
                action: "error".to_string(),
                detail: Some("failed to fetch page text".to_string()),
            });
            return false;
        }
    };

    let hits = scan_markers(&text, config.flagged_template());
    if evaluate(&hits, today, config.min_age_days()) == Eligibility::NotEligible {
        debug!("{} stays in place", member.title);
        report.skipped += 1;
        let detail = if hits.is_empty() {
            "no archive marker"
        } else {
            "marker within retention window"
        };
        report.pages.push(PageOutcome {
            title: member.title.clone(),
            action: "skipped".to_string(),
            detail: Some(detail.to_string()),
        });
        return true;
    }

    report.eligible += 1;
    if options.dry_run {
        info!("would archive {}", member.title);
        report.pages.push(PageOutcome {
            title: member.title.clone(),
            action: "would_archive".to_string(),
            detail: None,
        });
        return true;
    }

    match archive_page(api, config, member, &text, today) {
        Ok(outcome) => {
            report.archived += 1;
            if outcome.moved {
                report.moved += 1;
                report.pages.push(PageOutcome {
                    title: member.title.clone(),
                    action: "archived".to_string(),
                    detail: Some(format!("moved to {}", outcome.new_title)),
                });
            } else {
                report.move_failures += 1;
                report.pages.push(PageOutcome {
                    title: member.title.clone(),
                    action: "archived_in_place".to_string(),
                    detail: outcome.move_failure,
                });
            }
            true
        }
        Err(error) => {
            warn!("failed to archive {}: {error}", member.title);
            report.errors.push(format!("{}: {error}", member.title));
            report.pages.push(PageOutcome {
                title: member.title.clone(),
                action: "error".to_string(),
                detail: Some("archival failed".to_string()),
            });
            false
        }
    }
}

pub fn check_page(config: &BotConfig, title: &str) -> Result<CheckReport> {
    let mut client = client_from_config(config)?;
    check_page_with_api(config, title, Local::now().date_naive(), &mut client)
}

/// Reports what an archival run would decide for one page, without writing.
pub fn check_page_with_api<A: WikiApi>(
    config: &BotConfig,
    title: &str,
    today: NaiveDate,
    api: &mut A,
) -> Result<CheckReport> {
    let text = api
        .fetch_page_text(title)
        .with_context(|| format!("failed to fetch {title}"))?;
    let hits = scan_markers(&text, config.flagged_template());
    let cutoff = today - Duration::days(config.min_age_days());
    let markers = hits
        .iter()
        .map(|hit| {
            let date = recommendation_date(&hit.args);
            CheckMarker {
                args: hit.args.clone(),
                date: date.map(|date| date.to_string()),
                old_enough: date.is_some_and(|date| date < cutoff),
            }
        })
        .collect();
    Ok(CheckReport {
        title: title.to_string(),
        eligibility: evaluate(&hits, today, config.min_age_days()),
        cutoff: cutoff.to_string(),
        markers,
    })
}

pub fn show_checkpoint(config: &BotConfig) -> Result<Option<Checkpoint>> {
    let mut client = client_from_config(config)?;
    let store = CheckpointStore::new(config.checkpoint_page());
    store.peek(&mut client)
}

pub fn reset_checkpoint(config: &BotConfig) -> Result<()> {
    let username = env::var("WIKI_BOT_USER")
        .map_err(|_| anyhow::anyhow!("WIKI_BOT_USER is required to reset the checkpoint"))?;
    let password = env::var("WIKI_BOT_PASS")
        .map_err(|_| anyhow::anyhow!("WIKI_BOT_PASS is required to reset the checkpoint"))?;
    let mut client = client_from_config(config)?;
    client.login(&username, &password)?;
    let store = CheckpointStore::new(config.checkpoint_page());
    store.clear(&mut client)
}

fn client_from_config(config: &BotConfig) -> Result<MediaWikiClient> {
    let client_config = MediaWikiClientConfig::from_config(config);
    if client_config.api_url.trim().is_empty() {
        bail!("no wiki API URL configured; set WIKI_API_URL or [wiki] api_url");
    }
    MediaWikiClient::new(client_config)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use chrono::NaiveDate;

    use super::{
        CategoryPager, RunOptions, check_page_with_api, run_archival_with_api,
    };
    use crate::checkpoint::{Checkpoint, CheckpointStore, parse_checkpoint};
    use crate::client::{CategoryPage, PageRef, RevisionInfo, WikiApi, WikiError, WikiResult};
    use crate::config::BotConfig;
    use crate::eligibility::Eligibility;

    const CHECKPOINT_PAGE: &str = "Powerpedia:ARCHIVE_BOT";

    #[derive(Default)]
    struct MockApi {
        category: Vec<String>,
        page_texts: BTreeMap<String, String>,
        saved_pages: Vec<(String, String, String)>,
        moved_pages: Vec<(String, String, String)>,
        move_conflicts: BTreeSet<String>,
        edit_fail_titles: BTreeSet<String>,
        fail_listing: bool,
        logged_in: bool,
        request_count: usize,
    }

    impl WikiApi for MockApi {
        fn fetch_category_members(
            &mut self,
            _category: &str,
            cursor: Option<&str>,
            limit: usize,
        ) -> WikiResult<CategoryPage> {
            self.request_count += 1;
            if self.fail_listing {
                return Err(WikiError::MalformedResponse(
                    "query payload is missing".to_string(),
                ));
            }
            let start = match cursor {
                Some(cursor) => self
                    .category
                    .iter()
                    .position(|title| title.as_str() >= cursor)
                    .unwrap_or(self.category.len()),
                None => 0,
            };
            let end = (start + limit).min(self.category.len());
            let members = self.category[start..end]
                .iter()
                .map(|title| PageRef::from_title(Some(0), title.clone()))
                .collect();
            let next_cursor = self.category.get(end).cloned();
            Ok(CategoryPage {
                members,
                next_cursor,
            })
        }

        fn fetch_page_text(&mut self, title: &str) -> WikiResult<String> {
            self.request_count += 1;
            self.page_texts
                .get(title)
                .cloned()
                .ok_or_else(|| WikiError::PageNotFound(title.to_string()))
        }

        fn save_page_text(&mut self, title: &str, text: &str, summary: &str) -> WikiResult<()> {
            self.request_count += 1;
            if self.edit_fail_titles.contains(title) {
                return Err(WikiError::EditFailed {
                    title: title.to_string(),
                    result: "Failure".to_string(),
                });
            }
            self.saved_pages
                .push((title.to_string(), text.to_string(), summary.to_string()));
            self.page_texts.insert(title.to_string(), text.to_string());
            Ok(())
        }

        fn move_page(&mut self, title: &str, new_title: &str, reason: &str) -> WikiResult<()> {
            self.request_count += 1;
            if self.move_conflicts.contains(new_title) {
                return Err(WikiError::DestinationExists(new_title.to_string()));
            }
            let text = self.page_texts.remove(title).unwrap_or_default();
            self.page_texts.insert(new_title.to_string(), text);
            self.page_texts
                .insert(title.to_string(), format!("#REDIRECT [[{new_title}]]"));
            self.moved_pages.push((
                title.to_string(),
                new_title.to_string(),
                reason.to_string(),
            ));
            Ok(())
        }

        fn fetch_latest_revision(&mut self, title: &str) -> WikiResult<RevisionInfo> {
            self.request_count += 1;
            if !self.page_texts.contains_key(title) {
                return Err(WikiError::NoRevisions(title.to_string()));
            }
            Ok(RevisionInfo {
                user: "ArchiveBot".to_string(),
                timestamp: "2023-03-01T12:00:00Z".to_string(),
            })
        }

        fn login(&mut self, _username: &str, _password: &str) -> WikiResult<()> {
            self.request_count += 1;
            self.logged_in = true;
            Ok(())
        }

        fn request_count(&self) -> usize {
            self.request_count
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 3, 1).expect("valid date")
    }

    fn flagged_text(date: &str) -> String {
        format!(
            "Intro text.\n{{{{Archive recommendation|date={date}}}}}\n[[Category:Articles flagged to be archived]]\n"
        )
    }

    fn write_options() -> RunOptions {
        RunOptions::default()
    }

    fn creds() -> Option<(&'static str, &'static str)> {
        Some(("BotUser", "BotPass"))
    }

    #[test]
    fn archives_eligible_page_end_to_end() {
        let config = BotConfig::default();
        let mut api = MockApi::default();
        api.category = vec!["Old Project".to_string()];
        api.page_texts
            .insert("Old Project".to_string(), flagged_text("January 1, 2023"));

        let report = run_archival_with_api(&config, &write_options(), today(), &mut api, creds())
            .expect("run");

        assert!(report.success);
        assert!(api.logged_in);
        assert_eq!(report.scanned, 1);
        assert_eq!(report.eligible, 1);
        assert_eq!(report.archived, 1);
        assert_eq!(report.moved, 1);
        assert_eq!(report.move_failures, 0);
        assert!(report.errors.is_empty());

        let edit = api
            .saved_pages
            .iter()
            .find(|entry| entry.0 == "Old Project")
            .expect("page edit");
        assert!(edit.1.contains("{{Archived|date=March 01, 2023}}"));
        assert!(edit.1.contains("[[Category:Articles Archived]]"));
        assert!(!edit.1.contains("Archive recommendation"));
        assert!(!edit.1.contains("Articles flagged to be archived"));

        assert_eq!(api.moved_pages.len(), 1);
        assert_eq!(api.moved_pages[0].0, "Old Project");
        assert_eq!(api.moved_pages[0].1, "Archive:Old Project");
        assert_eq!(api.moved_pages[0].2, "Move namespace from Main to Archive");

        let checkpoint = report.checkpoint.expect("checkpoint");
        assert_eq!(checkpoint.title, "Old Project");
        let stored = parse_checkpoint(&api.page_texts[CHECKPOINT_PAGE]).expect("stored checkpoint");
        assert_eq!(stored, checkpoint);
    }

    #[test]
    fn skips_pages_inside_the_retention_window() {
        let config = BotConfig::default();
        let mut api = MockApi::default();
        api.category = vec!["Fresh Page".to_string()];
        api.page_texts
            .insert("Fresh Page".to_string(), flagged_text("February 20, 2023"));

        let report = run_archival_with_api(&config, &write_options(), today(), &mut api, creds())
            .expect("run");

        assert!(report.success);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.archived, 0);
        assert!(api.moved_pages.is_empty());
        assert_eq!(report.pages[0].action, "skipped");
        assert_eq!(
            report.pages[0].detail.as_deref(),
            Some("marker within retention window")
        );
        let checkpoint = report.checkpoint.expect("checkpoint");
        assert_eq!(checkpoint.title, "Fresh Page");
    }

    #[test]
    fn skips_pages_without_markers() {
        let config = BotConfig::default();
        let mut api = MockApi::default();
        api.category = vec!["Plain Page".to_string()];
        api.page_texts.insert(
            "Plain Page".to_string(),
            "No markers here.\n[[Category:Articles flagged to be archived]]\n".to_string(),
        );

        let report = run_archival_with_api(&config, &write_options(), today(), &mut api, creds())
            .expect("run");

        assert_eq!(report.skipped, 1);
        assert_eq!(report.pages[0].detail.as_deref(), Some("no archive marker"));
        assert!(api.moved_pages.is_empty());
    }

    #[test]
    fn dry_run_makes_no_writes() {
        let config = BotConfig::default();
        let mut api = MockApi::default();
        api.category = vec!["Old Project".to_string()];
        api.page_texts
            .insert("Old Project".to_string(), flagged_text("January 1, 2023"));

        let options = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };
        let report =
            run_archival_with_api(&config, &options, today(), &mut api, None).expect("run");

        assert!(report.success);
        assert!(report.dry_run);
        assert!(!api.logged_in);
        assert_eq!(report.eligible, 1);
        assert_eq!(report.archived, 0);
        assert_eq!(report.pages[0].action, "would_archive");
        assert!(api.saved_pages.is_empty());
        assert!(api.moved_pages.is_empty());
        assert!(report.checkpoint.is_none());
    }

    #[test]
    fn write_mode_requires_credentials() {
        let config = BotConfig::default();
        let mut api = MockApi::default();
        let error = run_archival_with_api(&config, &write_options(), today(), &mut api, None)
            .expect_err("must fail");
        assert!(error.to_string().contains("credentials"));
    }

    #[test]
    fn resumes_from_checkpoint_cursor() {
        let config = BotConfig::default();
        let mut api = MockApi::default();
        api.category = vec![
            "Alpha".to_string(),
            "Beta".to_string(),
            "Gamma".to_string(),
        ];
        let titles = api.category.clone();
        for title in &titles {
            api.page_texts.insert(title.clone(), "plain".to_string());
        }
        let record = serde_json::to_string(&Checkpoint {
            title: "Beta".to_string(),
            user: "ArchiveBot".to_string(),
            time: "2023-02-28T00:00:00Z".to_string(),
        })
        .expect("encode");
        api.page_texts.insert(CHECKPOINT_PAGE.to_string(), record);

        let report = run_archival_with_api(&config, &write_options(), today(), &mut api, creds())
            .expect("run");

        let titles: Vec<&str> = report.pages.iter().map(|page| page.title.as_str()).collect();
        assert!(!titles.contains(&"Alpha"));
        assert!(titles.contains(&"Beta"));
        assert!(titles.contains(&"Gamma"));
    }

    #[test]
    fn full_run_ignores_existing_checkpoint() {
        let config = BotConfig::default();
        let mut api = MockApi::default();
        api.category = vec!["Alpha".to_string(), "Beta".to_string()];
        let titles = api.category.clone();
        for title in &titles {
            api.page_texts.insert(title.clone(), "plain".to_string());
        }
        let record = serde_json::to_string(&Checkpoint {
            title: "Beta".to_string(),
            user: "ArchiveBot".to_string(),
            time: "2023-02-28T00:00:00Z".to_string(),
        })
        .expect("encode");
        api.page_texts.insert(CHECKPOINT_PAGE.to_string(), record);

        let options = RunOptions {
            full: true,
            ..RunOptions::default()
        };
        let report =
            run_archival_with_api(&config, &options, today(), &mut api, creds()).expect("run");

        let titles: Vec<&str> = report.pages.iter().map(|page| page.title.as_str()).collect();
        assert!(titles.contains(&"Alpha"));
        assert_eq!(report.scanned, 2);
    }

    #[test]
    fn walks_every_batch_without_duplicates() {
        let config = BotConfig::default();
        let mut api = MockApi::default();
        api.category = (0..45).map(|i| format!("Page {i:02}")).collect();
        let titles = api.category.clone();
        for title in &titles {
            api.page_texts.insert(title.clone(), "plain".to_string());
        }

        let report = run_archival_with_api(&config, &write_options(), today(), &mut api, creds())
            .expect("run");

        assert_eq!(report.batches, 3);
        assert_eq!(report.scanned, 45);
        assert_eq!(report.skipped, 45);
        let mut titles: Vec<&str> = report.pages.iter().map(|page| page.title.as_str()).collect();
        titles.dedup();
        assert_eq!(titles.len(), 45);
    }

    #[test]
    fn halts_when_listing_is_malformed() {
        let config = BotConfig::default();
        let mut api = MockApi::default();
        api.fail_listing = true;

        let error = run_archival_with_api(&config, &write_options(), today(), &mut api, creds())
            .expect_err("must fail");
        assert!(error.to_string().contains("category listing failed"));
    }

    #[test]
    fn destination_conflict_leaves_page_in_place() {
        let config = BotConfig::default();
        let mut api = MockApi::default();
        api.category = vec!["Old Project".to_string()];
        api.page_texts
            .insert("Old Project".to_string(), flagged_text("January 1, 2023"));
        api.move_conflicts.insert("Archive:Old Project".to_string());

        let report = run_archival_with_api(&config, &write_options(), today(), &mut api, creds())
            .expect("run");

        assert!(report.success);
        assert_eq!(report.archived, 1);
        assert_eq!(report.moved, 0);
        assert_eq!(report.move_failures, 1);
        assert_eq!(report.pages[0].action, "archived_in_place");
        assert_eq!(
            report.pages[0].detail.as_deref(),
            Some("destination already exists")
        );
        assert!(api.moved_pages.is_empty());
    }

    #[test]
    fn save_failure_records_error_and_continues() {
        let config = BotConfig::default();
        let mut api = MockApi::default();
        api.category = vec!["Broken Page".to_string(), "Plain Page".to_string()];
        api.page_texts
            .insert("Broken Page".to_string(), flagged_text("January 1, 2023"));
        api.page_texts
            .insert("Plain Page".to_string(), "plain".to_string());
        api.edit_fail_titles.insert("Broken Page".to_string());

        let report = run_archival_with_api(&config, &write_options(), today(), &mut api, creds())
            .expect("run");

        assert!(!report.success);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Broken Page:"));
        assert_eq!(report.scanned, 2);
        assert_eq!(report.skipped, 1);
        let checkpoint = report.checkpoint.expect("checkpoint");
        assert_eq!(checkpoint.title, "Plain Page");
    }

    #[test]
    fn vanished_page_is_reported_as_missing() {
        let config = BotConfig::default();
        let mut api = MockApi::default();
        api.category = vec!["Ghost".to_string()];

        let report = run_archival_with_api(&config, &write_options(), today(), &mut api, creds())
            .expect("run");

        assert!(report.success);
        assert_eq!(report.pages[0].action, "missing");
        assert!(report.checkpoint.is_none());
    }

    #[test]
    fn limit_stops_the_walk_early() {
        let config = BotConfig::default();
        let mut api = MockApi::default();
        api.category = (0..5).map(|i| format!("Page {i}")).collect();
        let titles = api.category.clone();
        for title in &titles {
            api.page_texts.insert(title.clone(), "plain".to_string());
        }

        let options = RunOptions {
            limit: Some(2),
            ..RunOptions::default()
        };
        let report =
            run_archival_with_api(&config, &options, today(), &mut api, creds()).expect("run");

        assert_eq!(report.scanned, 2);
    }

    #[test]
    fn missing_checkpoint_page_is_created_on_load() {
        let mut api = MockApi::default();
        let store = CheckpointStore::new(CHECKPOINT_PAGE);

        let loaded = store.load(&mut api).expect("load");
        assert!(loaded.is_none());
        assert_eq!(api.saved_pages.len(), 1);
        assert_eq!(api.saved_pages[0].0, CHECKPOINT_PAGE);
        assert_eq!(api.saved_pages[0].1, "");
    }

    #[test]
    fn checkpoint_save_then_load_round_trips() {
        let mut api = MockApi::default();
        api.page_texts
            .insert("Old Project".to_string(), "content".to_string());
        let store = CheckpointStore::new(CHECKPOINT_PAGE);

        let saved = store.save(&mut api, "Old Project").expect("save");
        let loaded = store.load(&mut api).expect("load").expect("checkpoint");
        assert_eq!(saved, loaded);
        assert_eq!(loaded.title, "Old Project");
        assert_eq!(loaded.user, "ArchiveBot");
    }

    #[test]
    fn pager_first_page_can_be_empty() {
        let mut api = MockApi::default();
        let mut pager = CategoryPager::new("Articles flagged to be archived", 20);

        let first = pager.next_page(&mut api).expect("page");
        assert_eq!(first.expect("first batch").len(), 0);
        let second = pager.next_page(&mut api).expect("page");
        assert!(second.is_none());
    }

    #[test]
    fn second_run_leaves_archived_page_alone() {
        let config = BotConfig::default();
        let mut api = MockApi::default();
        api.category = vec!["Old Project".to_string()];
        api.page_texts
            .insert("Old Project".to_string(), flagged_text("January 1, 2023"));

        let first = run_archival_with_api(&config, &write_options(), today(), &mut api, creds())
            .expect("first run");
        assert_eq!(first.archived, 1);
        let archived_text = api.page_texts["Archive:Old Project"].clone();

        let second = run_archival_with_api(&config, &write_options(), today(), &mut api, creds())
            .expect("second run");

        assert_eq!(second.archived, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(api.moved_pages.len(), 1);
        assert_eq!(api.page_texts["Archive:Old Project"], archived_text);
    }

    #[test]
    fn malformed_marker_is_skipped_without_mutation() {
        let config = BotConfig::default();
        let mut api = MockApi::default();
        api.category = vec!["Odd Page".to_string()];
        api.page_texts.insert(
            "Odd Page".to_string(),
            "{{Archive recommendation date=January 1, 2023}}\n".to_string(),
        );

        let report = run_archival_with_api(&config, &write_options(), today(), &mut api, creds())
            .expect("run");

        assert!(report.success);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.archived, 0);
        assert!(api.moved_pages.is_empty());
        assert!(
            !api
                .saved_pages
                .iter()
                .any(|entry| entry.0 == "Odd Page")
        );
    }

    #[test]
    fn check_reports_marker_dates() {
        let config = BotConfig::default();
        let mut api = MockApi::default();
        api.page_texts.insert(
            "Old Project".to_string(),
            "{{Archive recommendation|date=January 1, 2023}}\n{{Archive recommendation|date=unclear}}\n"
                .to_string(),
        );

        let report =
            check_page_with_api(&config, "Old Project", today(), &mut api).expect("check");

        assert_eq!(report.eligibility, Eligibility::Eligible);
        assert_eq!(report.markers.len(), 2);
        assert!(report.markers[0].old_enough);
        assert_eq!(report.markers[0].date.as_deref(), Some("2023-01-01"));
        assert!(report.markers[1].date.is_none());
        assert!(!report.markers[1].old_enough);
    }
}
