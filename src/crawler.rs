use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{self, join_url, ProceedingEntry, Transport};
use crate::error::{Outcome, SkipReason};
use crate::parser::{agenda, speech};
use crate::sink::{OutputSink, ProceedingRecord, SpeechRecord};

/// Two-tier concurrency limits. `date_slots` caps (proceeding, date) jobs for
/// the whole run; `statement_slots` caps statement jobs system-wide at
/// `dates * per_date`; each date additionally gets its own `per_date` limit.
#[derive(Debug, Clone)]
pub struct Scheduler {
    date_slots: Arc<Semaphore>,
    statement_slots: Arc<Semaphore>,
    statement_limit: usize,
    per_date: usize,
}

impl Scheduler {
    pub fn new(date_concurrency: usize, statement_concurrency: usize) -> Self {
        let dates = date_concurrency.max(1);
        let per_date = statement_concurrency.max(1);
        Self {
            date_slots: Arc::new(Semaphore::new(dates)),
            statement_slots: Arc::new(Semaphore::new(dates * per_date)),
            statement_limit: dates * per_date,
            per_date,
        }
    }

    /// Upper bound on concurrent outbound statement requests.
    pub fn max_in_flight(&self) -> usize {
        self.statement_limit
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(5, 10)
    }
}

/// Wait for a permit unless cancellation arrives first.
async fn acquire(slots: Arc<Semaphore>, cancel: &CancellationToken) -> Option<OwnedSemaphorePermit> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = slots.acquire_owned() => permit.ok(),
    }
}

// ── Stats ──

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub done: usize,
    pub failed: usize,
    pub malformed: usize,
    pub cancelled: usize,
}

impl Tally {
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Done => self.done += 1,
            Outcome::Failed(_) => self.failed += 1,
            Outcome::Skipped(SkipReason::Malformed) => self.malformed += 1,
            Outcome::Skipped(SkipReason::Cancelled) => self.cancelled += 1,
        }
    }

    fn absorb(&mut self, other: Tally) {
        self.done += other.done;
        self.failed += other.failed;
        self.malformed += other.malformed;
        self.cancelled += other.cancelled;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CrawlStats {
    pub proceedings: Tally,
    pub dates: Tally,
    pub statements: Tally,
}

/// What one (proceeding, date) job produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateReport {
    pub outcome: Outcome,
    pub statements: Tally,
}

impl DateReport {
    fn new(outcome: Outcome) -> Self {
        Self { outcome, statements: Tally::default() }
    }
}

// ── Crawler ──

pub struct Crawler<A: Transport> {
    api: Arc<A>,
    sink: OutputSink,
    scheduler: Scheduler,
    cancel: CancellationToken,
}

impl<A: Transport> Clone for Crawler<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            sink: self.sink.clone(),
            scheduler: self.scheduler.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<A: Transport> Crawler<A> {
    pub fn new(api: Arc<A>, sink: OutputSink, scheduler: Scheduler, cancel: CancellationToken) -> Self {
        Self { api, sink, scheduler, cancel }
    }

    /// Crawl every proceeding of `term`. Only a failed proceedings listing is fatal.
    pub async fn crawl_term(&self, term: u32) -> Result<CrawlStats> {
        let mut stats = CrawlStats::default();
        if self.cancel.is_cancelled() {
            return Ok(stats);
        }

        let entries = api::proceedings(&*self.api, term)
            .await
            .with_context(|| format!("Failed to fetch proceedings for term {}", term))?;
        info!("Term {}: {} proceedings listed", term, entries.len());

        let total_dates: usize = entries
            .iter()
            .filter(|e| e.session().is_some())
            .map(|e| e.dates.len())
            .sum();
        let pb = ProgressBar::new(total_dates as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} dates ({per_sec}, eta {eta})")?
                .progress_chars("=> "),
        );

        let mut jobs = JoinSet::new();

        for entry in &entries {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(session) = entry.session() else {
                debug!("Skipping proceeding without a session number: {:?}", entry.title);
                stats.proceedings.record(&Outcome::Skipped(SkipReason::Malformed));
                continue;
            };

            let outcome = self.save_proceeding(term, session, entry).await;
            stats.proceedings.record(&outcome);

            for date in &entry.dates {
                if self.cancel.is_cancelled() {
                    break;
                }
                if !is_sitting_date(date) {
                    debug!(term, session, "Skipping malformed sitting date {:?}", date);
                    stats.dates.record(&Outcome::Skipped(SkipReason::Malformed));
                    pb.inc(1);
                    continue;
                }
                let crawler = self.clone();
                let date = date.clone();
                jobs.spawn(async move { crawler.date_job(term, session, date).await });
            }
        }

        // Completion order; a failed or panicked job never stops the rest.
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok(report) => {
                    stats.dates.record(&report.outcome);
                    stats.statements.absorb(report.statements);
                }
                Err(e) => {
                    warn!(term, "Date job aborted: {}", e);
                    stats.dates.record(&Outcome::Failed(e.to_string()));
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        if self.cancel.is_cancelled() {
            info!("Term {}: crawl cancelled, in-flight jobs drained", term);
        }
        Ok(stats)
    }

    /// Write `agenda.json` for one proceeding.
    pub async fn save_proceeding(&self, term: u32, session: u32, entry: &ProceedingEntry) -> Outcome {
        if self.cancel.is_cancelled() {
            return Outcome::cancelled();
        }

        let record = ProceedingRecord {
            title: entry.title.as_deref().unwrap_or_default().trim().to_string(),
            agenda: agenda::items(entry.agenda.as_deref().unwrap_or_default().trim()),
            link: join_url(self.api.base_url(), &format!("term{}/proceedings/{}", term, session)),
        };

        match self.sink.write_agenda(term, session, &record).await {
            Ok(path) => {
                info!("Saved proceeding: {}", path.display());
                Outcome::Done
            }
            Err(e) => {
                warn!(term, session, "Error saving proceeding: {}", e);
                Outcome::Failed(e.to_string())
            }
        }
    }

    async fn date_job(self, term: u32, session: u32, date: String) -> DateReport {
        let Some(_permit) = acquire(Arc::clone(&self.scheduler.date_slots), &self.cancel).await else {
            return DateReport::new(Outcome::cancelled());
        };
        self.fetch_date(term, session, &date).await
    }

    /// List the statements of one sitting date and extract each of them.
    pub async fn fetch_date(&self, term: u32, session: u32, date: &str) -> DateReport {
        if self.cancel.is_cancelled() {
            return DateReport::new(Outcome::cancelled());
        }

        let listing = match api::transcripts(&*self.api, term, session, date).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(term, session, date, "Error retrieving statements: {}", e);
                return DateReport::new(Outcome::Failed(e.to_string()));
            }
        };
        if self.cancel.is_cancelled() {
            return DateReport::new(Outcome::cancelled());
        }

        let mut report = DateReport::new(Outcome::Done);
        let local_slots = Arc::new(Semaphore::new(self.scheduler.per_date));
        let mut jobs = JoinSet::new();

        for descriptor in listing.statements {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(num) = descriptor.num else {
                debug!(term, session, date, "Skipping statement without a number");
                report.statements.record(&Outcome::Skipped(SkipReason::Malformed));
                continue;
            };
            let speaker = descriptor.speaker_name.unwrap_or_default();
            let crawler = self.clone();
            let local_slots = Arc::clone(&local_slots);
            let date = date.to_string();
            jobs.spawn(async move { crawler.statement_job(local_slots, term, session, date, num, speaker).await });
        }

        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok(outcome) => report.statements.record(&outcome),
                Err(e) => {
                    warn!(term, session, date, "Statement job aborted: {}", e);
                    report.statements.record(&Outcome::Failed(e.to_string()));
                }
            }
        }

        debug!(term, session, date, "Date finished: {:?}", report.statements);
        report
    }

    async fn statement_job(
        self,
        local_slots: Arc<Semaphore>,
        term: u32,
        session: u32,
        date: String,
        num: u32,
        speaker: String,
    ) -> Outcome {
        let Some(_local) = acquire(local_slots, &self.cancel).await else {
            return Outcome::cancelled();
        };
        let Some(_global) = acquire(Arc::clone(&self.scheduler.statement_slots), &self.cancel).await else {
            return Outcome::cancelled();
        };
        self.extract_statement(term, session, &date, num, speaker).await
    }

    /// Fetch one statement, extract its fields and persist the record.
    /// A failed fetch leaves no file behind.
    pub async fn extract_statement(
        &self,
        term: u32,
        session: u32,
        date: &str,
        num: u32,
        speaker: String,
    ) -> Outcome {
        if self.cancel.is_cancelled() {
            return Outcome::cancelled();
        }

        let (html, link) = match api::statement_html(&*self.api, term, session, date, num).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(term, session, date, statement = num, "Error retrieving statement: {}", e);
                return Outcome::Failed(e.to_string());
            }
        };
        if self.cancel.is_cancelled() {
            return Outcome::cancelled();
        }

        let fields = speech::extract(&html);
        let record = SpeechRecord {
            title: fields.title,
            speaker,
            context: fields.context,
            text: fields.text,
            link,
        };

        match self.sink.write_speech(term, session, date, num, &record).await {
            Ok(path) => {
                debug!("Saved speech: {}", path.display());
                Outcome::Done
            }
            Err(e) => {
                warn!(term, session, date, statement = num, "Error saving statement: {}", e);
                Outcome::Failed(e.to_string())
            }
        }
    }
}

/// Sitting dates become path components, so only `YYYY-MM-DD` is accepted.
fn is_sitting_date(date: &str) -> bool {
    date.len() == 10 && NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
}
