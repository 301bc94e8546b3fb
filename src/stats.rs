use std::time::Duration;

use log::info;

#[derive(Debug, Default, Clone)]
pub struct RunStats {
    pub journals_listed: u64,
    pub journals_skipped_takeoff: u64,
    pub journals_skipped_existing: u64,
    pub journals_empty: u64,
    pub journals_delivered: u64,
    pub journals_failed: u64,
    pub articles_seen: u64,
    pub articles_skipped_ahead: u64,
    pub articles_skipped_processing_date: u64,
    pub articles_valid: u64,
    pub articles_invalid: u64,
    pub articles_errored: u64,
    pub articles_marked_sent: u64,
}

impl RunStats {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn absorb(&mut self, other: &RunStats) {
        self.journals_listed += other.journals_listed;
        self.journals_skipped_takeoff += other.journals_skipped_takeoff;
        self.journals_skipped_existing += other.journals_skipped_existing;
        self.journals_empty += other.journals_empty;
        self.journals_delivered += other.journals_delivered;
        self.journals_failed += other.journals_failed;
        self.articles_seen += other.articles_seen;
        self.articles_skipped_ahead += other.articles_skipped_ahead;
        self.articles_skipped_processing_date += other.articles_skipped_processing_date;
        self.articles_valid += other.articles_valid;
        self.articles_invalid += other.articles_invalid;
        self.articles_errored += other.articles_errored;
        self.articles_marked_sent += other.articles_marked_sent;
    }

    pub fn log_journal_stats(&self, issn: &str) {
        info!(
            "Journal {}: {} seen, {} valid, {} invalid, {} errored, {} ahead of print, {} skipped by processing date",
            issn,
            self.articles_seen,
            self.articles_valid,
            self.articles_invalid,
            self.articles_errored,
            self.articles_skipped_ahead,
            self.articles_skipped_processing_date
        );
    }

    pub fn log_final_stats(&self) {
        info!("--- Final Stats Summary ---");
        info!(" Journals Listed: {}", self.journals_listed);
        info!(" Journals Skipped (takeoff list): {}", self.journals_skipped_takeoff);
        info!(" Journals Skipped (output exists): {}", self.journals_skipped_existing);
        info!(" Journals Without Valid Articles: {}", self.journals_empty);
        info!(" Journals Delivered: {}", self.journals_delivered);
        info!(" Journals Failed: {}", self.journals_failed);
        info!(" Articles Seen: {}", self.articles_seen);
        info!(" Articles Skipped (ahead of print): {}", self.articles_skipped_ahead);
        info!(
            " Articles Skipped (processing date): {}",
            self.articles_skipped_processing_date
        );
        info!(" Articles Valid: {}", self.articles_valid);
        info!(" Articles Invalid: {}", self.articles_invalid);
        info!(" Articles Errored: {}", self.articles_errored);
        info!(" Articles Marked As Sent: {}", self.articles_marked_sent);
        info!("---------------------------");
    }
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let total_secs = elapsed.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let millis = elapsed.subsec_millis();

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}.{:03}s", seconds, millis)
    }
}
