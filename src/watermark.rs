use std::{
    cell::OnceCell,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use log::debug;
use time::{Date, Duration, Month, OffsetDateTime};

pub fn parse_yyyymmdd(value: &str) -> Result<Date> {
    let value = value.trim();
    if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(anyhow!("Not a YYYYMMDD date: '{}'", value));
    }
    let year: i32 = value[0..4].parse()?;
    let month: u8 = value[4..6].parse()?;
    let day: u8 = value[6..8].parse()?;
    let month = Month::try_from(month).with_context(|| format!("Invalid month in '{}'", value))?;
    Date::from_calendar_date(year, month, day).with_context(|| format!("Invalid date: '{}'", value))
}

pub fn format_yyyymmdd(date: Date) -> String {
    format!(
        "{:04}{:02}{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// `date` moved back by `days`, as YYYYMMDD.
pub fn earlier_yyyymmdd(date: &str, days: i64) -> Result<String> {
    let date = parse_yyyymmdd(date)?;
    let earlier = date
        .checked_sub(Duration::days(days))
        .ok_or_else(|| anyhow!("Date out of range"))?;
    Ok(format_yyyymmdd(earlier))
}

/// Per-journal record of the most recent processing date handled, stored in
/// `<dir>/<issn>.txt`. Reads and writes are best effort: a missing or
/// unreadable file falls back to yesterday as the floor.
#[derive(Debug)]
pub struct ProcessingDateWatermark {
    path: PathBuf,
    safer_days: i64,
    today: Date,
    from_date: OnceCell<String>,
}

impl ProcessingDateWatermark {
    pub fn new(dir: &Path, issn: &str, safer_days: i64) -> Self {
        ProcessingDateWatermark {
            path: dir.join(format!("{}.txt", issn)),
            safer_days,
            today: OffsetDateTime::now_utc().date(),
            from_date: OnceCell::new(),
        }
    }

    pub fn with_today(mut self, today: Date) -> Self {
        self.today = today;
        self.from_date = OnceCell::new();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The persisted watermark, when present and well formed.
    pub fn stored(&self) -> Option<String> {
        let text = fs::read_to_string(&self.path).ok()?;
        let value = text.trim();
        match parse_yyyymmdd(value) {
            Ok(_) => Some(value.to_string()),
            Err(e) => {
                debug!("Ignoring watermark {}: {:#}", self.path.display(), e);
                None
            }
        }
    }

    fn yesterday(&self) -> String {
        let yesterday = self.today.previous_day().unwrap_or(self.today);
        format_yyyymmdd(yesterday)
    }

    pub fn from_date(&self) -> &str {
        self.from_date.get_or_init(|| match self.stored() {
            Some(stored) => {
                earlier_yyyymmdd(&stored, self.safer_days).unwrap_or_else(|_| self.yesterday())
            }
            None => self.yesterday(),
        })
    }

    /// Whether an article with this processing date is already covered.
    pub fn should_skip(&self, processing_date: Option<&str>) -> bool {
        match processing_date {
            Some(date) => date < self.from_date(),
            None => false,
        }
    }

    /// Persists `date` when it is later than both the floor and the stored
    /// watermark. Returns whether the file was written; I/O failures are
    /// swallowed.
    pub fn save_most_recent_processing_date(&self, date: Option<&str>) -> bool {
        let Some(date) = date else {
            return false;
        };
        if date <= self.from_date() {
            return false;
        }
        if let Some(stored) = self.stored() {
            if date <= stored.as_str() {
                return false;
            }
        }

        let written = self
            .path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| fs::write(&self.path, date));
        match written {
            Ok(()) => {
                debug!("Watermark {} advanced to {}", self.path.display(), date);
                true
            }
            Err(e) => {
                debug!("Could not save watermark {}: {}", self.path.display(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn watermark(dir: &Path) -> ProcessingDateWatermark {
        ProcessingDateWatermark::new(dir, "0001-0001", 10).with_today(date!(2019 - 03 - 12))
    }

    #[test]
    fn earlier_crosses_month_and_year() {
        assert_eq!(earlier_yyyymmdd("20190305", 10).unwrap(), "20190223");
        assert_eq!(earlier_yyyymmdd("20190105", 10).unwrap(), "20181226");
        assert!(earlier_yyyymmdd("2019-03-05", 10).is_err());
        assert!(earlier_yyyymmdd("20191305", 10).is_err());
    }

    #[test]
    fn missing_watermark_floors_at_yesterday() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(watermark(dir.path()).from_date(), "20190311");
    }

    #[test]
    fn malformed_watermark_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("0001-0001.txt"), "garbage").unwrap();
        let wm = watermark(dir.path());
        assert_eq!(wm.stored(), None);
        assert_eq!(wm.from_date(), "20190311");
    }

    #[test]
    fn stored_watermark_minus_margin() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("0001-0001.txt"), "20190301\n").unwrap();
        let wm = watermark(dir.path());
        assert_eq!(wm.from_date(), "20190219");
        assert!(wm.should_skip(Some("20190218")));
        assert!(!wm.should_skip(Some("20190219")));
        assert!(!wm.should_skip(None));
    }

    #[test]
    fn watermark_never_moves_backwards() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("0001-0001.txt"), "20190301").unwrap();
        let wm = watermark(dir.path());

        let observations = [
            Some("20190225"),
            None,
            Some("20190310"),
            Some("20190305"),
            Some("20190101"),
            Some("20190311"),
        ];
        let mut last = wm.stored().unwrap();
        for observed in observations {
            wm.save_most_recent_processing_date(observed);
            let current = wm.stored().unwrap();
            assert!(current >= last, "{} went back to {}", last, current);
            last = current;
        }
        assert_eq!(last, "20190311");
        assert!(wm.from_date() <= earlier_yyyymmdd("20190301", 10).unwrap().as_str());
    }

    #[test]
    fn first_save_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("processing_dates");
        let wm = ProcessingDateWatermark::new(&nested, "0001-0001", 10).with_today(date!(2019 - 03 - 12));
        assert!(!wm.save_most_recent_processing_date(Some("20190301")));
        assert!(wm.save_most_recent_processing_date(Some("20190312")));
        assert_eq!(fs::read_to_string(wm.path()).unwrap(), "20190312");
    }

    #[test]
    fn unwritable_location_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let wm = ProcessingDateWatermark::new(&blocker, "0001-0001", 10).with_today(date!(2019 - 03 - 12));
        assert!(!wm.save_most_recent_processing_date(Some("20190312")));
    }
}
