//! CSV-backed ledger.
//!
//! File layout:
//!
//! ```text
//! sender_email,timestamp,character_used,fallback_used
//! alice@example.com,2025-01-02T03:04:05.000000+00:00,Captain Jack,No
//! ```
//!
//! The header is written once when the file is created. Every reply appends
//! exactly one row and is fsynced before `record` returns.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ReplyLedger, ReplyRecord};
use crate::error::LedgerError;

/// Column names, in order.
pub const LEDGER_HEADER: [&str; 4] = ["sender_email", "timestamp", "character_used", "fallback_used"];

/// Durable ledger stored as an append-only CSV file.
#[derive(Debug)]
pub struct CsvLedger {
    path: PathBuf,
    senders: Mutex<HashSet<String>>,
}

impl CsvLedger {
    /// Rebuild the sender set from `path`. A missing file is an empty ledger.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let senders = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => senders_from_csv(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No ledger file yet, starting empty");
                HashSet::new()
            }
            Err(source) => return Err(io_err(&path, source)),
        };

        info!(path = %path.display(), senders = senders.len(), "Reply ledger loaded");
        Ok(Self {
            path,
            senders: Mutex::new(senders),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the full history back from disk. Malformed rows are skipped.
    pub async fn records(&self) -> Result<Vec<ReplyRecord>, LedgerError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_err(&self.path, source)),
        };

        let mut records = Vec::new();
        for (line, fields) in data_rows(&raw) {
            match record_from_fields(line, &fields) {
                Ok(r) => records.push(r),
                Err(e) => warn!("Skipping ledger row: {e}"),
            }
        }
        Ok(records)
    }

    async fn append(&self, record: &ReplyRecord) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(parent, e))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| io_err(&self.path, e))?;

        let existing = file
            .metadata()
            .await
            .map_err(|e| io_err(&self.path, e))?
            .len();

        let mut out = String::new();
        if existing == 0 {
            out.push_str(&encode_row(&LEDGER_HEADER));
        } else if !ends_with_newline(&self.path)
            .await
            .map_err(|e| io_err(&self.path, e))?
        {
            // Hand-edited files may lack a trailing newline.
            out.push_str("\r\n");
        }
        let timestamp = record.timestamp.to_rfc3339_opts(SecondsFormat::Micros, false);
        out.push_str(&encode_row(&[
            record.sender_email.as_str(),
            timestamp.as_str(),
            record.persona_name.as_str(),
            record.fallback_label(),
        ]));

        file.write_all(out.as_bytes())
            .await
            .map_err(|e| io_err(&self.path, e))?;
        file.flush().await.map_err(|e| io_err(&self.path, e))?;
        file.sync_data().await.map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }
}

#[async_trait]
impl ReplyLedger for CsvLedger {
    async fn contains(&self, sender: &str) -> bool {
        self.senders.lock().await.contains(sender)
    }

    async fn record(
        &self,
        sender: &str,
        persona_name: &str,
        used_fallback: bool,
    ) -> Result<ReplyRecord, LedgerError> {
        let mut senders = self.senders.lock().await;
        let record = ReplyRecord::now(sender, persona_name, used_fallback);
        let written = self.append(&record).await;
        senders.insert(sender.to_string());
        written.map(|()| record)
    }

    async fn len(&self) -> usize {
        self.senders.lock().await.len()
    }
}

fn io_err(path: &Path, source: std::io::Error) -> LedgerError {
    LedgerError::Io {
        path: path.display().to_string(),
        source,
    }
}

async fn ends_with_newline(path: &Path) -> std::io::Result<bool> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}

fn senders_from_csv(raw: &str) -> HashSet<String> {
    data_rows(raw)
        .into_iter()
        .filter_map(|(_, fields)| fields.into_iter().next())
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Rows after the header, with their 1-based starting line numbers.
fn data_rows(raw: &str) -> Vec<(usize, Vec<String>)> {
    let mut rows = parse_rows(raw);
    if rows
        .first()
        .is_some_and(|(_, fields)| fields.first().map(String::as_str) == Some(LEDGER_HEADER[0]))
    {
        rows.remove(0);
    }
    rows
}

fn record_from_fields(line: usize, fields: &[String]) -> Result<ReplyRecord, LedgerError> {
    let malformed = |reason: String| LedgerError::Malformed { line, reason };

    let [sender, ts, persona, fallback] = fields else {
        return Err(malformed(format!("expected 4 columns, got {}", fields.len())));
    };
    if sender.trim().is_empty() {
        return Err(malformed("empty sender".into()));
    }
    let timestamp = DateTime::parse_from_rfc3339(ts.trim())
        .map_err(|e| malformed(format!("bad timestamp {ts:?}: {e}")))?
        .with_timezone(&Utc);
    let used_fallback = match fallback.trim() {
        "Yes" => true,
        "No" => false,
        other => return Err(malformed(format!("bad fallback flag {other:?}"))),
    };

    Ok(ReplyRecord {
        sender_email: sender.trim().to_lowercase(),
        timestamp,
        persona_name: persona.clone(),
        used_fallback,
    })
}

/// Encode one row (RFC 4180 quoting), terminated by `\r\n`.
pub fn encode_row(fields: &[&str]) -> String {
    let mut out = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push_str("\r\n");
    out
}

/// Parse CSV text into rows. Blank lines are dropped. Quoted fields may span
/// lines; each row carries the line number it starts on.
pub fn parse_rows(raw: &str) -> Vec<(usize, Vec<String>)> {
    let mut rows = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut row_start = 1;
    let mut chars = raw.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(ch);
                }
                _ => field.push(ch),
            }
            continue;
        }

        match ch {
            '"' => in_quotes = true,
            ',' => fields.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                fields.push(std::mem::take(&mut field));
                push_row(&mut rows, row_start, std::mem::take(&mut fields));
                line += 1;
                row_start = line;
            }
            _ => field.push(ch),
        }
    }

    if !field.is_empty() || !fields.is_empty() {
        fields.push(field);
        push_row(&mut rows, row_start, fields);
    }
    rows
}

fn push_row(rows: &mut Vec<(usize, Vec<String>)>, line: usize, fields: Vec<String>) {
    let blank = fields.iter().all(|f| f.trim().is_empty());
    if !blank {
        rows.push((line, fields));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_file_is_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = CsvLedger::open(dir.path().join("replied.csv")).await.unwrap();
        assert!(!ledger.contains("anyone@example.com").await);
        assert_eq!(ledger.len().await, 0);
        assert!(ledger.records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_write_adds_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replied.csv");
        let ledger = CsvLedger::open(&path).await.unwrap();

        ledger.record("a@x.com", "Ada", false).await.unwrap();
        ledger.record("b@x.com", "Grace", true).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "sender_email,timestamp,character_used,fallback_used");
        assert!(lines[1].starts_with("a@x.com,"));
        assert!(lines[1].ends_with(",Ada,No"));
        assert!(lines[2].ends_with(",Grace,Yes"));
        assert_eq!(raw.matches("sender_email").count(), 1);
    }

    #[tokio::test]
    async fn reload_reconstructs_membership() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replied.csv");
        {
            let ledger = CsvLedger::open(&path).await.unwrap();
            ledger.record("a@x.com", "Ada", false).await.unwrap();
            ledger.record("b@x.com", "Grace", true).await.unwrap();
        }

        let first = CsvLedger::open(&path).await.unwrap();
        let second = CsvLedger::open(&path).await.unwrap();
        for ledger in [&first, &second] {
            assert!(ledger.contains("a@x.com").await);
            assert!(ledger.contains("b@x.com").await);
            assert!(!ledger.contains("c@x.com").await);
            assert_eq!(ledger.len().await, 2);
        }

        let records = first.records().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].persona_name, "Grace");
        assert!(records[1].used_fallback);
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("replied.csv");
        let ledger = CsvLedger::open(&path).await.unwrap();
        ledger.record("a@x.com", "Ada", false).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn persona_with_comma_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replied.csv");
        let ledger = CsvLedger::open(&path).await.unwrap();
        ledger
            .record("a@x.com", "Holmes, Sherlock \"the\" detective", false)
            .await
            .unwrap();

        let records = ledger.records().await.unwrap();
        assert_eq!(records[0].persona_name, "Holmes, Sherlock \"the\" detective");
    }

    #[tokio::test]
    async fn tolerates_hand_edited_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replied.csv");
        std::fs::write(
            &path,
            "sender_email,timestamp,character_used,fallback_used\n\
             \n\
             a@x.com,2025-01-01T00:00:00+00:00,Ada,No\n\
             b@x.com\n\
             c@x.com,not-a-time,Ada,Maybe\n",
        )
        .unwrap();

        let ledger = CsvLedger::open(&path).await.unwrap();
        assert!(ledger.contains("a@x.com").await);
        assert!(ledger.contains("b@x.com").await);
        assert!(ledger.contains("c@x.com").await);

        let records = ledger.records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sender_email, "a@x.com");
    }

    #[tokio::test]
    async fn append_after_unterminated_last_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replied.csv");
        std::fs::write(
            &path,
            "sender_email,timestamp,character_used,fallback_used\n\
             alice@x.com,2025-01-01T00:00:00+00:00,Ada,No",
        )
        .unwrap();

        let ledger = CsvLedger::open(&path).await.unwrap();
        ledger.record("bob@x.com", "Ada", false).await.unwrap();

        let reopened = CsvLedger::open(&path).await.unwrap();
        assert!(reopened.contains("alice@x.com").await);
        assert!(reopened.contains("bob@x.com").await);
        let records = reopened.records().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].persona_name, "Ada");
        assert!(!records[0].used_fallback);
    }

    #[tokio::test]
    async fn reload_lowercases_senders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replied.csv");
        std::fs::write(
            &path,
            "sender_email,timestamp,character_used,fallback_used\n\
             Alice@Example.COM,2025-01-01T00:00:00+00:00,Ada,No\n",
        )
        .unwrap();

        let ledger = CsvLedger::open(&path).await.unwrap();
        assert!(ledger.contains("alice@example.com").await);
        let records = ledger.records().await.unwrap();
        assert_eq!(records[0].sender_email, "alice@example.com");
    }

    #[test]
    fn encode_quotes_when_needed() {
        assert_eq!(encode_row(&["a", "b"]), "a,b\r\n");
        assert_eq!(encode_row(&["a,b", "c"]), "\"a,b\",c\r\n");
        assert_eq!(encode_row(&["say \"hi\""]), "\"say \"\"hi\"\"\"\r\n");
    }

    #[test]
    fn parse_handles_quotes_and_line_numbers() {
        let rows = parse_rows("h1,h2\n\"x,1\",\"multi\nline\"\nlast,row");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].0, 2);
        assert_eq!(rows[1].1, vec!["x,1", "multi\nline"]);
        assert_eq!(rows[2].0, 4);
        assert_eq!(rows[2].1, vec!["last", "row"]);
    }
}
