// SPDX-License-Identifier: Apache-2.0

//! Drives one ingestion run: files in order, lines in order, uploads in
//! parallel, cursor advances in line order.
//!
//! Uploads are spawned onto the runtime and queued in a `FuturesOrdered`,
//! which yields results in submission order no matter which upload finishes
//! first. The cursor is only touched from that ordered stream, so a line is
//! never marked delivered while an earlier line is still in flight.

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::future::{self, BoxFuture};
use futures_util::stream::FuturesOrdered;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, error, info, warn};

use crate::journal::cursor::{CursorStore, ResumeCursor};
use crate::journal::error::{Error, Result};
use crate::journal::finder::JournalFile;
use crate::journal::parser::{FileHeaderMeta, LineParser, ParsedLine};
use crate::journal::reader::JournalReader;
use crate::uploader::{UploadError, UploadErrorKind, UploadRequest};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Uploads allowed in flight at once; 1 makes dispatch sequential
    pub max_concurrent_uploads: usize,
    /// Pause before each file after the first
    pub file_interval: Duration,
    /// Stop advancing the cursor after the first failed line of the run
    pub hold_cursor_on_failure: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: 4,
            file_interval: Duration::from_secs(1),
            hold_cursor_on_failure: false,
        }
    }
}

/// Counters for a single run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Files read to the end (or to an interrupt)
    pub files: usize,
    /// Raw lines read, including blank and malformed ones
    pub lines: usize,
    pub uploaded: usize,
    /// Events older than the resume cursor
    pub skipped: usize,
    pub parse_errors: usize,
    /// Events that were not delivered: upload errors and missing headers
    pub failed: usize,
    pub discovery_errors: usize,
    pub interrupted: bool,
}

/// Result of one dispatched line, yielded in submission order
struct Completed {
    line: usize,
    len: usize,
    timestamp: DateTime<Utc>,
    result: Result<()>,
}

type Pending = FuturesOrdered<BoxFuture<'static, Completed>>;

pub struct JournalCoordinator<S, U> {
    cursor: ResumeCursor<S>,
    uploader: U,
    parser: LineParser,
    config: CoordinatorConfig,
    header: Option<Arc<FileHeaderMeta>>,
    cursor_held: bool,
    stats: IngestStats,
}

impl<S, U> JournalCoordinator<S, U>
where
    S: CursorStore,
    U: Service<UploadRequest, Response = (), Error = UploadError> + Clone + Send + 'static,
    U::Future: Send + 'static,
{
    pub fn new(cursor: ResumeCursor<S>, uploader: U, mut config: CoordinatorConfig) -> Self {
        config.max_concurrent_uploads = config.max_concurrent_uploads.max(1);

        Self {
            cursor,
            uploader,
            parser: LineParser::new(),
            config,
            header: None,
            cursor_held: false,
            stats: IngestStats::default(),
        }
    }

    pub fn cursor(&self) -> &ResumeCursor<S> {
        &self.cursor
    }

    /// Process `files` in the given order.
    ///
    /// Returns the run counters, or the first fatal error. Cancelling `cancel`
    /// stops reading, waits for uploads already in flight and returns
    /// normally with `interrupted` set.
    pub async fn run(&mut self, files: &[JournalFile], cancel: &CancellationToken) -> Result<IngestStats> {
        for (idx, file) in files.iter().enumerate() {
            if idx > 0 && !self.config.file_interval.is_zero() {
                select! {
                    _ = tokio::time::sleep(self.config.file_interval) => {},
                    _ = cancel.cancelled() => {},
                }
            }

            if cancel.is_cancelled() {
                self.stats.interrupted = true;
                break;
            }

            self.process_file(file, cancel).await?;
            self.stats.files += 1;

            if self.stats.interrupted {
                break;
            }
        }

        if self.stats.interrupted {
            warn!("Ingestion interrupted, in-flight uploads were drained");
        }

        Ok(self.stats.clone())
    }

    async fn process_file(&mut self, file: &JournalFile, cancel: &CancellationToken) -> Result<()> {
        let name = file.file_name().to_string();
        let mut reader = JournalReader::open(&file.path).map_err(|e| Error::fatal_io(&file.path, e))?;

        debug!(file = %name, "Processing journal file");

        let mut pending: Pending = FuturesOrdered::new();

        loop {
            if cancel.is_cancelled() {
                self.stats.interrupted = true;
                break;
            }

            // Blocking read on the task; journal lines are small
            let raw = match reader.next_line() {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(e) => {
                    self.drain(&name, &mut pending).await?;
                    return Err(Error::fatal_io(&file.path, e));
                }
            };
            self.stats.lines += 1;

            let event = match self.parser.parse(&raw.bytes) {
                Ok(ParsedLine::NoOp) => continue,
                Ok(ParsedLine::Event(event)) => event,
                Err(e) => {
                    warn!(file = %name, line = raw.number, len = raw.bytes.len(), error = %e, "Skipping malformed journal line");
                    self.stats.parse_errors += 1;
                    continue;
                }
            };

            if let Some(header) = event.header {
                debug!(file = %name, line = raw.number, game_version = %header.game_version, build = %header.build, "New file header");
                self.header = Some(Arc::new(header));
            }

            let timestamp = event.envelope.timestamp;
            if self.cursor.should_skip(timestamp) {
                self.stats.skipped += 1;
                continue;
            }

            while pending.len() >= self.config.max_concurrent_uploads {
                self.complete_next(&name, &mut pending).await?;
            }

            let len = event.message.len();
            let fut: BoxFuture<'static, Result<()>> = match &self.header {
                Some(header) => self.dispatch(header.clone(), event.message),
                None => Box::pin(future::ready(Err(Error::MissingHeader))),
            };
            pending.push_back(Box::pin(async move {
                Completed {
                    line: raw.number,
                    len,
                    timestamp,
                    result: fut.await,
                }
            }));

            // Everything after the first line may depend on its header
            if raw.number == 1 {
                self.drain(&name, &mut pending).await?;
            }
        }

        self.drain(&name, &mut pending).await?;

        info!(file = %name, lines = reader.lines_read(), bytes = reader.bytes_read(), "Finished journal file");

        Ok(())
    }

    fn dispatch(&self, header: Arc<FileHeaderMeta>, message: String) -> BoxFuture<'static, Result<()>> {
        let req = UploadRequest { header, message };
        let handle = tokio::spawn(self.uploader.clone().oneshot(req));

        Box::pin(async move {
            match handle.await {
                Ok(res) => res.map_err(Error::from),
                Err(e) => Err(Error::Upload(UploadError::new(
                    UploadErrorKind::Transport,
                    None,
                    format!("upload task failed: {}", e),
                ))),
            }
        })
    }

    async fn complete_next(&mut self, file: &str, pending: &mut Pending) -> Result<()> {
        match pending.next().await {
            Some(done) => self.complete(file, done),
            None => Ok(()),
        }
    }

    async fn drain(&mut self, file: &str, pending: &mut Pending) -> Result<()> {
        while let Some(done) = pending.next().await {
            self.complete(file, done)?;
        }
        Ok(())
    }

    fn complete(&mut self, file: &str, done: Completed) -> Result<()> {
        match done.result {
            Ok(()) => {
                self.stats.uploaded += 1;
                if !self.cursor_held {
                    // Synchronous fsync of a one-line file, kept on the task
                    self.cursor.advance(done.timestamp)?;
                }
            }
            Err(e) => {
                self.stats.failed += 1;

                let status = match &e {
                    Error::Upload(u) => u.status.map(|s| s.as_u16()),
                    _ => None,
                };
                error!(file, line = done.line, len = done.len, status, error = %e, "Failed to upload journal line");

                if self.config.hold_cursor_on_failure && !self.cursor_held {
                    warn!(file, line = done.line, "Holding resume cursor for the rest of the run");
                    self.cursor_held = true;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::cursor::MemoryCursorStore;
    use http::StatusCode;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tower::service_fn;

    const HEADER: &str = r#"{"timestamp":"2024-03-09T10:00:00Z","event":"Fileheader","part":1,"language":"English/UK","gameversion":"4.0.0.1801","build":"r300472/r0 "}"#;

    fn line(ts: &str, event: &str) -> String {
        format!(r#"{{"timestamp":"{}","event":"{}"}}"#, ts, event)
    }

    fn header(ts: &str, version: &str) -> String {
        format!(
            r#"{{"timestamp":"{}","event":"Fileheader","part":1,"gameversion":"{}","build":"b-{}"}}"#,
            ts, version, version
        )
    }

    fn write_journal(dir: &Path, name: &str, lines: &[String]) -> JournalFile {
        let path = dir.join(name);
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();
        JournalFile {
            path,
            embedded_timestamp: Utc::now(),
        }
    }

    fn config(max: usize) -> CoordinatorConfig {
        CoordinatorConfig {
            max_concurrent_uploads: max,
            file_interval: Duration::ZERO,
            hold_cursor_on_failure: false,
        }
    }

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    /// Records every upload; messages containing "FAIL" are rejected.
    /// Lines whose event name starts with "Slow" take longer to upload.
    #[derive(Clone, Default)]
    struct FakeApi {
        sent: Arc<Mutex<Vec<UploadRequest>>>,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl FakeApi {
        fn service(
            &self,
        ) -> impl Service<UploadRequest, Response = (), Error = UploadError, Future: Send + 'static>
            + Clone
            + Send
            + 'static
        {
            let api = self.clone();
            service_fn(move |req: UploadRequest| {
                let api = api.clone();
                async move {
                    api.events.lock().unwrap().push(format!("start {}", req.message));
                    if req.message.contains("\"Slow") {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    api.events.lock().unwrap().push(format!("end {}", req.message));

                    let failed = req.message.contains("FAIL");
                    api.sent.lock().unwrap().push(req);
                    if failed {
                        Err(UploadError::new(
                            UploadErrorKind::Rejected,
                            Some(StatusCode::BAD_REQUEST),
                            "nope",
                        ))
                    } else {
                        Ok(())
                    }
                }
            })
        }

        fn messages(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|r| r.message.clone()).collect()
        }
    }

    /// Cursor store that keeps every value written, in order
    #[derive(Clone, Default)]
    struct HistoryStore {
        history: Arc<Mutex<Vec<String>>>,
    }

    impl CursorStore for HistoryStore {
        fn load(&self) -> Result<Option<String>> {
            Ok(self.history.lock().unwrap().last().cloned())
        }

        fn store(&mut self, value: &str) -> Result<()> {
            self.history.lock().unwrap().push(value.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cursor_advances_in_line_order() {
        let dir = TempDir::new().unwrap();
        let file = write_journal(
            dir.path(),
            "Journal.2024-03-09T100000.01.log",
            &[
                HEADER.to_string(),
                line("2024-03-09T10:00:01Z", "SlowA"),
                line("2024-03-09T10:00:02Z", "B"),
                line("2024-03-09T10:00:03Z", "SlowC"),
                line("2024-03-09T10:00:04Z", "D"),
                line("2024-03-09T10:00:05Z", "E"),
            ],
        );

        let store = HistoryStore::default();
        let api = FakeApi::default();
        let cursor = ResumeCursor::load(store.clone()).unwrap();
        let mut coordinator = JournalCoordinator::new(cursor, api.service(), config(4));

        let stats = coordinator.run(&[file], &CancellationToken::new()).await.unwrap();
        assert_eq!(stats.uploaded, 6);
        assert_eq!(stats.failed, 0);

        assert_eq!(
            *store.history.lock().unwrap(),
            vec![
                "2024-03-09T10:00:00Z",
                "2024-03-09T10:00:01Z",
                "2024-03-09T10:00:02Z",
                "2024-03-09T10:00:03Z",
                "2024-03-09T10:00:04Z",
                "2024-03-09T10:00:05Z",
            ]
        );

        // Fast lines overtook the slow ones on the wire
        let events = api.events.lock().unwrap().clone();
        let end_b = events.iter().position(|e| e.starts_with("end") && e.contains("\"B\"")).unwrap();
        let end_a = events.iter().position(|e| e.starts_with("end") && e.contains("SlowA")).unwrap();
        assert!(end_b < end_a);
    }

    #[tokio::test]
    async fn test_first_line_completes_before_the_rest_start() {
        let dir = TempDir::new().unwrap();
        let slow_header = r#"{"timestamp":"2024-03-09T10:00:00Z","event":"Fileheader","part":1,"gameversion":"4.0","build":"r1","note":"\"Slow"}"#;
        let file = write_journal(
            dir.path(),
            "Journal.2024-03-09T100000.01.log",
            &[
                slow_header.to_string(),
                line("2024-03-09T10:00:01Z", "A"),
                line("2024-03-09T10:00:02Z", "B"),
            ],
        );

        let api = FakeApi::default();
        let cursor = ResumeCursor::load(MemoryCursorStore::new()).unwrap();
        let mut coordinator = JournalCoordinator::new(cursor, api.service(), config(8));
        coordinator.run(&[file], &CancellationToken::new()).await.unwrap();

        let events = api.events.lock().unwrap().clone();
        assert!(events[0].starts_with("start") && events[0].contains("Fileheader"));
        assert!(events[1].starts_with("end") && events[1].contains("Fileheader"));
    }

    #[tokio::test]
    async fn test_malformed_lines_do_not_stop_the_file() {
        let dir = TempDir::new().unwrap();
        let file = write_journal(
            dir.path(),
            "Journal.2024-03-09T100000.01.log",
            &[
                HEADER.to_string(),
                "{ broken".to_string(),
                line("2024-03-09T10:00:01Z", "A"),
                String::new(),
                "not json at all".to_string(),
                line("2024-03-09T10:00:02Z", "B"),
            ],
        );

        let api = FakeApi::default();
        let cursor = ResumeCursor::load(MemoryCursorStore::new()).unwrap();
        let mut coordinator = JournalCoordinator::new(cursor, api.service(), config(2));
        let stats = coordinator.run(&[file], &CancellationToken::new()).await.unwrap();

        assert_eq!(stats.parse_errors, 2);
        assert_eq!(stats.uploaded, 3);
        assert_eq!(stats.lines, 6);
        assert_eq!(api.messages().len(), 3);
        assert_eq!(
            coordinator.cursor().last_forwarded(),
            Some(ts("2024-03-09T10:00:02Z"))
        );
    }

    #[tokio::test]
    async fn test_header_snapshot_follows_lines_across_files() {
        let dir = TempDir::new().unwrap();
        let first = write_journal(
            dir.path(),
            "Journal.2024-03-09T100000.01.log",
            &[
                header("2024-03-09T10:00:00Z", "4.0"),
                line("2024-03-09T10:00:01Z", "A"),
                line("2024-03-09T10:00:02Z", "B"),
            ],
        );
        let second = write_journal(
            dir.path(),
            "Journal.2024-03-09T110000.01.log",
            &[
                line("2024-03-09T11:00:00Z", "C"),
                header("2024-03-09T11:00:01Z", "4.1"),
                line("2024-03-09T11:00:02Z", "D"),
            ],
        );

        let api = FakeApi::default();
        let cursor = ResumeCursor::load(MemoryCursorStore::new()).unwrap();
        let mut coordinator = JournalCoordinator::new(cursor, api.service(), config(4));
        coordinator
            .run(&[first, second], &CancellationToken::new())
            .await
            .unwrap();

        let versions: Vec<(String, String)> = api
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|r| {
                let event: serde_json::Value = serde_json::from_str(&r.message).unwrap();
                (
                    event["event"].as_str().unwrap().to_string(),
                    r.header.game_version.clone(),
                )
            })
            .collect();

        let version_of = |name: &str| {
            versions
                .iter()
                .find(|(ev, _)| ev == name)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(version_of("A"), "4.0");
        assert_eq!(version_of("B"), "4.0");
        // Carried over from the previous file until superseded
        assert_eq!(version_of("C"), "4.0");
        assert_eq!(version_of("D"), "4.1");
    }

    #[tokio::test]
    async fn test_events_before_any_header_are_failures() {
        let dir = TempDir::new().unwrap();
        let file = write_journal(
            dir.path(),
            "Journal.2024-03-09T100000.01.log",
            &[
                line("2024-03-09T10:00:01Z", "A"),
                HEADER.to_string(),
                line("2024-03-09T10:00:02Z", "B"),
            ],
        );

        let api = FakeApi::default();
        let cursor = ResumeCursor::load(MemoryCursorStore::new()).unwrap();
        let mut coordinator = JournalCoordinator::new(cursor, api.service(), config(1));
        let stats = coordinator.run(&[file], &CancellationToken::new()).await.unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.uploaded, 2);
        assert_eq!(api.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_resume_scenario() {
        let dir = TempDir::new().unwrap();
        let file = write_journal(
            dir.path(),
            "Journal.2024-03-09T095900.01.log",
            &[
                header("2024-03-09T09:59:00Z", "4.0"),
                line("2024-03-09T09:59:59Z", "Old"),
                line("2024-03-09T10:00:01Z", "New"),
                line("2024-03-09T10:00:00Z", "Boundary"),
            ],
        );

        let store = MemoryCursorStore::with_value("2024-03-09T10:00:00Z");
        let api = FakeApi::default();
        let cursor = ResumeCursor::load(store.clone()).unwrap();
        let mut coordinator = JournalCoordinator::new(cursor, api.service(), config(4));
        let stats = coordinator
            .run(std::slice::from_ref(&file), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.uploaded, 2);
        assert_eq!(store.value().as_deref(), Some("2024-03-09T10:00:01Z"));

        let sent = api.messages();
        assert!(sent.iter().any(|m| m.contains("\"New\"")));
        assert!(sent.iter().any(|m| m.contains("\"Boundary\"")));
        // The skipped header still supplied the metadata
        assert!(api
            .sent
            .lock()
            .unwrap()
            .iter()
            .all(|r| r.header.game_version == "4.0"));
    }

    #[tokio::test]
    async fn test_rerun_only_resends_the_cursor_instant() {
        let dir = TempDir::new().unwrap();
        let file = write_journal(
            dir.path(),
            "Journal.2024-03-09T100000.01.log",
            &[
                HEADER.to_string(),
                line("2024-03-09T10:00:01Z", "A"),
                line("2024-03-09T10:00:02Z", "B"),
            ],
        );
        let store = MemoryCursorStore::new();

        let first = FakeApi::default();
        let cursor = ResumeCursor::load(store.clone()).unwrap();
        JournalCoordinator::new(cursor, first.service(), config(4))
            .run(std::slice::from_ref(&file), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.messages().len(), 3);

        let second = FakeApi::default();
        let cursor = ResumeCursor::load(store.clone()).unwrap();
        let stats = JournalCoordinator::new(cursor, second.service(), config(4))
            .run(std::slice::from_ref(&file), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.skipped, 2);
        assert_eq!(second.messages(), vec![line("2024-03-09T10:00:02Z", "B")]);
        assert_eq!(store.value().as_deref(), Some("2024-03-09T10:00:02Z"));
    }

    #[tokio::test]
    async fn test_failures_are_reported_and_do_not_advance() {
        let dir = TempDir::new().unwrap();
        let file = write_journal(
            dir.path(),
            "Journal.2024-03-09T100000.01.log",
            &[
                HEADER.to_string(),
                line("2024-03-09T10:00:01Z", "A"),
                line("2024-03-09T10:00:02Z", "FAIL"),
                line("2024-03-09T10:00:03Z", "C"),
            ],
        );

        let store = HistoryStore::default();
        let api = FakeApi::default();
        let cursor = ResumeCursor::load(store.clone()).unwrap();
        let mut coordinator = JournalCoordinator::new(cursor, api.service(), config(4));
        let stats = coordinator.run(&[file], &CancellationToken::new()).await.unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.uploaded, 3);
        assert!(!store.history.lock().unwrap().contains(&"2024-03-09T10:00:02Z".to_string()));
        assert_eq!(
            store.history.lock().unwrap().last().map(String::as_str),
            Some("2024-03-09T10:00:03Z")
        );
    }

    #[tokio::test]
    async fn test_hold_cursor_on_failure() {
        let dir = TempDir::new().unwrap();
        let file = write_journal(
            dir.path(),
            "Journal.2024-03-09T100000.01.log",
            &[
                HEADER.to_string(),
                line("2024-03-09T10:00:01Z", "A"),
                line("2024-03-09T10:00:02Z", "FAIL"),
                line("2024-03-09T10:00:03Z", "C"),
            ],
        );

        let store = MemoryCursorStore::new();
        let api = FakeApi::default();
        let cursor = ResumeCursor::load(store.clone()).unwrap();
        let mut cfg = config(4);
        cfg.hold_cursor_on_failure = true;
        let stats = JournalCoordinator::new(cursor, api.service(), cfg)
            .run(&[file], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.uploaded, 3);
        assert_eq!(store.value().as_deref(), Some("2024-03-09T10:00:01Z"));
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_before_next_file() {
        let dir = TempDir::new().unwrap();
        let file = write_journal(
            dir.path(),
            "Journal.2024-03-09T100000.01.log",
            &[HEADER.to_string(), line("2024-03-09T10:00:01Z", "A")],
        );

        let cancel = CancellationToken::new();
        cancel.cancel();

        let api = FakeApi::default();
        let cursor = ResumeCursor::load(MemoryCursorStore::new()).unwrap();
        let stats = JournalCoordinator::new(cursor, api.service(), config(4))
            .run(&[file], &cancel)
            .await
            .unwrap();

        assert!(stats.interrupted);
        assert_eq!(stats.files, 0);
        assert!(api.messages().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let file = JournalFile {
            path: dir.path().join("Journal.2024-03-09T100000.01.log"),
            embedded_timestamp: Utc::now(),
        };

        let api = FakeApi::default();
        let cursor = ResumeCursor::load(MemoryCursorStore::new()).unwrap();
        let err = JournalCoordinator::new(cursor, api.service(), config(4))
            .run(&[file], &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert!(matches!(err, Error::FatalIo { .. }));
    }
}
