use super::*;
use crate::media::{Cjpegli, NormalizedMedia};
use crate::persistence::artifact::tests::{db_bytes, MemoryStore};
use crate::persistence::ArtifactPersister;
use crate::rss::{create_http_client, Enclosure, ParsedFeed};
use crate::test_support::{serve, Route};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

struct StaticFeed(ParsedFeed);

impl FeedSource for StaticFeed {
    async fn fetch(&self) -> Result<ParsedFeed, PipelineError> {
        Ok(self.0.clone())
    }
}

struct BrokenFeed;

impl FeedSource for BrokenFeed {
    async fn fetch(&self) -> Result<ParsedFeed, PipelineError> {
        Err(PipelineError::transient("https://feed.invalid/rss", "503: Service Unavailable"))
    }
}

/// Remembers every guid it was asked to publish; refuses the call at `fail_at`.
#[derive(Clone, Default)]
struct RecordingPublisher {
    calls: Arc<Mutex<Vec<String>>>,
    fail_at: Option<usize>,
}

impl RecordingPublisher {
    fn failing_at(index: usize) -> Self {
        RecordingPublisher {
            fail_at: Some(index),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Publish for RecordingPublisher {
    async fn publish(
        &self,
        item: &FeedItem,
        _media: Option<NormalizedMedia>,
    ) -> Result<(), PipelineError> {
        let mut calls = self.calls.lock().unwrap();
        if self.fail_at == Some(calls.len()) {
            return Err(PipelineError::Publish("HTTP 500 from createRecord".into()));
        }
        calls.push(item.guid.clone().unwrap_or_default());
        Ok(())
    }
}

fn item(guid: &str) -> FeedItem {
    FeedItem {
        guid: Some(guid.to_string()),
        title: Some(format!("Title {}", guid)),
        link: Some(format!("https://example.com/{}", guid)),
        description: None,
        published_at: None,
        enclosure: None,
    }
}

fn feed(items: Vec<FeedItem>) -> StaticFeed {
    StaticFeed(ParsedFeed {
        title: Some("Example".into()),
        items,
    })
}

fn media() -> MediaNormalizer {
    let client = create_http_client(Duration::from_secs(5)).unwrap();
    MediaNormalizer::new(
        client,
        Box::new(Cjpegli {
            path: "cjpegli".into(),
        }),
        80,
        Duration::from_secs(5),
    )
}

fn pipeline<F: FeedSource>(
    source: F,
    publisher: RecordingPublisher,
    persister: ArtifactPersister<MemoryStore>,
    state_path: &Path,
) -> Pipeline<F, RecordingPublisher, ArtifactPersister<MemoryStore>> {
    Pipeline::new(
        source,
        publisher,
        persister,
        media(),
        state_path,
        GuidPolicy::Skip,
    )
}

/// Restores the latest snapshot into a fresh directory and reports which
/// guids it holds.
async fn persisted(persister: &ArtifactPersister<MemoryStore>, guids: &[&str]) -> Vec<bool> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("database.db");
    persister.restore(&path).await;
    assert!(path.exists(), "no state was persisted");

    let store = StateStore::open(&path).await.unwrap();
    let mut found = Vec::new();
    for guid in guids {
        found.push(store.contains(guid).await.unwrap());
    }
    store.close().await;
    found
}

#[tokio::test]
async fn test_publishes_new_items_in_order_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let publisher = RecordingPublisher::default();
    let run = pipeline(
        feed(vec![item("a"), item("b"), item("c")]),
        publisher.clone(),
        ArtifactPersister::new(MemoryStore::default()),
        &dir.path().join("database.db"),
    );

    let report = run.run().await.unwrap();
    assert_eq!(report.fetched, 3);
    assert_eq!(report.new_items, 3);
    assert_eq!(report.published, 3);
    assert_eq!(report.known_entries, 0);
    assert_eq!(publisher.calls(), vec!["a", "b", "c"]);

    let persister = run.into_persister();
    assert_eq!(persister.store().snapshots.lock().unwrap().len(), 1);
    assert_eq!(persisted(&persister, &["a", "b", "c"]).await, vec![true; 3]);
}

#[tokio::test]
async fn test_partial_run_keeps_what_was_published() {
    let dir = tempfile::tempdir().unwrap();
    let publisher = RecordingPublisher::failing_at(2);
    let run = pipeline(
        feed(vec![item("first"), item("second"), item("third")]),
        publisher.clone(),
        ArtifactPersister::new(MemoryStore::default()),
        &dir.path().join("database.db"),
    );

    let err = run.run().await.unwrap_err();
    assert_eq!(err.stage, RunStage::Publishing(2));
    assert!(matches!(err.source, PipelineError::Publish(_)));
    assert_eq!(err.report.published, 2);
    assert_eq!(publisher.calls(), vec!["first", "second"]);

    let persister = run.into_persister();
    assert_eq!(
        persisted(&persister, &["first", "second", "third"]).await,
        vec![true, true, false]
    );
}

#[tokio::test]
async fn test_next_run_resumes_from_restored_state() {
    let first_dir = tempfile::tempdir().unwrap();
    let first = pipeline(
        feed(vec![item("a"), item("b")]),
        RecordingPublisher::failing_at(1),
        ArtifactPersister::new(MemoryStore::default()),
        &first_dir.path().join("database.db"),
    );
    assert!(first.run().await.is_err());

    // A fresh working directory, as on a new CI runner.
    let second_dir = tempfile::tempdir().unwrap();
    let publisher = RecordingPublisher::default();
    let second = pipeline(
        feed(vec![item("a"), item("b")]),
        publisher.clone(),
        first.into_persister(),
        &second_dir.path().join("database.db"),
    );

    let report = second.run().await.unwrap();
    assert_eq!(report.known_entries, 1);
    assert_eq!(report.new_items, 1);
    assert_eq!(publisher.calls(), vec!["b"]);
}

#[tokio::test]
async fn test_nothing_new_still_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let publisher = RecordingPublisher::default();
    let run = pipeline(
        feed(vec![]),
        publisher.clone(),
        ArtifactPersister::new(MemoryStore::default()),
        &dir.path().join("database.db"),
    );

    let report = run.run().await.unwrap();
    assert_eq!(report.new_items, 0);
    assert_eq!(report.published, 0);
    assert!(publisher.calls().is_empty());
}

#[tokio::test]
async fn test_items_without_guid_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut anonymous = item("x");
    anonymous.guid = None;
    let publisher = RecordingPublisher::default();
    let run = pipeline(
        feed(vec![item("a"), anonymous, item("c")]),
        publisher.clone(),
        ArtifactPersister::new(MemoryStore::default()),
        &dir.path().join("database.db"),
    );

    let report = run.run().await.unwrap();
    assert_eq!(report.fetched, 3);
    assert_eq!(report.published, 2);
    assert_eq!(publisher.calls(), vec!["a", "c"]);
}

#[tokio::test]
async fn test_fetch_failure_persists_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let publisher = RecordingPublisher::default();
    let run = pipeline(
        BrokenFeed,
        publisher.clone(),
        ArtifactPersister::new(MemoryStore::default()),
        &dir.path().join("database.db"),
    );

    let err = run.run().await.unwrap_err();
    assert_eq!(err.stage, RunStage::Fetching);
    assert!(err.source.is_transient());
    assert!(publisher.calls().is_empty());
    assert!(run.into_persister().store().snapshots.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_persist_failure_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let publisher = RecordingPublisher::default();
    let run = pipeline(
        feed(vec![item("a")]),
        publisher.clone(),
        ArtifactPersister::new(MemoryStore {
            fail_upload: true,
            ..Default::default()
        }),
        &dir.path().join("database.db"),
    );

    let err = run.run().await.unwrap_err();
    assert_eq!(err.stage, RunStage::Persisting);
    assert!(matches!(err.source, PipelineError::Persistence(_)));
    assert_eq!(err.report.published, 1);
}

#[tokio::test]
async fn test_media_failure_stops_before_publishing_that_item() {
    let dir = tempfile::tempdir().unwrap();
    let base = serve(vec![Route::status("/missing.jpg", 404)]).await;
    let mut with_image = item("b");
    with_image.enclosure = Some(Enclosure {
        url: format!("{}/missing.jpg", base),
        media_alt: None,
    });

    let publisher = RecordingPublisher::default();
    let run = pipeline(
        feed(vec![item("a"), with_image, item("c")]),
        publisher.clone(),
        ArtifactPersister::new(MemoryStore::default()),
        &dir.path().join("database.db"),
    );

    let err = run.run().await.unwrap_err();
    assert_eq!(err.stage, RunStage::Publishing(1));
    assert!(err.source.is_transient());
    assert_eq!(publisher.calls(), vec!["a"]);

    let persister = run.into_persister();
    assert_eq!(
        persisted(&persister, &["a", "b", "c"]).await,
        vec![true, false, false]
    );
}

#[test]
fn test_stage_display() {
    assert_eq!(RunStage::Publishing(3).to_string(), "publishing item 3");
    assert_eq!(RunStage::Persisting.to_string(), "persisting state");
}

#[tokio::test]
async fn test_garbage_snapshot_starts_cold() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::default().with_snapshot(
        "database-2024-10-01T10-00-00.000Z",
        Utc::now(),
        &[("database.db", b"this is not a database")],
    );
    let publisher = RecordingPublisher::default();
    let run = pipeline(
        feed(vec![item("a"), item("b")]),
        publisher.clone(),
        ArtifactPersister::new(store),
        &dir.path().join("database.db"),
    );

    let report = run.run().await.unwrap();
    assert_eq!(report.known_entries, 0);
    assert_eq!(publisher.calls(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_unreadable_state_file_is_set_aside() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::default().with_snapshot(
        "database-2024-10-01T10-00-00.000Z",
        Utc::now(),
        &[("database.db", db_bytes("truncated").as_slice())],
    );
    let publisher = RecordingPublisher::default();
    let run = pipeline(
        feed(vec![item("a")]),
        publisher.clone(),
        ArtifactPersister::new(store),
        &dir.path().join("database.db"),
    );

    let report = run.run().await.unwrap();
    assert_eq!(report.known_entries, 0);
    assert_eq!(publisher.calls(), vec!["a"]);
    assert_eq!(
        std::fs::read(dir.path().join("database.db.corrupt")).unwrap(),
        db_bytes("truncated")
    );

    // The fresh state replaced the damaged one remotely too.
    let persister = run.into_persister();
    assert_eq!(persisted(&persister, &["a"]).await, vec![true]);
}
