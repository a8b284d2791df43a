use super::*;
use crate::embeddings::{EmbeddingConfig, EmbeddingProvider, MockEmbeddingProvider};
use crate::features::FeatureConfig;

fn described(id: &str, title: &str) -> ItemRecord {
    ItemRecord {
        title: Some(title.to_string()),
        overview: Some(format!("A long enough overview of {} for embedding.", title)),
        ..ItemRecord::new(id)
    }
}

fn feature_text(record: &ItemRecord) -> String {
    FeatureBuilder::default().build(record).into_string()
}

fn service(provider: &Arc<MockEmbeddingProvider>) -> EmbeddingService {
    let provider: Arc<dyn EmbeddingProvider> = Arc::clone(provider) as Arc<dyn EmbeddingProvider>;
    EmbeddingService::new(provider, &EmbeddingConfig::default())
}

fn engine_with(provider: &Arc<MockEmbeddingProvider>) -> RecommendationEngine {
    RecommendationEngine::new(
        service(provider),
        FeatureBuilder::default(),
        RecommendConfig::default(),
    )
}

/// Items A, B, C with vectors [1,0,0], [0,1,0], [0.9,0.1,0].
fn abc() -> (Vec<ItemRecord>, Arc<MockEmbeddingProvider>) {
    let records = vec![
        described("A", "Alpha"),
        described("B", "Bravo"),
        described("C", "Charlie"),
    ];
    let provider = MockEmbeddingProvider::new(3)
        .with_vector(feature_text(&records[0]), vec![1.0, 0.0, 0.0])
        .with_vector(feature_text(&records[1]), vec![0.0, 1.0, 0.0])
        .with_vector(feature_text(&records[2]), vec![0.9, 0.1, 0.0])
        .with_vector("like alpha", vec![1.0, 0.0, 0.0])
        .with_vector("broken query", vec![1.0, 0.0]);
    (records, Arc::new(provider))
}

/// Ten items spread over a quarter circle, `m0` closest to [1, 0].
fn fan() -> (Vec<ItemRecord>, Arc<MockEmbeddingProvider>) {
    let mut provider = MockEmbeddingProvider::new(2).with_vector("east", vec![1.0, 0.0]);
    let mut records = Vec::new();
    for n in 0..10_u32 {
        let mut record = described(&format!("m{}", n), &format!("Movie {}", n));
        record.year = Some(1990 + n as i32);
        let angle = n as f32 * 0.15;
        provider = provider.with_vector(feature_text(&record), vec![angle.cos(), angle.sin()]);
        records.push(record);
    }
    (records, Arc::new(provider))
}

#[tokio::test]
async fn nearest_items_come_first() {
    let (records, provider) = abc();
    let engine = engine_with(&provider);
    engine.ingest(records).await.expect("ingest succeeds");

    let result = engine
        .recommend("like alpha", 2, None)
        .await
        .expect("recommend succeeds");

    assert_eq!(result.ids(), vec![&ItemId::from("A"), &ItemId::from("C")]);
    assert!((result.recommendations[0].score - 1.0).abs() < 1e-6);
    assert!((result.recommendations[1].score - 0.9939).abs() < 1e-3);
    assert_eq!(result.recommendations[0].rank, 1);
    assert_eq!(result.recommendations[1].rank, 2);
    assert_eq!(result.recommendations[0].record.title.as_deref(), Some("Alpha"));
}

#[tokio::test]
async fn asking_for_more_than_indexed_returns_all() {
    let (records, provider) = abc();
    let engine = engine_with(&provider);
    engine
        .ingest(records[..2].to_vec())
        .await
        .expect("ingest succeeds");

    let result = engine
        .recommend("like alpha", 5, None)
        .await
        .expect("recommend succeeds");

    assert_eq!(result.len(), 2);
    let ranks: Vec<usize> = result.iter().map(|rec| rec.rank).collect();
    assert_eq!(ranks, vec![1, 2]);
    assert!(result.recommendations[0].score >= result.recommendations[1].score);
}

#[tokio::test]
async fn repeated_queries_are_identical() {
    let (records, provider) = fan();
    let engine = engine_with(&provider);
    engine.ingest(records).await.expect("ingest succeeds");

    let first = engine.recommend("east", 4, None).await.expect("first query");
    let second = engine.recommend("east", 4, None).await.expect("second query");
    assert_eq!(first, second);
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_embedding() {
    let (records, provider) = abc();
    let engine = engine_with(&provider);
    engine.ingest(records).await.expect("ingest succeeds");
    let calls = provider.call_count();

    assert!(matches!(
        engine.recommend("like alpha", 0, None).await,
        Err(CinebrainError::InvalidQuery(_))
    ));
    assert!(matches!(
        engine.recommend("   ", 3, None).await,
        Err(CinebrainError::InvalidQuery(_))
    ));
    assert_eq!(provider.call_count(), calls);
}

#[tokio::test]
async fn empty_engine_reports_empty_index() {
    let provider = Arc::new(MockEmbeddingProvider::new(3));
    let engine = engine_with(&provider);

    assert!(matches!(
        engine.recommend("anything", 3, None).await,
        Err(CinebrainError::EmptyIndex)
    ));
}

#[tokio::test]
async fn filter_widens_fetch_until_enough_survive() {
    let (records, provider) = fan();
    let engine = engine_with(&provider);
    engine.ingest(records).await.expect("ingest succeeds");

    let only_last = |record: &ItemRecord| record.year() == Some(1999);
    let result = engine
        .recommend("east", 1, Some(&only_last))
        .await
        .expect("recommend succeeds");

    assert_eq!(result.ids(), vec![&ItemId::from("m9")]);
    assert_eq!(result.recommendations[0].rank, 1);
    assert_eq!(result.rounds, 3);
}

#[tokio::test]
async fn filter_that_rejects_everything_returns_short_result() {
    let (records, provider) = fan();
    let engine = engine_with(&provider);
    engine.ingest(records).await.expect("ingest succeeds");

    let filter = ItemFilter::new().with_min_year(2005);
    let result = engine
        .recommend("east", 3, Some(&filter))
        .await
        .expect("recommend succeeds");
    assert!(result.is_empty());

    let filter = ItemFilter::new().with_min_year(1998);
    let result = engine
        .recommend("east", 3, Some(&filter))
        .await
        .expect("recommend succeeds");
    assert_eq!(result.ids(), vec![&ItemId::from("m8"), &ItemId::from("m9")]);
}

#[tokio::test]
async fn query_embedding_failure_names_the_phase() {
    let (records, provider) = abc();
    let engine = engine_with(&provider);
    engine.ingest(records).await.expect("ingest succeeds");

    let err = engine
        .recommend("broken query", 2, None)
        .await
        .expect_err("wrong dimension should fail");

    assert!(matches!(
        &err,
        CinebrainError::RecommendationFailed {
            phase: Phase::Embedding,
            ..
        }
    ));
    assert!(matches!(err.root_cause(), CinebrainError::InvalidResponse(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn index_from_another_model_fails_at_search() {
    let index = VectorIndex::build([(ItemId::from("A"), vec![1.0_f32, 0.0, 0.0])])
        .expect("index builds");
    let mut store = MetadataStore::new();
    let record = described("A", "Alpha");
    let hash = record.content_hash();
    store.insert(record, hash);

    let provider = Arc::new(MockEmbeddingProvider::new(4));
    let engine = RecommendationEngine::from_parts_unchecked(service(&provider), index, store);

    let err = engine
        .recommend("anything", 1, None)
        .await
        .expect_err("dimension mismatch should fail");
    assert!(matches!(
        &err,
        CinebrainError::RecommendationFailed {
            phase: Phase::Search,
            ..
        }
    ));
    assert!(matches!(
        err.root_cause(),
        CinebrainError::DimensionMismatch {
            expected: 3,
            actual: 4
        }
    ));
}

#[tokio::test]
async fn unresolvable_candidate_aborts_the_query() {
    let index = VectorIndex::build([
        (ItemId::from("A"), vec![1.0_f32, 0.0, 0.0]),
        (ItemId::from("ghost"), vec![0.0_f32, 1.0, 0.0]),
    ])
    .expect("index builds");
    let mut store = MetadataStore::new();
    let record = described("A", "Alpha");
    let hash = record.content_hash();
    store.insert(record, hash);

    let (_, provider) = abc();
    let engine = RecommendationEngine::from_parts_unchecked(service(&provider), index, store);

    assert!(!engine.consistency_report().is_consistent);
    assert!(matches!(
        engine.recommend("like alpha", 1, None).await,
        Err(CinebrainError::InternalInconsistency(message)) if message.contains("ghost")
    ));
}

#[tokio::test]
async fn cancelled_query_returns_cancelled() {
    let (records, provider) = abc();
    let engine = engine_with(&provider);
    engine.ingest(records).await.expect("ingest succeeds");

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(
        engine
            .recommend_with_cancel("like alpha", 2, None, &cancel)
            .await,
        Err(CinebrainError::Cancelled)
    ));
}

#[tokio::test]
async fn unchanged_records_are_not_re_embedded() {
    let (records, provider) = abc();
    let engine = engine_with(&provider);

    let first = engine.ingest(records.clone()).await.expect("first ingest");
    assert_eq!(first.added, 3);
    let embedded = provider.embedded_count();
    let version = engine.snapshot().version();

    let second = engine.ingest(records).await.expect("second ingest");
    assert_eq!(second.unchanged, 3);
    assert_eq!(second.embedded(), 0);
    assert_eq!(provider.embedded_count(), embedded);
    assert_eq!(engine.snapshot().version(), version);
}

#[tokio::test]
async fn changed_record_is_updated_in_place() {
    let (mut records, provider) = abc();
    let engine = engine_with(&provider);
    engine.ingest(records.clone()).await.expect("first ingest");

    records[1].overview = Some("A rewritten overview that changes the hash entirely.".to_string());
    let stats = engine.ingest(records).await.expect("second ingest");

    assert_eq!(stats.updated, 1);
    assert_eq!(stats.unchanged, 2);
    assert_eq!(engine.stats().items, 3);
    let stored = engine.resolve(&ItemId::from("B")).expect("B resolves");
    assert!(stored
        .overview
        .as_deref()
        .is_some_and(|text| text.starts_with("A rewritten")));
}

#[tokio::test]
async fn short_records_are_skipped() {
    let provider = Arc::new(MockEmbeddingProvider::new(4));
    let engine = engine_with(&provider);

    let stats = engine
        .ingest(vec![ItemRecord::new("bare"), described("1", "Solaris")])
        .await
        .expect("ingest succeeds");

    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.added, 1);
    assert!(matches!(
        engine.resolve(&ItemId::from("bare")),
        Err(CinebrainError::NotFound(_))
    ));
}

#[tokio::test]
async fn min_length_is_configurable() {
    let provider = Arc::new(MockEmbeddingProvider::new(4));
    let engine = RecommendationEngine::new(
        service(&provider),
        FeatureBuilder::new(FeatureConfig { min_length: 0 }),
        RecommendConfig::default(),
    );
    let record = ItemRecord {
        title: Some("Up".to_string()),
        ..ItemRecord::new("14160")
    };

    let stats = engine.ingest(vec![record]).await.expect("ingest succeeds");
    assert_eq!(stats.added, 1);
}

#[tokio::test]
async fn duplicate_ids_in_one_batch_keep_the_last() {
    let provider = Arc::new(MockEmbeddingProvider::new(4));
    let engine = engine_with(&provider);

    let stats = engine
        .ingest(vec![described("7", "First Cut"), described("7", "Final Cut")])
        .await
        .expect("ingest succeeds");

    assert_eq!(stats.total, 1);
    let stored = engine.resolve(&ItemId::from("7")).expect("resolves");
    assert_eq!(stored.title.as_deref(), Some("Final Cut"));
}

#[tokio::test]
async fn failed_ingest_leaves_snapshot_untouched() {
    let (records, provider) = abc();
    let engine = engine_with(&provider);
    engine.ingest(records).await.expect("ingest succeeds");
    let before = engine.snapshot();

    let bad = described("D", "Delta");
    let provider_with_bad = Arc::new(
        MockEmbeddingProvider::new(3).with_vector(feature_text(&bad), vec![1.0, 0.0]),
    );
    let failing = RecommendationEngine::from_parts_unchecked(
        service(&provider_with_bad),
        before.index().clone(),
        before.store().clone(),
    );

    let err = failing
        .ingest(vec![described("E", "Echo"), bad])
        .await
        .expect_err("wrong dimension should fail");
    assert!(matches!(err, CinebrainError::InvalidResponse(_)));

    let after = failing.snapshot();
    assert_eq!(after.version(), 0);
    assert_eq!(after.index().len(), 3);
    assert!(!after.store().contains(&ItemId::from("E")));
    assert!(failing.consistency_report().is_consistent);
}

#[tokio::test]
async fn rebuild_replaces_everything() {
    let (records, provider) = abc();
    let engine = engine_with(&provider);
    engine.ingest(records.clone()).await.expect("ingest succeeds");

    let stats = engine
        .rebuild(vec![records[2].clone()])
        .await
        .expect("rebuild succeeds");

    assert_eq!(stats.total, 1);
    assert_eq!(engine.stats().items, 1);
    assert!(!engine.snapshot().index().contains(&ItemId::from("A")));
    assert!(engine.consistency_report().is_consistent);

    let result = engine
        .recommend("like alpha", 3, None)
        .await
        .expect("recommend succeeds");
    assert_eq!(result.ids(), vec![&ItemId::from("C")]);
}

#[tokio::test]
async fn queries_keep_their_snapshot_while_writers_publish() {
    let (records, provider) = abc();
    let engine = engine_with(&provider);
    engine
        .ingest(records[..2].to_vec())
        .await
        .expect("ingest succeeds");

    let held = engine.snapshot();
    engine
        .ingest(vec![records[2].clone()])
        .await
        .expect("second ingest succeeds");

    assert_eq!(held.index().len(), 2);
    assert_eq!(engine.snapshot().index().len(), 3);
    assert_eq!(engine.snapshot().version(), held.version() + 1);
}

#[tokio::test]
async fn progress_accounts_for_every_record() {
    let (mut records, provider) = abc();
    records.push(ItemRecord::new("too-short"));
    let engine = engine_with(&provider);

    let seen = std::sync::atomic::AtomicUsize::new(0);
    let report = |n: usize| {
        seen.fetch_add(n, std::sync::atomic::Ordering::SeqCst);
    };
    engine
        .ingest_with_progress(records, &report)
        .await
        .expect("ingest succeeds");

    assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 4);
}

#[tokio::test]
async fn stats_describe_the_engine() {
    let (records, provider) = abc();
    let engine = engine_with(&provider);
    engine.ingest(records).await.expect("ingest succeeds");

    let stats = engine.stats();
    assert_eq!(stats.items, 3);
    assert_eq!(stats.dimension, Some(3));
    assert_eq!(stats.version, 1);
    assert_eq!(stats.provider, "mock");
    assert_eq!(stats.cache.entries, 3);
}
