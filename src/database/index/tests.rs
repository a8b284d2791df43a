use super::*;

fn id(value: &str) -> ItemId {
    ItemId::from(value)
}

fn abc_index() -> VectorIndex {
    VectorIndex::build([
        (id("A"), vec![1.0, 0.0, 0.0]),
        (id("B"), vec![0.0, 1.0, 0.0]),
        (id("C"), vec![0.9, 0.1, 0.0]),
    ])
    .expect("index builds")
}

#[test]
fn search_ranks_by_cosine() {
    let index = abc_index();
    let hits = index.search(&[1.0, 0.0, 0.0], 2).expect("search succeeds");

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, id("A"));
    assert!((hits[0].score - 1.0).abs() < 1e-6);
    assert_eq!(hits[1].id, id("C"));
    assert!((hits[1].score - 0.9939).abs() < 1e-3);
}

#[test]
fn fewer_entries_than_k_returns_all() {
    let index = abc_index();
    let hits = index.search(&[0.0, 0.0, 1.0], 10).expect("search succeeds");
    assert_eq!(hits.len(), 3);
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score - SCORE_TIE_TOLERANCE);
    }
}

#[test]
fn ties_break_by_id_ascending() {
    let index = VectorIndex::build([
        (id("zeta"), vec![0.0, 1.0]),
        (id("alpha"), vec![0.0, 2.0]),
        (id("mid"), vec![0.0, 0.5]),
    ])
    .expect("index builds");

    let hits = index.search(&[0.0, 1.0], 3).expect("search succeeds");
    let ids: Vec<&str> = hits.iter().map(|hit| hit.id.as_str()).collect();
    assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
}

#[test]
fn near_equal_score_chain_stays_ordered() {
    // Scores climb 0.6e-9 per entry while ids climb with them.
    let entries: Vec<(ItemId, Vec<f32>)> = (0..40_u32)
        .map(|m| (id(&format!("{:02}", m)), vec![m as f32 * 0.6e-9, 1.0]))
        .collect();
    let index = VectorIndex::build(entries).expect("index builds");

    let hits = index.search(&[1.0, 0.0], 40).expect("search succeeds");
    assert_eq!(hits.len(), 40);
    for pair in hits.windows(2) {
        assert!(
            pair[1].score <= pair[0].score + SCORE_TIE_TOLERANCE,
            "{} ({}) ranked below {} ({})",
            pair[1].id,
            pair[1].score,
            pair[0].id,
            pair[0].score
        );
    }

    let best = hits.iter().map(|hit| hit.score).fold(f64::MIN, f64::max);
    assert!(hits[0].score >= best - SCORE_TIE_TOLERANCE);
    assert_eq!(hits[39].id, id("00"));

    let top = index.search(&[1.0, 0.0], 5).expect("search succeeds");
    assert_eq!(top, hits[..5].to_vec());
}

#[test]
fn compare_scores_is_transitive_for_close_scores() {
    let (a, b, c) = (id("a"), id("b"), id("c"));
    // Each neighbour is within tolerance, the ends are not.
    let (score_a, score_b, score_c) = (0.5, 0.5 + 0.6e-9, 0.5 + 1.2e-9);

    assert_eq!(compare_scores(score_a, &a, score_b, &b), Ordering::Greater);
    assert_eq!(compare_scores(score_b, &b, score_c, &c), Ordering::Less);
    assert_eq!(compare_scores(score_a, &a, score_c, &c), Ordering::Greater);
    assert_eq!(compare_scores(score_c, &c, score_a, &a), Ordering::Less);
}

#[test]
fn partial_selection_matches_full_sort() {
    let entries: Vec<(ItemId, Vec<f32>)> = (0..50_u64)
        .map(|n| {
            let angle = n as f32 * 0.1;
            (ItemId::from(n), vec![angle.cos(), angle.sin()])
        })
        .collect();
    let index = VectorIndex::build(entries).expect("index builds");

    let top = index.search(&[1.0, 0.0], 5).expect("search succeeds");
    let all = index.search(&[1.0, 0.0], 50).expect("search succeeds");
    assert_eq!(top, all[..5].to_vec());
}

#[test]
fn k_zero_returns_nothing() {
    let index = abc_index();
    assert!(index.search(&[1.0, 0.0, 0.0], 0).expect("search succeeds").is_empty());
}

#[test]
fn empty_index_rejects_queries() {
    let index = VectorIndex::build(Vec::<(ItemId, Vec<f32>)>::new()).expect("empty builds");
    assert!(index.is_empty());
    assert!(matches!(
        index.search(&[1.0], 1),
        Err(CinebrainError::EmptyIndex)
    ));
}

#[test]
fn build_rejects_mixed_dimensions() {
    let result = VectorIndex::build([(id("a"), vec![1.0, 0.0]), (id("b"), vec![1.0, 0.0, 0.0])]);
    assert!(matches!(
        result,
        Err(CinebrainError::DimensionMismatch {
            expected: 2,
            actual: 3
        })
    ));
}

#[test]
fn query_dimension_must_match() {
    let index = abc_index();
    assert!(matches!(
        index.search(&[1.0, 0.0], 1),
        Err(CinebrainError::DimensionMismatch {
            expected: 3,
            actual: 2
        })
    ));
}

#[test]
fn upsert_replaces_in_place() {
    let mut index = abc_index();
    let slot = index.slot_of(&id("B")).expect("B is indexed");

    index
        .upsert(id("B"), &[1.0, 0.0, 0.0])
        .expect("upsert succeeds");

    assert_eq!(index.len(), 3);
    assert_eq!(index.slot_of(&id("B")), Some(slot));
    let hits = index.search(&[1.0, 0.0, 0.0], 2).expect("search succeeds");
    assert_eq!(hits[0].id, id("A"));
    assert_eq!(hits[1].id, id("B"));
}

#[test]
fn upsert_appends_new_ids() {
    let mut index = VectorIndex::new();
    index.upsert(id("x"), &[3.0, 4.0]).expect("first upsert");
    index.upsert(id("y"), &[0.0, 1.0]).expect("second upsert");

    assert_eq!(index.dimension(), Some(2));
    assert_eq!(index.ids(), &[id("x"), id("y")]);
    assert!(index.contains(&id("y")));

    let stored = index.vector(&id("x")).expect("vector stored");
    assert!((stored[0] - 0.6).abs() < 1e-6);
    assert!((stored[1] - 0.8).abs() < 1e-6);

    assert!(matches!(
        index.upsert(id("z"), &[1.0]),
        Err(CinebrainError::DimensionMismatch { .. })
    ));
    assert_eq!(index.len(), 2);
}

#[test]
fn empty_vector_does_not_fix_dimension() {
    let mut index = VectorIndex::new();
    assert!(matches!(
        index.upsert(id("empty"), &[]),
        Err(CinebrainError::DimensionMismatch { actual: 0, .. })
    ));
    assert_eq!(index.dimension(), None);

    index.upsert(id("real"), &[1.0, 0.0]).expect("valid vector accepted");
    assert_eq!(index.dimension(), Some(2));
    assert_eq!(index.len(), 1);
}

#[test]
fn non_finite_vectors_are_rejected() {
    let mut index = VectorIndex::new();
    assert!(matches!(
        index.upsert(id("nan"), &[f32::NAN, 1.0]),
        Err(CinebrainError::InvalidResponse(_))
    ));
    assert!(matches!(
        index.upsert(id("inf"), &[f32::INFINITY, 1.0]),
        Err(CinebrainError::InvalidResponse(_))
    ));
    assert!(index.is_empty());
    assert_eq!(index.dimension(), None);
}

#[test]
fn with_dimension_enforces_dimension_before_first_insert() {
    let mut index = VectorIndex::with_dimension(4);
    assert!(index.upsert(id("a"), &[1.0, 0.0]).is_err());
    assert!(index.is_empty());
}

#[test]
fn duplicate_ids_in_build_keep_last() {
    let index = VectorIndex::build([
        (id("a"), vec![1.0, 0.0]),
        (id("a"), vec![0.0, 1.0]),
    ])
    .expect("index builds");

    assert_eq!(index.len(), 1);
    let hits = index.search(&[0.0, 1.0], 1).expect("search succeeds");
    assert!((hits[0].score - 1.0).abs() < 1e-6);
}

#[test]
fn cancelled_search_returns_cancelled() {
    let index = abc_index();
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(
        index.search_cancellable(&[1.0, 0.0, 0.0], 1, &cancel),
        Err(CinebrainError::Cancelled)
    ));
}

#[test]
fn scores_stay_in_range() {
    let index = abc_index();
    let hits = index.search(&[-1.0, 0.0, 0.0], 3).expect("search succeeds");
    assert!(hits.iter().all(|hit| (-1.0..=1.0).contains(&hit.score)));
    assert!((hits[2].score + 1.0).abs() < 1e-6);
}

#[test]
fn cosine_similarity_handles_zero_vectors() {
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    assert!((cosine_similarity(&[2.0, 0.0], &[5.0, 0.0]) - 1.0).abs() < 1e-12);
}
