use fifa_rating::estimator::RatingEstimator;
use fifa_rating::forest::ForestParams;
use fifa_rating::metrics::evaluate;
use fifa_rating::schema::{FEATURE_COUNT, FeatureVector};

fn synthetic_players(n: usize) -> (Vec<FeatureVector>, Vec<f64>) {
    let mut vectors = Vec::with_capacity(n);
    let mut targets = Vec::with_capacity(n);
    for i in 0..n {
        let mut values = [0.0; FEATURE_COUNT];
        for (j, v) in values.iter_mut().enumerate() {
            *v = ((i * 7 + j * 13) % 60) as f64 + 30.0;
        }
        values[0] = 18.0 + (i % 20) as f64;
        values[7] = 165.0 + (i % 30) as f64;
        values[8] = 60.0 + (i % 25) as f64;
        let rating = 0.4 * values[13] + 0.3 * values[12] + 0.2 * values[1] + 10.0;
        vectors.push(FeatureVector::new(values).unwrap());
        targets.push(rating);
    }
    (vectors, targets)
}

#[test]
fn fit_is_deterministic_for_a_seed() {
    let (x, y) = synthetic_players(120);
    let a = RatingEstimator::fit(&x, &y, ForestParams::default()).unwrap();
    let b = RatingEstimator::fit(&x, &y, ForestParams::default()).unwrap();
    assert_eq!(a.artifact().forest, b.artifact().forest);

    let other_seed = ForestParams {
        seed: 7,
        ..ForestParams::default()
    };
    let c = RatingEstimator::fit(&x, &y, other_seed).unwrap();
    assert_ne!(a.artifact().forest, c.artifact().forest);
}

#[test]
fn saved_bytes_reload_with_identical_predictions() {
    let (x, y) = synthetic_players(120);
    let estimator = RatingEstimator::fit(&x, &y, ForestParams::default())
        .unwrap()
        .with_source("synthetic");
    let bytes = estimator.save().unwrap();
    let reloaded = RatingEstimator::load(&bytes).unwrap();

    assert_eq!(reloaded, estimator);
    for v in x.iter().take(25) {
        assert_eq!(reloaded.predict(v).unwrap(), estimator.predict(v).unwrap());
    }
    assert_eq!(reloaded.artifact().source.as_deref(), Some("synthetic"));
}

#[test]
fn file_round_trip_keeps_holdout_metrics() {
    let (x, y) = synthetic_players(100);
    let (train_x, test_x) = x.split_at(80);
    let (train_y, test_y) = y.split_at(80);
    let estimator = RatingEstimator::fit(train_x, train_y, ForestParams::default()).unwrap();
    let predicted = test_x
        .iter()
        .map(|v| estimator.predict(v).unwrap())
        .collect::<Vec<_>>();
    let metrics = evaluate(test_y, &predicted);
    let estimator = estimator.with_holdout(metrics);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("model.json");
    estimator.save_to_path(&path).unwrap();
    assert!(!path.with_extension("json.tmp").exists());

    let reloaded = RatingEstimator::load_from_path(&path).unwrap();
    assert_eq!(reloaded.artifact().holdout.as_ref(), Some(&metrics));
    assert_eq!(reloaded.artifact().train_samples, 80);
    assert_eq!(
        reloaded.predict(&test_x[0]).unwrap(),
        estimator.predict(&test_x[0]).unwrap()
    );
}

#[test]
fn corrupt_or_foreign_artifacts_fail_to_load() {
    assert!(RatingEstimator::load(b"not json").is_err());
    assert!(RatingEstimator::load(br#"{"version":1}"#).is_err());

    let (x, y) = synthetic_players(40);
    let estimator = RatingEstimator::fit(&x, &y, ForestParams::default()).unwrap();
    let mut artifact = estimator.artifact().clone();
    artifact.feature_names.pop();
    let bytes = serde_json::to_vec(&artifact).unwrap();
    let err = RatingEstimator::load(&bytes).unwrap_err();
    assert!(format!("{err:#}").contains("17 features"));

    let dir = tempfile::tempdir().unwrap();
    assert!(RatingEstimator::load_from_path(&dir.path().join("missing.json")).is_err());
}

#[test]
fn first_tree_renders_with_feature_names() {
    let (x, y) = synthetic_players(60);
    let estimator = RatingEstimator::fit(&x, &y, ForestParams::default()).unwrap();
    let text = estimator.render_first_tree(3).unwrap();
    assert!(text.starts_with("|--- "));
    assert!(text.contains(" <= "));
    let deepest = text
        .lines()
        .map(|line| line.matches("|   ").count())
        .max()
        .unwrap();
    assert!(deepest <= 3);
}
