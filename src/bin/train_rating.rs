use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};

use fifa_rating::dataset::{load_players_csv, resolve_source, train_test_split};
use fifa_rating::estimator::RatingEstimator;
use fifa_rating::forest::ForestParams;
use fifa_rating::metrics::evaluate;

const DEFAULT_DATA: &str = "data/FIFA-2019.csv";
const DEFAULT_OUT: &str = "model.json";
const DEFAULT_TEST_SIZE: f64 = 0.2;
const DEFAULT_TREE_DEPTH: usize = 3;

fn main() -> Result<()> {
    let source = parse_string_arg("--data").unwrap_or_else(|| DEFAULT_DATA.to_string());
    let out_path = parse_string_arg("--out")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT));
    let test_size = parse_f64_arg("--test-size").unwrap_or(DEFAULT_TEST_SIZE);
    let tree_depth = parse_usize_arg("--show-tree-depth").unwrap_or(DEFAULT_TREE_DEPTH);

    let defaults = ForestParams::default();
    let params = ForestParams {
        n_trees: parse_usize_arg("--trees").unwrap_or(defaults.n_trees).max(1),
        max_depth: parse_usize_arg("--max-depth").or(defaults.max_depth),
        min_samples_leaf: parse_usize_arg("--min-samples-leaf")
            .unwrap_or(defaults.min_samples_leaf)
            .max(1),
        seed: parse_u64_arg("--seed").unwrap_or(defaults.seed),
        ..defaults
    };

    let path = resolve_source(&source).with_context(|| format!("resolve dataset {source}"))?;
    let table = load_players_csv(&path)?;
    println!(
        "[INFO] rows={} kept={} dropped={}",
        table.rows_total,
        table.players.len(),
        table.rows_dropped
    );
    for (reason, count) in &table.drop_reasons {
        println!("[INFO]   dropped {count} ({reason})");
    }
    if table.players.is_empty() {
        bail!("no usable rows in {}", path.display());
    }

    let (train_idx, test_idx) = train_test_split(table.players.len(), test_size, params.seed)?;
    let (train_x, train_y) = table.subset(&train_idx);
    let (test_x, test_y) = table.subset(&test_idx);
    println!(
        "[INFO] train={} test={} trees={} seed={}",
        train_x.len(),
        test_x.len(),
        params.n_trees,
        params.seed
    );

    let mut estimator = RatingEstimator::fit(&train_x, &train_y, params)?.with_source(source);

    if test_x.is_empty() {
        eprintln!("[WARN] empty test split; skipping evaluation");
    } else {
        let predicted = test_x
            .iter()
            .map(|v| estimator.predict(v))
            .collect::<Result<Vec<_>>>()?;
        let metrics = evaluate(&test_y, &predicted);
        println!("Mean Squared Error: {:.2}", metrics.mse);
        println!(
            "[INFO] rmse={:.3} mae={:.3} r2={:.4}",
            metrics.rmse, metrics.mae, metrics.r2
        );
        estimator = estimator.with_holdout(metrics);
    }

    let forest = &estimator.artifact().forest;
    let deepest = forest.trees().iter().map(|t| t.depth()).max().unwrap_or(0);
    println!(
        "[INFO] forest trees={} deepest={deepest} min_samples_leaf={}",
        forest.trees().len(),
        forest.params().min_samples_leaf
    );

    if let Some(text) = estimator.render_first_tree(tree_depth) {
        println!("[INFO] first tree (depth <= {tree_depth}):");
        print!("{text}");
    }

    estimator.save_to_path(&out_path)?;
    println!("[INFO] wrote {}", out_path.display());
    Ok(())
}

fn parse_string_arg(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}=")) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == name {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(next.trim().to_string());
            }
        }
    }
    None
}

fn parse_f64_arg(name: &str) -> Option<f64> {
    parse_numeric_arg(name)
}

fn parse_usize_arg(name: &str) -> Option<usize> {
    parse_numeric_arg(name)
}

fn parse_u64_arg(name: &str) -> Option<u64> {
    parse_numeric_arg(name)
}

/// A value that is present but doesn't parse falls back to the default with a warning.
fn parse_numeric_arg<T: FromStr>(name: &str) -> Option<T> {
    let raw = parse_string_arg(name)?;
    match parse_value(name, &raw) {
        Ok(value) => Some(value),
        Err(msg) => {
            eprintln!("[WARN] {msg}; using the default");
            None
        }
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T, String> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| format!("{name} value `{raw}` is not valid"))
}
