use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::http_client::{app_cache_dir, cache_file_name, download_file, is_remote};
use crate::normalizer::{NormalizeError, NormalizedPlayer, RawPlayerRecord, normalize};
use crate::schema::{FeatureVector, SOURCE_COLUMNS};

/// Columns the source file must provide besides the feature columns.
pub const IDENTITY_COLUMNS: [&str; 5] = ["ID", "Name", "Nationality", "Club", "Overall"];

#[derive(Debug, Clone)]
pub struct PlayerTable {
    pub players: Vec<NormalizedPlayer>,
    pub rows_total: usize,
    pub rows_dropped: usize,
    pub drop_reasons: BTreeMap<String, usize>,
}

impl PlayerTable {
    /// Features and ratings for the given rows. Rows without a rating never
    /// make it into the table.
    pub fn subset(&self, indices: &[usize]) -> (Vec<FeatureVector>, Vec<f64>) {
        let vectors = indices.iter().map(|&i| self.players[i].features).collect();
        let targets = indices
            .iter()
            .map(|&i| self.players[i].rating.unwrap_or(f64::NAN))
            .collect();
        (vectors, targets)
    }
}

pub fn check_headers(headers: &csv::StringRecord) -> Result<()> {
    let missing = IDENTITY_COLUMNS
        .iter()
        .chain(SOURCE_COLUMNS.iter())
        .filter(|col| !headers.iter().any(|h| h.trim() == **col))
        .copied()
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        bail!("dataset is missing columns: {}", missing.join(", "));
    }
    Ok(())
}

/// Keeps every row whose 18 features and `Overall` are valid. Blank identity
/// columns (ID, Name, Nationality, Club) do not drop a row.
pub fn read_players_csv<R: Read>(reader: R) -> Result<PlayerTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_reader(reader);
    let headers = rdr.headers().context("read csv header")?.clone();
    check_headers(&headers)?;

    let mut players = Vec::new();
    let mut rows_total = 0usize;
    let mut drop_reasons: BTreeMap<String, usize> = BTreeMap::new();

    for row in rdr.deserialize::<RawPlayerRecord>() {
        rows_total += 1;
        let record = match row {
            Ok(record) => record,
            Err(_) => {
                *drop_reasons.entry("malformed row".to_string()).or_default() += 1;
                continue;
            }
        };
        match normalize(&record) {
            Ok(player) if player.rating.is_some() => players.push(player),
            Ok(_) => {
                *drop_reasons.entry("missing Overall".to_string()).or_default() += 1;
            }
            Err(err) => {
                *drop_reasons.entry(drop_reason(&err)).or_default() += 1;
            }
        }
    }

    Ok(PlayerTable {
        rows_dropped: rows_total - players.len(),
        players,
        rows_total,
        drop_reasons,
    })
}

pub fn load_players_csv(path: &Path) -> Result<PlayerTable> {
    let file = File::open(path).with_context(|| format!("open dataset {}", path.display()))?;
    read_players_csv(file).with_context(|| format!("read dataset {}", path.display()))
}

/// Local path as-is; `http(s)://` sources are downloaded into the cache dir first.
pub fn resolve_source(source: &str) -> Result<PathBuf> {
    if !is_remote(source) {
        return Ok(PathBuf::from(source));
    }
    let dir = app_cache_dir()
        .unwrap_or_else(|| std::env::temp_dir().join("fifa_rating"))
        .join("datasets");
    let target = dir.join(cache_file_name(source));
    download_file(source.trim(), &target)
}

/// Shuffled index split with `ceil(n * test_size)` rows held out.
pub fn train_test_split(n: usize, test_size: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(0.0..1.0).contains(&test_size) {
        bail!("test size must be in [0, 1), got {test_size}");
    }
    let n_test = ((n as f64) * test_size).ceil() as usize;
    if n_test >= n {
        bail!("{n} rows are not enough for a {test_size} test split");
    }
    let mut indices = (0..n).collect::<Vec<_>>();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let train = indices.split_off(n_test);
    Ok((train, indices))
}

fn drop_reason(err: &NormalizeError) -> String {
    match err {
        NormalizeError::MissingField(field) => format!("missing {field}"),
        NormalizeError::NotNumeric { field, .. } => format!("non-numeric {field}"),
        NormalizeError::InvalidHeight(_) => "invalid height".to_string(),
        NormalizeError::InvalidWeight(_) => "invalid weight".to_string(),
    }
}
