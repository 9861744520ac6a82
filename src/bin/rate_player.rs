use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use fifa_rating::estimator::RatingEstimator;
use fifa_rating::schema::{FEATURE_COUNT, FEATURE_NAMES, FeatureVector, HEIGHT_INDEX, WEIGHT_INDEX};

fn main() -> Result<()> {
    let model_path = parse_model_arg().unwrap_or_else(|| PathBuf::from("model.json"));
    let estimator = RatingEstimator::load_from_path(&model_path)?;

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut stdout = io::stdout();

    let mut values = [0.0; FEATURE_COUNT];
    for (idx, name) in FEATURE_NAMES.iter().enumerate() {
        values[idx] = prompt_number(&mut input, &mut stdout, &prompt_label(idx, name))?;
    }
    let vector =
        FeatureVector::new(values).ok_or_else(|| anyhow!("feature values must be finite"))?;

    let rating = estimator.predict(&vector)?;
    println!("Predicted rating: {rating:.2}");
    Ok(())
}

fn prompt_label(idx: usize, name: &str) -> String {
    match idx {
        HEIGHT_INDEX => format!("{name} (cm)"),
        WEIGHT_INDEX => format!("{name} (kg)"),
        _ => name.to_string(),
    }
}

fn prompt_number<R: BufRead, W: Write>(input: &mut R, out: &mut W, label: &str) -> Result<f64> {
    loop {
        write!(out, "Enter {label}: ").context("write prompt")?;
        out.flush().context("flush prompt")?;

        let mut line = String::new();
        let read = input.read_line(&mut line).context("read stdin")?;
        if read == 0 {
            return Err(anyhow!("input ended before `{label}` was entered"));
        }
        match line.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => return Ok(value),
            _ => eprintln!("[WARN] `{}` is not a number, try again", line.trim()),
        }
    }
}

fn parse_model_arg() -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix("--model=") {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == "--model" {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(PathBuf::from(next));
            }
        }
    }
    None
}
