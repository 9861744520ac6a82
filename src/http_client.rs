use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;

const REQUEST_TIMEOUT_SECS: u64 = 180;
const DOWNLOAD_ATTEMPTS: u32 = 4;
const CACHE_DIR: &str = "fifa_rating";

static CLIENT: OnceCell<Client> = OnceCell::new();

pub fn http_client() -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        Client::builder()
            .user_agent("fifa-rating/0.1")
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build http client")
    })
}

pub fn app_cache_dir() -> Option<PathBuf> {
    if let Ok(base) = std::env::var("XDG_CACHE_HOME")
        && !base.trim().is_empty()
    {
        return Some(PathBuf::from(base).join(CACHE_DIR));
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(CACHE_DIR))
}

pub fn download_file(url: &str, path: &Path) -> Result<PathBuf> {
    let client = http_client()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut last_err: Option<anyhow::Error> = None;
    for attempt in 1..=DOWNLOAD_ATTEMPTS {
        let fetched = client
            .get(url)
            .send()
            .with_context(|| format!("request {url}"))
            .and_then(|res| {
                res.error_for_status()
                    .with_context(|| format!("status for {url}"))
            })
            .and_then(|res| res.bytes().with_context(|| format!("read body {url}")));
        match fetched {
            Ok(bytes) => {
                let tmp = path.with_extension("part");
                fs::write(&tmp, &bytes).with_context(|| format!("write {}", tmp.display()))?;
                fs::rename(&tmp, path).with_context(|| format!("move to {}", path.display()))?;
                return Ok(path.to_path_buf());
            }
            Err(err) => {
                eprintln!("[WARN] download attempt {attempt}/{DOWNLOAD_ATTEMPTS} failed: {err:#}");
                last_err = Some(err);
                if attempt < DOWNLOAD_ATTEMPTS {
                    let sleep_ms = 500_u64.saturating_mul(attempt as u64);
                    std::thread::sleep(Duration::from_millis(sleep_ms));
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("download failed for {url}")))
}

pub fn is_remote(source: &str) -> bool {
    let lower = source.trim().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// File name for a downloaded URL inside the cache dir.
pub fn cache_file_name(url: &str) -> String {
    let tail = url
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .rsplit('/')
        .next()
        .unwrap_or_default();
    let cleaned = tail
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();
    if cleaned.trim_matches(['.', '_']).is_empty() {
        "dataset.csv".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::{cache_file_name, is_remote};

    #[test]
    fn remote_detection() {
        assert!(is_remote("https://example.com/data.csv"));
        assert!(is_remote(" HTTP://example.com/data.csv"));
        assert!(!is_remote("data/FIFA-2019.csv"));
    }

    #[test]
    fn cache_names_come_from_the_url_path() {
        assert_eq!(
            cache_file_name("https://example.com/x/FIFA-2019.csv?dl=1"),
            "FIFA-2019.csv"
        );
        assert_eq!(cache_file_name("https://example.com/"), "dataset.csv");
    }
}
