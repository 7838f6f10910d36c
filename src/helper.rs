use crate::error::ScraperError;
use std::collections::HashSet;
use std::future::Future;
use std::hash::Hash;
use tokio_util::sync::CancellationToken;

/// Run `fut` until it completes or `cancel` fires, whichever comes first.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, ScraperError>
where
    F: Future<Output = Result<T, ScraperError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ScraperError::Cancelled),
        res = fut => res,
    }
}

/// Case-insensitive keyword matcher. `all` and `*` match everything.
#[derive(Debug, Clone)]
pub struct Matcher {
    keywords: &'static [&'static str],
}

impl Matcher {
    pub const fn new(keywords: &'static [&'static str]) -> Self {
        Self { keywords }
    }

    pub fn first(&self) -> &'static str {
        self.keywords.first().copied().unwrap_or("none")
    }

    pub fn matches(&self, s: &str) -> bool {
        if s.eq_ignore_ascii_case("all") || s == "*" {
            return true;
        }
        self.keywords.iter().any(|k| k.eq_ignore_ascii_case(s))
    }
}

/// Remove duplicates, keeping the first occurrence of each element.
pub fn dedup<T: Eq + Hash + Clone>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|i| seen.insert(i.clone()))
        .collect()
}
