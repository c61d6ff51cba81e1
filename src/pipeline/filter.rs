//! Keyword filter applied to raw post text before relaying.
//!
//! Exclude keywords always win. With no include keywords everything else
//! passes; otherwise at least one include keyword must appear. Matching is
//! case-insensitive substring search.

use tracing::debug;

/// Why a text was accepted or rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    Accepted,
    /// An exclude keyword appears in the text.
    Excluded { keyword: String },
    /// Include keywords are configured and none appears.
    NoIncludeMatch,
}

impl FilterDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Short reason for logging.
    pub fn reason(&self) -> String {
        match self {
            Self::Accepted => "accepted".into(),
            Self::Excluded { keyword } => format!("contains excluded word {keyword:?}"),
            Self::NoIncludeMatch => "no include keyword matched".into(),
        }
    }
}

/// Include/exclude keyword filter. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct FilterEngine {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl FilterEngine {
    /// Build from keyword lists. Keywords are trimmed and lowercased; blank
    /// entries are dropped.
    pub fn new<I, E, S, T>(include: I, exclude: E) -> Self
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            include: clean_keywords(include),
            exclude: clean_keywords(exclude),
        }
    }

    /// A filter that accepts everything.
    pub fn permissive() -> Self {
        Self::default()
    }

    pub fn include_keywords(&self) -> &[String] {
        &self.include
    }

    pub fn exclude_keywords(&self) -> &[String] {
        &self.exclude
    }

    /// Evaluate a text and report the reason.
    pub fn evaluate(&self, text: &str) -> FilterDecision {
        if text.trim().is_empty() {
            return if self.include.is_empty() {
                FilterDecision::Accepted
            } else {
                FilterDecision::NoIncludeMatch
            };
        }

        let lower = text.to_lowercase();

        if let Some(keyword) = self.exclude.iter().find(|k| lower.contains(k.as_str())) {
            debug!(keyword = %keyword, "Exclude keyword matched");
            return FilterDecision::Excluded {
                keyword: keyword.clone(),
            };
        }

        if self.include.is_empty() || self.include.iter().any(|k| lower.contains(k.as_str())) {
            FilterDecision::Accepted
        } else {
            FilterDecision::NoIncludeMatch
        }
    }

    /// Whether a text passes the filter.
    pub fn accepts(&self, text: &str) -> bool {
        self.evaluate(text).is_accepted()
    }
}

fn clean_keywords<I, S>(keywords: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut cleaned: Vec<String> = Vec::new();
    for keyword in keywords {
        let keyword = keyword.as_ref().trim().to_lowercase();
        if !keyword.is_empty() && !cleaned.contains(&keyword) {
            cleaned.push(keyword);
        }
    }
    cleaned
}
