use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use tracing::debug;

use crate::models::{JobRecord, Site};
use crate::site::detect_from_url;

/// Reads one job posting out of a parsed page.
///
/// Implementations must not panic on unexpected markup: anything they cannot
/// find is reported as `None`.
pub trait ExtractionStrategy: Send + Sync {
    fn site(&self) -> Site;
    fn extract(&self, document: &Html, page_url: &str) -> Option<JobRecord>;
}

/// Fixed selector lists per field, tried in order. The first selector whose
/// first match has text wins.
pub struct SelectorStrategy {
    site: Site,
    title: &'static [&'static str],
    company: &'static [&'static str],
    location: &'static [&'static str],
    description: &'static [&'static str],
}

impl SelectorStrategy {
    pub fn linkedin() -> Self {
        Self {
            site: Site::Linkedin,
            title: &[
                ".job-details-jobs-unified-top-card__job-title a",
                ".job-details-jobs-unified-top-card__job-title h1",
            ],
            company: &[".job-details-jobs-unified-top-card__company-name a"],
            location: &[".job-details-jobs-unified-top-card__bullet"],
            description: &[
                ".job-details-jobs-unified-top-card__job-description div",
                ".jobs-description-content__text",
            ],
        }
    }

    pub fn indeed() -> Self {
        Self {
            site: Site::Indeed,
            title: &["[data-testid=\"jobsearch-JobInfoHeader-title\"] span"],
            company: &["[data-testid=\"inlineHeader-companyName\"] a"],
            location: &["[data-testid=\"job-location\"]"],
            description: &["#jobDescriptionText"],
        }
    }

    pub fn glassdoor() -> Self {
        Self {
            site: Site::Glassdoor,
            title: &["[data-test=\"job-title\"]"],
            company: &["[data-test=\"employer-name\"]"],
            location: &["[data-test=\"job-location\"]"],
            description: &[".jobDescriptionContent"],
        }
    }

    pub fn google() -> Self {
        Self {
            site: Site::Google,
            title: &[".KLsYvd"],
            company: &[".nJlQNd"],
            location: &[],
            description: &[".HBvzbc"],
        }
    }
}

impl ExtractionStrategy for SelectorStrategy {
    fn site(&self) -> Site {
        self.site
    }

    fn extract(&self, document: &Html, page_url: &str) -> Option<JobRecord> {
        let title = first_text(document, self.title);
        let company = first_text(document, self.company);
        let description = first_text(document, self.description);

        let (Some(title), Some(company), Some(description)) = (title, company, description) else {
            debug!("{} strategy: required field missing", self.site);
            return None;
        };

        Some(JobRecord {
            title,
            company,
            location: first_text(document, self.location),
            description,
            url: page_url.to_string(),
            site: self.site,
        })
    }
}

const GENERIC_TITLE_SELECTOR: &str =
    "h1, h2, .job-title, .title, [class*=\"title\"], [class*=\"job\"]";
const GENERIC_COMPANY_SELECTOR: &str = "[class*=\"company\"], [class*=\"employer\"]";
const GENERIC_DESCRIPTION_SELECTOR: &str =
    "[class*=\"description\"], [class*=\"detail\"], .content";

const TITLE_LEN: std::ops::RangeInclusive<usize> = 6..=99;
const COMPANY_LEN: std::ops::RangeInclusive<usize> = 3..=49;
const MIN_DESCRIPTION_LEN: usize = 101;
const UNKNOWN_COMPANY: &str = "Unknown";

/// Pattern-based fallback for sites without dedicated selectors. Picks the
/// first candidate in document order that passes the length filter.
pub struct GenericStrategy {
    site: Site,
}

impl GenericStrategy {
    pub fn new() -> Self {
        Self { site: Site::Generic }
    }

    /// Generic heuristics, but records are tagged with `site`.
    pub fn tagged(site: Site) -> Self {
        Self { site }
    }
}

impl Default for GenericStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionStrategy for GenericStrategy {
    fn site(&self) -> Site {
        self.site
    }

    fn extract(&self, document: &Html, page_url: &str) -> Option<JobRecord> {
        let title = first_matching(document, GENERIC_TITLE_SELECTOR, |len| TITLE_LEN.contains(&len))?;
        let description = first_matching(document, GENERIC_DESCRIPTION_SELECTOR, |len| {
            len >= MIN_DESCRIPTION_LEN
        })?;
        let company = first_matching(document, GENERIC_COMPANY_SELECTOR, |len| {
            COMPANY_LEN.contains(&len)
        })
        .unwrap_or_else(|| UNKNOWN_COMPANY.to_string());

        Some(JobRecord {
            title,
            company,
            location: None,
            description,
            url: page_url.to_string(),
            site: self.site,
        })
    }
}

/// Maps each site to its extraction strategy. Sites without an entry fall
/// back to the generic strategy.
pub struct StrategyRegistry {
    strategies: HashMap<Site, Box<dyn ExtractionStrategy>>,
    fallback: GenericStrategy,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
            fallback: GenericStrategy::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(SelectorStrategy::linkedin()));
        registry.register(Box::new(SelectorStrategy::indeed()));
        registry.register(Box::new(SelectorStrategy::glassdoor()));
        registry.register(Box::new(SelectorStrategy::google()));
        registry.register(Box::new(GenericStrategy::tagged(Site::Angellist)));
        registry.register(Box::new(GenericStrategy::new()));
        registry
    }

    /// Install `strategy` for its site, replacing any previous one.
    pub fn register(&mut self, strategy: Box<dyn ExtractionStrategy>) {
        self.strategies.insert(strategy.site(), strategy);
    }

    pub fn strategy_for(&self, site: Site) -> &dyn ExtractionStrategy {
        self.strategies
            .get(&site)
            .map(|s| s.as_ref())
            .unwrap_or(&self.fallback)
    }

    /// Only valid records (title, company and description present) come out.
    pub fn extract(&self, site: Site, document: &Html, page_url: &str) -> Option<JobRecord> {
        self.strategy_for(site)
            .extract(document, page_url)
            .filter(JobRecord::is_valid)
    }

    /// Detect the site from `page_url`, parse `html` and extract.
    pub fn extract_page(&self, html: &str, page_url: &str) -> Option<JobRecord> {
        let site = detect_from_url(page_url);
        let document = Html::parse_document(html);
        self.extract(site, &document, page_url)
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Text content of an element, trimmed, with whitespace runs collapsed.
pub fn element_text(element: &ElementRef) -> String {
    let raw = element.text().collect::<Vec<_>>().join(" ");
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_text(document: &Html, selectors: &[&str]) -> Option<String> {
    for selector in selectors {
        let Ok(parsed) = Selector::parse(selector) else {
            debug!("skipping unparsable selector {}", selector);
            continue;
        };
        if let Some(element) = document.select(&parsed).next() {
            let text = element_text(&element);
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// Length filters measure the trimmed raw text content, so runs of internal
/// whitespace still count. The returned text is collapsed.
fn first_matching(document: &Html, selector: &str, accept: impl Fn(usize) -> bool) -> Option<String> {
    let parsed = Selector::parse(selector).ok()?;
    document
        .select(&parsed)
        .find(|element| accept(raw_text_len(element)))
        .map(|element| element_text(&element))
}

fn raw_text_len(element: &ElementRef) -> usize {
    element.text().collect::<String>().trim().chars().count()
}
