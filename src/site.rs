/// Hostname classification for supported job boards.
use crate::models::Site;

/// Ordered hostname rules; the first rule with a matching needle wins.
const SITE_RULES: &[(&[&str], Site)] = &[
    (&["linkedin.com"], Site::Linkedin),
    (&["indeed.com"], Site::Indeed),
    (&["glassdoor.com"], Site::Glassdoor),
    (&["jobs.google.com"], Site::Google),
    (&["angel.co", "wellfound.com"], Site::Angellist),
];

/// Classify a page by its hostname. Unknown hosts are `Site::Generic`.
pub fn detect_site(hostname: &str) -> Site {
    let hostname = hostname.trim().to_lowercase();

    SITE_RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|needle| hostname.contains(needle)))
        .map(|(_, site)| *site)
        .unwrap_or(Site::Generic)
}

/// Classify a full page URL. Input that does not parse as a URL is treated
/// as a bare hostname.
pub fn detect_from_url(page_url: &str) -> Site {
    match url::Url::parse(page_url.trim()) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => detect_site(host),
            // "host:port" parses with the host as the scheme
            None => detect_site(extract_hostname(page_url)),
        },
        Err(_) => detect_site(extract_hostname(page_url)),
    }
}

fn extract_hostname(raw: &str) -> &str {
    let raw = raw.trim();
    let without_scheme = raw.split_once("://").map(|(_, rest)| rest).unwrap_or(raw);
    let host_with_port = without_scheme.split('/').next().unwrap_or(without_scheme);
    host_with_port.split(':').next().unwrap_or(host_with_port)
}
