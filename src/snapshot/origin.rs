//! URL resolution and the resource host allow rule.

use reqwest::Url;

pub fn is_data_uri(value: &str) -> bool {
    value.trim_start().get(..5).is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
}

/// Resolve `reference` against `base`. Relative references without a base,
/// and anything that is not http(s), resolve to `None`.
pub fn resolve(base: Option<&Url>, reference: &str) -> Option<Url> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }
    let url = match base {
        Some(base) => base.join(reference).ok()?,
        None => Url::parse(reference).ok()?,
    };
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// Decides which hosts resources may come from.
///
/// A URL is allowed when it is same-origin with the page, when its host
/// equals or is a subdomain of a listed domain, or when the list holds `*`.
#[derive(Debug, Clone)]
pub struct HostPolicy {
    page: Option<Url>,
    domains: Vec<String>,
    allow_all: bool,
}

impl HostPolicy {
    pub fn new(page: Option<&Url>, domains: &[String]) -> Self {
        let domains: Vec<String> = domains
            .iter()
            .map(|d| d.trim().trim_start_matches("*.").trim_end_matches('.').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self {
            page: page.cloned(),
            allow_all: domains.iter().any(|d| d == "*"),
            domains,
        }
    }

    pub fn allows(&self, url: &Url) -> bool {
        if self.allow_all || self.is_same_origin(url) {
            return true;
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.domains.iter().any(|domain| {
            host == *domain
                || host
                    .strip_suffix(domain.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    fn is_same_origin(&self, url: &Url) -> bool {
        self.page.as_ref().is_some_and(|page| {
            page.scheme() == url.scheme()
                && page.host_str() == url.host_str()
                && page.port_or_known_default() == url.port_or_known_default()
        })
    }
}
