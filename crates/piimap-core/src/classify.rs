//! Request classification.
//!
//! Classification is an ordered rule list: static-asset rules first, then
//! data-endpoint rules, then page-navigation rules. The first matching rule
//! decides the category; a request no rule matches is `Other`. Only GET
//! requests are classified at all.

use reqwest::Method;
use serde::Serialize;

use crate::config::Config;
use crate::http::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestCategory {
    StaticAsset,
    DataEndpoint,
    PageNavigation,
    Other,
}

impl std::fmt::Display for RequestCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StaticAsset => write!(f, "static-asset"),
            Self::DataEndpoint => write!(f, "data-endpoint"),
            Self::PageNavigation => write!(f, "page-navigation"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    PathContains(String),
    PathPrefix(String),
    PathSuffix(String),
    PathEquals(String),
    /// Any of the listed extensions, compared case-insensitively.
    Extension(Vec<String>),
    HostEquals(String),
    /// The host itself or any subdomain of it.
    HostOrSubdomain(String),
    AcceptContains(String),
}

impl Matcher {
    pub fn matches(&self, request: &Request) -> bool {
        let url = request.url();
        let path = url.path();
        let host = url.host_str().unwrap_or_default();

        match self {
            Matcher::PathContains(s) => path.contains(s.as_str()),
            Matcher::PathPrefix(s) => path.starts_with(s.as_str()),
            Matcher::PathSuffix(s) => path.ends_with(s.as_str()),
            Matcher::PathEquals(s) => path == s,
            Matcher::Extension(exts) => path_extension(path)
                .map(|ext| exts.iter().any(|e| e.eq_ignore_ascii_case(ext)))
                .unwrap_or(false),
            Matcher::HostEquals(h) => host.eq_ignore_ascii_case(h),
            Matcher::HostOrSubdomain(h) => {
                host.eq_ignore_ascii_case(h)
                    || host
                        .to_ascii_lowercase()
                        .ends_with(&format!(".{}", h.to_ascii_lowercase()))
            }
            Matcher::AcceptContains(s) => request
                .accept()
                .map(|accept| accept.contains(s.as_str()))
                .unwrap_or(false),
        }
    }
}

/// Extension of the last path segment, if it has one.
fn path_extension(path: &str) -> Option<&str> {
    let segment = path.rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierRule {
    pub category: RequestCategory,
    pub matcher: Matcher,
}

impl ClassifierRule {
    pub fn new(category: RequestCategory, matcher: Matcher) -> Self {
        Self { category, matcher }
    }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<ClassifierRule>,
}

impl Classifier {
    pub fn new(rules: Vec<ClassifierRule>) -> Self {
        Self { rules }
    }

    pub fn from_config(config: &Config) -> Self {
        use RequestCategory::*;

        let mut rules = vec![
            ClassifierRule::new(StaticAsset, Matcher::PathContains(config.assets_prefix.clone())),
            ClassifierRule::new(StaticAsset, Matcher::Extension(config.static_extensions.clone())),
        ];
        rules.extend(
            config
                .static_hosts
                .iter()
                .map(|h| ClassifierRule::new(StaticAsset, Matcher::HostOrSubdomain(h.clone()))),
        );

        rules.extend(
            config
                .data_prefixes
                .iter()
                .map(|p| ClassifierRule::new(DataEndpoint, Matcher::PathPrefix(p.clone()))),
        );
        if let Some(ref api_host) = config.api_host {
            rules.push(ClassifierRule::new(DataEndpoint, Matcher::HostEquals(api_host.clone())));
        }

        rules.push(ClassifierRule::new(PageNavigation, Matcher::AcceptContains("text/html".into())));
        rules.push(ClassifierRule::new(PageNavigation, Matcher::PathSuffix(".html".into())));
        rules.push(ClassifierRule::new(PageNavigation, Matcher::PathEquals("/".into())));

        Self::new(rules)
    }

    pub fn rules(&self) -> &[ClassifierRule] {
        &self.rules
    }

    /// `None` means the request is not intercepted (non-GET).
    pub fn classify(&self, request: &Request) -> Option<RequestCategory> {
        if *request.method() != Method::GET {
            return None;
        }

        let category = self
            .rules
            .iter()
            .find(|rule| rule.matcher.matches(request))
            .map(|rule| rule.category)
            .unwrap_or(RequestCategory::Other);

        Some(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn classifier() -> Classifier {
        Classifier::from_config(&Config::default())
    }

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    #[test]
    fn test_static_assets() {
        let c = classifier();
        for url in [
            "https://openpiimap.org/assets/css/style.css",
            "https://openpiimap.org/assets/fonts/inter.woff2",
            "https://openpiimap.org/logo.svg",
            "https://openpiimap.org/img/flag.PNG",
            "https://cdn.jsdelivr.net/npm/chart.js",
            "https://fonts.gstatic.com/s/inter/v12/font.woff2",
            "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css",
        ] {
            assert_eq!(c.classify(&get(url)), Some(RequestCategory::StaticAsset), "{}", url);
        }
    }

    #[test]
    fn test_data_endpoints() {
        let c = classifier();
        for url in [
            "https://openpiimap.org/json/countries.json",
            "https://openpiimap.org/api/v1/frameworks",
            "https://api.openpiimap.org/countries/DE",
        ] {
            assert_eq!(c.classify(&get(url)), Some(RequestCategory::DataEndpoint), "{}", url);
        }
    }

    #[test]
    fn test_page_navigation() {
        let c = classifier();
        assert_eq!(
            c.classify(&get("https://openpiimap.org/")),
            Some(RequestCategory::PageNavigation)
        );
        assert_eq!(
            c.classify(&get("https://openpiimap.org/compare.html")),
            Some(RequestCategory::PageNavigation)
        );
        let nav = get("https://openpiimap.org/countries/germany")
            .with_header("Accept", "text/html,application/xhtml+xml");
        assert_eq!(c.classify(&nav), Some(RequestCategory::PageNavigation));
    }

    #[test]
    fn test_other() {
        let c = classifier();
        assert_eq!(
            c.classify(&get("https://openpiimap.org/countries/germany")),
            Some(RequestCategory::Other)
        );
        assert_eq!(
            c.classify(&get("https://evil-unpkg.com/x")),
            Some(RequestCategory::Other)
        );
    }

    #[test]
    fn test_rule_order_static_before_data() {
        // A script under /api/ is still a static asset: static rules run first.
        let c = classifier();
        assert_eq!(
            c.classify(&get("https://openpiimap.org/api/client.js")),
            Some(RequestCategory::StaticAsset)
        );
        // A JSON file accepted as HTML is still data: data rules run before page rules.
        let req = get("https://openpiimap.org/json/frameworks.json").with_header("Accept", "text/html");
        assert_eq!(c.classify(&req), Some(RequestCategory::DataEndpoint));
    }

    #[test]
    fn test_non_get_not_intercepted() {
        let c = classifier();
        let post = Request::new(
            Method::POST,
            Url::parse("https://openpiimap.org/json/countries.json").unwrap(),
        );
        assert_eq!(c.classify(&post), None);
    }

    #[test]
    fn test_path_extension() {
        assert_eq!(path_extension("/a/b/style.css"), Some("css"));
        assert_eq!(path_extension("/a/b/"), None);
        assert_eq!(path_extension("/.hidden"), None);
        assert_eq!(path_extension("/npm/chart.js"), Some("js"));
    }
}
