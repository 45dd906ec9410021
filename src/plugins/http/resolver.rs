use sanitize_filename::sanitize;
use std::path::{Path, PathBuf};
use url::Url;

/// Checks the link and picks a local file name when none was given.
pub struct HttpResolver;

impl HttpResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn can_handle(&self, raw: &str) -> bool {
        Url::parse(raw)
            .map(|u| u.scheme() == "http" || u.scheme() == "https")
            .unwrap_or(false)
    }

    /// File name from the last non-empty path segment, sanitized; `download.bin` otherwise.
    pub fn suggest_file_name(&self, raw: &str) -> anyhow::Result<String> {
        let url = Url::parse(raw)?;
        let name = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(|s| sanitize(percent_decode(s)))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "download.bin".to_string());
        Ok(name)
    }

    pub fn resolve_target(&self, raw: &str, out_dir: &Path) -> anyhow::Result<PathBuf> {
        if !self.can_handle(raw) {
            anyhow::bail!("not an http(s) link: {}", raw);
        }
        Ok(out_dir.join(self.suggest_file_name(raw)?))
    }
}

// form decoding treats '+' and '&' specially, so escape them first
fn percent_decode(s: &str) -> String {
    let escaped = s.replace('+', "%2B").replace('&', "%26");
    url::form_urlencoded::parse(format!("x={}", escaped).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_from_last_segment() {
        let r = HttpResolver::new();
        assert_eq!(
            r.suggest_file_name("https://example.com/data/business-finance.csv?x=1").unwrap(),
            "business-finance.csv"
        );
        assert_eq!(r.suggest_file_name("https://example.com/dir/").unwrap(), "dir");
        assert_eq!(r.suggest_file_name("https://example.com/").unwrap(), "download.bin");
    }

    #[test]
    fn decodes_and_sanitizes() {
        let r = HttpResolver::new();
        assert_eq!(r.suggest_file_name("https://example.com/my%20file+v2.zip").unwrap(), "my file+v2.zip");
        assert_eq!(r.suggest_file_name("https://example.com/a%2Fb.txt").unwrap(), "ab.txt");
    }

    #[test]
    fn resolves_only_http_links() {
        let r = HttpResolver::new();
        assert_eq!(
            r.resolve_target("http://h/f.iso", Path::new("out")).unwrap(),
            PathBuf::from("out/f.iso")
        );
        assert!(r.resolve_target("ftp://h/f.iso", Path::new("out")).is_err());
        assert!(r.resolve_target("not a url", Path::new("out")).is_err());
    }
}
