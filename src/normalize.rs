//! Rewrites URLs of known model-hosting providers so they carry the user's access token.

use url::Url;

/// Hosts (and their subdomains) that accept the API key as a query parameter
const TOKEN_HOSTS: &[&str] = &["civitai.com"];
const TOKEN_PARAM: &str = "token";

#[derive(Debug, Clone, Default)]
pub struct UrlNormalizer {
    api_key: String,
}

impl UrlNormalizer {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into().trim().to_string(),
        }
    }

    /// Returns the URL with the access token added to its query when it
    /// points at a known provider and a key is configured; otherwise the
    /// input unchanged.
    pub fn normalize(&self, url: &str) -> String {
        if self.api_key.is_empty() {
            return url.to_string();
        }
        let Ok(mut parsed) = Url::parse(url) else {
            return url.to_string();
        };
        if !is_token_host(&parsed) {
            return url.to_string();
        }

        tracing::debug!("Appending access token to provider URL");
        // Lands in the query even when the URL carries a fragment
        parsed
            .query_pairs_mut()
            .append_pair(TOKEN_PARAM, &self.api_key);
        parsed.into()
    }
}

fn is_token_host(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    TOKEN_HOSTS
        .iter()
        .any(|known| host == *known || host.ends_with(&format!(".{known}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_with_question_mark() {
        let normalizer = UrlNormalizer::new("secret");
        let url = normalizer.normalize("https://civitai.com/api/download/models/12345");
        assert_eq!(
            url,
            "https://civitai.com/api/download/models/12345?token=secret"
        );
        assert_eq!(url.matches('?').count(), 1);
    }

    #[test]
    fn test_appends_with_ampersand() {
        let normalizer = UrlNormalizer::new("secret");
        let url =
            normalizer.normalize("https://civitai.com/api/download/models/12345?type=Model");
        assert_eq!(
            url,
            "https://civitai.com/api/download/models/12345?type=Model&token=secret"
        );
        assert_eq!(url.matches('?').count(), 1);
    }

    #[test]
    fn test_subdomain_matches() {
        let normalizer = UrlNormalizer::new("k");
        assert!(normalizer
            .normalize("https://www.civitai.com/api/download/models/1")
            .ends_with("?token=k"));
    }

    #[test]
    fn test_other_hosts_unchanged() {
        let normalizer = UrlNormalizer::new("secret");
        let url = "https://huggingface.co/org/repo/resolve/main/model.safetensors";
        assert_eq!(normalizer.normalize(url), url);

        // Lookalike host must not match
        let url = "https://notcivitai.com/file.bin";
        assert_eq!(normalizer.normalize(url), url);
    }

    #[test]
    fn test_empty_key_is_noop() {
        let normalizer = UrlNormalizer::new("   ");
        let url = "https://civitai.com/api/download/models/12345";
        assert_eq!(normalizer.normalize(url), url);
        assert_eq!(UrlNormalizer::default().normalize(url), url);
    }

    #[test]
    fn test_unparseable_url_unchanged() {
        let normalizer = UrlNormalizer::new("secret");
        assert_eq!(normalizer.normalize("not a url"), "not a url");
    }

    #[test]
    fn test_key_is_encoded() {
        let normalizer = UrlNormalizer::new("a&b");
        assert_eq!(
            normalizer.normalize("https://civitai.com/m"),
            "https://civitai.com/m?token=a%26b"
        );
    }

    #[test]
    fn test_token_goes_before_fragment() {
        let normalizer = UrlNormalizer::new("k");
        let url = normalizer.normalize("https://civitai.com/api/download/models/1#files");
        assert_eq!(url, "https://civitai.com/api/download/models/1?token=k#files");

        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.query(), Some("token=k"));
        assert_eq!(parsed.fragment(), Some("files"));
    }
}
