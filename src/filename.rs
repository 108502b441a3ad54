//! Target filename resolution from response headers or the URL itself.

use reqwest::header::{self, HeaderMap};
use url::Url;

/// Characters that may not appear in a filename on common platforms
pub const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Resolve the filename for a download.
///
/// Preference order:
/// 1. `filename*` (RFC 5987) from `Content-Disposition`, percent-decoded
/// 2. plain `filename` from `Content-Disposition`
/// 3. the percent-decoded last path segment of `url`
///
/// Missing or malformed headers fall through to the next source. The result
/// may be empty; callers check it with [`is_valid_filename`].
#[tracing::instrument(level = "trace", skip(headers), ret)]
pub fn resolve_filename(headers: &HeaderMap, url: &str) -> String {
    headers
        .get(header::CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_content_disposition)
        .map(|name| final_component(&name))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| filename_from_url(url))
}

/// Parse filename from Content-Disposition header
/// Returns Some(filename) if successful, None otherwise
pub fn parse_content_disposition(content_disposition: &str) -> Option<String> {
    tracing::trace!(content_disposition = %content_disposition, "Parsing Content-Disposition");

    let params = disposition_params(content_disposition);

    // filename*=charset'lang'value takes priority over the plain parameter
    let extended = params
        .iter()
        .find(|(key, _)| key == "filename*")
        .and_then(|(_, value)| decode_extended_value(value));
    if let Some(filename) = extended {
        tracing::trace!(filename = %filename, "Found encoded filename");
        return Some(filename);
    }

    let plain = params
        .iter()
        .find(|(key, _)| key == "filename")
        .map(|(_, value)| value.clone())
        .filter(|value| !value.is_empty());
    if let Some(ref filename) = plain {
        tracing::trace!(filename = %filename, "Found plain filename");
    } else {
        tracing::trace!("No filename found");
    }
    plain
}

/// Percent-decoded last path segment of the URL, or an empty string.
pub fn filename_from_url(url: &str) -> String {
    let segment = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(str::to_string)
            .unwrap_or_default(),
        Err(_) => {
            let path = url.split(['?', '#']).next().unwrap_or(url);
            path.rsplit('/').next().unwrap_or(path).to_string()
        }
    };

    let decoded = urlencoding::decode(&segment)
        .map(|s| s.into_owned())
        .unwrap_or(segment);
    final_component(&decoded)
}

/// Whether a resolved filename can be used as a download target.
pub fn is_valid_filename(name: &str) -> bool {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return false;
    }
    !trimmed.chars().all(|c| FORBIDDEN_CHARS.contains(&c))
}

/// Split the header into lowercase parameter names and unquoted values,
/// honouring semicolons inside quoted strings.
fn disposition_params(content_disposition: &str) -> Vec<(String, String)> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for c in content_disposition.chars() {
        match c {
            _ if escaped => {
                current.push(c);
                escaped = false;
            }
            '\\' if in_quotes => escaped = true,
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ';' if !in_quotes => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);

    parts
        .into_iter()
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some((key, value.to_string()))
        })
        .collect()
}

/// Decode an RFC 5987 `charset'language'percent-encoded` value.
fn decode_extended_value(value: &str) -> Option<String> {
    let mut parts = value.splitn(3, '\'');
    let (_charset, _language, encoded) = (parts.next()?, parts.next()?, parts.next()?);
    let decoded = urlencoding::decode(encoded).ok()?;
    let decoded = decoded.trim();
    (!decoded.is_empty()).then(|| decoded.to_string())
}

/// Strip any directory part a server may have slipped into the name.
fn final_component(name: &str) -> String {
    name.rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers_with(disposition: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_str(disposition).unwrap(),
        );
        headers
    }

    #[test]
    fn test_extended_parameter_wins() {
        let headers = headers_with(
            r#"attachment; filename="fallback.bin"; filename*=UTF-8''na%C3%AFve%20model.safetensors"#,
        );
        assert_eq!(
            resolve_filename(&headers, "https://example.com/x"),
            "naïve model.safetensors"
        );
    }

    #[test]
    fn test_extended_parameter_before_plain_in_header_order() {
        let headers =
            headers_with("attachment; filename*=utf-8'en'real.ckpt; filename=\"other.ckpt\"");
        assert_eq!(resolve_filename(&headers, "https://example.com/x"), "real.ckpt");
    }

    #[test]
    fn test_plain_filename() {
        let headers = headers_with(r#"attachment; filename="model; v2.safetensors""#);
        assert_eq!(
            resolve_filename(&headers, "https://example.com/x"),
            "model; v2.safetensors"
        );

        let headers = headers_with("attachment; filename=unquoted.pt");
        assert_eq!(resolve_filename(&headers, "https://example.com/x"), "unquoted.pt");
    }

    #[test]
    fn test_malformed_extended_falls_through() {
        let headers = headers_with("attachment; filename*=garbage; filename=\"ok.bin\"");
        assert_eq!(resolve_filename(&headers, "https://example.com/x"), "ok.bin");

        let headers = headers_with("inline");
        assert_eq!(
            resolve_filename(&headers, "https://example.com/files/from%20url.zip"),
            "from url.zip"
        );
    }

    #[test]
    fn test_url_fallback_without_header() {
        let headers = HeaderMap::new();
        assert_eq!(
            resolve_filename(
                &headers,
                "https://example.com/a/b/model%2Bextra.safetensors?download=true"
            ),
            "model+extra.safetensors"
        );
        assert_eq!(resolve_filename(&headers, "https://example.com/"), "");
    }

    #[test]
    fn test_path_components_stripped() {
        let headers = headers_with(r#"attachment; filename="../../etc/passwd""#);
        assert_eq!(resolve_filename(&headers, "https://example.com/x"), "passwd");
    }

    #[test]
    fn test_filename_validation() {
        assert!(is_valid_filename("model.safetensors"));
        assert!(!is_valid_filename(""));
        assert!(!is_valid_filename("   "));
        assert!(!is_valid_filename("<>:*?"));
        assert!(!is_valid_filename(".."));
        assert!(is_valid_filename("a?b"));
    }
}
