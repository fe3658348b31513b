use std::fmt;
use url::Url;

/// Canonical identity of a page: scheme, host (with any non-default port) and
/// path, all lower-cased
///
/// Query strings and fragments are not part of the key, so
/// `https://example.com/docs?page=2#intro` and `https://EXAMPLE.com/docs`
/// collapse to the same key. Equality is plain structural equality of the
/// three components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UrlKey {
    scheme: String,
    host: String,
    path: String,
}

impl UrlKey {
    /// The lower-cased scheme, empty for input that is not an absolute URL
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The lower-cased host, including a non-default port
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The lower-cased path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns true if the key came from a parseable absolute URL
    pub fn is_absolute(&self) -> bool {
        !self.scheme.is_empty()
    }
}

impl fmt::Display for UrlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_absolute() {
            write!(f, "{}://{}{}", self.scheme, self.host, self.path)
        } else {
            f.write_str(&self.path)
        }
    }
}

/// Normalizes a URL into its canonical key
///
/// # Normalization Steps
///
/// 1. Trim surrounding whitespace and parse the URL
/// 2. Keep the scheme, the host (plus port when it is not the scheme default)
///    and the path; dot segments are already resolved by the parser
/// 3. Drop the query string and fragment
/// 4. Lower-case everything
///
/// The function is total: input that does not parse as an absolute URL keeps
/// its trimmed, lower-cased text as the key's path so it can still be
/// deduplicated. It is also idempotent, since the rendered key parses back
/// to itself.
///
/// # Examples
///
/// ```
/// use ripple_crawl::url::normalize;
///
/// let key = normalize("HTTPS://Example.COM/Docs/?page=2#intro");
/// assert_eq!(key.to_string(), "https://example.com/docs/");
/// ```
pub fn normalize(url_str: &str) -> UrlKey {
    let trimmed = url_str.trim();

    match Url::parse(trimmed) {
        Ok(url) if url.has_host() => {
            let host = url.host_str().unwrap_or_default().to_lowercase();
            let host = match url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host,
            };

            UrlKey {
                scheme: url.scheme().to_lowercase(),
                host,
                path: url.path().to_lowercase(),
            }
        }
        _ => UrlKey {
            scheme: String::new(),
            host: String::new(),
            path: trimmed.to_lowercase(),
        },
    }
}

/// Normalizes a URL and renders the key as a string
pub fn canonical_key(url_str: &str) -> String {
    normalize(url_str).to_string()
}
