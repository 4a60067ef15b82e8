use percent_encoding::percent_decode_str;
use std::net::Ipv4Addr;
use thiserror::Error;
use url::Url;

/// Longest object key the destination store accepts, in bytes.
pub const MAX_KEY_LENGTH: usize = 1024;

/// Accepted archive extensions of the source path
const ARCHIVE_EXTENSIONS: &[&str] = &["zip"];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Parses the source URL and checks scheme, host and archive extension
pub fn validate_source_url(raw: &str, require_https: bool) -> Result<Url, ValidationError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| {
            ValidationError::new("INVALID_URL", format!("'{}' is not a valid URL: {}", raw, e))
        })?;

    match url.scheme() {
        "https" => {}
        "http" if !require_https => {}
        scheme => {
            return Err(ValidationError::new(
                "INSECURE_URL",
                format!("Source URL must use https, got '{}'", scheme),
            ));
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(ValidationError::new("INVALID_URL", "Source URL has no host"));
    }

    let filename = source_filename(&url)?;
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    if !ARCHIVE_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ValidationError::new(
            "UNSUPPORTED_SOURCE",
            format!("Source must be a .zip archive, got '{}'", filename),
        ));
    }

    Ok(url)
}

/// Checks the bucket against S3 naming rules
pub fn validate_bucket_name(bucket: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| {
        Err(ValidationError::new(
            "INVALID_BUCKET",
            format!("Bucket name '{}' {}", bucket, reason),
        ))
    };

    if bucket.len() < 3 || bucket.len() > 63 {
        return invalid("must be between 3 and 63 characters");
    }
    if !bucket
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-')
    {
        return invalid("may only contain lowercase letters, digits, dots and hyphens");
    }

    let starts_alnum = bucket.starts_with(|c: char| c.is_ascii_alphanumeric());
    let ends_alnum = bucket.ends_with(|c: char| c.is_ascii_alphanumeric());
    if !starts_alnum || !ends_alnum {
        return invalid("must start and end with a letter or digit");
    }
    if bucket.contains("..") || bucket.contains(".-") || bucket.contains("-.") {
        return invalid("must not contain adjacent dots or dot-hyphen pairs");
    }
    if bucket.parse::<Ipv4Addr>().is_ok() {
        return invalid("must not be formatted as an IP address");
    }
    if bucket.starts_with("xn--") || bucket.ends_with("-s3alias") || bucket.ends_with("--ol-s3") {
        return invalid("uses a reserved prefix or suffix");
    }

    Ok(())
}

/// Normalizes an optional key prefix to `segment/segment/` form
///
/// Empty or whitespace-only prefixes become `None`.
pub fn normalize_key_prefix(prefix: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(prefix) = prefix.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(None);
    };

    if prefix.chars().any(|c| c.is_control() || c == '\\') {
        return Err(ValidationError::new(
            "INVALID_KEY_PREFIX",
            "Key prefix contains control characters or backslashes",
        ));
    }

    let segments: Vec<&str> = prefix.split('/').filter(|s| !s.is_empty()).collect();
    if segments.iter().any(|s| *s == "." || *s == "..") {
        tracing::warn!("Path traversal attempt in key prefix: {}", prefix);
        return Err(ValidationError::new(
            "INVALID_KEY_PREFIX",
            "Key prefix must not contain '.' or '..' segments",
        ));
    }
    if segments.is_empty() {
        return Ok(None);
    }

    let normalized = format!("{}/", segments.join("/"));
    if normalized.len() >= MAX_KEY_LENGTH {
        return Err(ValidationError::new(
            "INVALID_KEY_PREFIX",
            format!("Key prefix exceeds {} bytes", MAX_KEY_LENGTH),
        ));
    }
    Ok(Some(normalized))
}

/// Destination key: normalized prefix followed by the decoded, sanitized filename of the
/// source path
pub fn derive_key(url: &Url, key_prefix: Option<&str>) -> Result<String, ValidationError> {
    let filename = sanitize_filename(&source_filename(url)?)?;
    let prefix = normalize_key_prefix(key_prefix)?.unwrap_or_default();
    let key = format!("{}{}", prefix, filename);

    if key.len() > MAX_KEY_LENGTH {
        return Err(ValidationError::new(
            "KEY_TOO_LONG",
            format!("Destination key exceeds {} bytes", MAX_KEY_LENGTH),
        ));
    }
    Ok(key)
}

fn source_filename(url: &Url) -> Result<String, ValidationError> {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();

    let decoded = percent_decode_str(segment).decode_utf8().map_err(|_| {
        ValidationError::new("INVALID_URL", "Source filename is not valid UTF-8")
    })?;

    if decoded.is_empty() {
        return Err(ValidationError::new(
            "INVALID_URL",
            "Source URL path has no filename",
        ));
    }
    Ok(decoded.into_owned())
}

/// Replaces path separators and reserved characters, rejects hidden names
pub fn sanitize_filename(name: &str) -> Result<String, ValidationError> {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            c if c.is_control() => '_',
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    let sanitized = sanitized.trim().to_string();

    if sanitized.is_empty() {
        return Err(ValidationError::new(
            "INVALID_FILENAME",
            "Filename cannot be empty",
        ));
    }
    if sanitized.starts_with('.') {
        return Err(ValidationError::new(
            "HIDDEN_FILE",
            "Hidden files (starting with '.') are not allowed",
        ));
    }

    Ok(sanitized)
}
