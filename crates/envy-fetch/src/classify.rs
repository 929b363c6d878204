//! URI scheme classification.

/// Transfer scheme of an input URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchScheme {
    Http,
    Https,
    Ftp,
    Ftps,
    S3,
    Ssh,
    Git,
    LocalFile,
    Unknown,
}

fn istarts_with(value: &str, prefix: &str) -> bool {
    value.len() >= prefix.len() && value[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn iends_with(value: &str, suffix: &str) -> bool {
    value.len() >= suffix.len() && value[value.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

fn strip_query_and_fragment(uri: &str) -> &str {
    match uri.find(['?', '#']) {
        Some(pos) => &uri[..pos],
        None => uri,
    }
}

/// `user@host:path` without a `://` separator is the bare scp form.
fn looks_like_scp_uri(uri: &str) -> bool {
    if uri.contains("://") {
        return false;
    }
    let Some(colon) = uri.find(':') else {
        return false;
    };
    if colon + 1 >= uri.len() {
        return false;
    }
    let user_host = &uri[..colon];
    match user_host.find('@') {
        Some(at) => at > 0,
        None => false,
    }
}

/// Classify a URI. Order matters: the `.git` suffix wins over the transfer
/// scheme so `https://host/repo.git` clones rather than downloads.
pub fn classify(uri: &str) -> FetchScheme {
    let trimmed = uri.trim();
    if trimmed.is_empty() {
        return FetchScheme::Unknown;
    }

    let path_segment = strip_query_and_fragment(trimmed);
    if iends_with(path_segment, ".git") {
        return FetchScheme::Git;
    }
    if istarts_with(trimmed, "git://") || istarts_with(trimmed, "git+ssh://") {
        return FetchScheme::Git;
    }

    if istarts_with(trimmed, "s3://") {
        return FetchScheme::S3;
    }
    if istarts_with(trimmed, "https://") {
        return FetchScheme::Https;
    }
    if istarts_with(trimmed, "http://") {
        return FetchScheme::Http;
    }
    if istarts_with(trimmed, "ftps://") {
        return FetchScheme::Ftps;
    }
    if istarts_with(trimmed, "ftp://") {
        return FetchScheme::Ftp;
    }
    if istarts_with(trimmed, "scp://") || istarts_with(trimmed, "ssh://") {
        return FetchScheme::Ssh;
    }
    if istarts_with(trimmed, "file://") {
        return FetchScheme::LocalFile;
    }

    if looks_like_scp_uri(trimmed) {
        return FetchScheme::Ssh;
    }

    if trimmed.contains("://") {
        return FetchScheme::Unknown;
    }

    FetchScheme::LocalFile
}
