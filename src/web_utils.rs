use crate::{
    config::SortOrder,
    constants::{DEFAULT_AUTHOR_NAME, GENERIC_AVATAR, GRAVATAR_BASE_URL},
    models::{AuthorView, PackageView, WebRequestContext},
};
use md5::{Digest, Md5};
use serde_json::Value;

/// Normalizes whatever shape `author` arrives in (string, object, absent)
/// into the display form the web UI consumes.
pub fn format_author(author: Option<&Value>) -> AuthorView {
    let mut formatted = AuthorView {
        name: DEFAULT_AUTHOR_NAME.to_string(),
        email: String::new(),
        url: String::new(),
        avatar: None,
    };

    match author {
        Some(Value::String(name)) => {
            formatted.name = name.clone();
        }
        Some(Value::Object(fields)) => {
            if let Some(name) = fields.get("name").and_then(Value::as_str) {
                formatted.name = name.to_string();
            }
            if let Some(email) = fields.get("email").and_then(Value::as_str) {
                formatted.email = email.to_string();
            }
            if let Some(url) = fields.get("url").and_then(Value::as_str) {
                formatted.url = url.to_string();
            }
        }
        _ => {}
    }

    formatted
}

pub fn generate_gravatar_url(email: &str, online: bool) -> String {
    let email = email.trim();
    if !online || email.is_empty() {
        return GENERIC_AVATAR.to_string();
    }

    let mut hasher = Md5::new();
    hasher.update(email.to_lowercase().as_bytes());
    format!("{}{}", GRAVATAR_BASE_URL, hex::encode(hasher.finalize()))
}

/// Rewrites a distribution URL so it points at this registry instead of
/// wherever the package was originally published. Only the authority and
/// prefix change; the artifact filename is preserved. A tarball reference
/// with no extractable filename is returned untouched.
pub fn local_tarball_uri(
    tarball: &str,
    package_name: &str,
    request: &WebRequestContext,
    url_prefix: &str,
) -> String {
    let filename = tarball.rsplit('/').next().unwrap_or_default();
    if filename.is_empty() {
        return tarball.to_string();
    }

    let base = combine_base_url(request, url_prefix);
    format!(
        "{}/{}/-/{}",
        base.trim_end_matches('/'),
        urlencoding::encode(package_name),
        filename
    )
}

pub fn combine_base_url(request: &WebRequestContext, url_prefix: &str) -> String {
    let origin = format!("{}://{}", request.protocol, request.host);
    if url_prefix == "/" {
        origin
    } else {
        format!("{origin}{url_prefix}")
    }
}

/// Stable name sort. Comparison is case-insensitive; equal keys keep their
/// relative input order.
pub fn sort_by_name(mut views: Vec<PackageView>, order: SortOrder) -> Vec<PackageView> {
    views.sort_by(|left, right| {
        let left_key = left.name.to_lowercase();
        let right_key = right.name.to_lowercase();
        match order {
            SortOrder::Ascending => left_key.cmp(&right_key),
            SortOrder::Descending => right_key.cmp(&left_key),
        }
    });
    views
}
