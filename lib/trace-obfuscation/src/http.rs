//! HTTP URL normalization.

use std::borrow::Cow;

use url::{Position, Url};

const PLACEHOLDER: &str = "?";

/// Normalizes a URL by removing userinfo, the query string and the fragment, and by replacing identifier-like path
/// segments with `?`.
///
/// Identifier-like segments are purely numeric segments and UUID-shaped segments. Inputs that are not absolute URLs
/// are normalized as bare paths.
///
/// Returns `Some(normalized)` if anything changed, `None` otherwise.
pub fn obfuscate_url(val: &str) -> Option<String> {
    let normalized = normalize_target(val, None);
    (normalized != val).then_some(normalized)
}

/// Normalizes an HTTP resource such as `GET /users/42?active=1`.
///
/// A leading method, if any, is kept. The URL part is normalized as in [`obfuscate_url`], except that `route`, when
/// given, replaces the path.
///
/// Returns `Some(normalized)` if anything changed, `None` otherwise.
pub fn obfuscate_resource(resource: &str, route: Option<&str>) -> Option<String> {
    let route = route.filter(|route| !route.is_empty());

    let normalized = match split_method(resource) {
        Some((method, "")) => match route {
            Some(route) => format!("{} {}", method, route),
            None => return None,
        },
        Some((method, target)) => format!("{} {}", method, normalize_target(target, route)),
        None => normalize_target(resource, route),
    };

    (normalized != resource).then_some(normalized)
}

fn split_method(resource: &str) -> Option<(&str, &str)> {
    let (method, rest) = match resource.split_once(' ') {
        Some((method, rest)) => (method, rest.trim()),
        None => (resource, ""),
    };

    let is_method = !method.is_empty() && method.bytes().all(|b| b.is_ascii_uppercase());
    is_method.then_some((method, rest))
}

fn normalize_target(target: &str, route: Option<&str>) -> String {
    match Url::parse(target) {
        Ok(url) if !url.cannot_be_a_base() => {
            let mut out = String::with_capacity(target.len());
            out.push_str(&url[..Position::BeforeUsername]);
            out.push_str(&url[Position::BeforeHost..Position::AfterPort]);
            match route {
                Some(route) => out.push_str(route),
                None => out.push_str(&template_path(url.path())),
            }
            out
        }
        Ok(url) => url[..Position::AfterPath].to_string(),
        Err(_) => {
            let stripped = strip_userinfo(strip_query(target));
            match route {
                Some(route) => route.to_string(),
                None => template_path(&stripped).into_owned(),
            }
        }
    }
}

fn strip_query(val: &str) -> &str {
    val.find(['?', '#']).map_or(val, |end| &val[..end])
}

fn strip_userinfo(val: &str) -> Cow<'_, str> {
    let Some(scheme_end) = val.find("://").map(|pos| pos + 3) else {
        return Cow::Borrowed(val);
    };

    let authority_end = val[scheme_end..].find('/').map_or(val.len(), |pos| scheme_end + pos);
    match val[scheme_end..authority_end].rfind('@') {
        Some(at) => Cow::Owned(format!("{}{}", &val[..scheme_end], &val[scheme_end + at + 1..])),
        None => Cow::Borrowed(val),
    }
}

fn template_path(path: &str) -> Cow<'_, str> {
    if !path.split('/').any(is_identifier_segment) {
        return Cow::Borrowed(path);
    }

    let templated = path
        .split('/')
        .map(|seg| if is_identifier_segment(seg) { PLACEHOLDER } else { seg })
        .collect::<Vec<_>>();
    Cow::Owned(templated.join("/"))
}

fn is_identifier_segment(seg: &str) -> bool {
    let is_numeric = !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit());
    is_numeric || is_uuid(seg)
}

fn is_uuid(seg: &str) -> bool {
    seg.len() == 36
        && seg.bytes().enumerate().all(|(i, b)| match i {
            8 | 13 | 18 | 23 => b == b'-',
            _ => b.is_ascii_hexdigit(),
        })
}
