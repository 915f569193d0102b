//! PROPFIND multistatus parsing.

use std::time::{SystemTime, UNIX_EPOCH};

use percent_encoding::percent_decode_str;
use url::Url;

use strata_core::{FsError, FsResult};

#[derive(Debug, Clone, PartialEq)]
pub struct PropfindEntry {
    /// URL-decoded absolute path; directories end with `/`.
    pub href: String,
    pub display_name: Option<String>,
    pub is_directory: bool,
    pub size: Option<u64>,
    pub mime_type: Option<String>,
    pub modified: Option<SystemTime>,
}

impl PropfindEntry {
    pub fn name(&self) -> String {
        basename_from_href(&self.href)
    }
}

/// Parses a `multistatus` document, tolerating single- and list-shaped
/// `response` and `propstat` elements. Only the first 2xx `propstat` of each
/// response contributes properties.
pub fn parse_multistatus(xml: &str) -> FsResult<Vec<PropfindEntry>> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| FsError::io_message(format!("invalid multistatus XML: {e}")))?;

    let mut out = Vec::new();
    for response in doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "response")
    {
        let Some(mut href) = response
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "href")
            .and_then(|n| n.text())
            .and_then(decode_href_path)
        else {
            continue;
        };

        let mut display_name = None;
        let mut is_directory = false;
        let mut size = None;
        let mut mime_type = None;
        let mut modified = None;

        for propstat in response
            .children()
            .filter(|n| n.is_element() && n.tag_name().name() == "propstat")
        {
            let status = propstat
                .children()
                .find(|n| n.is_element() && n.tag_name().name() == "status")
                .and_then(|n| n.text())
                .unwrap_or("");
            if !status.contains(" 200 ") {
                continue;
            }

            let Some(prop) = propstat
                .children()
                .find(|n| n.is_element() && n.tag_name().name() == "prop")
            else {
                continue;
            };

            if let Some(resourcetype) = prop
                .children()
                .find(|n| n.is_element() && n.tag_name().name() == "resourcetype")
                && resourcetype
                    .children()
                    .any(|n| n.is_element() && n.tag_name().name() == "collection")
            {
                is_directory = true;
                if !href.ends_with('/') {
                    href.push('/');
                }
            }

            display_name = prop
                .children()
                .find(|n| n.is_element() && n.tag_name().name() == "displayname")
                .and_then(|n| n.text())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string);

            if let Some(v) = prop
                .children()
                .find(|n| n.is_element() && n.tag_name().name() == "getcontentlength")
                .and_then(|n| n.text())
                .map(str::trim)
                .filter(|v| !v.is_empty())
            {
                size = v.parse::<u64>().ok();
            }

            mime_type = prop
                .children()
                .find(|n| n.is_element() && n.tag_name().name() == "getcontenttype")
                .and_then(|n| n.text())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string);

            if let Some(v) = prop
                .children()
                .find(|n| n.is_element() && n.tag_name().name() == "getlastmodified")
                .and_then(|n| n.text())
                .map(str::trim)
                .filter(|v| !v.is_empty())
            {
                modified = parse_http_or_iso_date(v);
            }

            break;
        }

        out.push(PropfindEntry {
            href,
            display_name,
            is_directory,
            size,
            mime_type,
            modified,
        });
    }

    Ok(out)
}

/// IMF-fixdate per the spec, with ISO-8601 as a fallback for servers that
/// emit it anyway.
fn parse_http_or_iso_date(value: &str) -> Option<SystemTime> {
    if let Ok(t) = httpdate::parse_http_date(value) {
        return Some(t);
    }
    chrono::DateTime::parse_from_rfc3339(value)
        .ok()
        .and_then(|dt| {
            let secs = u64::try_from(dt.timestamp()).ok()?;
            Some(UNIX_EPOCH + std::time::Duration::from_secs(secs))
        })
}

/// Decodes an href into an absolute, percent-decoded path. Absolute-URL
/// hrefs (some servers) are reduced to their path component.
pub fn decode_href_path(href: &str) -> Option<String> {
    let raw = href.trim();
    if raw.is_empty() {
        return None;
    }

    let mut path_raw = if raw.starts_with("http://") || raw.starts_with("https://") {
        Url::parse(raw).ok()?.path().to_string()
    } else {
        raw.to_string()
    };

    if !path_raw.starts_with('/') {
        path_raw = format!("/{path_raw}");
    }

    let trailing_slash = path_raw.ends_with('/');
    let parts = path_raw
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| percent_decode_str(s).decode_utf8_lossy().to_string())
        .collect::<Vec<_>>();
    let mut out = format!("/{}", parts.join("/"));
    if trailing_slash && !out.ends_with('/') {
        out.push('/');
    }

    Some(out)
}

pub fn basename_from_href(href: &str) -> String {
    let trimmed = href.trim().trim_end_matches('/');
    if trimmed == "/" || trimmed.is_empty() {
        return "/".to_string();
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed).to_string()
}

/// Drops the request's own entry from a depth-1 listing; a self entry that
/// is not a collection means the target is a file.
pub fn filter_depth1_self(request_path: &str, entries: &mut Vec<PropfindEntry>) -> FsResult<Vec<PropfindEntry>> {
    let request_href = decode_href_path(request_path).unwrap_or_else(|| request_path.to_string());
    let request_href_slash = if request_href.ends_with('/') {
        request_href.clone()
    } else {
        format!("{request_href}/")
    };

    if let Some(self_entry) = entries
        .iter()
        .find(|e| e.href == request_href || e.href == request_href_slash)
        && !self_entry.is_directory
    {
        return Err(FsError::io_message(format!(
            "not a collection: {}",
            self_entry.href
        )));
    }

    entries.retain(|e| e.href != request_href && e.href != request_href_slash);
    Ok(std::mem::take(entries))
}
