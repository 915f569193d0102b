//! PROPFIND multistatus rendering.

use std::time::SystemTime;

use chrono::SecondsFormat;

use strata_core::FileStatus;

use crate::browse::{href_for, html_escape};

/// One `<d:response>` per resource; directory hrefs end with `/`, each
/// propstat carries the live properties with a `200 OK` status line.
pub fn render_multistatus(resources: &[FileStatus]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<d:multistatus xmlns:d=\"DAV:\">\n",
    );
    for status in resources {
        render_response(&mut xml, status);
    }
    xml.push_str("</d:multistatus>\n");
    xml
}

fn render_response(xml: &mut String, status: &FileStatus) {
    let href = html_escape(&href_for(&status.path, status.is_directory));
    let display_name = html_escape(status.path.filename().unwrap_or("/"));
    let creation_date = chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let last_modified = httpdate::fmt_http_date(SystemTime::now());

    xml.push_str("  <d:response>\n");
    xml.push_str(&format!("    <d:href>{href}</d:href>\n"));
    xml.push_str("    <d:propstat>\n      <d:prop>\n");
    xml.push_str(&format!(
        "        <d:displayname>{display_name}</d:displayname>\n"
    ));
    if status.is_directory {
        xml.push_str("        <d:resourcetype><d:collection/></d:resourcetype>\n");
    } else {
        xml.push_str("        <d:resourcetype/>\n");
        if let Some(size) = status.size {
            xml.push_str(&format!(
                "        <d:getcontentlength>{size}</d:getcontentlength>\n"
            ));
        }
        if let Some(mime) = &status.mime_type {
            xml.push_str(&format!(
                "        <d:getcontenttype>{}</d:getcontenttype>\n",
                html_escape(mime)
            ));
        }
    }
    xml.push_str(&format!(
        "        <d:creationdate>{creation_date}</d:creationdate>\n"
    ));
    xml.push_str(&format!(
        "        <d:getlastmodified>{last_modified}</d:getlastmodified>\n"
    ));
    xml.push_str("      </d:prop>\n      <d:status>HTTP/1.1 200 OK</d:status>\n    </d:propstat>\n");
    xml.push_str("  </d:response>\n");
}
