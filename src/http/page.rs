//! HTML rendering of the connection code listing.

use std::fmt::Write as _;

use crate::codes::CodeListing;

/// Renders a self-contained HTML page for `listing`.
#[must_use]
pub fn render_codes_page(listing: &CodeListing) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
         <title>Rhino MCP connection codes</title></head><body>\
         <h1>Active connection codes</h1>",
    );

    if let Some(error) = &listing.error {
        let _ = write!(html, "<p class=\"error\">{}</p>", escape(error));
    }

    if listing.codes.is_empty() {
        html.push_str("<p>No active connection codes.</p>");
    } else {
        html.push_str(
            "<table><thead><tr><th>Code</th><th>Created</th>\
             <th>Last access</th><th>Connections</th></tr></thead><tbody>",
        );
        for record in &listing.codes {
            let _ = write!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(&record.code),
                record.created_time.format("%Y-%m-%d %H:%M:%S UTC"),
                record.last_access_time.format("%Y-%m-%d %H:%M:%S UTC"),
                record.connection_count,
            );
        }
        html.push_str("</tbody></table>");
    }

    html.push_str("</body></html>");
    html
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
