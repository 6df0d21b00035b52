use callscope_types::Metadata;

use crate::RPC_PATH_MARKERS;

/// True when `url` looks like RPC gateway traffic worth tracking.
pub fn is_rpc_traffic(url: &str) -> bool {
    RPC_PATH_MARKERS.iter().any(|marker| url.contains(marker))
}

/// Parses a raw response header block into lower-cased name → value.
///
/// Lines are CRLF-delimited (bare LF is tolerated). A line without a
/// `": "` separator is skipped. Repeated names are joined with `", "`.
/// Absent or malformed input yields an empty map.
pub fn parse_header_block(raw: Option<&str>) -> Metadata {
    let mut headers = Metadata::new();
    let Some(raw) = raw else {
        return headers;
    };

    for line in raw.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let Some((name, value)) = line.split_once(": ") else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        headers
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| String::from(value));
    }
    headers
}
