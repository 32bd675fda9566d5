//! Parsers for FTP `LIST` and `rsync -r` listing output.
//!
//! Both parsers are defensive: lines they cannot make sense of are skipped.

use regex_lite::Regex;
use std::sync::OnceLock;

use super::{EntryKind, RemoteEntry, RemoteListing};

fn mode_pattern() -> &'static Regex {
    static MODE: OnceLock<Regex> = OnceLock::new();
    MODE.get_or_init(|| Regex::new(r"^[-dlcbps][-rwxsStT]{9}$").expect("static regex is valid"))
}

fn strip_link_target(name: &str, kind: EntryKind) -> &str {
    if kind == EntryKind::Symlink {
        if let Some((link, _)) = name.split_once(" -> ") {
            return link;
        }
    }
    name
}

/// Parse `ls -l` style FTP listing output into file name → entry.
///
/// `total` lines and lines with fewer than nine fields are skipped.
pub fn parse_ftp_listing(text: &str) -> RemoteListing {
    let mut listing = RemoteListing::new();

    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with("total") {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 9 {
            continue;
        }

        let kind = EntryKind::from_mode(fields[0]);
        let name = fields[8..].join(" ");
        let name = strip_link_target(&name, kind).to_string();
        if name == "." || name == ".." {
            continue;
        }

        listing.insert(
            name,
            RemoteEntry {
                kind,
                size: fields[4].parse().ok(),
            },
        );
    }

    listing
}

/// Parse one line of `rsync -r` output: permissions, size, date, time, path.
///
/// Sizes may carry thousands separators (`4,096`). The `.` entry is ignored.
pub fn parse_rsync_line(line: &str) -> Option<(String, RemoteEntry)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return None;
    }

    let mode = fields[0];
    if !mode_pattern().is_match(mode) {
        return None;
    }
    let kind = EntryKind::from_mode(mode);

    let size = fields[1].replace(',', "").parse::<u64>().ok();

    let path = fields[4..].join(" ");
    let path = strip_link_target(&path, kind);
    if path.is_empty() || path == "." {
        return None;
    }

    Some((path.to_string(), RemoteEntry { kind, size }))
}

pub fn parse_rsync_listing(text: &str) -> RemoteListing {
    text.lines().filter_map(parse_rsync_line).collect()
}
