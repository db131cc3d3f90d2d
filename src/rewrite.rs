use crate::config::Config;
use crate::ingest::{body_lines, header_name, is_header};
use crate::results::{self, Directive};
use crate::session::{Message, Session};
use crate::spool::{NEWBODY, RESULTS};
use std::collections::HashSet;

/// Header edits after applying all directives, before final assembly.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Directive-derived header fields, already spliced in directive order
    pub spliced: Vec<String>,
    /// Lowercased keys named by any insert or delete
    pub touched: HashSet<String>,
    pub content_type: Option<String>,
    pub replace_body: bool,
    pub final_reply: Option<String>,
}

impl Applied {
    fn is_touched(&self, field: &str) -> bool {
        header_name(field).is_some_and(|name| self.touched.contains(&name.to_ascii_lowercase()))
    }
}

fn occurrences<'a>(fields: &'a [String], key: &'a str) -> impl Iterator<Item = usize> + 'a {
    fields
        .iter()
        .enumerate()
        .filter(move |(_, f)| is_header(f, key))
        .map(|(i, _)| i)
}

/// Splice index for an insert at scanner position `position`.
///
/// The position becomes a 0-based index `k`: 0 puts the header at the top,
/// otherwise it lands right after the k-th existing `key` header.
fn insert_index(fields: &[String], key: &str, position: usize) -> usize {
    let k = position.saturating_sub(1);
    if k == 0 {
        return 0;
    }
    let found: Vec<usize> = occurrences(fields, key).collect();
    match found.get(k - 1).or(found.last()) {
        Some(&i) => i + 1,
        None => fields.len(),
    }
}

/// Apply `directives` against the captured header fields.
///
/// The captured list is left untouched; headers whose key is edited by a
/// directive move into the spliced list, in their original order.
pub fn apply(captured: &[String], directives: &[Directive]) -> Applied {
    let mut applied = Applied {
        touched: directives
            .iter()
            .filter_map(Directive::header_key)
            .map(str::to_ascii_lowercase)
            .collect(),
        ..Default::default()
    };
    applied.spliced = captured
        .iter()
        .filter(|f| applied.is_touched(f))
        .cloned()
        .collect();

    for directive in directives {
        match directive {
            Directive::InsertHeader {
                key,
                value,
                position,
            } => {
                let index = insert_index(&applied.spliced, key, *position);
                applied.spliced.insert(index, format!("{key}: {value}"));
            }
            Directive::DeleteHeader { key, position } => {
                let target = occurrences(&applied.spliced, key).nth(position.wrapping_sub(1));
                match target {
                    Some(index) => {
                        applied.spliced.remove(index);
                    }
                    None => log::debug!("No occurrence {position} of {key} to delete"),
                }
            }
            Directive::SetContentType { value } => applied.content_type = Some(value.clone()),
            Directive::ReplaceBody => applied.replace_body = true,
            Directive::FinalReply { text } => {
                if applied.final_reply.is_none() && !text.is_empty() {
                    applied.final_reply = Some(text.clone());
                }
            }
            Directive::Unsupported { kind } => {
                log::warn!("Scanner requested unsupported action: {kind}");
            }
        }
    }

    applied
}

/// Final header block: spliced headers, kept headers, content-type
/// replacement and the optional annotation.
pub fn assemble_headers(
    captured: &[String],
    applied: &Applied,
    annotation: Option<String>,
) -> Vec<String> {
    let override_pending = applied.content_type.is_some();
    let mut kept = Vec::new();

    for field in captured {
        if override_pending && is_header(field, "Content-Type") {
            continue;
        }
        if !applied.is_touched(field) {
            kept.push(field.clone());
        }
    }

    let mut headers: Vec<String> = applied
        .spliced
        .iter()
        .filter(|f| !(override_pending && is_header(f, "Content-Type")))
        .cloned()
        .collect();
    headers.extend(kept);

    if let Some(content_type) = &applied.content_type {
        // Checked after splicing: directives may have removed or added it.
        if !headers.iter().any(|f| is_header(f, "MIME-Version")) {
            headers.push("MIME-Version: 1.0".to_string());
        }
        headers.push(format!("Content-Type: {content_type}"));
    }
    if let Some(annotation) = annotation {
        headers.push(annotation);
    }
    headers
}

/// Split header fields back into transport lines.
fn header_lines(fields: &[String]) -> Vec<String> {
    let mut lines = Vec::new();
    for field in fields {
        for (n, line) in field.split('\n').enumerate() {
            let line = line.trim_end_matches('\r');
            if n > 0 && !line.starts_with([' ', '\t']) {
                lines.push(format!("\t{line}"));
            } else {
                lines.push(line.to_string());
            }
        }
    }
    lines
}

/// Lines of a replacement body, dot-stuffed for the transport.
fn new_body_lines(body: &str) -> Vec<String> {
    body.lines()
        .map(|line| {
            let line = line.trim_end_matches('\r');
            if line.starts_with('.') {
                format!(".{line}")
            } else {
                line.to_string()
            }
        })
        .collect()
}

pub fn scanned_by(config: &Config, session: &Session) -> Option<String> {
    if !config.x_scanned_by {
        return None;
    }
    let dest = session
        .dest
        .as_ref()
        .map(|d| d.address())
        .unwrap_or("localhost");
    Some(format!("X-Scanned-By: {} on {dest}", config.scanner_name))
}

/// Read RESULTS for a scanned message and build its replacement lines.
///
/// `original` is the DATA line sequence the message arrived with.
pub fn rewrite(
    config: &Config,
    session: &Session,
    message: &mut Message,
    original: &[String],
) -> anyhow::Result<Vec<String>> {
    let Some(dir) = message.spool.clone() else {
        anyhow::bail!("message has no spool directory");
    };

    let results = dir.read_optional(RESULTS)?.unwrap_or_default();
    let directives = results::parse(&results);
    let applied = apply(&message.headers, &directives);

    message.content_type = applied.content_type.clone();
    if let Some(text) = &applied.final_reply {
        message.set_final_reply(text);
    }

    let headers = assemble_headers(&message.headers, &applied, scanned_by(config, session));
    let mut lines = header_lines(&headers);
    lines.push(String::new());

    let new_body = if applied.replace_body {
        dir.read_optional(NEWBODY)?
    } else {
        None
    };
    match new_body {
        Some(body) => {
            log::info!("session {}: message {} body replaced", session.id, dir.id());
            lines.extend(new_body_lines(&body));
        }
        None => lines.extend(body_lines(original).iter().cloned()),
    }

    log::debug!(
        "session {}: {} directives applied to message {}",
        session.id,
        directives.len(),
        dir.id()
    );
    Ok(lines)
}
