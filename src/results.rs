use crate::encoding::percent_decode;
use std::fmt;

/// Scanner requests this filter recognizes but cannot carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedKind {
    Discard,
    Quarantine,
    AddRecipient,
    RemoveRecipient,
    ChangeSender,
}

impl fmt::Display for UnsupportedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnsupportedKind::Discard => "discard",
            UnsupportedKind::Quarantine => "quarantine",
            UnsupportedKind::AddRecipient => "add-recipient",
            UnsupportedKind::RemoveRecipient => "remove-recipient",
            UnsupportedKind::ChangeSender => "change-sender",
        };
        f.write_str(name)
    }
}

/// One instruction from the RESULTS file.
///
/// Header positions are kept exactly as the scanner wrote them (1-based,
/// 0 for "top"); conversion to a splice index happens when applying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    InsertHeader {
        key: String,
        value: String,
        position: usize,
    },
    DeleteHeader {
        key: String,
        position: usize,
    },
    SetContentType {
        value: String,
    },
    ReplaceBody,
    FinalReply {
        text: String,
    },
    Unsupported {
        kind: UnsupportedKind,
    },
}

impl Directive {
    /// Header key this directive edits, if any.
    pub fn header_key(&self) -> Option<&str> {
        match self {
            Directive::InsertHeader { key, .. } | Directive::DeleteHeader { key, .. } => {
                Some(key.as_str())
            }
            _ => None,
        }
    }
}

fn parse_insert(rest: &str) -> Option<Directive> {
    let mut fields = rest.splitn(3, ' ');
    let key = percent_decode(fields.next().filter(|k| !k.is_empty())?);
    let (position, value) = match (fields.next(), fields.next()) {
        (Some(pos), Some(value)) => (pos.parse().ok()?, value),
        (Some(value), None) => (0, value),
        _ => (0, ""),
    };
    Some(Directive::InsertHeader {
        key,
        value: percent_decode(value),
        position,
    })
}

fn parse_delete(rest: &str) -> Option<Directive> {
    let mut fields = rest.split_whitespace();
    let key = percent_decode(fields.next()?);
    let position = match fields.next() {
        Some(pos) => pos.parse().ok()?,
        None => 1,
    };
    Some(Directive::DeleteHeader { key, position })
}

/// Parse one RESULTS line. Unknown or malformed lines yield `None`.
pub fn parse_line(line: &str) -> Option<Directive> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut chars = line.chars();
    let opcode = chars.next()?;
    let rest = chars.as_str().trim_start();

    let directive = match opcode {
        'I' | 'N' => parse_insert(rest),
        'J' => parse_delete(rest),
        'M' => Some(Directive::SetContentType {
            value: percent_decode(rest.trim()),
        }),
        'C' => Some(Directive::ReplaceBody),
        'B' | 'T' => Some(Directive::FinalReply {
            text: percent_decode(rest.trim()),
        }),
        'D' => Some(Directive::Unsupported {
            kind: UnsupportedKind::Discard,
        }),
        'Q' => Some(Directive::Unsupported {
            kind: UnsupportedKind::Quarantine,
        }),
        'R' => Some(Directive::Unsupported {
            kind: UnsupportedKind::AddRecipient,
        }),
        'S' => Some(Directive::Unsupported {
            kind: UnsupportedKind::RemoveRecipient,
        }),
        'f' => Some(Directive::Unsupported {
            kind: UnsupportedKind::ChangeSender,
        }),
        _ => None,
    };

    if directive.is_none() {
        log::debug!("Ignoring results line {line:?}");
    }
    directive
}

/// Parse a whole RESULTS file, keeping directive order.
pub fn parse(results: &str) -> Vec<Directive> {
    results.lines().filter_map(parse_line).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_forms() {
        assert_eq!(
            parse_line("I X-Test 0 hello"),
            Some(Directive::InsertHeader {
                key: "X-Test".to_string(),
                value: "hello".to_string(),
                position: 0,
            })
        );
        assert_eq!(
            parse_line("NX-Spam-Score 2 5.1%20(high)"),
            Some(Directive::InsertHeader {
                key: "X-Spam-Score".to_string(),
                value: "5.1 (high)".to_string(),
                position: 2,
            })
        );
        assert_eq!(
            parse_line("IX-Flag yes"),
            Some(Directive::InsertHeader {
                key: "X-Flag".to_string(),
                value: "yes".to_string(),
                position: 0,
            })
        );
        assert_eq!(parse_line("IX-Bad -1 value"), None);
    }

    #[test]
    fn test_delete_and_body_directives() {
        assert_eq!(
            parse_line("JReceived 2"),
            Some(Directive::DeleteHeader {
                key: "Received".to_string(),
                position: 2,
            })
        );
        assert_eq!(
            parse_line("Mmultipart/mixed;%20boundary=x"),
            Some(Directive::SetContentType {
                value: "multipart/mixed; boundary=x".to_string()
            })
        );
        assert_eq!(parse_line("C"), Some(Directive::ReplaceBody));
    }

    #[test]
    fn test_final_reply_keeps_text() {
        assert_eq!(
            parse_line("B550 spam rejected"),
            Some(Directive::FinalReply {
                text: "550 spam rejected".to_string()
            })
        );
        assert_eq!(
            parse_line("T451%20try%20later\r\n"),
            Some(Directive::FinalReply {
                text: "451 try later".to_string()
            })
        );
    }

    #[test]
    fn test_unsupported_and_unknown() {
        let kinds: Vec<_> = parse("D\nQ\nR<x@y>\nS<x@y>\nf<z@y>\nZwhatever\n\n")
            .into_iter()
            .map(|d| match d {
                Directive::Unsupported { kind } => kind,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                UnsupportedKind::Discard,
                UnsupportedKind::Quarantine,
                UnsupportedKind::AddRecipient,
                UnsupportedKind::RemoveRecipient,
                UnsupportedKind::ChangeSender,
            ]
        );
        assert_eq!(UnsupportedKind::ChangeSender.to_string(), "change-sender");
    }

    #[test]
    fn test_order_is_preserved() {
        let directives = parse("IA 0 1\nJB 1\nIA 0 2\n");
        let keys: Vec<_> = directives.iter().filter_map(Directive::header_key).collect();
        assert_eq!(keys, vec!["A", "B", "A"]);
    }
}
