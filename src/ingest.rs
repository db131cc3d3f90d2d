use crate::encoding::percent_encode;
use crate::session::{Message, Session};
use crate::spool::{Spool, COMMANDS, HEADERS, INPUTMSG};

/// Split a header field into its name, if it has one.
pub fn header_name(field: &str) -> Option<&str> {
    if field.starts_with([' ', '\t']) {
        return None;
    }
    field.split_once(':').map(|(name, _)| name.trim())
}

pub fn is_header(field: &str, name: &str) -> bool {
    header_name(field).is_some_and(|n| n.eq_ignore_ascii_case(name))
}

fn header_value<'a>(fields: &'a [String], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|f| is_header(f, name))
        .and_then(|f| f.split_once(':'))
        .map(|(_, value)| value.trim())
}

/// Index of the blank line separating headers from body.
pub fn header_end(lines: &[String]) -> Option<usize> {
    lines.iter().position(|l| l.is_empty())
}

/// Body lines as carried by the transport, without the end-of-data marker.
pub fn body_lines(lines: &[String]) -> &[String] {
    let Some(end) = header_end(lines) else {
        return &[];
    };
    let body = &lines[end + 1..];
    match body.last() {
        Some(last) if last == "." => &body[..body.len() - 1],
        _ => body,
    }
}

/// Undo SMTP dot-stuffing on a single line.
pub fn unescape(line: &str) -> &str {
    if line.starts_with("..") {
        &line[1..]
    } else {
        line
    }
}

/// Group raw header lines into fields; continuation lines join their parent with '\n'.
pub fn fold_headers(lines: &[String]) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    for line in lines {
        match fields.last_mut() {
            Some(field) if line.starts_with([' ', '\t']) => {
                field.push('\n');
                field.push_str(line);
            }
            _ => fields.push(line.clone()),
        }
    }
    fields
}

/// RFC 2047 decoded Subject, if there is one.
pub fn decoded_subject(fields: &[String]) -> Option<String> {
    let field = fields.iter().find(|f| is_header(f, "Subject"))?;
    let raw = format!("{field}\n");
    match mailparse::parse_header(raw.as_bytes()) {
        Ok((header, _)) => Some(header.get_value()),
        Err(e) => {
            log::debug!("Could not decode subject {field:?}: {e}");
            None
        }
    }
}

/// Scanner commands describing `message`, one per line, ending with `F`.
pub fn command_lines(
    session: &Session,
    message: &Message,
    id: &str,
    subject: Option<&str>,
) -> Vec<String> {
    let sender = message.sender.as_deref().unwrap_or_default();
    let identity = session.identity.as_deref().unwrap_or_default();

    let mut commands = vec![
        format!("S{}", percent_encode(&format!("<{sender}>"))),
        format!("=mail_addr {}", percent_encode(sender)),
        format!("X{}", percent_encode(message.message_id.as_deref().unwrap_or_default())),
        format!("Q{}", percent_encode(id)),
        format!("H{}", percent_encode(identity)),
        format!("E{}", percent_encode(identity)),
        format!("=mail_host {}", percent_encode(&format!("{identity}."))),
    ];

    if let Some(user) = session.auth_user.as_deref().filter(|u| !u.is_empty()) {
        commands.push(format!("=auth_authen {}", percent_encode(user)));
    }
    if let Some(subject) = subject {
        commands.push(format!("U{}", percent_encode(subject)));
    }
    if let Some(src) = session.src.as_ref().filter(|e| e.is_inet()) {
        commands.push(format!("I{}", percent_encode(src.address())));
    }
    if !session.id.is_empty() {
        commands.push(format!("i{}", percent_encode(&session.id)));
    }
    if let Some(rcpt) = message.first_recipient() {
        commands.push(format!("R{} ? ? ?", percent_encode(rcpt)));
    }

    commands.push("F".to_string());
    commands
}

/// Capture headers from the DATA lines and write HEADERS, INPUTMSG and COMMANDS.
///
/// An error means no scan can take place for this message.
pub fn ingest(
    spool: &Spool,
    session: &Session,
    message: &mut Message,
    lines: &[String],
) -> anyhow::Result<()> {
    let Some(end) = header_end(lines) else {
        anyhow::bail!("no header block found in message data");
    };
    let raw_headers = &lines[..end];

    message.headers = fold_headers(raw_headers);
    message.message_id = header_value(&message.headers, "Message-ID").map(str::to_string);
    let subject = decoded_subject(&message.headers);

    let id = message.id().to_string();
    let dir = spool.open(&id)?;
    message.spool = Some(dir.clone());

    dir.write_lines(HEADERS, raw_headers)?;

    let body = body_lines(lines).iter().map(|l| unescape(l));
    let input = raw_headers
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(""))
        .chain(body);
    dir.write_lines(INPUTMSG, input)?;

    dir.write_lines(COMMANDS, command_lines(session, message, &id, subject.as_deref()))?;

    log::debug!(
        "session {}: message {id} captured ({} header fields)",
        session.id,
        message.headers.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::session::Endpoint;

    fn lines(text: &[&str]) -> Vec<String> {
        text.iter().map(|s| s.to_string()).collect()
    }

    fn spool_in(root: &std::path::Path) -> Spool {
        Spool::new(&Config {
            spool_dir: root.to_path_buf(),
            ..Default::default()
        })
    }

    fn session() -> Session {
        Session {
            src: Endpoint::parse("[2001:db8::5]:50000"),
            dest: Endpoint::parse("192.0.2.1:25"),
            identity: Some("client.example.org".to_string()),
            auth_user: Some("alice".to_string()),
            ..Session::new("c0ffee")
        }
    }

    fn message() -> Message {
        let mut message = Message::new(Some("1234abcd".to_string()));
        message.sender = Some("alice@example.org".to_string());
        message.recipients = vec!["bob@example.com".to_string(), "carol@example.com".to_string()];
        message
    }

    #[test]
    fn test_fold_headers_keeps_continuations() {
        let fields = fold_headers(&lines(&["Subject: a", "\tb", "From: x@y"]));
        assert_eq!(fields, vec!["Subject: a\n\tb", "From: x@y"]);
        assert_eq!(header_name(&fields[0]), Some("Subject"));
    }

    #[test]
    fn test_body_lines_drop_marker() {
        let data = lines(&["Subject: Hi", "", "hello", "..dots", "."]);
        assert_eq!(body_lines(&data), &lines(&["hello", "..dots"])[..]);
        assert_eq!(unescape("..dots"), ".dots");
        assert_eq!(unescape(".x"), ".x");
        assert!(body_lines(&lines(&["Subject: Hi", "."])).is_empty());
    }

    #[test]
    fn test_subject_is_decoded() {
        let fields = lines(&["Subject: =?utf-8?B?SGVsbG8gV29ybGQ=?="]);
        assert_eq!(decoded_subject(&fields).as_deref(), Some("Hello World"));
        assert_eq!(decoded_subject(&lines(&["From: a@x"])), None);
    }

    #[test]
    fn test_command_lines() {
        let mut msg = message();
        msg.message_id = Some("<m1@example.org>".to_string());

        let commands = command_lines(&session(), &msg, "1234abcd", Some("Hi there"));
        assert_eq!(
            commands,
            vec![
                "S<alice@example.org>",
                "=mail_addr alice@example.org",
                "X<m1@example.org>",
                "Q1234abcd",
                "Hclient.example.org",
                "Eclient.example.org",
                "=mail_host client.example.org.",
                "=auth_authen alice",
                "UHi%20there",
                "I2001%3Adb8%3A%3A5",
                "ic0ffee",
                "Rbob@example.com ? ? ?",
                "F",
            ]
        );
    }

    #[test]
    fn test_optional_commands_omitted() {
        let session = Session {
            src: Endpoint::parse("unix:/var/run/smtpd.sock"),
            ..Session::new("")
        };
        let commands = command_lines(&session, &Message::default(), "id", None);
        assert!(!commands.iter().any(|c| c.starts_with('I')
            || c.starts_with('U')
            || c.starts_with('i')
            || c.starts_with('R')
            || c.starts_with("=auth_authen")));
        assert_eq!(commands.first().map(String::as_str), Some("S<>"));
        assert_eq!(commands.last().map(String::as_str), Some("F"));
    }

    #[test]
    fn test_ingest_writes_spool_files() {
        let root = tempfile::tempdir().unwrap();
        let spool = spool_in(root.path());
        let mut msg = message();
        let data = lines(&[
            "Subject: Hi",
            "Message-ID: <abc@x>",
            "From: a@x",
            "",
            "hello",
            "..leading dot",
            ".",
        ]);

        ingest(&spool, &session(), &mut msg, &data).unwrap();

        let dir = msg.spool.clone().unwrap();
        assert_eq!(dir.path(), root.path().join("mdefang-1234abcd"));
        assert_eq!(msg.message_id.as_deref(), Some("<abc@x>"));
        assert_eq!(msg.headers.len(), 3);
        assert_eq!(
            std::fs::read_to_string(dir.file(HEADERS)).unwrap(),
            "Subject: Hi\nMessage-ID: <abc@x>\nFrom: a@x\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.file(INPUTMSG)).unwrap(),
            "Subject: Hi\nMessage-ID: <abc@x>\nFrom: a@x\n\nhello\n.leading dot\n"
        );
        let commands = std::fs::read_to_string(dir.file(COMMANDS)).unwrap();
        assert!(commands.contains("X<abc@x>\n"));
        assert!(commands.contains("UHi\n"));
        assert!(commands.ends_with("F\n"));
    }

    #[test]
    fn test_ingest_without_blank_line_fails_before_spooling() {
        let root = tempfile::tempdir().unwrap();
        let spool = spool_in(root.path());
        let mut msg = message();

        let result = ingest(&spool, &session(), &mut msg, &lines(&["Subject: Hi", "."]));
        assert!(result.is_err());
        assert!(msg.spool.is_none());
        assert!(!spool.path_for("1234abcd").exists());
    }
}
