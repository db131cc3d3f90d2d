use crate::config::Config;
use crate::encoding::{percent_decode, percent_encode};
use crate::scanner::Scanner;
use crate::session::Session;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref HELOOK_REPLY: Regex = Regex::new(r"^ok\s+(-?\d+)(?:\s+(.*))?$").unwrap();
}

const DEFAULT_TEMPFAIL: &str = "451 Temporary failure, please try again later";
const DEFAULT_REJECT: &str = "550 HELO/EHLO identity rejected";

/// Outcome of the HELO/EHLO identity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeloVerdict {
    Proceed,
    RejectTemporary(String),
    RejectPermanent(String),
}

/// Build the `helook` request line for `identity`.
pub fn helook_request(session: &Session, identity: &str) -> String {
    let (src_addr, src_port) = session
        .src
        .as_ref()
        .map(|e| (e.address().to_string(), e.port_string()))
        .unwrap_or_else(|| (String::new(), "0".to_string()));
    let (dest_addr, dest_port) = session
        .dest
        .as_ref()
        .map(|e| (e.address().to_string(), e.port_string()))
        .unwrap_or_else(|| (String::new(), "0".to_string()));
    let hostname = session.hostname.as_deref().unwrap_or(&src_addr).to_string();

    format!(
        "helook {} {} {} {} {} {}\n",
        percent_encode(&src_addr),
        percent_encode(&hostname),
        percent_encode(identity),
        src_port,
        percent_encode(&dest_addr),
        dest_port
    )
}

/// Interpret an `ok <code> <text>` reply. Unknown codes and garbage proceed.
pub fn parse_helook_reply(response: &str) -> HeloVerdict {
    let line = response.lines().next().unwrap_or_default().trim();
    let Some(captures) = HELOOK_REPLY.captures(line) else {
        log::warn!("Unparsable identity check reply {line:?}, proceeding");
        return HeloVerdict::Proceed;
    };

    let text = captures
        .get(2)
        .map(|m| percent_decode(m.as_str().trim()))
        .filter(|t| !t.is_empty());

    match captures[1].parse::<i32>() {
        Ok(-1) => HeloVerdict::RejectTemporary(
            text.map(|t| format!("451 {t}"))
                .unwrap_or_else(|| DEFAULT_TEMPFAIL.to_string()),
        ),
        Ok(0) => HeloVerdict::RejectPermanent(
            text.map(|t| format!("550 {t}"))
                .unwrap_or_else(|| DEFAULT_REJECT.to_string()),
        ),
        _ => HeloVerdict::Proceed,
    }
}

/// Ask the scanner whether `identity` is acceptable for this session.
pub async fn check_identity(
    config: &Config,
    scanner: &Scanner,
    session: &Session,
    identity: &str,
) -> HeloVerdict {
    if !config.helo_check {
        return HeloVerdict::Proceed;
    }

    let request = helook_request(session, identity);
    match scanner.exchange(&request).await {
        Ok(response) => {
            let verdict = parse_helook_reply(&response);
            log::info!("session {}: identity {identity} -> {verdict:?}", session.id);
            verdict
        }
        Err(e) => {
            log::warn!("session {}: identity check failed: {e}", session.id);
            HeloVerdict::RejectTemporary(DEFAULT_TEMPFAIL.to_string())
        }
    }
}
