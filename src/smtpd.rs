use crate::filter::{Filter, Outcome, Phase};
use crate::session::{Endpoint, Message, Session};
use crate::verdict::Verdict;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

const REPORTS: &[&str] = &[
    "link-connect",
    "link-identify",
    "link-auth",
    "tx-begin",
    "tx-mail",
    "tx-rcpt",
    "tx-envelope",
    "tx-commit",
    "tx-rollback",
    "tx-reset",
    "link-disconnect",
];

/// One input line addressed to a session, with the routing fields stripped.
#[derive(Debug)]
enum Event {
    Report {
        event: String,
        params: Vec<String>,
    },
    Filter {
        phase: String,
        token: String,
        params: Vec<String>,
    },
}

/// State of one smtpd session, owned by that session's worker.
struct Connection {
    session: Session,
    /// DATA lines received so far for the current message
    data: Vec<String>,
}

/// Pick the address out of `<result>|<address>` in either field order.
fn ok_address(params: &[&str]) -> Option<String> {
    match params {
        ["ok", address, ..] => Some(address.to_string()),
        [address, "ok", ..] => Some(address.to_string()),
        _ => None,
    }
}

impl Connection {
    fn new(id: &str) -> Self {
        Connection {
            session: Session::new(id),
            data: Vec::new(),
        }
    }

    async fn report(&mut self, filter: &Filter, event: &str, params: &[&str]) {
        match event {
            "link-connect" => {
                if let [rdns, _fcrdns, src, dest, ..] = params {
                    self.session.hostname = Some(rdns.to_string()).filter(|h| !h.is_empty());
                    self.session.src = Endpoint::parse(src);
                    self.session.dest = Endpoint::parse(dest);
                }
            }
            "link-identify" => {
                if let Some(identity) = params.last() {
                    self.session.identity = Some(identity.to_string());
                }
            }
            "link-auth" => {
                if let ["pass", user, ..] | [user, "pass", ..] = params {
                    self.session.auth_user = Some(user.to_string());
                }
            }
            "tx-begin" => {
                let transport_id = params.first().map(|m| m.to_string());
                filter.end_transaction(&mut self.session);
                self.data.clear();
                self.session.message = Some(Message::new(transport_id));
            }
            "tx-mail" => {
                let sender = ok_address(params.get(1..).unwrap_or_default());
                if let (Some(sender), Some(message)) = (sender, self.session.message.as_mut()) {
                    message.sender = Some(sender);
                }
            }
            "tx-rcpt" => {
                let rcpt = ok_address(params.get(1..).unwrap_or_default());
                if let (Some(rcpt), Some(message)) = (rcpt, self.session.message.as_mut()) {
                    message.recipients.push(rcpt);
                }
            }
            "tx-envelope" => {
                if let (Some(envelope), Some(message)) =
                    (params.get(1), self.session.message.as_mut())
                {
                    message.envelope_id = Some(envelope.to_string());
                }
            }
            "tx-commit" | "tx-rollback" | "tx-reset" => {
                filter.end_transaction(&mut self.session);
                self.data.clear();
            }
            "link-disconnect" => {
                filter.handle(&mut self.session, Phase::Disconnect).await;
                self.data.clear();
            }
            _ => log::debug!("session {}: ignoring report {event}", self.session.id),
        }
    }

    /// Run one filter phase, returning the lines to send back.
    async fn filter_event(
        &mut self,
        filter: &Filter,
        phase: &str,
        token: &str,
        params: &[&str],
    ) -> Vec<String> {
        let payload = params.join("|");
        let id = self.session.id.clone();

        let outcome = match phase {
            "helo" => filter.handle(&mut self.session, Phase::Helo(payload)).await,
            "ehlo" => filter.handle(&mut self.session, Phase::Ehlo(payload)).await,
            "commit" => filter.handle(&mut self.session, Phase::Commit).await,
            "data-line" => {
                let done = payload == ".";
                self.data.push(payload);
                if !done {
                    return Vec::new();
                }

                let data = std::mem::take(&mut self.data);
                let outcome = filter
                    .handle(&mut self.session, Phase::DataLines(data.clone()))
                    .await;
                let lines = match outcome {
                    Outcome::Lines(Some(mut lines)) => {
                        lines.push(".".to_string());
                        lines
                    }
                    _ => data,
                };
                return lines
                    .into_iter()
                    .map(|line| format!("filter-dataline|{id}|{token}|{line}"))
                    .collect();
            }
            _ => {
                log::warn!("session {id}: unexpected filter phase {phase}, proceeding");
                Outcome::Verdict(Verdict::Proceed)
            }
        };

        match outcome {
            Outcome::Verdict(verdict) => vec![format!("filter-result|{id}|{token}|{verdict}")],
            _ => Vec::new(),
        }
    }
}

/// Handle one session's events in arrival order until its queue closes.
async fn serve_session(
    filter: Arc<Filter>,
    id: String,
    mut events: UnboundedReceiver<Event>,
    replies: UnboundedSender<Vec<String>>,
) {
    let mut conn = Connection::new(&id);
    while let Some(event) = events.recv().await {
        match event {
            Event::Report { event, params } => {
                let params: Vec<&str> = params.iter().map(String::as_str).collect();
                conn.report(&filter, &event, &params).await;
            }
            Event::Filter {
                phase,
                token,
                params,
            } => {
                let params: Vec<&str> = params.iter().map(String::as_str).collect();
                let lines = conn.filter_event(&filter, &phase, &token, &params).await;
                if !lines.is_empty() && replies.send(lines).is_err() {
                    log::debug!("session {id}: output closed, dropping reply");
                }
            }
        }
    }

    filter.end_transaction(&mut conn.session);
    log::debug!("session {id}: worker finished");
}

/// OpenSMTPD filter protocol adapter.
///
/// Input lines are routed to one worker task per session, so a slow scan
/// only holds up the session it belongs to. Replies from all workers are
/// funnelled into a single channel drained by the writer in [`SmtpdFilter::run`].
pub struct SmtpdFilter {
    filter: Arc<Filter>,
    sessions: HashMap<String, UnboundedSender<Event>>,
    replies: UnboundedSender<Vec<String>>,
}

impl SmtpdFilter {
    pub fn new(filter: Filter, replies: UnboundedSender<Vec<String>>) -> Self {
        SmtpdFilter {
            filter: Arc::new(filter),
            sessions: HashMap::new(),
            replies,
        }
    }

    pub fn registrations(&self) -> Vec<String> {
        let mut lines: Vec<String> = REPORTS
            .iter()
            .map(|event| format!("register|report|smtp-in|{event}"))
            .collect();
        if self.filter.config().helo_check {
            lines.push("register|filter|smtp-in|helo".to_string());
            lines.push("register|filter|smtp-in|ehlo".to_string());
        }
        lines.push("register|filter|smtp-in|data-line".to_string());
        lines.push("register|filter|smtp-in|commit".to_string());
        lines.push("register|ready".to_string());
        lines
    }

    /// Route one protocol line. Replies arrive on the channel given to [`SmtpdFilter::new`].
    pub fn handle_line(&mut self, line: &str) {
        let fields: Vec<&str> = line.split('|').collect();
        match fields.as_slice() {
            ["config", "ready"] => {
                let _ = self.replies.send(self.registrations());
            }
            ["config", ..] => log::debug!("smtpd {line}"),
            ["report", _version, _ts, _subsystem, "link-disconnect", session, params @ ..] => {
                if let Some(worker) = self.sessions.remove(*session) {
                    let _ = worker.send(Event::Report {
                        event: "link-disconnect".to_string(),
                        params: owned(params),
                    });
                }
            }
            ["report", _version, _ts, _subsystem, event, session, params @ ..] => {
                let event = Event::Report {
                    event: event.to_string(),
                    params: owned(params),
                };
                self.dispatch(session, event);
            }
            ["filter", _version, _ts, _subsystem, phase, session, token, params @ ..] => {
                let event = Event::Filter {
                    phase: phase.to_string(),
                    token: token.to_string(),
                    params: owned(params),
                };
                self.dispatch(session, event);
            }
            _ => log::warn!("Unrecognized input line {line:?}"),
        }
    }

    fn dispatch(&mut self, id: &str, event: Event) {
        if !self.sessions.contains_key(id) {
            let (events, queue) = mpsc::unbounded_channel();
            tokio::spawn(serve_session(
                self.filter.clone(),
                id.to_string(),
                queue,
                self.replies.clone(),
            ));
            self.sessions.insert(id.to_string(), events);
        }

        if let Some(worker) = self.sessions.get(id) {
            if worker.send(event).is_err() {
                log::warn!("session {id}: worker gone, dropping event");
                self.sessions.remove(id);
            }
        }
    }

    /// Serve the protocol until `input` reaches EOF, then wait for every
    /// session worker to clean up and flush its last replies.
    pub async fn run<R, W>(filter: Filter, input: R, mut output: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (replies, mut outgoing) = mpsc::unbounded_channel();
        let mut smtpd = SmtpdFilter::new(filter, replies);
        let mut lines = input.lines();

        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => smtpd.handle_line(line.trim_end_matches('\r')),
                    None => break,
                },
                Some(batch) = outgoing.recv() => write_lines(&mut output, &batch).await?,
            }
        }

        log::info!("Input closed, cleaning up {} sessions", smtpd.sessions.len());
        drop(smtpd);
        while let Some(batch) = outgoing.recv().await {
            write_lines(&mut output, &batch).await?;
        }
        Ok(())
    }
}

fn owned(params: &[&str]) -> Vec<String> {
    params.iter().map(|p| p.to_string()).collect()
}

async fn write_lines<W>(output: &mut W, lines: &[String]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for line in lines {
        output.write_all(line.as_bytes()).await?;
        output.write_all(b"\n").await?;
    }
    output.flush().await
}
