use crate::config::Config;
use crate::helo::{check_identity, HeloVerdict};
use crate::ingest::ingest;
use crate::rewrite::rewrite;
use crate::scanner::Scanner;
use crate::session::{Message, MessageStatus, Session};
use crate::spool::Spool;
use crate::verdict::{self, Verdict};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    Helo,
    Ehlo,
    DataLines,
    Commit,
    Disconnect,
}

impl PhaseKind {
    pub fn name(&self) -> &'static str {
        match self {
            PhaseKind::Helo => "helo",
            PhaseKind::Ehlo => "ehlo",
            PhaseKind::DataLines => "data-lines",
            PhaseKind::Commit => "commit",
            PhaseKind::Disconnect => "disconnect",
        }
    }
}

/// A lifecycle event together with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Helo(String),
    Ehlo(String),
    /// Complete DATA content, dot-stuffed, ending with the "." marker
    DataLines(Vec<String>),
    Commit,
    Disconnect,
}

impl Phase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            Phase::Helo(_) => PhaseKind::Helo,
            Phase::Ehlo(_) => PhaseKind::Ehlo,
            Phase::DataLines(_) => PhaseKind::DataLines,
            Phase::Commit => PhaseKind::Commit,
            Phase::Disconnect => PhaseKind::Disconnect,
        }
    }
}

/// What a phase handler hands back to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Verdict(Verdict),
    /// Replacement DATA lines without the "." marker; `None` keeps the original
    Lines(Option<Vec<String>>),
    Done,
}

/// Routes phases to the identity check, the scan pipeline and the verdict resolver.
pub struct Filter {
    config: Arc<Config>,
    spool: Spool,
    scanner: Scanner,
}

impl Filter {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Filter {
            spool: Spool::new(&config),
            scanner: Scanner::new(&config),
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn handle(&self, session: &mut Session, phase: Phase) -> Outcome {
        session.phase = Some(phase.kind());
        match phase {
            Phase::Helo(identity) | Phase::Ehlo(identity) => {
                Outcome::Verdict(self.identify(session, identity).await)
            }
            Phase::DataLines(lines) => {
                let mut message = session.message.take().unwrap_or_default();
                let rewritten = self.scan_message(session, &mut message, &lines).await;
                session.message = Some(message);
                Outcome::Lines(rewritten)
            }
            Phase::Commit => Outcome::Verdict(self.commit(session)),
            Phase::Disconnect => {
                self.end_transaction(session);
                Outcome::Done
            }
        }
    }

    async fn identify(&self, session: &mut Session, identity: String) -> Verdict {
        session.identity = Some(identity);
        let identity = session.identity.as_deref().unwrap_or_default();
        match check_identity(&self.config, &self.scanner, session, identity).await {
            HeloVerdict::Proceed => Verdict::Proceed,
            HeloVerdict::RejectTemporary(text) | HeloVerdict::RejectPermanent(text) => {
                Verdict::Reject(text)
            }
        }
    }

    async fn scan_message(
        &self,
        session: &Session,
        message: &mut Message,
        lines: &[String],
    ) -> Option<Vec<String>> {
        if let Err(e) = ingest(&self.spool, session, message, lines) {
            log::error!("session {}: cannot capture message: {e:#}", session.id);
            message.status = MessageStatus::TempError;
            return None;
        }
        let dir = message.spool.clone()?;

        match self.scanner.scan(dir.id(), dir.path()).await {
            Ok(status) => {
                log::info!("session {}: message {} scanned: {status:?}", session.id, dir.id());
                message.status = status;
            }
            Err(e) => {
                log::warn!("session {}: scan of message {} failed: {e}", session.id, dir.id());
                return None;
            }
        }

        if message.status != MessageStatus::Ok {
            return None;
        }

        match rewrite(&self.config, session, message, lines) {
            Ok(rewritten) => Some(rewritten),
            Err(e) => {
                log::error!("session {}: cannot apply scan results: {e:#}", session.id);
                message.status = MessageStatus::TempError;
                None
            }
        }
    }

    fn commit(&self, session: &mut Session) -> Verdict {
        let verdict = verdict::resolve(session.message.as_ref());
        log::info!("session {}: commit -> {verdict}", session.id);
        if let Some(message) = session.message.as_mut() {
            self.release_spool(message);
        }
        verdict
    }

    fn release_spool(&self, message: &mut Message) {
        if let Some(dir) = message.spool.take() {
            self.spool.remove(dir.id());
        }
    }

    /// Drop the current message, removing any spool directory it still holds.
    pub fn end_transaction(&self, session: &mut Session) {
        if let Some(mut message) = session.message.take() {
            self.release_spool(&mut message);
        }
    }
}
