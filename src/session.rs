use crate::filter::PhaseKind;
use crate::spool::SpoolDir;

/// Host and port of one side of the SMTP connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: Option<u16>,
}

impl Endpoint {
    /// Parse the `addr:port`, `[v6]:port` and `unix:/path` forms reported by smtpd.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        if text.starts_with("unix:") {
            return Some(Endpoint {
                host: text.to_string(),
                port: None,
            });
        }

        if let Some(rest) = text.strip_prefix('[') {
            let (host, tail) = rest.split_once(']')?;
            let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            return Some(Endpoint {
                host: host.to_string(),
                port,
            });
        }

        match text.rsplit_once(':') {
            // A bare IPv6 address has more than one colon and no brackets.
            Some((host, port)) if !host.contains(':') => Some(Endpoint {
                host: host.to_string(),
                port: port.parse().ok(),
            }),
            _ => Some(Endpoint {
                host: text.to_string(),
                port: None,
            }),
        }
    }

    /// Address portion only, without brackets or port.
    pub fn address(&self) -> &str {
        &self.host
    }

    /// Whether this endpoint carries an IP address rather than a local socket.
    pub fn is_inet(&self) -> bool {
        self.host.parse::<std::net::IpAddr>().is_ok()
    }

    pub fn port_string(&self) -> String {
        self.port.map(|p| p.to_string()).unwrap_or_else(|| "0".to_string())
    }
}

/// Scan outcome for one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MessageStatus {
    /// No scan result yet; also the state after a failed scanner call.
    #[default]
    Pending,
    Ok,
    TempError,
    Error,
    Other(String),
}

impl MessageStatus {
    /// Classify a scanner response line. `temp_error` is checked before `error`.
    pub fn from_response(response: &str) -> Self {
        let response = response.trim();
        if response.contains("ok") {
            MessageStatus::Ok
        } else if response.contains("temp_error") {
            MessageStatus::TempError
        } else if response.contains("error") {
            MessageStatus::Error
        } else {
            MessageStatus::Other(response.to_string())
        }
    }
}

/// Per-connection context.
#[derive(Debug, Default)]
pub struct Session {
    pub id: String,
    pub src: Option<Endpoint>,
    pub dest: Option<Endpoint>,
    /// Reverse DNS name reported for the client
    pub hostname: Option<String>,
    /// HELO/EHLO identity
    pub identity: Option<String>,
    pub auth_user: Option<String>,
    pub phase: Option<PhaseKind>,
    pub message: Option<Message>,
}

impl Session {
    pub fn new(id: &str) -> Self {
        Session {
            id: id.to_string(),
            ..Default::default()
        }
    }
}

/// Per-transaction context.
#[derive(Debug, Default)]
pub struct Message {
    pub envelope_id: Option<String>,
    /// Message id handed out by the transport at transaction start
    pub transport_id: Option<String>,
    resolved_id: Option<String>,
    pub sender: Option<String>,
    pub recipients: Vec<String>,
    /// Value of the Message-ID header
    pub message_id: Option<String>,
    pub status: MessageStatus,
    pub final_reply: Option<String>,
    /// Captured header fields; continuation lines are joined with '\n'
    pub headers: Vec<String>,
    pub content_type: Option<String>,
    pub spool: Option<SpoolDir>,
}

impl Message {
    pub fn new(transport_id: Option<String>) -> Self {
        Message {
            transport_id,
            ..Default::default()
        }
    }

    /// Transaction id used for the spool directory. Fixed after the first call.
    pub fn id(&mut self) -> &str {
        if self.resolved_id.is_none() {
            let id = self
                .envelope_id
                .clone()
                .filter(|id| !id.is_empty())
                .or_else(|| self.transport_id.clone().filter(|id| !id.is_empty()))
                .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
            self.resolved_id = Some(id);
        }
        self.resolved_id.as_deref().unwrap_or_default()
    }

    pub fn first_recipient(&self) -> Option<&str> {
        self.recipients.first().map(String::as_str)
    }

    /// Record a final reply; only the first non-empty one counts.
    pub fn set_final_reply(&mut self, text: &str) {
        if self.final_reply.is_none() && !text.trim().is_empty() {
            self.final_reply = Some(text.trim().to_string());
        }
    }
}
