use crate::session::{Message, MessageStatus};
use std::fmt;

pub const TEMPFAIL_REPLY: &str = "451 temporary failure";
pub const ERROR_REPLY: &str = "550 system error";

/// Decision returned to the mail agent for a control phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Proceed,
    Reject(String),
    Disconnect(String),
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Proceed => f.write_str("proceed"),
            Verdict::Reject(text) => write!(f, "reject|{text}"),
            Verdict::Disconnect(text) => write!(f, "disconnect|{text}"),
        }
    }
}

/// Resolve the commit-phase decision for `message`.
pub fn resolve(message: Option<&Message>) -> Verdict {
    let Some(message) = message else {
        return Verdict::Reject(TEMPFAIL_REPLY.to_string());
    };

    match &message.status {
        MessageStatus::Pending => Verdict::Reject(TEMPFAIL_REPLY.to_string()),
        MessageStatus::Ok => match &message.final_reply {
            Some(text) => Verdict::Reject(text.clone()),
            None => Verdict::Proceed,
        },
        MessageStatus::TempError => Verdict::Reject(TEMPFAIL_REPLY.to_string()),
        MessageStatus::Error => Verdict::Disconnect(ERROR_REPLY.to_string()),
        MessageStatus::Other(status) => {
            log::warn!("Unrecognized scan status {status:?}, proceeding");
            Verdict::Proceed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_status(status: MessageStatus, reply: Option<&str>) -> Message {
        let mut message = Message::default();
        message.status = status;
        message.final_reply = reply.map(str::to_string);
        message
    }

    #[test]
    fn test_missing_message_or_status_tempfails() {
        assert_eq!(resolve(None), Verdict::Reject(TEMPFAIL_REPLY.to_string()));
        assert_eq!(
            resolve(Some(&Message::default())),
            Verdict::Reject(TEMPFAIL_REPLY.to_string())
        );
    }

    #[test]
    fn test_ok_proceeds_without_reply() {
        let message = with_status(MessageStatus::Ok, None);
        assert_eq!(resolve(Some(&message)), Verdict::Proceed);
    }

    #[test]
    fn test_ok_with_late_reject() {
        let message = with_status(MessageStatus::Ok, Some("550 spam rejected"));
        assert_eq!(
            resolve(Some(&message)),
            Verdict::Reject("550 spam rejected".to_string())
        );
    }

    #[test]
    fn test_temp_error_ignores_reply() {
        let message = with_status(MessageStatus::TempError, Some("250 fine"));
        assert_eq!(
            resolve(Some(&message)),
            Verdict::Reject(TEMPFAIL_REPLY.to_string())
        );
    }

    #[test]
    fn test_error_disconnects_and_unknown_proceeds() {
        let message = with_status(MessageStatus::Error, None);
        assert_eq!(
            resolve(Some(&message)),
            Verdict::Disconnect(ERROR_REPLY.to_string())
        );

        let message = with_status(MessageStatus::Other("weird".to_string()), None);
        assert_eq!(resolve(Some(&message)), Verdict::Proceed);
    }

    #[test]
    fn test_wire_form() {
        assert_eq!(Verdict::Proceed.to_string(), "proceed");
        assert_eq!(
            Verdict::Reject("451 temporary failure".to_string()).to_string(),
            "reject|451 temporary failure"
        );
        assert_eq!(
            Verdict::Disconnect("550 system error".to_string()).to_string(),
            "disconnect|550 system error"
        );
    }
}
