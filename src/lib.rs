pub mod config;
pub mod encoding;
pub mod filter;
pub mod helo;
pub mod ingest;
pub mod results;
pub mod rewrite;
pub mod scanner;
pub mod session;
pub mod smtpd;
pub mod spool;
pub mod verdict;

pub use config::Config;
pub use filter::{Filter, Outcome, Phase, PhaseKind};
pub use results::Directive;
pub use session::{Message, MessageStatus, Session};
pub use smtpd::SmtpdFilter;
pub use verdict::Verdict;
