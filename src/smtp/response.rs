//! SMTP replies.

use crate::EphimailError;

/// A reply sent to the SMTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpReply {
    /// Three-digit reply code.
    pub code: u16,
    /// Reply text, one entry per line.
    pub lines: Vec<String>,
}

impl SmtpReply {
    /// Create a single-line reply.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![message.into()],
        }
    }

    /// Create a multi-line reply.
    pub fn multiline(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    pub fn ok() -> Self {
        Self::new(250, "OK")
    }

    pub fn greeting(hostname: &str) -> Self {
        Self::new(220, format!("{hostname} ESMTP Ephimail ready"))
    }

    pub fn helo(hostname: &str, client: &str) -> Self {
        Self::new(250, format!("{hostname} Hello {client}"))
    }

    /// EHLO reply advertising the supported extensions.
    pub fn ehlo(hostname: &str, client: &str, max_message_bytes: usize) -> Self {
        Self::multiline(
            250,
            vec![
                format!("{hostname} Hello {client}"),
                format!("SIZE {max_message_bytes}"),
                "8BITMIME".to_string(),
            ],
        )
    }

    pub fn start_data() -> Self {
        Self::new(354, "End data with <CR><LF>.<CR><LF>")
    }

    pub fn queued() -> Self {
        Self::new(250, "OK: message accepted")
    }

    pub fn bye() -> Self {
        Self::new(221, "Bye")
    }

    pub fn timeout() -> Self {
        Self::new(421, "Timeout exceeded, closing connection")
    }

    pub fn unrecognized() -> Self {
        Self::new(500, "Syntax error, command unrecognized")
    }

    pub fn line_too_long() -> Self {
        Self::new(500, "Line too long")
    }

    pub fn syntax(message: &str) -> Self {
        Self::new(501, format!("Syntax error: {message}"))
    }

    pub fn not_implemented() -> Self {
        Self::new(502, "Command not implemented")
    }

    pub fn bad_sequence(message: &str) -> Self {
        Self::new(503, format!("Bad sequence of commands: {message}"))
    }

    pub fn too_many_recipients(max: usize) -> Self {
        Self::new(452, format!("Too many recipients (max {max})"))
    }

    pub fn message_too_big(max: usize) -> Self {
        Self::new(552, format!("Maximum message size exceeded (max {max} bytes)"))
    }

    /// Map a hook failure to the reply the client sees.
    pub fn from_error(err: &EphimailError) -> Self {
        match err {
            EphimailError::InvalidRecipient(_) => Self::new(553, err.to_string()),
            EphimailError::DomainNotAllowed(_) => Self::new(550, err.to_string()),
            EphimailError::MalformedMessage(_) => Self::new(554, err.to_string()),
            _ => Self::new(451, "Requested action aborted: local error in processing"),
        }
    }

    /// Whether this is a 2xx reply.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Render the reply for the wire.
    pub fn format(&self) -> String {
        if self.lines.is_empty() {
            return format!("{}\r\n", self.code);
        }

        let last = self.lines.len() - 1;
        let mut out = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            let sep = if i == last { ' ' } else { '-' };
            out.push_str(&format!("{}{}{}\r\n", self.code, sep, line));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_single_line() {
        assert_eq!(SmtpReply::ok().format(), "250 OK\r\n");
        assert_eq!(SmtpReply::bye().format(), "221 Bye\r\n");
    }

    #[test]
    fn test_format_multiline() {
        let reply = SmtpReply::ehlo("mx.local", "client", 1024);
        assert_eq!(
            reply.format(),
            "250-mx.local Hello client\r\n250-SIZE 1024\r\n250 8BITMIME\r\n"
        );
    }

    #[test]
    fn test_error_mapping() {
        let cases = [
            (EphimailError::InvalidRecipient("x".into()), 553),
            (EphimailError::DomainNotAllowed("other.com".into()), 550),
            (EphimailError::MalformedMessage("bad".into()), 554),
            (EphimailError::Storage("down".into()), 451),
        ];
        for (err, code) in cases {
            assert_eq!(SmtpReply::from_error(&err).code, code, "{err}");
        }
    }

    #[test]
    fn test_domain_rejection_text() {
        let reply = SmtpReply::from_error(&EphimailError::DomainNotAllowed("other.com".into()));
        assert_eq!(reply.format(), "550 other.com is not allowed\r\n");
    }

    #[test]
    fn test_is_success() {
        assert!(SmtpReply::queued().is_success());
        assert!(!SmtpReply::start_data().is_success());
        assert!(!SmtpReply::timeout().is_success());
    }
}
