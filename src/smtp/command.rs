//! SMTP command parsing.

use thiserror::Error;

/// Maximum length of a command line including CRLF.
pub const COMMAND_LINE_MAX: usize = 512;

/// A parsed SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Helo(String),
    Ehlo(String),
    /// Reverse path; empty for the null sender `<>`.
    Mail(String),
    /// Forward path.
    Rcpt(String),
    Data,
    Rset,
    Noop,
    Quit,
    /// Known verb this server does not implement (AUTH, STARTTLS, ...).
    NotImplemented(String),
}

/// Why a command line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("command unrecognized")]
    Unrecognized,

    #[error("{0}")]
    Syntax(&'static str),
}

impl Command {
    /// Parse one command line (trailing CRLF optional).
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (verb, args) = match line.split_once(' ') {
            Some((verb, args)) => (verb, args.trim()),
            None => (line, ""),
        };

        match verb.to_ascii_uppercase().as_str() {
            "HELO" => Ok(Command::Helo(domain_arg(args)?)),
            "EHLO" => Ok(Command::Ehlo(domain_arg(args)?)),
            "MAIL" => {
                let path = path_arg(args, "FROM:")
                    .ok_or(CommandError::Syntax("expected MAIL FROM:<address>"))?;
                Ok(Command::Mail(path))
            }
            "RCPT" => {
                let path = path_arg(args, "TO:")
                    .ok_or(CommandError::Syntax("expected RCPT TO:<address>"))?;
                if path.is_empty() {
                    return Err(CommandError::Syntax("recipient address cannot be empty"));
                }
                Ok(Command::Rcpt(path))
            }
            "DATA" => Ok(Command::Data),
            "RSET" => Ok(Command::Rset),
            "NOOP" => Ok(Command::Noop),
            "QUIT" => Ok(Command::Quit),
            verb @ ("AUTH" | "STARTTLS" | "VRFY" | "EXPN" | "HELP" | "TURN") => {
                Ok(Command::NotImplemented(verb.to_string()))
            }
            _ => Err(CommandError::Unrecognized),
        }
    }
}

fn domain_arg(args: &str) -> Result<String, CommandError> {
    args.split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or(CommandError::Syntax("domain argument required"))
}

/// Extract the path from `FROM:<addr> [params]` / `TO:<addr> [params]`.
///
/// Brackets are optional, and a space after the colon is tolerated.
fn path_arg(args: &str, keyword: &str) -> Option<String> {
    let head = args.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = args[keyword.len()..].trim_start();

    if let Some(inner) = rest.strip_prefix('<') {
        let end = inner.find('>')?;
        return Some(inner[..end].trim().to_string());
    }
    rest.split_whitespace().next().map(str::to_string)
}
