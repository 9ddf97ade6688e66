//! SMTP listener and per-connection protocol host.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::backend::{MailBackend, MailSession};
use super::command::{Command, CommandError, COMMAND_LINE_MAX};
use super::response::SmtpReply;
use crate::config::SmtpConfig;
use crate::{EphimailError, Result};

/// Longest data line read in one piece; longer lines are read in chunks.
const DATA_CHUNK_MAX: usize = 8192;

/// Limits and identity shared by every connection.
#[derive(Debug, Clone)]
struct HostSettings {
    hostname: String,
    read_timeout: Duration,
    write_timeout: Duration,
    max_message_bytes: usize,
    max_recipients: usize,
}

impl From<&SmtpConfig> for HostSettings {
    fn from(config: &SmtpConfig) -> Self {
        Self {
            hostname: config.hostname.clone(),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            max_message_bytes: config.max_message_bytes,
            max_recipients: config.max_recipients.max(1),
        }
    }
}

/// SMTP server accepting TCP connections.
pub struct SmtpServer {
    listener: TcpListener,
    semaphore: Arc<Semaphore>,
    settings: Arc<HostSettings>,
}

impl SmtpServer {
    /// Bind to the configured address.
    pub async fn bind(config: &SmtpConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("SMTP server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            semaphore: Arc::new(Semaphore::new(config.max_connections.max(1))),
            settings: Arc::new(HostSettings::from(config)),
        })
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever, one task per connection.
    pub async fn run<B: MailBackend>(self, backend: Arc<B>) -> Result<()> {
        loop {
            let permit = Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|_| EphimailError::Io(io::Error::other("semaphore closed")))?;

            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept SMTP connection: {}", e);
                    continue;
                }
            };
            debug!("Accepted SMTP connection from {}", peer);

            let backend = Arc::clone(&backend);
            let settings = Arc::clone(&self.settings);
            tokio::spawn(async move {
                let mut conn = Connection::new(stream, peer, settings);
                if let Err(e) = conn.serve(backend.as_ref()).await {
                    debug!("SMTP connection from {} ended: {}", peer, e);
                }
                drop(permit);
            });
        }
    }
}

/// Protocol state owned by the host; hooks run from `MailFrom` on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connected,
    Greeted,
    MailFrom,
    RcptTo,
}

/// Outcome of a DATA transfer.
enum Payload {
    Complete(Vec<u8>),
    TooBig,
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
    settings: Arc<HostSettings>,
    state: State,
    recipients: usize,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr, settings: Arc<HostSettings>) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
            peer,
            settings,
            state: State::Connected,
            recipients: 0,
        }
    }

    async fn serve<B: MailBackend>(&mut self, backend: &B) -> io::Result<()> {
        let greeting = SmtpReply::greeting(&self.settings.hostname);
        self.reply(&greeting).await?;

        let mut session: Option<B::Session> = None;
        let result = self.command_loop(backend, &mut session).await;

        if let Some(session) = session.as_mut() {
            session.logout();
        }
        if result
            .as_ref()
            .is_err_and(|e| e.kind() == io::ErrorKind::TimedOut)
        {
            let _ = self.reply(&SmtpReply::timeout()).await;
        }
        result
    }

    async fn command_loop<B: MailBackend>(
        &mut self,
        backend: &B,
        session: &mut Option<B::Session>,
    ) -> io::Result<()> {
        let mut line = Vec::new();
        loop {
            let n = self.read_line(&mut line, COMMAND_LINE_MAX).await?;
            if n == 0 {
                return Ok(());
            }
            if !line.ends_with(b"\n") {
                self.discard_line().await?;
                self.reply(&SmtpReply::line_too_long()).await?;
                continue;
            }

            let text = String::from_utf8_lossy(&line);
            let command = match Command::parse(&text) {
                Ok(command) => command,
                Err(CommandError::Unrecognized) => {
                    self.reply(&SmtpReply::unrecognized()).await?;
                    continue;
                }
                Err(CommandError::Syntax(msg)) => {
                    self.reply(&SmtpReply::syntax(msg)).await?;
                    continue;
                }
            };

            if command == Command::Quit {
                self.reply(&SmtpReply::bye()).await?;
                return Ok(());
            }
            let reply = self.handle(command, backend, session).await?;
            self.reply(&reply).await?;
        }
    }

    async fn handle<B: MailBackend>(
        &mut self,
        command: Command,
        backend: &B,
        session: &mut Option<B::Session>,
    ) -> io::Result<SmtpReply> {
        let reply = match command {
            Command::Helo(client) => self.greet(backend, session, &client, false),
            Command::Ehlo(client) => self.greet(backend, session, &client, true),
            Command::Mail(from) => match (self.state, session.as_mut()) {
                (State::Greeted, Some(s)) => match s.mail(&from).await {
                    Ok(()) => {
                        self.state = State::MailFrom;
                        SmtpReply::ok()
                    }
                    Err(e) => SmtpReply::from_error(&e),
                },
                (State::Connected, _) | (_, None) => SmtpReply::bad_sequence("send HELO first"),
                _ => SmtpReply::bad_sequence("nested MAIL command"),
            },
            Command::Rcpt(to) => match (self.state, session.as_mut()) {
                (State::MailFrom | State::RcptTo, Some(_))
                    if self.recipients >= self.settings.max_recipients =>
                {
                    SmtpReply::too_many_recipients(self.settings.max_recipients)
                }
                (State::MailFrom | State::RcptTo, Some(s)) => match s.rcpt(&to).await {
                    Ok(()) => {
                        self.state = State::RcptTo;
                        self.recipients += 1;
                        SmtpReply::ok()
                    }
                    Err(e) => SmtpReply::from_error(&e),
                },
                _ => SmtpReply::bad_sequence("need MAIL before RCPT"),
            },
            Command::Data => match (self.state, session.as_mut()) {
                (State::RcptTo, Some(s)) => {
                    self.reply(&SmtpReply::start_data()).await?;
                    let reply = match self.read_payload().await? {
                        Payload::Complete(payload) => match s.data(&payload).await {
                            Ok(()) => SmtpReply::queued(),
                            Err(e) => {
                                debug!("Message from {} rejected: {}", self.peer, e);
                                SmtpReply::from_error(&e)
                            }
                        },
                        Payload::TooBig => {
                            SmtpReply::message_too_big(self.settings.max_message_bytes)
                        }
                    };
                    self.end_transaction(session);
                    reply
                }
                _ => SmtpReply::bad_sequence("need RCPT before DATA"),
            },
            Command::Rset => {
                self.end_transaction(session);
                SmtpReply::ok()
            }
            Command::Noop => SmtpReply::ok(),
            Command::NotImplemented(verb) => {
                debug!("{} from {} not implemented", verb, self.peer);
                SmtpReply::not_implemented()
            }
            Command::Quit => SmtpReply::bye(),
        };
        Ok(reply)
    }

    /// HELO/EHLO: open the session, or restart the transaction on a repeat.
    fn greet<B: MailBackend>(
        &mut self,
        backend: &B,
        session: &mut Option<B::Session>,
        client: &str,
        extended: bool,
    ) -> SmtpReply {
        if session.is_some() {
            self.end_transaction(session);
        } else {
            *session = Some(backend.new_session(self.peer));
        }
        self.state = State::Greeted;

        if extended {
            SmtpReply::ehlo(&self.settings.hostname, client, self.settings.max_message_bytes)
        } else {
            SmtpReply::helo(&self.settings.hostname, client)
        }
    }

    /// Drop the current transaction, keeping the greeting.
    fn end_transaction<S: MailSession>(&mut self, session: &mut Option<S>) {
        if let Some(s) = session.as_mut() {
            s.reset();
            self.state = State::Greeted;
        }
        self.recipients = 0;
    }

    /// Read the DATA payload up to the terminating `.` line.
    async fn read_payload(&mut self) -> io::Result<Payload> {
        let max = self.settings.max_message_bytes;
        let mut payload = Vec::new();
        let mut too_big = false;
        let mut at_line_start = true;
        let mut chunk = Vec::new();

        loop {
            let n = self.read_line(&mut chunk, DATA_CHUNK_MAX).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed during DATA",
                ));
            }
            let complete = chunk.ends_with(b"\n");
            if at_line_start && complete && matches!(chunk.as_slice(), b".\r\n" | b".\n") {
                break;
            }

            let data = if at_line_start && chunk.starts_with(b".") {
                &chunk[1..]
            } else {
                &chunk[..]
            };
            if !too_big {
                if payload.len() + data.len() > max {
                    too_big = true;
                    payload = Vec::new();
                } else {
                    payload.extend_from_slice(data);
                }
            }
            at_line_start = complete;
        }

        Ok(if too_big {
            Payload::TooBig
        } else {
            Payload::Complete(payload)
        })
    }

    /// Read up to `limit` bytes ending at the next LF, under the read deadline.
    async fn read_line(&mut self, buf: &mut Vec<u8>, limit: usize) -> io::Result<usize> {
        buf.clear();
        let deadline = self.settings.read_timeout;
        let mut limited = (&mut self.reader).take(limit as u64);
        match timeout(deadline, limited.read_until(b'\n', buf)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout")),
        }
    }

    /// Skip the rest of an over-long command line.
    async fn discard_line(&mut self) -> io::Result<()> {
        let mut rest = Vec::new();
        loop {
            let n = self.read_line(&mut rest, COMMAND_LINE_MAX).await?;
            if n == 0 || rest.ends_with(b"\n") {
                return Ok(());
            }
        }
    }

    async fn reply(&mut self, reply: &SmtpReply) -> io::Result<()> {
        let bytes = reply.format();
        let deadline = self.settings.write_timeout;
        let peer = self.peer;
        let writer = &mut self.writer;
        let write = async move {
            writer.write_all(bytes.as_bytes()).await?;
            writer.flush().await?;
            Ok::<(), io::Error>(())
        };
        match timeout(deadline, write).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Write to {} timed out", peer);
                Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout"))
            }
        }
    }
}
