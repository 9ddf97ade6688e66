//! Test helpers for integration tests.
//!
//! Provides an in-memory service stack, an SMTP test client and request
//! helpers for the web router.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tower::ServiceExt;

use ephimail::config::{HubConfig, SmtpConfig, WebConfig};
use ephimail::web::{create_router, AppState};
use ephimail::{
    BodyEncryptor, DomainAllowList, IngestBackend, MailStorage, MailboxHub, MemoryStore,
    RsaOaepEncryptor, SmtpServer,
};

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Allowed domain used by every test stack.
pub const TEST_DOMAIN: &str = "example.com";

/// In-memory service stack: storage, hub and allow-list.
pub struct TestStack {
    pub storage: MailStorage,
    pub hub: MailboxHub,
    pub allowed: DomainAllowList,
}

impl TestStack {
    /// Create a stack with a running hub loop.
    pub fn new() -> Self {
        let storage = MailStorage::new(Arc::new(MemoryStore::new()), Duration::from_secs(3600));
        let (hub, _task) = MailboxHub::spawn(16);
        Self {
            storage,
            hub,
            allowed: DomainAllowList::new([TEST_DOMAIN]),
        }
    }

    /// Ingestion backend over this stack.
    pub fn backend(&self, encryptor: Arc<dyn BodyEncryptor>) -> IngestBackend {
        IngestBackend::new(
            self.allowed.clone(),
            self.storage.clone(),
            encryptor,
            self.hub.clone(),
        )
    }

    /// Start an SMTP server on a random port.
    pub async fn start_smtp(&self) -> SocketAddr {
        self.start_smtp_with(Arc::new(RsaOaepEncryptor::new())).await
    }

    /// Start an SMTP server with a custom encryptor.
    pub async fn start_smtp_with(&self, encryptor: Arc<dyn BodyEncryptor>) -> SocketAddr {
        let config = SmtpConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            hostname: "mx.test".to_string(),
            allowed_domains: vec![TEST_DOMAIN.to_string()],
            max_message_bytes: 4096,
            max_recipients: 5,
            ..SmtpConfig::default()
        };
        let server = SmtpServer::bind(&config).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run(Arc::new(self.backend(encryptor))));
        addr
    }

    /// Web router over this stack.
    pub fn router(&self, reservations_enabled: bool) -> Router {
        let web = WebConfig {
            reservations_enabled,
            ..WebConfig::default()
        };
        let state = Arc::new(AppState::new(
            self.storage.clone(),
            self.hub.clone(),
            self.allowed.clone(),
            &web,
            HubConfig::default(),
        ));
        create_router(state, &[])
    }
}

/// Line-oriented SMTP client.
pub struct SmtpClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl SmtpClient {
    /// Connect and return the client with the server greeting.
    pub async fn connect(addr: SocketAddr) -> (Self, String) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, write) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read),
            writer: write,
        };
        let greeting = client.read_reply().await;
        (client, greeting)
    }

    /// Read one (possibly multi-line) reply.
    pub async fn read_reply(&mut self) -> String {
        let mut out = String::new();
        loop {
            let mut line = String::new();
            timeout(DEFAULT_TIMEOUT, self.reader.read_line(&mut line))
                .await
                .expect("reply timed out")
                .unwrap();
            out.push_str(&line);
            if line.len() < 4 || line.as_bytes()[3] != b'-' {
                return out;
            }
        }
    }

    /// Send a command line and read the reply.
    pub async fn send(&mut self, line: &str) -> String {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
        self.read_reply().await
    }

    /// Send a complete message after DATA and read the final reply.
    ///
    /// `message` goes on the wire byte for byte, 8-bit content included.
    pub async fn send_message(&mut self, message: impl AsRef<[u8]>) -> String {
        let data = self.send("DATA").await;
        assert!(data.starts_with("354"), "unexpected DATA reply: {data}");
        let mut wire = message.as_ref().to_vec();
        wire.extend_from_slice(b"\r\n.\r\n");
        self.writer.write_all(&wire).await.unwrap();
        self.read_reply().await
    }

    /// Run a full transaction to `to`, returning the final reply.
    pub async fn deliver(&mut self, to: &str, message: impl AsRef<[u8]>) -> String {
        assert!(self.send("MAIL FROM:<sender@remote.test>").await.starts_with("250"));
        let rcpt = self.send(&format!("RCPT TO:<{to}>")).await;
        if !rcpt.starts_with("250") {
            return rcpt;
        }
        self.send_message(message).await
    }
}

/// Send a request through `router`, returning status and body text.
pub async fn request(router: &Router, request: Request<Body>) -> (axum::http::StatusCode, String) {
    let response: Response<Body> = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

/// GET `uri`.
pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("host", "mail.test")
        .body(Body::empty())
        .unwrap()
}

/// DELETE `uri`.
pub fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// POST a JSON body to `uri`.
pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("host", "mail.test")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
