//! Scriptable stand-in for a game server's console endpoint
//!
//! Speaks the server side of the protocol: answers logins the way real
//! servers do (an empty `RESPONSE_VALUE` followed by the verdict), replies to
//! commands from a table of canned responses, and records every request it
//! decodes so tests can assert on wire order.

use bytes::BytesMut;
use log::{debug, info, warn};
use protocol::{PacketType, Request, AUTH_FAILED_ID, MAX_FRAGMENT_BODY};
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// What real servers answer when a command prints nothing
pub const NO_RESPONSE: &str = "Server received, But no response!! \n";

#[derive(Clone)]
pub struct MockConsole {
    password: String,
    responses: HashMap<String, String>,
    silent: HashSet<String>,
    hang_up: HashSet<String>,
    delays: HashMap<String, Duration>,
    fragment_body: usize,
    split_mid_char: bool,
    trickle: Option<usize>,
    received: Arc<Mutex<Vec<Request>>>,
}

impl MockConsole {
    pub fn new(password: &str) -> Self {
        Self {
            password: password.to_string(),
            responses: HashMap::new(),
            silent: HashSet::new(),
            hang_up: HashSet::new(),
            delays: HashMap::new(),
            fragment_body: MAX_FRAGMENT_BODY,
            split_mid_char: false,
            trickle: None,
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Canned output for one command
    pub fn respond(mut self, command: &str, output: &str) -> Self {
        self.responses
            .insert(command.to_string(), output.to_string());
        self
    }

    /// Longest body sent per fragment, capped at what one packet can carry
    pub fn fragment_size(mut self, body_len: usize) -> Self {
        self.fragment_body = body_len.clamp(1, MAX_FRAGMENT_BODY);
        self
    }

    /// Cuts fragments at exact byte offsets, even inside a character, as real servers do
    pub fn split_mid_char(mut self) -> Self {
        self.split_mid_char = true;
        self
    }

    /// Writes replies a few bytes at a time
    pub fn trickle(mut self, chunk: usize) -> Self {
        self.trickle = Some(chunk.max(1));
        self
    }

    /// Never answers this command, nor anything queued behind it
    pub fn silent(mut self, command: &str) -> Self {
        self.silent.insert(command.to_string());
        self
    }

    /// Waits before answering this command
    pub fn slow(mut self, command: &str, delay: Duration) -> Self {
        self.delays.insert(command.to_string(), delay);
        self
    }

    /// Closes the connection as soon as this command arrives
    pub fn hang_up_on(mut self, command: &str) -> Self {
        self.hang_up.insert(command.to_string());
        self
    }

    /// Every request decoded so far, across all connections, in arrival order
    pub async fn received(&self) -> Vec<Request> {
        self.received.lock().await.clone()
    }

    /// Bodies of the non-empty commands received, in arrival order
    pub async fn commands(&self) -> Vec<String> {
        self.received
            .lock()
            .await
            .iter()
            .filter(|r| r.kind == PacketType::ExecCommand && !r.body.is_empty())
            .map(|r| r.body.clone())
            .collect()
    }

    /// Accepts connections until the listener fails, serving each on its own task
    pub async fn listen(self, listener: TcpListener) -> io::Result<()> {
        info!("Mock console listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer) = listener.accept().await?;
            debug!("Mock console accepted {}", peer);

            let console = self.clone();
            tokio::spawn(async move {
                if let Err(e) = console.serve(stream).await {
                    warn!("Mock console connection from {} failed: {}", peer, e);
                }
            });
        }
    }

    /// Serves one client until it disconnects
    pub async fn serve<S>(&self, mut stream: S) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf = BytesMut::with_capacity(8 * 1024);
        let mut authenticated = false;
        let mut stalled = false;

        loop {
            if stream.read_buf(&mut buf).await? == 0 {
                return Ok(());
            }

            while let Some(request) = protocol::next_request(&mut buf)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
            {
                self.received.lock().await.push(request.clone());

                match request.kind {
                    PacketType::Auth => {
                        authenticated = request.body == self.password;
                        let verdict = if authenticated {
                            request.id
                        } else {
                            AUTH_FAILED_ID
                        };

                        let mut reply = BytesMut::new();
                        reply.extend_from_slice(&frame(request.id, PacketType::ResponseValue, "")?);
                        reply.extend_from_slice(&frame(verdict, PacketType::AuthResponse, "")?);
                        self.write(&mut stream, &reply).await?;
                    }
                    PacketType::ExecCommand => {
                        if !authenticated {
                            debug!("Mock console ignoring '{}' before login", request.body);
                            continue;
                        }
                        if self.hang_up.contains(&request.body) {
                            stream.shutdown().await?;
                            return Ok(());
                        }
                        if stalled || self.silent.contains(&request.body) {
                            stalled = true;
                            continue;
                        }

                        if let Some(delay) = self.delays.get(&request.body) {
                            tokio::time::sleep(*delay).await;
                        }
                        let reply = self.reply_to(&request)?;
                        self.write(&mut stream, &reply).await?;
                    }
                    other => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("unexpected {:?} from client", other),
                        ))
                    }
                }
            }
        }
    }

    fn reply_to(&self, request: &Request) -> io::Result<BytesMut> {
        let output = match self.responses.get(&request.body) {
            Some(output) => output.as_str(),
            None if request.body.is_empty() => "",
            None => NO_RESPONSE,
        };

        let mut reply = BytesMut::new();
        for chunk in split_body(output, self.fragment_body, self.split_mid_char) {
            reply.extend_from_slice(&frame(request.id, PacketType::ResponseValue, chunk)?);
        }
        Ok(reply)
    }

    async fn write<S>(&self, stream: &mut S, bytes: &[u8]) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        match self.trickle {
            Some(chunk) => {
                for piece in bytes.chunks(chunk) {
                    stream.write_all(piece).await?;
                    stream.flush().await?;
                    tokio::task::yield_now().await;
                }
            }
            None => {
                stream.write_all(bytes).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }
}

fn frame<B: AsRef<[u8]> + ?Sized>(id: i32, kind: PacketType, body: &B) -> io::Result<bytes::Bytes> {
    protocol::encode_response_bytes(id, kind, body.as_ref())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// Splits so no fragment exceeds `max` bytes, on char boundaries unless `mid_char`
fn split_body(body: &str, max: usize, mid_char: bool) -> Vec<&[u8]> {
    if body.is_empty() {
        return vec![body.as_bytes()];
    }
    if mid_char {
        return body.as_bytes().chunks(max).collect();
    }

    let mut pieces = Vec::new();
    let mut rest = body;
    while !rest.is_empty() {
        let mut end = rest.len().min(max);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(end);
        pieces.push(head.as_bytes());
        rest = tail;
    }
    pieces
}
