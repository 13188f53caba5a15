//! RouterOS API sentence framing.
//!
//! A sentence is a sequence of length-prefixed words closed by a zero-length word.
//! Replies start with `!re`, `!done`, `!trap` or `!fatal`; attributes are `=key=value`.

use std::collections::HashMap;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};

use crate::qos::client::VendorError;

/// Words longer than this are rejected rather than buffered.
const MAX_WORD_LEN: usize = 1 << 20;

pub fn encode_length(len: usize, out: &mut Vec<u8>) {
    let len = len as u32;
    if len < 0x80 {
        out.push(len as u8);
    } else if len < 0x4000 {
        out.extend_from_slice(&((len | 0x8000) as u16).to_be_bytes());
    } else if len < 0x20_0000 {
        let v = len | 0xC0_0000;
        out.extend_from_slice(&v.to_be_bytes()[1..]);
    } else if len < 0x1000_0000 {
        out.extend_from_slice(&(len | 0xE000_0000).to_be_bytes());
    } else {
        out.push(0xF0);
        out.extend_from_slice(&len.to_be_bytes());
    }
}

pub async fn read_length<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<usize> {
    let first = reader.read_u8().await? as usize;
    let (extra, prefix) = if first & 0x80 == 0x00 {
        return Ok(first);
    } else if first & 0xC0 == 0x80 {
        (1, first & 0x3F)
    } else if first & 0xE0 == 0xC0 {
        (2, first & 0x1F)
    } else if first & 0xF0 == 0xE0 {
        (3, first & 0x0F)
    } else if first == 0xF0 {
        (4, 0)
    } else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected control byte 0x{first:02x}"),
        ));
    };

    let mut len = prefix;
    for _ in 0..extra {
        len = (len << 8) | reader.read_u8().await? as usize;
    }
    Ok(len)
}

pub fn encode_sentence<S: AsRef<str>>(words: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    for word in words {
        let bytes = word.as_ref().as_bytes();
        encode_length(bytes.len(), &mut out);
        out.extend_from_slice(bytes);
    }
    out.push(0);
    out
}

pub async fn read_sentence<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Vec<String>> {
    let mut words = Vec::new();
    loop {
        let len = read_length(reader).await?;
        if len == 0 {
            return Ok(words);
        }
        if len > MAX_WORD_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("word of {len} bytes exceeds limit"),
            ));
        }
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        words.push(String::from_utf8_lossy(&buf).into_owned());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Re,
    Done,
    Trap,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub kind: ReplyKind,
    pub attributes: HashMap<String, String>,
    /// Free-form words, e.g. the reason following `!fatal`.
    pub message: Option<String>,
}

impl Reply {
    pub fn parse(words: Vec<String>) -> Result<Self, VendorError> {
        let mut iter = words.into_iter();
        let kind = match iter.next().as_deref() {
            Some("!re") => ReplyKind::Re,
            Some("!done") => ReplyKind::Done,
            Some("!trap") => ReplyKind::Trap,
            Some("!fatal") => ReplyKind::Fatal,
            Some(other) => {
                return Err(VendorError::Protocol(format!("unexpected reply word '{other}'")));
            }
            None => return Err(VendorError::Protocol("empty reply sentence".to_string())),
        };

        let mut attributes = HashMap::new();
        let mut message = None;
        for word in iter {
            if let Some(attr) = word.strip_prefix('=') {
                let (key, value) = attr.split_once('=').unwrap_or((attr, ""));
                attributes.insert(key.to_owned(), value.to_owned());
            } else if word.starts_with(".tag=") {
                continue;
            } else {
                message = Some(word);
            }
        }
        Ok(Self { kind, attributes, message })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    fn reason(&self) -> String {
        self.get("message")
            .map(str::to_owned)
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "no reason given".to_string())
    }
}

/// Data rows (`!re`) and the closing `!done` of one command.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub rows: Vec<Reply>,
    pub done: HashMap<String, String>,
}

/// One API session over any byte stream.
pub struct ApiConnection<S> {
    stream: BufStream<S>,
}

impl<S> ApiConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufStream::new(stream),
        }
    }

    pub async fn send<W: AsRef<str>>(&mut self, words: &[W]) -> io::Result<()> {
        self.stream.write_all(&encode_sentence(words)).await?;
        self.stream.flush().await
    }

    pub async fn read_words(&mut self) -> io::Result<Vec<String>> {
        read_sentence(&mut self.stream).await
    }

    /// Sends one command and collects replies up to and including `!done`.
    pub async fn talk<W: AsRef<str>>(&mut self, words: &[W]) -> Result<Response, VendorError> {
        self.send(words).await?;

        let mut response = Response::default();
        let mut trap: Option<String> = None;
        loop {
            let reply = Reply::parse(self.read_words().await?)?;
            match reply.kind {
                ReplyKind::Re => response.rows.push(reply),
                ReplyKind::Trap => {
                    trap.get_or_insert_with(|| reply.reason());
                }
                ReplyKind::Fatal => {
                    return Err(VendorError::Protocol(format!(
                        "session terminated by device: {}",
                        reply.reason()
                    )));
                }
                ReplyKind::Done => {
                    response.done = reply.attributes;
                    break;
                }
            }
        }

        match trap {
            Some(reason) => Err(VendorError::Trap(reason)),
            None => Ok(response),
        }
    }

    /// Plain-text login (RouterOS 6.43 and later).
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), VendorError> {
        let words = [
            "/login".to_string(),
            format!("=name={username}"),
            format!("=password={password}"),
        ];
        let response = self.talk(&words).await.map_err(|e| match e {
            VendorError::Trap(reason) => VendorError::Auth(reason),
            other => other,
        })?;
        if response.done.contains_key("ret") {
            return Err(VendorError::Auth(
                "device requested legacy challenge login".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}
