//! Minimal SNMP v2c client: a single GET of `sysDescr.0` over UDP.
//!
//! Messages are BER encoded:
//! `SEQUENCE { version, community, PDU { request-id, error-status, error-index,
//! SEQUENCE { SEQUENCE { oid, value } } } }`.

use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::debug;

pub const SYS_DESCR_OID: [u32; 9] = [1, 3, 6, 1, 2, 1, 1, 1, 0];
pub const SNMP_TIMEOUT: Duration = Duration::from_secs(2);
pub const SNMP_RETRIES: u32 = 1;
/// Longest model string kept from `sysDescr`.
pub const MODEL_MAX_CHARS: usize = 200;

const VERSION_2C: i64 = 1;

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_GET_REQUEST: u8 = 0xA0;
pub const TAG_RESPONSE: u8 = 0xA2;
const TAG_NO_SUCH_OBJECT: u8 = 0x80;
const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
const TAG_END_OF_MIB_VIEW: u8 = 0x82;

#[derive(Error, Debug)]
pub enum SnmpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no response after {0} attempts")]
    Timeout(u32),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("agent returned error status {0}")]
    ErrorStatus(&'static str),
    #[error("agent returned {0}")]
    Exception(&'static str),
    #[error("agent returned an empty sysDescr")]
    Empty,
    #[error("no SNMP community configured")]
    NoCommunity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmpValue {
    OctetString(Vec<u8>),
    Null,
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
    Other(u8),
}

impl SnmpValue {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            SnmpValue::OctetString(bytes) => write_tlv(out, TAG_OCTET_STRING, bytes),
            SnmpValue::Null => write_tlv(out, TAG_NULL, &[]),
            SnmpValue::NoSuchObject => write_tlv(out, TAG_NO_SUCH_OBJECT, &[]),
            SnmpValue::NoSuchInstance => write_tlv(out, TAG_NO_SUCH_INSTANCE, &[]),
            SnmpValue::EndOfMibView => write_tlv(out, TAG_END_OF_MIB_VIEW, &[]),
            SnmpValue::Other(tag) => write_tlv(out, *tag, &[]),
        }
    }

    fn decode(tag: u8, content: &[u8]) -> Self {
        match tag {
            TAG_OCTET_STRING => SnmpValue::OctetString(content.to_vec()),
            TAG_NULL => SnmpValue::Null,
            TAG_NO_SUCH_OBJECT => SnmpValue::NoSuchObject,
            TAG_NO_SUCH_INSTANCE => SnmpValue::NoSuchInstance,
            TAG_END_OF_MIB_VIEW => SnmpValue::EndOfMibView,
            other => SnmpValue::Other(other),
        }
    }
}

/// A decoded single-varbind message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub community: Vec<u8>,
    pub pdu_tag: u8,
    pub request_id: i32,
    pub error_status: i64,
    pub oid: Vec<u32>,
    pub value: SnmpValue,
}

impl Message {
    pub fn get_request(community: &str, request_id: i32, oid: &[u32]) -> Self {
        Self {
            community: community.as_bytes().to_vec(),
            pdu_tag: TAG_GET_REQUEST,
            request_id,
            error_status: 0,
            oid: oid.to_vec(),
            value: SnmpValue::Null,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut varbind = Vec::new();
        write_tlv(&mut varbind, TAG_OID, &encode_oid(&self.oid));
        self.value.encode(&mut varbind);
        let mut varbinds = Vec::new();
        write_tlv(&mut varbinds, TAG_SEQUENCE, &varbind);

        let mut pdu = Vec::new();
        write_tlv(&mut pdu, TAG_INTEGER, &encode_integer(i64::from(self.request_id)));
        write_tlv(&mut pdu, TAG_INTEGER, &encode_integer(self.error_status));
        write_tlv(&mut pdu, TAG_INTEGER, &encode_integer(0));
        write_tlv(&mut pdu, TAG_SEQUENCE, &varbinds);

        let mut body = Vec::new();
        write_tlv(&mut body, TAG_INTEGER, &encode_integer(VERSION_2C));
        write_tlv(&mut body, TAG_OCTET_STRING, &self.community);
        write_tlv(&mut body, self.pdu_tag, &pdu);

        let mut out = Vec::with_capacity(body.len() + 4);
        write_tlv(&mut out, TAG_SEQUENCE, &body);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, SnmpError> {
        let mut outer = Reader::new(buf);
        let mut message = Reader::new(outer.expect(TAG_SEQUENCE)?);

        let version = decode_integer(message.expect(TAG_INTEGER)?)?;
        if version != VERSION_2C {
            return Err(SnmpError::Decode(format!("unsupported version {version}")));
        }
        let community = message.expect(TAG_OCTET_STRING)?.to_vec();
        let (pdu_tag, pdu) = message.next()?;

        let mut pdu = Reader::new(pdu);
        let request_id = i32::try_from(decode_integer(pdu.expect(TAG_INTEGER)?)?)
            .map_err(|_| SnmpError::Decode("request-id out of range".into()))?;
        let error_status = decode_integer(pdu.expect(TAG_INTEGER)?)?;
        pdu.expect(TAG_INTEGER)?;

        let mut varbinds = Reader::new(pdu.expect(TAG_SEQUENCE)?);
        let mut varbind = Reader::new(varbinds.expect(TAG_SEQUENCE)?);
        let oid = decode_oid(varbind.expect(TAG_OID)?)?;
        let (value_tag, value) = varbind.next()?;

        Ok(Self {
            community,
            pdu_tag,
            request_id,
            error_status,
            oid,
            value: SnmpValue::decode(value_tag, value),
        })
    }
}

fn write_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
}

fn write_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    write_length(out, content.len());
    out.extend_from_slice(content);
}

/// Minimal two's-complement big-endian encoding.
fn encode_integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

fn decode_integer(content: &[u8]) -> Result<i64, SnmpError> {
    if content.is_empty() || content.len() > 8 {
        return Err(SnmpError::Decode(format!(
            "integer of {} bytes",
            content.len()
        )));
    }
    let negative = content[0] & 0x80 != 0;
    let mut value: i64 = if negative { -1 } else { 0 };
    for b in content {
        value = (value << 8) | i64::from(*b);
    }
    Ok(value)
}

fn encode_oid(oid: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    let (first, rest) = match oid {
        [a, b, rest @ ..] => (a * 40 + b, rest),
        [a] => (a * 40, &[][..]),
        [] => return out,
    };
    for arc in std::iter::once(first).chain(rest.iter().copied()) {
        let mut chunk = [0u8; 5];
        let mut n = 0;
        let mut v = arc;
        loop {
            chunk[n] = (v & 0x7F) as u8;
            n += 1;
            v >>= 7;
            if v == 0 {
                break;
            }
        }
        for i in (0..n).rev() {
            out.push(if i == 0 { chunk[i] } else { chunk[i] | 0x80 });
        }
    }
    out
}

fn decode_oid(content: &[u8]) -> Result<Vec<u32>, SnmpError> {
    let mut arcs = Vec::new();
    let mut value: u32 = 0;
    for (i, b) in content.iter().enumerate() {
        value = value
            .checked_mul(128)
            .ok_or_else(|| SnmpError::Decode("oid arc overflow".into()))?
            | u32::from(b & 0x7F);
        if b & 0x80 == 0 {
            if arcs.is_empty() {
                let first = (value / 40).min(2);
                arcs.push(first);
                arcs.push(value - first * 40);
            } else {
                arcs.push(value);
            }
            value = 0;
        } else if i == content.len() - 1 {
            return Err(SnmpError::Decode("truncated oid".into()));
        }
    }
    Ok(arcs)
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn next(&mut self) -> Result<(u8, &'a [u8]), SnmpError> {
        let truncated = || SnmpError::Decode("truncated message".into());
        let (&tag, rest) = self.buf.split_first().ok_or_else(truncated)?;
        let (&first, mut rest) = rest.split_first().ok_or_else(truncated)?;

        let len = if first & 0x80 == 0 {
            usize::from(first)
        } else {
            let n = usize::from(first & 0x7F);
            if n == 0 || n > 4 || rest.len() < n {
                return Err(SnmpError::Decode(format!("bad length prefix 0x{first:02x}")));
            }
            let len = rest[..n].iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
            rest = &rest[n..];
            len
        };
        if rest.len() < len {
            return Err(truncated());
        }
        let (content, rest) = rest.split_at(len);
        self.buf = rest;
        Ok((tag, content))
    }

    fn expect(&mut self, tag: u8) -> Result<&'a [u8], SnmpError> {
        let (found, content) = self.next()?;
        if found != tag {
            return Err(SnmpError::Decode(format!(
                "expected tag 0x{tag:02x}, found 0x{found:02x}"
            )));
        }
        Ok(content)
    }
}

fn error_status_name(status: i64) -> &'static str {
    match status {
        1 => "tooBig",
        2 => "noSuchName",
        3 => "badValue",
        4 => "readOnly",
        5 => "genErr",
        6 => "noAccess",
        _ => "other",
    }
}

/// First line of `descr`, trimmed and cut to `MODEL_MAX_CHARS` characters.
pub fn model_from_descr(descr: &str) -> Option<String> {
    let line = descr.lines().map(str::trim).find(|l| !l.is_empty())?;
    Some(line.chars().take(MODEL_MAX_CHARS).collect())
}

fn interpret(response: Message) -> Result<String, SnmpError> {
    if response.error_status != 0 {
        return Err(SnmpError::ErrorStatus(error_status_name(response.error_status)));
    }
    match response.value {
        SnmpValue::OctetString(bytes) => {
            model_from_descr(&String::from_utf8_lossy(&bytes)).ok_or(SnmpError::Empty)
        }
        SnmpValue::NoSuchObject => Err(SnmpError::Exception("noSuchObject")),
        SnmpValue::NoSuchInstance => Err(SnmpError::Exception("noSuchInstance")),
        SnmpValue::EndOfMibView => Err(SnmpError::Exception("endOfMibView")),
        SnmpValue::Null | SnmpValue::Other(_) => Err(SnmpError::Empty),
    }
}

/// Fetches `sysDescr.0` and returns its first line. Each attempt waits `timeout`;
/// datagrams that do not answer this request are ignored.
pub async fn get_sys_descr(
    host: &str,
    port: u16,
    community: &str,
    timeout: Duration,
    retries: u32,
) -> Result<String, SnmpError> {
    let bind_addr = if host.contains(':') { "[::]:0" } else { "0.0.0.0:0" };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect((host, port)).await?;

    let request_id = rand::random::<i32>() & i32::MAX;
    let request = Message::get_request(community, request_id, &SYS_DESCR_OID).encode();
    let mut buf = vec![0u8; 65_535];

    let attempts = retries + 1;
    for attempt in 1..=attempts {
        socket.send(&request).await?;
        let deadline = Instant::now() + timeout;

        loop {
            let n = match tokio::time::timeout_at(deadline, socket.recv(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => {
                    debug!(host, port, attempt, "SNMP request timed out.");
                    break;
                }
            };
            match Message::decode(&buf[..n]) {
                Ok(response)
                    if response.pdu_tag == TAG_RESPONSE && response.request_id == request_id =>
                {
                    return interpret(response);
                }
                Ok(other) => {
                    debug!(
                        host,
                        request_id = other.request_id,
                        "Ignoring unrelated SNMP datagram."
                    );
                }
                Err(e) => debug!(host, error = %e, "Ignoring undecodable SNMP datagram."),
            }
        }
    }
    Err(SnmpError::Timeout(attempts))
}
