//! RESP parser and encoder
//!
//! The parser is an incremental state machine: bytes are fed in as they
//! arrive, and every completed frame (or protocol error) comes out as a
//! [`Payload`]. The same machine backs the tokio codec used on sockets and the
//! blocking reader used to replay the AOF.

use super::types::{Payload, Reply, RespError};
use bytes::{BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::io::{self, Read};
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, Encoder, FramedRead};

const CRLF: &[u8] = b"\r\n";

/// Upper bound for a single bulk body
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Elements preallocated for a multi bulk header, whatever count it announces
const MAX_PREALLOC_ARGS: usize = 1024;

/// Transient per-stream parser state
#[derive(Debug, Default)]
struct ReadState {
    /// Inside a `*` or `$` frame whose body is still being read
    reading_multi_line: bool,
    expected_args: usize,
    msg_type: u8,
    args: Vec<Option<Bytes>>,
    /// Length of the bulk body expected next, if any
    bulk_len: Option<usize>,
}

impl ReadState {
    fn finished(&self) -> bool {
        self.expected_args > 0 && self.args.len() == self.expected_args
    }
}

/// RESP2 streaming parser
#[derive(Debug, Default)]
pub struct RespParser {
    state: ReadState,
}

impl RespParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a frame has been started but not completed
    pub fn in_progress(&self) -> bool {
        self.state.reading_multi_line || self.state.bulk_len.is_some()
    }

    /// Parse the next payload out of `buf`
    ///
    /// Returns `None` when more bytes are needed. Consumed bytes are removed
    /// from `buf`, partially read frames are kept in the parser state.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Option<Payload> {
        loop {
            if let Some(len) = self.state.bulk_len {
                if buf.len() < len + 2 {
                    return None;
                }
                let body = buf.split_to(len + 2).freeze();
                self.state.bulk_len = None;
                if &body[len..] != CRLF {
                    return Some(self.fail(&body));
                }
                self.state.args.push(Some(body.slice(..len)));
                if self.state.finished() {
                    return Some(Ok(self.complete()));
                }
                continue;
            }

            let line = match take_line(buf) {
                None => return None,
                Some(Ok(line)) => line,
                Some(Err(raw)) => return Some(self.fail(&raw)),
            };

            if !self.state.reading_multi_line {
                if let Some(payload) = self.parse_header(&line) {
                    return Some(payload);
                }
            } else if let Some(payload) = self.parse_body_header(&line) {
                return Some(payload);
            }
        }
    }

    /// First line of a frame. Returns a payload when the frame is a single line.
    fn parse_header(&mut self, line: &[u8]) -> Option<Payload> {
        match line.first() {
            Some(b'*') => {
                let count = match parse_number(&line[1..]) {
                    Some(n) if n >= 0 => n as usize,
                    _ => return Some(self.fail(line)),
                };
                if count == 0 {
                    self.reset();
                    return Some(Ok(Reply::empty_multi_bulk()));
                }
                self.state.reading_multi_line = true;
                self.state.msg_type = b'*';
                self.state.expected_args = count;
                self.state.args = Vec::with_capacity(count.min(MAX_PREALLOC_ARGS));
                None
            }
            Some(b'$') => match parse_number(&line[1..]) {
                Some(-1) => {
                    self.reset();
                    Some(Ok(Reply::null_bulk()))
                }
                Some(n) if n >= 0 && (n as usize) <= MAX_BULK_LEN => {
                    self.state.reading_multi_line = true;
                    self.state.msg_type = b'$';
                    self.state.expected_args = 1;
                    self.state.args = Vec::with_capacity(1);
                    self.state.bulk_len = Some(n as usize);
                    None
                }
                _ => Some(self.fail(line)),
            },
            Some(b'+') => {
                self.reset();
                Some(Ok(Reply::Status(String::from_utf8_lossy(&line[1..]).into_owned())))
            }
            Some(b'-') => {
                self.reset();
                Some(Ok(Reply::Error(String::from_utf8_lossy(&line[1..]).into_owned())))
            }
            Some(b':') => match parse_number(&line[1..]) {
                Some(i) => {
                    self.reset();
                    Some(Ok(Reply::Integer(i)))
                }
                None => Some(self.fail(line)),
            },
            _ => Some(self.fail(line)),
        }
    }

    /// Element header inside a multi bulk frame
    fn parse_body_header(&mut self, line: &[u8]) -> Option<Payload> {
        if line.first() != Some(&b'$') {
            return Some(self.fail(line));
        }
        match parse_number(&line[1..]) {
            Some(-1) => {
                self.state.args.push(None);
                if self.state.finished() {
                    return Some(Ok(self.complete()));
                }
                None
            }
            Some(n) if n >= 0 && (n as usize) <= MAX_BULK_LEN => {
                self.state.bulk_len = Some(n as usize);
                None
            }
            _ => Some(self.fail(line)),
        }
    }

    fn complete(&mut self) -> Reply {
        let state = std::mem::take(&mut self.state);
        if state.msg_type == b'$' {
            Reply::Bulk(state.args.into_iter().next().flatten())
        } else {
            Reply::MultiBulk(state.args)
        }
    }

    fn fail(&mut self, raw: &[u8]) -> Payload {
        self.reset();
        Err(RespError::protocol(raw))
    }

    fn reset(&mut self) {
        self.state = ReadState::default();
    }
}

/// Split one CRLF terminated line off the buffer, without the CRLF
///
/// A line ending in a bare LF is returned as `Err` with its raw bytes.
fn take_line(buf: &mut BytesMut) -> Option<Result<Bytes, Bytes>> {
    let newline = buf.iter().position(|&b| b == b'\n')?;
    let mut line = buf.split_to(newline + 1).freeze();
    if newline == 0 || line[newline - 1] != b'\r' {
        return Some(Err(line));
    }
    line.truncate(newline - 1);
    Some(Ok(line))
}

fn parse_number(digits: &[u8]) -> Option<i64> {
    std::str::from_utf8(digits).ok()?.parse::<i64>().ok()
}

/// RESP2 encoder
pub struct RespEncoder;

impl RespEncoder {
    /// Encode a reply to bytes
    pub fn encode(value: &Reply) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_to(&mut buf, value);
        buf.freeze()
    }

    /// Encode a command line as a multi bulk frame
    pub fn command(args: &[Bytes]) -> Bytes {
        let mut buf = BytesMut::new();
        Self::put_header(&mut buf, b'*', args.len() as i64);
        for arg in args {
            Self::put_bulk(&mut buf, arg);
        }
        buf.freeze()
    }

    /// Encode a reply into an existing buffer
    pub fn encode_to(buf: &mut BytesMut, value: &Reply) {
        match value {
            Reply::Status(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            Reply::Error(e) => {
                buf.put_u8(b'-');
                buf.put_slice(e.as_bytes());
                buf.put_slice(CRLF);
            }
            Reply::Integer(i) => Self::put_header(buf, b':', *i),
            Reply::Bulk(Some(bytes)) if !bytes.is_empty() => Self::put_bulk(buf, bytes),
            Reply::Bulk(_) => buf.put_slice(b"$-1\r\n"),
            Reply::MultiBulk(args) => {
                Self::put_header(buf, b'*', args.len() as i64);
                for arg in args {
                    match arg {
                        Some(bytes) => Self::put_bulk(buf, bytes),
                        None => buf.put_slice(b"$-1\r\n"),
                    }
                }
            }
            Reply::NoReply => {}
        }
    }

    fn put_header(buf: &mut BytesMut, prefix: u8, n: i64) {
        buf.put_u8(prefix);
        buf.put_slice(n.to_string().as_bytes());
        buf.put_slice(CRLF);
    }

    fn put_bulk(buf: &mut BytesMut, bytes: &[u8]) {
        Self::put_header(buf, b'$', bytes.len() as i64);
        buf.put_slice(bytes);
        buf.put_slice(CRLF);
    }
}

/// Tokio codec over [`RespParser`] and [`RespEncoder`]
///
/// Protocol errors are items, not codec errors, so a framed stream keeps
/// going after a malformed frame. Only I/O failures end it.
#[derive(Debug, Default)]
pub struct RespCodec {
    parser: RespParser,
}

impl RespCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for RespCodec {
    type Item = Payload;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Payload>> {
        Ok(self.parser.parse(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<Payload>> {
        if let Some(payload) = self.decode(src)? {
            return Ok(Some(payload));
        }
        if !src.is_empty() || self.parser.in_progress() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream closed in the middle of a frame",
            ));
        }
        Ok(None)
    }
}

impl Encoder<Reply> for RespCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Reply, dst: &mut BytesMut) -> io::Result<()> {
        RespEncoder::encode_to(dst, &item);
        Ok(())
    }
}

/// Decode an async byte stream into payloads
///
/// The stream ends on EOF. A read failure (or EOF inside a frame) is
/// reported once as `Err(RespError::Io)` and nothing follows it.
pub fn parse_stream<R>(reader: R) -> impl Stream<Item = Payload>
where
    R: AsyncRead,
{
    FramedRead::new(reader, RespCodec::new()).map(|item| match item {
        Ok(payload) => payload,
        Err(e) => Err(RespError::Io(e.to_string())),
    })
}

/// Blocking counterpart of [`parse_stream`], used for AOF replay
pub struct PayloadReader<R> {
    reader: R,
    buf: BytesMut,
    codec: RespCodec,
    done: bool,
}

impl<R: Read> PayloadReader<R> {
    pub fn new(reader: R) -> Self {
        PayloadReader {
            reader,
            buf: BytesMut::with_capacity(8192),
            codec: RespCodec::new(),
            done: false,
        }
    }
}

impl<R: Read> Iterator for PayloadReader<R> {
    type Item = Payload;

    fn next(&mut self) -> Option<Payload> {
        let mut chunk = [0u8; 8192];
        loop {
            if self.done {
                return None;
            }
            if let Ok(Some(payload)) = self.codec.decode(&mut self.buf) {
                return Some(payload);
            }
            match self.reader.read(&mut chunk) {
                Ok(0) => {
                    self.done = true;
                    return match self.codec.decode_eof(&mut self.buf) {
                        Ok(payload) => payload,
                        Err(e) => Some(Err(RespError::Io(e.to_string()))),
                    };
                }
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(RespError::Io(e.to_string())));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Vec<Payload> {
        let mut parser = RespParser::new();
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(payload) = parser.parse(&mut buf) {
            out.push(payload);
        }
        out
    }

    fn parse_one(input: &[u8]) -> Reply {
        let mut out = parse_all(input);
        assert_eq!(out.len(), 1, "expected exactly one payload");
        out.remove(0).unwrap()
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_one(b"+OK\r\n"), Reply::status("OK"));
    }

    #[test]
    fn test_parse_error() {
        assert_eq!(parse_one(b"-Error message\r\n"), Reply::error("Error message"));
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_one(b":1000\r\n"), Reply::integer(1000));
        assert_eq!(parse_one(b":-42\r\n"), Reply::integer(-42));
    }

    #[test]
    fn test_parse_bulk() {
        assert_eq!(parse_one(b"$6\r\nfoobar\r\n"), Reply::bulk("foobar"));
    }

    #[test]
    fn test_parse_null_bulk() {
        assert_eq!(parse_one(b"$-1\r\n"), Reply::null_bulk());
    }

    #[test]
    fn test_parse_multi_bulk() {
        assert_eq!(
            parse_one(b"*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n"),
            Reply::multi_bulk(vec![Bytes::from("foo"), Bytes::from("bar")])
        );
    }

    #[test]
    fn test_parse_multi_bulk_with_null_and_empty_elements() {
        assert_eq!(
            parse_one(b"*3\r\n$-1\r\n$0\r\n\r\n$1\r\nx\r\n"),
            Reply::MultiBulk(vec![None, Some(Bytes::new()), Some(Bytes::from("x"))])
        );
    }

    #[test]
    fn test_parse_empty_multi_bulk() {
        assert_eq!(parse_one(b"*0\r\n"), Reply::empty_multi_bulk());
    }

    #[test]
    fn test_bulk_is_binary_safe() {
        let reply = parse_one(b"$4\r\na\r\nb\r\n");
        assert_eq!(reply, Reply::bulk(Bytes::from_static(b"a\r\nb")));
    }

    #[test]
    fn test_partial_input_waits_for_more() {
        let mut parser = RespParser::new();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nfo"[..]);
        assert!(parser.parse(&mut buf).is_none());
        assert!(parser.in_progress());

        buf.extend_from_slice(b"o\r\n$3\r\nbar\r\n");
        let reply = parser.parse(&mut buf).unwrap().unwrap();
        assert_eq!(reply, Reply::multi_bulk(vec![Bytes::from("foo"), Bytes::from("bar")]));
        assert!(buf.is_empty());
        assert!(!parser.in_progress());
    }

    #[test]
    fn test_pipelined_frames() {
        let out = parse_all(b"+OK\r\n:1\r\n*1\r\n$4\r\nPING\r\n");
        assert_eq!(out.len(), 3);
        assert_eq!(out[2], Ok(Reply::multi_bulk(vec![Bytes::from("PING")])));
    }

    #[test]
    fn test_protocol_error_resets_state() {
        let out = parse_all(b"*x\r\n*1\r\n$4\r\nPING\r\n");
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Err(RespError::Protocol(_))));
        assert_eq!(out[1], Ok(Reply::multi_bulk(vec![Bytes::from("PING")])));
    }

    #[test]
    fn test_negative_count_is_protocol_error() {
        let out = parse_all(b"*-3\r\n+OK\r\n");
        assert!(matches!(out[0], Err(RespError::Protocol(_))));
        assert_eq!(out[1], Ok(Reply::ok()));
    }

    #[test]
    fn test_bad_body_terminator_is_protocol_error() {
        let out = parse_all(b"$3\r\nfooXX:7\r\n");
        assert!(matches!(out[0], Err(RespError::Protocol(_))));
        assert_eq!(out[1], Ok(Reply::integer(7)));
    }

    #[test]
    fn test_bare_newline_is_protocol_error() {
        let out = parse_all(b"+OK\n+PONG\r\n");
        assert!(matches!(out[0], Err(RespError::Protocol(_))));
        assert_eq!(out[1], Ok(Reply::pong()));
    }

    #[test]
    fn test_encode_status() {
        assert_eq!(RespEncoder::encode(&Reply::ok()), Bytes::from("+OK\r\n"));
    }

    #[test]
    fn test_encode_bulk() {
        assert_eq!(RespEncoder::encode(&Reply::bulk("foobar")), Bytes::from("$6\r\nfoobar\r\n"));
    }

    #[test]
    fn test_encode_empty_bulk_as_null() {
        assert_eq!(RespEncoder::encode(&Reply::bulk(Bytes::new())), Bytes::from("$-1\r\n"));
        assert_eq!(RespEncoder::encode(&Reply::null_bulk()), Bytes::from("$-1\r\n"));
    }

    #[test]
    fn test_encode_multi_bulk_with_nil() {
        let reply = Reply::MultiBulk(vec![Some(Bytes::from("a")), None]);
        assert_eq!(RespEncoder::encode(&reply), Bytes::from("*2\r\n$1\r\na\r\n$-1\r\n"));
    }

    #[test]
    fn test_encode_no_reply_is_empty() {
        assert!(RespEncoder::encode(&Reply::NoReply).is_empty());
    }

    #[test]
    fn test_command_framing() {
        let frame = RespEncoder::command(&[Bytes::from("SELECT"), Bytes::from("2")]);
        assert_eq!(frame, Bytes::from("*2\r\n$6\r\nSELECT\r\n$1\r\n2\r\n"));
    }

    #[test]
    fn test_round_trip() {
        let replies = vec![
            Reply::ok(),
            Reply::error("ERR boom"),
            Reply::integer(0),
            Reply::integer(-1),
            Reply::integer(i64::MAX),
            Reply::integer(i64::MIN),
            Reply::bulk("value"),
            Reply::bulk(Bytes::from_static(b"\x00\r\n\xff")),
            Reply::null_bulk(),
            Reply::empty_multi_bulk(),
            Reply::MultiBulk(vec![Some(Bytes::from("set")), None, Some(Bytes::new())]),
        ];
        for reply in replies {
            let encoded = RespEncoder::encode(&reply);
            assert_eq!(parse_one(&encoded), reply, "round trip of {}", reply);
        }
    }

    #[test]
    fn test_payload_reader_reads_to_end() {
        let data: &[u8] = b"*1\r\n$4\r\nPING\r\n*x\r\n+OK\r\n";
        let out: Vec<Payload> = PayloadReader::new(data).collect();
        assert_eq!(out.len(), 3);
        assert!(out[0].is_ok());
        assert!(matches!(out[1], Err(RespError::Protocol(_))));
        assert_eq!(out[2], Ok(Reply::ok()));
    }

    #[test]
    fn test_payload_reader_truncated_frame_is_io_error() {
        let data: &[u8] = b"+OK\r\n*2\r\n$3\r\nfoo\r\n";
        let out: Vec<Payload> = PayloadReader::new(data).collect();
        assert_eq!(out.len(), 2);
        assert!(matches!(out[1], Err(RespError::Io(_))));
    }

    #[tokio::test]
    async fn test_parse_stream_across_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"*1\r\n$4\r\nPI")
            .read(b"NG\r\n+OK\r\n")
            .build();
        let out: Vec<Payload> = parse_stream(mock).collect().await;
        assert_eq!(
            out,
            vec![Ok(Reply::multi_bulk(vec![Bytes::from("PING")])), Ok(Reply::ok())]
        );
    }

    #[tokio::test]
    async fn test_parse_stream_io_error_is_terminal() {
        let mock = tokio_test::io::Builder::new()
            .read(b":1\r\n")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let out: Vec<Payload> = parse_stream(mock).collect().await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Ok(Reply::integer(1)));
        assert!(matches!(out[1], Err(RespError::Io(_))));
    }
}
