//! Per-connection request/response loop.
//!
//! A connection moves through three states:
//!
//! ```text
//! Configuring --> Serving --> Closing
//! ```
//!
//! While serving it reads one frame, dispatches the command, writes one
//! frame back, and repeats. Any framing or transport failure ends the
//! connection; there is no attempt to resynchronize on the next frame.

use crate::bridge::{error_response, Dispatcher};
use crate::config::SocketConfig;
use crate::protocol::{write_frame, CommandMessage, FrameCodec, FrameError};
use socket2::SockRef;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use tracing::{debug, trace, warn};

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accepted, socket options not yet applied.
    Configuring,
    /// In the request/response loop.
    Serving,
    /// Done; the socket is being or has been closed.
    Closing,
}

/// Why a connection stopped serving.
#[derive(Debug)]
pub enum CloseReason {
    /// Peer closed cleanly between frames.
    PeerClosed,
    /// Peer sent a frame with a bad length or an unparseable payload.
    Malformed(FrameError),
    /// Read failed or the peer went away mid-frame.
    Transport(FrameError),
    /// Response could not be written.
    WriteFailed(io::Error),
    /// Socket options could not be applied.
    Configure(io::Error),
}

impl CloseReason {
    fn log(&self, peer: &str) {
        match self {
            CloseReason::PeerClosed => {
                trace!(peer, "Connection closed by client");
            }
            CloseReason::Malformed(e) => {
                warn!(peer, error = %e, "Dropping connection after malformed frame");
            }
            CloseReason::Transport(e) => {
                debug!(peer, error = %e, "Connection read failed");
            }
            CloseReason::WriteFailed(e) => {
                debug!(peer, error = %e, "Failed to write response");
            }
            CloseReason::Configure(e) => {
                warn!(peer, error = %e, "Failed to configure socket");
            }
        }
    }
}

/// A single client connection.
pub struct Connection<S> {
    stream: S,
    peer: String,
    state: ConnState,
    requests: u64,
    closed: bool,
}

impl<S: Read + Write> Connection<S> {
    /// Wrap an accepted stream. `peer` is only used for logging.
    pub fn new(stream: S, peer: impl ToString) -> Self {
        Self {
            stream,
            peer: peer.to_string(),
            state: ConnState::Configuring,
            requests: 0,
            closed: false,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Number of requests answered so far.
    pub fn requests_served(&self) -> u64 {
        self.requests
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Serve requests until the peer leaves or something goes wrong.
    ///
    /// Responses are written in the order requests were read; the next
    /// frame is not read until the previous response is on the wire.
    pub fn serve(&mut self, codec: &FrameCodec, dispatcher: &dyn Dispatcher) -> CloseReason {
        self.state = ConnState::Serving;
        let reason = loop {
            if let Err(reason) = self.serve_one(codec, dispatcher) {
                break reason;
            }
        };
        self.state = ConnState::Closing;
        reason.log(&self.peer);
        reason
    }

    fn serve_one(&mut self, codec: &FrameCodec, dispatcher: &dyn Dispatcher) -> Result<(), CloseReason> {
        let document = codec.decode(&mut self.stream).map_err(|e| {
            if e.is_clean_close() {
                CloseReason::PeerClosed
            } else if e.is_malformed() {
                CloseReason::Malformed(e)
            } else {
                CloseReason::Transport(e)
            }
        })?;

        let response = match CommandMessage::from_document(document) {
            Ok(message) => {
                trace!(peer = %self.peer, command = %message.command, "Processing command");
                dispatcher.execute(&message.command, message.params)
            }
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "Rejecting message");
                error_response(e.to_string())
            }
        };

        let payload = response.to_string();
        write_frame(&mut self.stream, payload.as_bytes()).map_err(CloseReason::WriteFailed)?;

        self.requests += 1;
        Ok(())
    }
}

impl Connection<TcpStream> {
    /// Apply blocking mode, no-delay and buffer sizes to the socket.
    pub fn configure(&mut self, options: &SocketConfig) -> io::Result<()> {
        let socket = SockRef::from(&self.stream);
        socket.set_nonblocking(false)?;
        socket.set_nodelay(options.nodelay)?;
        socket.set_send_buffer_size(options.send_buffer_bytes)?;
        socket.set_recv_buffer_size(options.recv_buffer_bytes)?;
        Ok(())
    }

    /// Shut the socket down. Safe to call more than once.
    pub fn close(&mut self) {
        self.state = ConnState::Closing;
        if self.closed {
            return;
        }
        self.closed = true;
        // The peer may already be gone.
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    /// Configure, serve to completion, close.
    pub fn run(
        mut self,
        codec: &FrameCodec,
        options: &SocketConfig,
        dispatcher: &dyn Dispatcher,
    ) -> CloseReason {
        let reason = match self.configure(options) {
            Ok(()) => self.serve(codec, dispatcher),
            Err(e) => {
                self.state = ConnState::Closing;
                let reason = CloseReason::Configure(e);
                reason.log(&self.peer);
                reason
            }
        };
        self.close();

        debug!(peer = %self.peer, requests = self.requests, "Connection closed");
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_frame, read_frame, Decoding, Document, MAX_FRAME_BYTES};
    use serde_json::{json, Value};
    use std::io::Cursor;
    use std::net::TcpListener;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    /// In-memory duplex stream: reads from a script, collects writes.
    struct MockStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
        fail_writes: bool,
    }

    impl MockStream {
        fn new(input: Vec<u8>) -> Self {
            Self {
                input: Cursor::new(input),
                output: Vec::new(),
                fail_writes: false,
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
            }
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn frames(payloads: &[&[u8]]) -> Vec<u8> {
        payloads
            .iter()
            .flat_map(|p| encode_frame(p).unwrap().to_vec())
            .collect()
    }

    fn responses(output: &[u8]) -> Vec<Value> {
        let mut cursor = Cursor::new(output);
        let mut out = Vec::new();
        while (cursor.position() as usize) < output.len() {
            let payload = read_frame(&mut cursor, usize::MAX).unwrap();
            out.push(serde_json::from_slice(&payload).unwrap());
        }
        out
    }

    fn ok_dispatcher(_command: &str, _params: Document) -> Value {
        json!({"ok": true})
    }

    fn serve(input: Vec<u8>, dispatcher: &dyn Dispatcher) -> (CloseReason, Connection<MockStream>) {
        let mut conn = Connection::new(MockStream::new(input), "test");
        let reason = conn.serve(&FrameCodec::default(), dispatcher);
        (reason, conn)
    }

    #[test]
    fn test_single_request() {
        let request = br#"{"command":"ping","params":{}}"#;
        let (reason, conn) = serve(frames(&[request]), &ok_dispatcher);

        assert!(matches!(reason, CloseReason::PeerClosed));
        assert_eq!(conn.state(), ConnState::Closing);
        assert_eq!(conn.requests_served(), 1);

        let output = conn.into_inner().output;
        assert_eq!(&output[..4], &[11, 0, 0, 0]);
        assert_eq!(&output[4..], br#"{"ok":true}"#);
    }

    #[test]
    fn test_zero_length_frame_gets_no_response() {
        let mut input = 0u32.to_le_bytes().to_vec();
        input.extend_from_slice(br#"{"command":"ping"}"#);
        let (reason, conn) = serve(input, &ok_dispatcher);

        assert!(matches!(
            reason,
            CloseReason::Malformed(FrameError::InvalidLength { length: 0, .. })
        ));
        assert!(conn.into_inner().output.is_empty());
    }

    #[test]
    fn test_oversized_frame_gets_no_response() {
        let input = ((MAX_FRAME_BYTES + 1) as u32).to_le_bytes().to_vec();
        let (reason, conn) = serve(input, &ok_dispatcher);
        assert!(matches!(reason, CloseReason::Malformed(_)));
        assert!(conn.into_inner().output.is_empty());
    }

    #[test]
    fn test_responses_follow_request_order() {
        let dispatcher = |command: &str, _params: Document| {
            if command == "slow" {
                thread::sleep(Duration::from_millis(50));
            }
            json!({ "done": command })
        };
        let input = frames(&[
            br#"{"command":"slow"}"#,
            br#"{"command":"fast"}"#,
            br#"{"command":"fast2"}"#,
        ]);
        let (reason, conn) = serve(input, &dispatcher);

        assert!(matches!(reason, CloseReason::PeerClosed));
        assert_eq!(
            responses(&conn.into_inner().output),
            vec![
                json!({"done": "slow"}),
                json!({"done": "fast"}),
                json!({"done": "fast2"}),
            ]
        );
    }

    #[test]
    fn test_command_error_keeps_connection() {
        let dispatcher = |command: &str, _params: Document| {
            if command == "fail" {
                error_response("widget not found")
            } else {
                json!({"success": true})
            }
        };
        let input = frames(&[br#"{"command":"fail"}"#, br#"{"command":"ping"}"#]);
        let (reason, conn) = serve(input, &dispatcher);

        assert!(matches!(reason, CloseReason::PeerClosed));
        assert_eq!(conn.requests_served(), 2);
        assert_eq!(
            responses(&conn.into_inner().output),
            vec![
                json!({"success": false, "error": "widget not found"}),
                json!({"success": true}),
            ]
        );
    }

    #[test]
    fn test_missing_command_answered_with_error() {
        let input = frames(&[br#"{"params":{}}"#, br#"{"type":"ping"}"#]);
        let (_, conn) = serve(input, &ok_dispatcher);
        assert_eq!(
            responses(&conn.into_inner().output),
            vec![
                json!({"success": false, "error": "message has no 'command' field"}),
                json!({"ok": true}),
            ]
        );
    }

    #[test]
    fn test_parse_error_ends_connection() {
        let calls = Mutex::new(Vec::new());
        let dispatcher = move |command: &str, _params: Document| {
            calls.lock().unwrap().push(command.to_string());
            json!({})
        };
        let input = frames(&[br#"{"command":"a"#, br#"{"command":"b"}"#]);
        let (reason, conn) = serve(input, &dispatcher);

        assert!(matches!(reason, CloseReason::Malformed(FrameError::Parse { .. })));
        assert_eq!(conn.requests_served(), 0);
        assert!(conn.into_inner().output.is_empty());
    }

    #[test]
    fn test_recovered_payload_is_served() {
        let input = frames(&[b"{\"command\":\"ping\",\"params\":{}}\0\0junk"]);
        let (reason, conn) = serve(input, &ok_dispatcher);
        assert!(matches!(reason, CloseReason::PeerClosed));
        assert_eq!(conn.requests_served(), 1);
    }

    #[test]
    fn test_strict_codec_drops_padded_payload() {
        let input = frames(&[b"{\"command\":\"ping\"}junk"]);
        let mut conn = Connection::new(MockStream::new(input), "test");
        let codec = FrameCodec {
            decoding: Decoding::Strict,
            ..FrameCodec::default()
        };
        let reason = conn.serve(&codec, &ok_dispatcher);
        assert!(matches!(reason, CloseReason::Malformed(_)));
    }

    #[test]
    fn test_truncated_payload_is_transport_error() {
        let mut input = 50u32.to_le_bytes().to_vec();
        input.extend_from_slice(br#"{"command":"#);
        let (reason, conn) = serve(input, &ok_dispatcher);
        assert!(matches!(reason, CloseReason::Transport(FrameError::ShortRead { .. })));
        assert!(conn.into_inner().output.is_empty());
    }

    #[test]
    fn test_write_failure_closes() {
        let mut stream = MockStream::new(frames(&[br#"{"command":"ping"}"#]));
        stream.fail_writes = true;
        let mut conn = Connection::new(stream, "test");
        let reason = conn.serve(&FrameCodec::default(), &ok_dispatcher);
        assert!(matches!(reason, CloseReason::WriteFailed(_)));
        assert_eq!(conn.state(), ConnState::Closing);
    }

    #[test]
    fn test_configure_and_close_tcp_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = std::net::TcpStream::connect(addr).unwrap();
        let (stream, peer) = listener.accept().unwrap();

        let mut conn = Connection::new(stream, peer);
        assert_eq!(conn.state(), ConnState::Configuring);
        conn.configure(&SocketConfig::default()).unwrap();
        assert!(SockRef::from(&conn.stream).nodelay().unwrap());

        conn.close();
        conn.close();
        assert_eq!(conn.state(), ConnState::Closing);
    }

    #[test]
    fn test_run_logs_and_reports_close_reason() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (stream, peer) = listener.accept().unwrap();
        drop(client);

        let reason = Connection::new(stream, peer).run(
            &FrameCodec::default(),
            &SocketConfig::default(),
            &ok_dispatcher,
        );
        assert!(matches!(reason, CloseReason::PeerClosed));

        for reason in [
            CloseReason::PeerClosed,
            CloseReason::Malformed(FrameError::InvalidLength { length: 0, max: MAX_FRAME_BYTES }),
            CloseReason::Transport(FrameError::Io(io::ErrorKind::ConnectionReset.into())),
            CloseReason::WriteFailed(io::ErrorKind::BrokenPipe.into()),
            CloseReason::Configure(io::ErrorKind::InvalidInput.into()),
        ] {
            reason.log("test");
        }
    }
}
