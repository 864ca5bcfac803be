//! One duplex connection between host and module.
//!
//! A [`Transport`] is an ordered stream of [`Frame`]s in each direction. It can
//! live entirely in memory ([`Transport::pair`]) or be carried as
//! newline-delimited JSON over any byte stream ([`Transport::from_io`]), the
//! same way plugins speak JSON-RPC over stdin/stdout.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::jsonrpc::Frame;

#[derive(Debug)]
pub struct Transport {
    pub(crate) outbound: UnboundedSender<Frame>,
    pub(crate) inbound: UnboundedReceiver<Frame>,
}

impl Transport {
    pub fn new(outbound: UnboundedSender<Frame>, inbound: UnboundedReceiver<Frame>) -> Self {
        Self { outbound, inbound }
    }

    /// Two connected in-memory endpoints.
    pub fn pair() -> (Transport, Transport) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (Transport::new(a_tx, a_rx), Transport::new(b_tx, b_rx))
    }

    /// Carry frames as JSON lines over `reader` / `writer`.
    ///
    /// Spawns a reader and a writer task on the current runtime. The inbound
    /// half ends on EOF or a read error; unparseable lines are skipped.
    pub fn from_io<R, W>(reader: R, writer: W) -> Transport
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();

        // ── frames → writer ──────────────────────────────────────────────
        tokio::spawn(async move {
            let mut writer = writer;
            while let Some(frame) = out_rx.recv().await {
                let mut line = match serde_json::to_string(&frame) {
                    Ok(line) => line,
                    Err(err) => {
                        warn!("dropping unserializable frame on `{}`: {err}", frame.channel);
                        continue;
                    }
                };
                line.push('\n');
                if let Err(err) = writer.write_all(line.as_bytes()).await {
                    debug!("transport write failed: {err}");
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        // ── reader → frames ──────────────────────────────────────────────
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Frame>(line) {
                            Ok(frame) => {
                                if in_tx.send(frame).is_err() {
                                    break;
                                }
                            }
                            Err(err) => warn!("skipping malformed frame: {err}"),
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        debug!("transport read failed: {err}");
                        break;
                    }
                }
            }
        });

        Transport::new(out_tx, in_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::{Id, Message, Request};
    use serde_json::json;
    use tokio::io::{AsyncWriteExt, duplex};

    #[tokio::test]
    async fn pair_is_crossed() {
        let (mut a, mut b) = Transport::pair();
        let frame = Frame::request("ch", Request::call(Id::Number(1), "ping", None));
        a.outbound.send(frame.clone()).unwrap();
        assert_eq!(b.inbound.recv().await, Some(frame.clone()));
        b.outbound.send(frame.clone()).unwrap();
        assert_eq!(a.inbound.recv().await, Some(frame));
    }

    #[tokio::test]
    async fn io_transport_carries_frames_both_ways() {
        let (left, right) = duplex(4096);
        let (lr, lw) = tokio::io::split(left);
        let (rr, rw) = tokio::io::split(right);
        let a = Transport::from_io(lr, lw);
        let mut b = Transport::from_io(rr, rw);

        let frame = Frame::request(
            "com.example.flutter_module/channel",
            Request::call(Id::Number(9), "showDialog", Some(json!({"message": "hi"}))),
        );
        a.outbound.send(frame.clone()).unwrap();
        assert_eq!(b.inbound.recv().await, Some(frame));
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped_and_eof_ends_the_stream() {
        let (mut raw, peer) = duplex(4096);
        let (pr, pw) = tokio::io::split(peer);
        let mut t = Transport::from_io(pr, pw);

        let good = Frame::new(
            "ch",
            Message::Request(Request::notification("showMessage", Some(json!("x")))),
        );
        raw.write_all(b"not json\n\n").await.unwrap();
        raw.write_all(serde_json::to_string(&good).unwrap().as_bytes()).await.unwrap();
        raw.write_all(b"\n").await.unwrap();
        raw.flush().await.unwrap();

        assert_eq!(t.inbound.recv().await, Some(good));
        drop(raw);
        assert_eq!(t.inbound.recv().await, None);
    }
}
