//! Full-duplex chat over an established connection.
//!
//! The send loop and the receive loop run as separate tasks and only share
//! the connection. Each loop watches for its own termination conditions:
//!
//! - the send loop stops on `exit()`, end of input, or a failed write;
//! - the receive loop stops when the partner exits, closes the connection,
//!   a read fails, or the local user leaves.
//!
//! A loop that stops never cancels the other one. In particular, when the
//! partner leaves first the send loop stays blocked on input until the user
//! types another line or input ends.

use std::io;

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    select,
    sync::watch,
};
use tracing::{debug, info, warn};

use crate::{
    message::{ChatMessage, PayloadDecoder, RECV_BUFFER_SIZE},
    terminal::{Console, LineInput},
};

pub const LOCAL_EXIT_NOTICE: &str = "You have exited the chat.";
pub const PARTNER_EXIT_NOTICE: &str = "The partner has exited the chat. They are offline.";
pub const PEER_CLOSED_NOTICE: &str = "Connection closed by the partner.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The user typed `exit()`.
    LocalExit,
    /// Input ended; handled like `exit()`.
    InputClosed,
    InputFailed,
    WriteFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    PartnerExited,
    PeerClosed,
    /// The local user left and closed the connection.
    LocalExit,
    ReadFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub send: SendOutcome,
    pub receive: ReceiveOutcome,
}

/// Runs both loops over `stream` and returns once both have finished.
pub async fn run<S, R, W>(
    stream: S,
    local_name: String,
    input: LineInput<R>,
    console: Console<W>,
) -> Result<SessionReport>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let (closed_tx, closed_rx) = watch::channel(false);

    let sender = tokio::spawn(send_loop(
        writer,
        local_name,
        input,
        console.clone(),
        closed_tx,
    ));
    let receiver = tokio::spawn(receive_loop(reader, console, closed_rx));

    let (send, receive) = tokio::join!(sender, receiver);
    let report = SessionReport {
        send: send.context("send loop panicked")?,
        receive: receive.context("receive loop panicked")?,
    };
    info!(?report, "chat session ended");
    Ok(report)
}

async fn send_loop<S, R, W>(
    mut writer: WriteHalf<S>,
    local_name: String,
    mut input: LineInput<R>,
    console: Console<W>,
    closed: watch::Sender<bool>,
) -> SendOutcome
where
    S: AsyncWrite,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let line = match input.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("input ended; leaving chat");
                return leave(&mut writer, &console, &closed, SendOutcome::InputClosed).await;
            }
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                // The offending line was consumed; keep reading.
                show(&console, &format!("Error reading input: {err}")).await;
                continue;
            }
            Err(err) => {
                warn!(error = ?err, "failed to read input");
                show(&console, &format!("Error reading input: {err}")).await;
                return leave(&mut writer, &console, &closed, SendOutcome::InputFailed).await;
            }
        };

        match ChatMessage::from_input(&local_name, &line) {
            ChatMessage::Exit => {
                return leave(&mut writer, &console, &closed, SendOutcome::LocalExit).await;
            }
            message => {
                if let Err(err) = transmit(&mut writer, &message).await {
                    show(&console, &format!("Error sending message: {err}")).await;
                    return SendOutcome::WriteFailed;
                }
            }
        }
    }
}

/// Tells the partner we are leaving, then closes our side of the connection.
async fn leave<S, W>(
    writer: &mut WriteHalf<S>,
    console: &Console<W>,
    closed: &watch::Sender<bool>,
    outcome: SendOutcome,
) -> SendOutcome
where
    S: AsyncWrite,
    W: AsyncWrite + Unpin + Send,
{
    if let Err(err) = transmit(writer, &ChatMessage::Exit).await {
        show(console, &format!("Error sending exit message: {err}")).await;
    }
    show(console, LOCAL_EXIT_NOTICE).await;

    if let Err(err) = writer.shutdown().await {
        debug!(error = ?err, "connection already closed");
    }
    closed.send_replace(true);
    outcome
}

async fn transmit<S>(writer: &mut WriteHalf<S>, message: &ChatMessage) -> io::Result<()>
where
    S: AsyncWrite,
{
    writer.write_all(&message.encode()).await?;
    writer.flush().await
}

async fn receive_loop<S, W>(
    mut reader: ReadHalf<S>,
    console: Console<W>,
    closed: watch::Receiver<bool>,
) -> ReceiveOutcome
where
    S: AsyncRead,
    W: AsyncWrite + Unpin + Send,
{
    let local_exit = local_exit(closed);
    tokio::pin!(local_exit);
    let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
    let mut decoder = PayloadDecoder::default();

    loop {
        let read = select! {
            _ = &mut local_exit => return ReceiveOutcome::LocalExit,
            read = reader.read(&mut buffer) => read,
        };

        match read {
            Ok(0) => {
                show(&console, PEER_CLOSED_NOTICE).await;
                return ReceiveOutcome::PeerClosed;
            }
            Ok(len) => match decoder.decode(&buffer[..len]) {
                Some(ChatMessage::Exit) => {
                    show(&console, PARTNER_EXIT_NOTICE).await;
                    return ReceiveOutcome::PartnerExited;
                }
                Some(ChatMessage::Text(text)) => show(&console, &text).await,
                // Only part of a multi-byte character so far.
                None => {}
            },
            Err(err) => {
                show(&console, &format!("Error receiving message: {err}")).await;
                return ReceiveOutcome::ReadFailed;
            }
        }
    }
}

/// Resolves when the send loop reports a local exit.
async fn local_exit(mut closed: watch::Receiver<bool>) {
    // A send loop that ended any other way drops the sender without setting the flag.
    if closed.wait_for(|closed| *closed).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn show<W>(console: &Console<W>, text: &str)
where
    W: AsyncWrite + Unpin + Send,
{
    if let Err(err) = console.line(text).await {
        warn!(error = ?err, "failed to write to console");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        pin::Pin,
        task::{Context as TaskContext, Poll},
        time::Duration,
    };

    use tokio::{
        io::{BufReader, DuplexStream, ReadBuf},
        time::timeout,
    };

    use super::*;

    const WAIT: Duration = Duration::from_secs(2);

    type Output = LineInput<BufReader<DuplexStream>>;

    fn console() -> (Console<DuplexStream>, Output) {
        let (writer, reader) = tokio::io::duplex(64 * 1024);
        (Console::new(writer), LineInput::new(BufReader::new(reader)))
    }

    fn keyboard() -> (DuplexStream, LineInput<BufReader<DuplexStream>>) {
        let (typing, input) = tokio::io::duplex(1024);
        (typing, LineInput::new(BufReader::new(input)))
    }

    async fn next_output(output: &mut Output) -> String {
        timeout(WAIT, output.next_line())
            .await
            .expect("console output in time")
            .expect("console read")
            .expect("console still open")
    }

    async fn read_payload(peer: &mut DuplexStream) -> String {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        let len = timeout(WAIT, peer.read(&mut buffer))
            .await
            .expect("payload in time")
            .expect("payload read");
        String::from_utf8_lossy(&buffer[..len]).into_owned()
    }

    async fn type_line(typing: &mut DuplexStream, line: &str) {
        typing.write_all(format!("{line}\n").as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn messages_flow_in_both_directions() {
        let (local, mut peer) = tokio::io::duplex(4096);
        let (mut typing, input) = keyboard();
        let (console, mut output) = console();
        let session = tokio::spawn(run(local, "Alice".into(), input, console));

        type_line(&mut typing, "hi").await;
        assert_eq!(read_payload(&mut peer).await, "Alice: hi");

        peer.write_all(b"Bob: hello").await.unwrap();
        assert_eq!(next_output(&mut output).await, "Bob: hello");

        type_line(&mut typing, "exit()").await;
        assert_eq!(read_payload(&mut peer).await, "USER_EXIT");
        assert_eq!(next_output(&mut output).await, LOCAL_EXIT_NOTICE);

        let report = timeout(WAIT, session).await.unwrap().unwrap().unwrap();
        assert_eq!(
            report,
            SessionReport {
                send: SendOutcome::LocalExit,
                receive: ReceiveOutcome::LocalExit,
            }
        );

        // Our side was shut down, so the partner sees end of stream.
        let mut buffer = [0u8; 16];
        assert_eq!(peer.read(&mut buffer).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn exit_token_is_not_displayed_as_chat() {
        let (local, mut peer) = tokio::io::duplex(4096);
        let (typing, input) = keyboard();
        let (console, mut output) = console();
        let session = tokio::spawn(run(local, "Alice".into(), input, console));

        peer.write_all(b"USER_EXIT").await.unwrap();
        assert_eq!(next_output(&mut output).await, PARTNER_EXIT_NOTICE);

        // The send loop is still waiting on input until it ends.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!session.is_finished());
        drop(typing);

        assert_eq!(next_output(&mut output).await, LOCAL_EXIT_NOTICE);
        let report = timeout(WAIT, session).await.unwrap().unwrap().unwrap();
        assert_eq!(report.send, SendOutcome::InputClosed);
        assert_eq!(report.receive, ReceiveOutcome::PartnerExited);
    }

    #[tokio::test]
    async fn peer_disconnect_is_reported() {
        let (local, peer) = tokio::io::duplex(4096);
        let (typing, input) = keyboard();
        let (console, mut output) = console();
        let session = tokio::spawn(run(local, "Alice".into(), input, console));

        drop(peer);
        assert_eq!(next_output(&mut output).await, PEER_CLOSED_NOTICE);

        drop(typing);
        let exit_error = next_output(&mut output).await;
        assert!(
            exit_error.starts_with("Error sending exit message:"),
            "unexpected output: {exit_error}"
        );
        assert_eq!(next_output(&mut output).await, LOCAL_EXIT_NOTICE);

        let report = timeout(WAIT, session).await.unwrap().unwrap().unwrap();
        assert_eq!(report.receive, ReceiveOutcome::PeerClosed);
    }

    #[tokio::test]
    async fn invalid_input_line_is_reported_and_skipped() {
        let (local, mut peer) = tokio::io::duplex(4096);
        let (mut typing, input) = keyboard();
        let (console, mut output) = console();
        let session = tokio::spawn(run(local, "Alice".into(), input, console));

        typing.write_all(b"caf\xe9\n").await.unwrap();
        let error = next_output(&mut output).await;
        assert!(
            error.starts_with("Error reading input:"),
            "unexpected output: {error}"
        );

        type_line(&mut typing, "hello").await;
        assert_eq!(read_payload(&mut peer).await, "Alice: hello");

        type_line(&mut typing, "exit()").await;
        assert_eq!(read_payload(&mut peer).await, "USER_EXIT");
        let report = timeout(WAIT, session).await.unwrap().unwrap().unwrap();
        assert_eq!(report.send, SendOutcome::LocalExit);
    }

    #[tokio::test]
    async fn send_loop_keeps_delivering_after_partner_stops_writing() {
        let (local, mut peer) = tokio::io::duplex(4096);
        let (mut typing, input) = keyboard();
        let (console, mut output) = console();
        let session = tokio::spawn(run(local, "Alice".into(), input, console));

        // Close only the partner's write direction.
        peer.shutdown().await.unwrap();
        assert_eq!(next_output(&mut output).await, PEER_CLOSED_NOTICE);

        type_line(&mut typing, "still here").await;
        assert_eq!(read_payload(&mut peer).await, "Alice: still here");

        drop(typing);
        assert_eq!(read_payload(&mut peer).await, "USER_EXIT");
        let report = timeout(WAIT, session).await.unwrap().unwrap().unwrap();
        assert_eq!(
            report,
            SessionReport {
                send: SendOutcome::InputClosed,
                receive: ReceiveOutcome::PeerClosed,
            }
        );
    }

    #[tokio::test]
    async fn character_split_across_reads_is_not_mangled() {
        let (local, mut peer) = tokio::io::duplex(4096);
        let (typing, input) = keyboard();
        let (console, mut output) = console();
        let session = tokio::spawn(run(local, "Alice".into(), input, console));

        // "é" is 0xC3 0xA9; the first read ends inside it.
        peer.write_all(b"Bob: caf\xc3").await.unwrap();
        assert_eq!(next_output(&mut output).await, "Bob: caf");
        peer.write_all(b"\xa9").await.unwrap();
        assert_eq!(next_output(&mut output).await, "\u{e9}");

        drop(typing);
        drop(peer);
        timeout(WAIT, session).await.unwrap().unwrap().unwrap();
    }

    /// Stream whose reads work but whose writes always fail.
    struct BrokenWrites(DuplexStream);

    impl AsyncRead for BrokenWrites {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut TaskContext<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.0).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for BrokenWrites {
        fn poll_write(
            self: Pin<&mut Self>,
            _: &mut TaskContext<'_>,
            _: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "write side closed")))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn failed_write_leaves_receive_loop_running() {
        let (local, mut peer) = tokio::io::duplex(4096);
        let (mut typing, input) = keyboard();
        let (console, mut output) = console();
        let session = tokio::spawn(run(BrokenWrites(local), "Alice".into(), input, console));

        type_line(&mut typing, "hello").await;
        assert_eq!(
            next_output(&mut output).await,
            "Error sending message: write side closed"
        );

        peer.write_all(b"Bob: still here").await.unwrap();
        assert_eq!(next_output(&mut output).await, "Bob: still here");

        peer.write_all(b"USER_EXIT").await.unwrap();
        assert_eq!(next_output(&mut output).await, PARTNER_EXIT_NOTICE);

        let report = timeout(WAIT, session).await.unwrap().unwrap().unwrap();
        assert_eq!(
            report,
            SessionReport {
                send: SendOutcome::WriteFailed,
                receive: ReceiveOutcome::PartnerExited,
            }
        );
    }
}
