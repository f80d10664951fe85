//! Terminal collaborators: a shared line writer and a line reader.
//!
//! Both are generic over tokio I/O traits so the session and orchestrator
//! can run against stdin/stdout in the binary and in-memory pipes in tests.

use std::{io, sync::Arc};

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout},
    sync::Mutex,
};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Line-oriented output shared by every task that talks to the user.
pub struct Console<W> {
    out: Arc<Mutex<W>>,
}

impl<W> Clone for Console<W> {
    fn clone(&self) -> Self {
        Self {
            out: Arc::clone(&self.out),
        }
    }
}

impl Console<Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> Console<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(out: W) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
        }
    }

    /// Writes `text` followed by a newline.
    pub async fn line(&self, text: &str) -> io::Result<()> {
        // Hold the lock for the whole line so concurrent loops never interleave.
        let mut out = self.out.lock().await;
        out.write_all(text.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await
    }

    /// Writes `text` without a newline, leaving the cursor after it.
    pub async fn prompt(&self, text: &str) -> io::Result<()> {
        let mut out = self.out.lock().await;
        out.write_all(text.as_bytes()).await?;
        out.flush().await
    }
}

/// Reads user input one line at a time.
pub struct LineInput<R> {
    reader: R,
    buffer: String,
}

impl LineInput<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R> LineInput<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: String::new(),
        }
    }

    /// Returns the next line without its terminator, or `None` once input ends.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        self.buffer.clear();
        let bytes = self.reader.read_line(&mut self.buffer).await?;
        if bytes == 0 {
            return Ok(None);
        }
        Ok(Some(
            self.buffer.trim_end_matches(LINE_ENDINGS).to_string(),
        ))
    }
}
