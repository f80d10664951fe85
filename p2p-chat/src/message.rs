//! Wire format for chat payloads.
//!
//! There is no framing: a message is whatever bytes arrive in one read.
//! Chat lines travel as `name: text`, and a voluntary exit is the bare
//! [`EXIT_TOKEN`]. A user typing the token verbatim is indistinguishable
//! from an intentional exit.
//!
//! A read may stop in the middle of a multi-byte character; [`PayloadDecoder`]
//! holds those trailing bytes back until the rest arrives.

/// Reserved control marker sent, unprefixed, when a peer leaves.
pub const EXIT_TOKEN: &str = "USER_EXIT";

/// Input line that makes the local user leave the session.
pub const EXIT_COMMAND: &str = "exit()";

/// Upper bound for a single receive call.
pub const RECV_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMessage {
    /// Display-ready text, already carrying the sender prefix.
    Text(String),
    /// The partner left on purpose.
    Exit,
}

impl ChatMessage {
    /// Builds the outgoing message for one line of local input.
    pub fn from_input(local_name: &str, line: &str) -> Self {
        if line.trim() == EXIT_COMMAND {
            ChatMessage::Exit
        } else {
            ChatMessage::Text(format!("{local_name}: {line}"))
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            ChatMessage::Text(text) => text.as_bytes().to_vec(),
            ChatMessage::Exit => EXIT_TOKEN.as_bytes().to_vec(),
        }
    }

    /// Interprets the bytes of one receive call.
    pub fn decode(payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload);
        if text == EXIT_TOKEN {
            ChatMessage::Exit
        } else {
            ChatMessage::Text(text.into_owned())
        }
    }
}

/// Decodes successive receive calls without splitting UTF-8 characters.
#[derive(Debug, Default)]
pub struct PayloadDecoder {
    pending: Vec<u8>,
}

impl PayloadDecoder {
    /// Returns `None` while the buffered bytes end inside a character.
    pub fn decode(&mut self, chunk: &[u8]) -> Option<ChatMessage> {
        self.pending.extend_from_slice(chunk);
        let complete = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            // Truncated character at the end: keep it for the next read.
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            // Genuinely invalid bytes are decoded lossily.
            Err(_) => self.pending.len(),
        };
        if complete == 0 {
            return None;
        }

        let rest = self.pending.split_off(complete);
        let payload = std::mem::replace(&mut self.pending, rest);
        Some(ChatMessage::decode(&payload))
    }
}
