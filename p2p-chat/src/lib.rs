//! Serverless two-person chat over TCP.
//!
//! Both peers run the same program. Each one listens on the rendezvous port
//! and dials the partner on that port at the same time; the first
//! connection to appear is kept and the chat runs over it until either
//! side leaves. Each module owns one concern:
//!
//! - [`race`] runs the listener and the dialer against a shared
//!   [`slot::ConnectionSlot`] and yields exactly one connection or a timeout.
//! - [`session`] drives the send and receive loops over that connection.
//! - [`orchestrator`] collects names, consults the saved [`config`], and
//!   ties the race to the session.
//! - [`message`] defines the unframed wire format and the exit token.
//! - [`terminal`] wraps the user's input and output so tests can replace them.
//! - [`cli`] parses the command-line interface.

pub mod cli;
pub mod config;
pub mod message;
pub mod orchestrator;
pub mod race;
pub mod session;
pub mod slot;
pub mod terminal;
