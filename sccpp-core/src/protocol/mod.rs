//! Protocol definitions for the mirroring connection.
//!
//! The connection has two phases: a one-shot [`handshake`] followed by a
//! continuous run of access-unit frames (see [`crate::codec`]).

pub mod handshake;

pub use handshake::{
    DESCRIPTOR_TERMINATOR, MAGIC, MAGIC_LEN, MAX_DESCRIPTOR_WIRE_LEN, perform_handshake,
    read_magic, request_descriptor, write_descriptor,
};
