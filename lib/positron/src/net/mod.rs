//! Non-blocking TCP plumbing shared by both directors.

pub mod buffer;
pub mod channel;
pub mod support;
