//! A roomdrop peer session.
//!
//! A session is either the sender, which mints a room code and waits for
//! one peer, or the receiver, which joins a room code. The connection
//! lifecycle lives in the pure [`machine::SessionMachine`]; the
//! [`driver::SessionHandle`] runs it against a channel provider and wires
//! in the send pipeline and the receive assembler.

pub mod driver;
pub mod error;
pub mod fingerprint;
pub mod machine;
pub mod types;

pub use driver::SessionHandle;
pub use error::SessionError;
pub use fingerprint::Fingerprint;
pub use machine::SessionMachine;
pub use types::{
    Activity, Effect, Failure, Notice, Role, SessionEvent, SessionSnapshot, SessionState,
    StatusLabel,
};
