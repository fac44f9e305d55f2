#![no_std]

pub mod backend;
pub mod command;
pub mod session;

pub use backend::{EntryName, OpenMode, StorageBackend, ENTRY_NAME_MAX};
pub use command::Command;
pub use session::{BusEvent, BusReply, Direction, Indicator, Session, FILLER};

/// Filename buffer bound, terminator included.
pub const NAME_MAX: usize = 32;
