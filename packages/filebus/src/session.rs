use crate::backend::{EntryName, StorageBackend};
use crate::command::Command;
use crate::NAME_MAX;

/// Idle filler served when a read request has nothing meaningful to answer.
pub const FILLER: u8 = 0xFF;

/// Transfer direction from the host's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Write,
    Read,
}

/// The closed set of phase transitions the bus engine reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusEvent {
    /// Address phase matched; direction of the upcoming transfer is known.
    Select(Direction),
    /// One payload byte arrived during a write transfer.
    ByteIn(u8),
    /// The engine wants the next outgoing byte of a read transfer.
    ByteOut,
    /// The host negatively acknowledged the last outgoing byte.
    OutNack,
    /// Stop condition; the host released the bus.
    Stop,
}

/// Reply the engine applies before the handler returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusReply {
    Ack,
    Nack,
    Byte(u8),
    None,
}

/// Status-LED signal derived from the session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Indicator {
    Off,
    Active,
    Fault,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ActiveCommand {
    Idle,
    Active(Command),
    /// An unrecognized selector sticks until the next selection; every
    /// follow-up byte of the transaction is rejected.
    Rejected(u8),
}

struct EntryCursor {
    name: EntryName,
    pos: u8,
}

/// Per-host command session.
///
/// One instance lives for the whole uptime of the device; selection events
/// reset the per-phase cursors while the filename and any open handle carry
/// over, so a command may span several consecutive transactions.
pub struct Session<B: StorageBackend> {
    active: ActiveCommand,
    name: [u8; NAME_MAX],
    name_cursor: usize,
    stream_cursor: u8,
    size_bytes: [u8; 4],
    flag_result: Option<u8>,
    first_nack_forgiven: bool,
    halted: bool,
    indicator: Indicator,
    reset_pending: bool,
    file: Option<B::File>,
    dir: Option<B::Dir>,
    entry: Option<EntryCursor>,
}

impl<B: StorageBackend> Default for Session<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: StorageBackend> Session<B> {
    pub fn new() -> Self {
        Self {
            active: ActiveCommand::Idle,
            name: [0; NAME_MAX],
            name_cursor: 0,
            stream_cursor: 0,
            size_bytes: [0; 4],
            flag_result: None,
            first_nack_forgiven: false,
            halted: false,
            indicator: Indicator::Off,
            reset_pending: false,
            file: None,
            dir: None,
            entry: None,
        }
    }

    /// Feed one bus event; must be called from exactly one thread of control.
    pub fn handle(&mut self, backend: &mut B, event: BusEvent) -> BusReply {
        match event {
            BusEvent::Select(direction) => {
                self.on_select(direction);
                BusReply::Ack
            }
            BusEvent::ByteIn(byte) => self.on_byte_in(backend, byte),
            BusEvent::ByteOut => BusReply::Byte(self.on_byte_out(backend)),
            BusEvent::OutNack => {
                self.on_out_nack();
                BusReply::None
            }
            BusEvent::Stop => {
                self.on_stop(backend);
                BusReply::None
            }
        }
    }

    /// Filename accumulated so far, terminator excluded.
    pub fn filename(&self) -> &[u8] {
        let end = self
            .name
            .iter()
            .position(|&byte| byte == 0)
            .unwrap_or(self.name.len());
        &self.name[..end]
    }

    pub fn active_command(&self) -> Option<Command> {
        match self.active {
            ActiveCommand::Active(command) => Some(command),
            _ => None,
        }
    }

    /// Selector byte of an unrecognized command, while one is stuck.
    pub fn rejected_selector(&self) -> Option<u8> {
        match self.active {
            ActiveCommand::Rejected(byte) => Some(byte),
            _ => None,
        }
    }

    pub fn indicator(&self) -> Indicator {
        self.indicator
    }

    /// True once after a reset command was dispatched; the caller performs
    /// the actual restart.
    pub fn take_reset_request(&mut self) -> bool {
        core::mem::take(&mut self.reset_pending)
    }

    fn on_select(&mut self, direction: Direction) {
        self.stream_cursor = 0;
        self.flag_result = None;
        self.first_nack_forgiven = false;
        self.halted = false;
        if direction == Direction::Write {
            // The command byte survives a write->read turnaround; only a new
            // write transaction re-targets it.
            self.active = ActiveCommand::Idle;
            self.name_cursor = 0;
        }
    }

    fn on_byte_in(&mut self, backend: &mut B, byte: u8) -> BusReply {
        match self.active {
            ActiveCommand::Idle => self.dispatch(backend, byte),
            ActiveCommand::Active(Command::SetName) => self.push_name_byte(byte),
            ActiveCommand::Active(Command::Write) | ActiveCommand::Active(Command::Append) => {
                match self.file.as_mut() {
                    Some(file) => {
                        backend.write_byte(file, byte);
                        BusReply::Ack
                    }
                    None => BusReply::Nack,
                }
            }
            _ => BusReply::Nack,
        }
    }

    fn dispatch(&mut self, backend: &mut B, byte: u8) -> BusReply {
        let Some(command) = Command::from_byte(byte) else {
            self.active = ActiveCommand::Rejected(byte);
            return BusReply::Nack;
        };
        self.active = ActiveCommand::Active(command);

        if command == Command::SetName {
            return BusReply::Ack;
        }
        if self.file.is_some() {
            // Continuation of an earlier transfer; the handle stays as-is.
            return BusReply::Ack;
        }
        if let Some(mode) = command.open_mode() {
            return match backend.open(self.filename(), mode) {
                Some(file) => {
                    self.file = Some(file);
                    self.indicator = Indicator::Active;
                    BusReply::Ack
                }
                None => {
                    self.indicator = Indicator::Fault;
                    BusReply::Nack
                }
            };
        }
        match command {
            Command::MakeDir => {
                if backend.make_dir(self.filename()) {
                    BusReply::Ack
                } else {
                    BusReply::Nack
                }
            }
            Command::Reset => {
                self.reset_pending = true;
                BusReply::Ack
            }
            // Exists, remove and list run lazily in the read phase.
            _ => BusReply::Ack,
        }
    }

    fn push_name_byte(&mut self, byte: u8) -> BusReply {
        // Keep room for the terminator; overflow bytes are rejected, not
        // truncated into the stored name.
        if self.name_cursor + 1 >= NAME_MAX {
            return BusReply::Nack;
        }
        self.name[self.name_cursor] = byte;
        self.name_cursor += 1;
        self.name[self.name_cursor] = 0;
        BusReply::Ack
    }

    fn on_byte_out(&mut self, backend: &mut B) -> u8 {
        if self.halted {
            return FILLER;
        }
        match self.active {
            ActiveCommand::Active(Command::Read) => match self.file.as_mut() {
                Some(file) => backend.read_byte(file),
                None => FILLER,
            },
            ActiveCommand::Active(Command::Exists) => {
                let value = match self.flag_result {
                    Some(value) => value,
                    None => u8::from(backend.exists(self.filename())),
                };
                self.flag_result = Some(value);
                value
            }
            ActiveCommand::Active(Command::Remove) => {
                // Executes once per read phase; repeats replay the result.
                let value = match self.flag_result {
                    Some(value) => value,
                    None => u8::from(backend.remove(self.filename())),
                };
                self.flag_result = Some(value);
                value
            }
            ActiveCommand::Active(Command::Size) => self.size_byte(backend),
            ActiveCommand::Active(Command::List) => self.listing_byte(backend),
            _ => FILLER,
        }
    }

    fn size_byte(&mut self, backend: &mut B) -> u8 {
        if self.stream_cursor == 0 {
            let size = match self.file.as_mut() {
                Some(file) => backend.size(file),
                None => 0,
            };
            self.size_bytes = size.to_be_bytes();
        }
        let cursor = self.stream_cursor as usize;
        if cursor >= self.size_bytes.len() {
            return FILLER;
        }
        self.stream_cursor += 1;
        self.size_bytes[cursor]
    }

    fn listing_byte(&mut self, backend: &mut B) -> u8 {
        if self.dir.is_none() {
            self.dir = backend.open_root_dir();
        }
        if self.entry.is_none() {
            let Some(dir) = self.dir.as_mut() else {
                return 0;
            };
            match backend.next_entry(dir) {
                Some(name) => self.entry = Some(EntryCursor { name, pos: 0 }),
                None => {
                    // Bare terminator with nothing preceding it: listing done.
                    if let Some(dir) = self.dir.take() {
                        backend.close_dir(dir);
                    }
                    return 0;
                }
            }
        }
        if let Some(cursor) = self.entry.as_mut() {
            if (cursor.pos as usize) < cursor.name.len() {
                let byte = cursor.name.as_bytes()[cursor.pos as usize];
                cursor.pos += 1;
                return byte;
            }
        }
        // Name exhausted: emit its terminator and pull a fresh entry next time.
        self.entry = None;
        0
    }

    fn on_out_nack(&mut self) {
        // The engine reports one spurious negative acknowledgement per read
        // phase; only the second and later ones end the stream.
        if self.first_nack_forgiven {
            self.halted = true;
        } else {
            self.first_nack_forgiven = true;
        }
    }

    fn on_stop(&mut self, backend: &mut B) {
        match self.active {
            ActiveCommand::Active(command) if command.owns_file() => {
                if let Some(file) = self.file.take() {
                    backend.close(file);
                }
                self.indicator = Indicator::Off;
            }
            ActiveCommand::Active(Command::List) => {
                self.entry = None;
                if let Some(dir) = self.dir.take() {
                    backend.close_dir(dir);
                }
            }
            _ => {}
        }
    }
}
