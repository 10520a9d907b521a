//! Control interface for the sizing defaults
//!
//! Verbs follow the classic scull ioctl set:
//!
//! | Verb      | Parameter                    | Result             |
//! |-----------|------------------------------|--------------------|
//! | Set       | read from `arg`              | 0                  |
//! | Tell      | carried by value             | 0                  |
//! | Get       | written to `arg`             | 0                  |
//! | Query     | -                            | current value      |
//! | Exchange  | new in `arg`, old out `arg`  | 0                  |
//! | Shift     | carried by value             | previous value     |
//!
//! Set, Tell, Exchange and Shift need the configure capability. Changes
//! apply to devices on their next trim; allocated segments are untouched.

use crate::config::SizingDefaults;
use crate::error::{Error, Result};
use std::fmt;
use tracing::{debug, warn};

/// Magic byte identifying scull control commands
pub const SCULL_IOC_MAGIC: u8 = b'k';
/// Highest command number accepted by the decoder
pub const SCULL_IOC_MAXNR: u8 = 14;

/// Capability check supplied by the calling context
pub trait Permission {
    /// Whether the caller may change sizing defaults
    fn can_configure(&self) -> bool;
}

impl Permission for bool {
    fn can_configure(&self) -> bool {
        *self
    }
}

/// Credentials of a control caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    sys_admin: bool,
}

impl Caller {
    pub fn admin() -> Self {
        Self { sys_admin: true }
    }

    pub fn unprivileged() -> Self {
        Self { sys_admin: false }
    }
}

impl Permission for Caller {
    fn can_configure(&self) -> bool {
        self.sys_admin
    }
}

/// A decoded control verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Reset,
    SetQuantum,
    SetSlots,
    TellQuantum(i64),
    TellSlots(i64),
    GetQuantum,
    GetSlots,
    QueryQuantum,
    QuerySlots,
    ExchangeQuantum,
    ExchangeSlots,
    ShiftQuantum(i64),
    ShiftSlots(i64),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Reset => "reset",
            Command::SetQuantum => "set-quantum",
            Command::SetSlots => "set-qset",
            Command::TellQuantum(_) => "tell-quantum",
            Command::TellSlots(_) => "tell-qset",
            Command::GetQuantum => "get-quantum",
            Command::GetSlots => "get-qset",
            Command::QueryQuantum => "query-quantum",
            Command::QuerySlots => "query-qset",
            Command::ExchangeQuantum => "exchange-quantum",
            Command::ExchangeSlots => "exchange-qset",
            Command::ShiftQuantum(_) => "shift-quantum",
            Command::ShiftSlots(_) => "shift-qset",
        }
    }

    /// Whether the verb mutates the defaults
    pub fn requires_capability(&self) -> bool {
        matches!(
            self,
            Command::SetQuantum
                | Command::SetSlots
                | Command::TellQuantum(_)
                | Command::TellSlots(_)
                | Command::ExchangeQuantum
                | Command::ExchangeSlots
                | Command::ShiftQuantum(_)
                | Command::ShiftSlots(_)
        )
    }

    /// Look a verb up by name; by-value verbs take `value` (default 0)
    pub fn from_name(name: &str, value: Option<i64>) -> Result<Self> {
        let value = value.unwrap_or(0);
        let cmd = match name {
            "reset" => Command::Reset,
            "set-quantum" => Command::SetQuantum,
            "set-qset" => Command::SetSlots,
            "tell-quantum" => Command::TellQuantum(value),
            "tell-qset" => Command::TellSlots(value),
            "get-quantum" => Command::GetQuantum,
            "get-qset" => Command::GetSlots,
            "query-quantum" => Command::QueryQuantum,
            "query-qset" => Command::QuerySlots,
            "exchange-quantum" => Command::ExchangeQuantum,
            "exchange-qset" => Command::ExchangeSlots,
            "shift-quantum" => Command::ShiftQuantum(value),
            "shift-qset" => Command::ShiftSlots(value),
            other => return Err(Error::Unsupported(format!("unknown command '{}'", other))),
        };
        Ok(cmd)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Undecoded command as it arrives from a caller: magic, number, argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCommand {
    pub magic: u8,
    pub number: u8,
    pub arg: i64,
}

impl RawCommand {
    pub fn new(number: u8, arg: i64) -> Self {
        Self {
            magic: SCULL_IOC_MAGIC,
            number,
            arg,
        }
    }

    /// Resolve to a verb; by-value verbs take `arg` as their parameter
    pub fn decode(&self) -> Result<Command> {
        if self.magic != SCULL_IOC_MAGIC {
            return Err(Error::Unsupported(format!(
                "bad command magic {:#04x}",
                self.magic
            )));
        }
        if self.number > SCULL_IOC_MAXNR {
            return Err(Error::Unsupported(format!(
                "command number {} above {}",
                self.number, SCULL_IOC_MAXNR
            )));
        }

        let cmd = match self.number {
            0 => Command::Reset,
            1 => Command::SetQuantum,
            2 => Command::SetSlots,
            3 => Command::TellQuantum(self.arg),
            4 => Command::TellSlots(self.arg),
            5 => Command::GetQuantum,
            6 => Command::GetSlots,
            7 => Command::QueryQuantum,
            8 => Command::QuerySlots,
            9 => Command::ExchangeQuantum,
            10 => Command::ExchangeSlots,
            11 => Command::ShiftQuantum(self.arg),
            12 => Command::ShiftSlots(self.arg),
            n => return Err(Error::Unsupported(format!("reserved command number {}", n))),
        };
        Ok(cmd)
    }
}

fn sizing_value(cmd: Command, value: i64) -> Result<usize> {
    usize::try_from(value)
        .ok()
        .filter(|&v| v > 0)
        .ok_or_else(|| Error::InvalidArgument(format!("{} needs a positive value, got {}", cmd, value)))
}

fn as_param(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl SizingDefaults {
    /// Apply a control verb
    ///
    /// `arg` is the in/out parameter used by the by-reference verbs (Set,
    /// Get, Exchange). Returns the call's result value.
    pub fn control(&self, cmd: Command, arg: &mut i64, caller: &impl Permission) -> Result<i64> {
        if cmd.requires_capability() && !caller.can_configure() {
            warn!(command = %cmd, "Rejected control command without capability");
            return Err(Error::PermissionDenied(format!("{} requires admin", cmd)));
        }

        let result = match cmd {
            Command::Reset => {
                self.reset();
                0
            }
            Command::SetQuantum => {
                self.replace_quantum(sizing_value(cmd, *arg)?)?;
                0
            }
            Command::SetSlots => {
                self.replace_qset(sizing_value(cmd, *arg)?)?;
                0
            }
            Command::TellQuantum(value) => {
                self.replace_quantum(sizing_value(cmd, value)?)?;
                0
            }
            Command::TellSlots(value) => {
                self.replace_qset(sizing_value(cmd, value)?)?;
                0
            }
            Command::GetQuantum => {
                *arg = as_param(self.quantum());
                0
            }
            Command::GetSlots => {
                *arg = as_param(self.qset());
                0
            }
            Command::QueryQuantum => as_param(self.quantum()),
            Command::QuerySlots => as_param(self.qset()),
            Command::ExchangeQuantum => {
                let old = self.replace_quantum(sizing_value(cmd, *arg)?)?;
                *arg = as_param(old);
                0
            }
            Command::ExchangeSlots => {
                let old = self.replace_qset(sizing_value(cmd, *arg)?)?;
                *arg = as_param(old);
                0
            }
            Command::ShiftQuantum(value) => as_param(self.replace_quantum(sizing_value(cmd, value)?)?),
            Command::ShiftSlots(value) => as_param(self.replace_qset(sizing_value(cmd, value)?)?),
        };

        debug!(command = %cmd, result, "Applied control command");
        Ok(result)
    }

    /// Decode and apply a raw command
    pub fn control_raw(&self, raw: RawCommand, arg: &mut i64, caller: &impl Permission) -> Result<i64> {
        let cmd = raw.decode().inspect_err(|e| {
            warn!(magic = raw.magic, number = raw.number, error = %e, "Unsupported control command");
        })?;
        self.control(cmd, arg, caller)
    }
}
