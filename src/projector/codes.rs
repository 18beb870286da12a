//! Item codes and status tables of the projector's serial protocol.

use core::fmt;

use serde::ser::{Serialize, SerializeSeq, Serializer};

use crate::protocol::Profile;

/// Status items.
pub mod item {
    pub const CALIB_PRESET: u16 = 0x0002;
    pub const STATUS_ERROR: u16 = 0x0101;
    pub const STATUS_POWER: u16 = 0x0102;
    pub const LAMP_TIMER: u16 = 0x0113;
    pub const STATUS_ERROR2: u16 = 0x0125;

    /// IR command pages. Commands on these pages get no reply.
    pub const IRCMD: u16 = 0x1700;
    pub const IRCMD2: u16 = 0x1900;
    pub const IRCMD3: u16 = 0x1B00;
    pub const IRCMD_MASK: u16 = 0xFF00;

    pub const IR_POWER_ON: u16 = IRCMD | 0x2E;
    pub const IR_POWER_OFF: u16 = IRCMD | 0x2F;
    pub const IR_MUTE: u16 = IRCMD | 0x24;
    pub const IR_STATUS_ON: u16 = IRCMD | 0x25;
    pub const IR_STATUS_OFF: u16 = IRCMD | 0x26;
}

/// `true` for IR commands, which the projector never answers.
pub fn is_fire_class(code: u16) -> bool {
    matches!(
        code & item::IRCMD_MASK,
        item::IRCMD | item::IRCMD2 | item::IRCMD3
    )
}

/// Item names for frame diagnostics.
pub fn item_name(code: u16) -> Option<&'static str> {
    let name = match code {
        item::STATUS_ERROR => "Status Error",
        item::STATUS_POWER => "Status Power",
        item::LAMP_TIMER => "Lamp Timer",
        item::STATUS_ERROR2 => "Status Error2",
        item::IR_POWER_OFF => "Power Off (IR)",
        item::IR_POWER_ON => "Power On (IR)",
        item::CALIB_PRESET => "Preset",
        _ => return None,
    };
    Some(name)
}

/// Engine profile of the projector.
pub const PROFILE: Profile = Profile {
    fire_class: is_fire_class,
    item_name,
};

/// Power state reported by `STATUS_POWER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerStatus {
    Standby,
    Startup,
    StartupLamp,
    PowerOn,
    Cooling1,
    Cooling2,
    SavingCooling1,
    SavingCooling2,
    SavingStandby,
    /// Not queried yet, or a code outside the table.
    Unknown,
}

impl PowerStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0000 => Self::Standby,
            0x0001 => Self::Startup,
            0x0002 => Self::StartupLamp,
            0x0003 => Self::PowerOn,
            0x0004 => Self::Cooling1,
            0x0005 => Self::Cooling2,
            0x0006 => Self::SavingCooling1,
            0x0007 => Self::SavingCooling2,
            0x0008 => Self::SavingStandby,
            _ => Self::Unknown,
        }
    }

    pub fn code(self) -> Option<u16> {
        let code = match self {
            Self::Standby => 0x0000,
            Self::Startup => 0x0001,
            Self::StartupLamp => 0x0002,
            Self::PowerOn => 0x0003,
            Self::Cooling1 => 0x0004,
            Self::Cooling2 => 0x0005,
            Self::SavingCooling1 => 0x0006,
            Self::SavingCooling2 => 0x0007,
            Self::SavingStandby => 0x0008,
            Self::Unknown => return None,
        };
        Some(code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Standby => "Standby",
            Self::Startup => "Start Up",
            Self::StartupLamp => "Startup Lamp",
            Self::PowerOn => "Power On",
            Self::Cooling1 => "Cooling1",
            Self::Cooling2 => "Cooling2",
            Self::SavingCooling1 => "Saving Cooling1",
            Self::SavingCooling2 => "Saving Cooling2",
            Self::SavingStandby => "Saving Standby",
            Self::Unknown => "Unknown",
        }
    }

    /// Fully off.
    pub fn is_off(self) -> bool {
        matches!(self, Self::Standby | Self::SavingStandby)
    }

    /// Fully on.
    pub fn is_on(self) -> bool {
        self == Self::PowerOn
    }

    /// Neither fully off nor fully on.
    pub fn is_transitional(self) -> bool {
        !self.is_off() && !self.is_on()
    }
}

impl fmt::Display for PowerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for PowerStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Bitmask reported by `STATUS_ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorFlags(pub u16);

impl ErrorFlags {
    pub const LAMP: u16 = 0x0001;
    pub const FAN: u16 = 0x0002;
    pub const COVER: u16 = 0x0004;
    pub const TEMP: u16 = 0x0008;
    pub const D5V: u16 = 0x0010;
    pub const POWER: u16 = 0x0020;
    pub const TEMP_WARNING: u16 = 0x0040;
    pub const NVM: u16 = 0x0080;

    const NAMES: [(u16, &'static str); 8] = [
        (Self::LAMP, "Lamp Error"),
        (Self::FAN, "Fan Error"),
        (Self::COVER, "Cover Error"),
        (Self::TEMP, "Temp Error"),
        (Self::D5V, "D5V Error"),
        (Self::POWER, "Power Error"),
        (Self::TEMP_WARNING, "Temp Warning"),
        (Self::NVM, "NVM Data Error"),
    ];

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// Names of the conditions set in the mask. Unnamed bits are skipped.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMES
            .into_iter()
            .filter(move |(bit, _)| self.0 & bit != 0)
            .map(|(_, name)| name)
    }
}

/// Bitmask reported by `STATUS_ERROR2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Warnings(pub u16);

impl Warnings {
    pub const HIGHLAND: u16 = 0x0020;

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    pub fn highland(self) -> bool {
        self.0 & Self::HIGHLAND != 0
    }
}

/// Published error status: unknown until the first full query, then either
/// `"No Error"` or the list of active conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorReport {
    #[default]
    Unknown,
    Flags(ErrorFlags),
}

impl Serialize for ErrorReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Unknown => serializer.serialize_str("Unknown"),
            Self::Flags(flags) if flags.is_ok() => serializer.serialize_str("No Error"),
            Self::Flags(flags) => {
                let mut seq = serializer.serialize_seq(None)?;
                for name in flags.names() {
                    seq.serialize_element(name)?;
                }
                seq.end()
            }
        }
    }
}
