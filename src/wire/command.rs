//! Command codes and the packet descriptor table (spec.md §4.1, §6).

/// Framing magic. TEXT is not a real 4-byte magic on the wire (the admin
/// console has no header at all) but is included here so `Packet::magic`
/// can record which sub-protocol produced a given message.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Magic {
    Request,
    Response,
    Text,
}

impl Magic {
    pub const REQUEST_BYTES: [u8; 4] = *b"\0REQ";
    pub const RESPONSE_BYTES: [u8; 4] = *b"\0RES";

    pub fn bytes(self) -> [u8; 4] {
        match self {
            Magic::Request => Self::REQUEST_BYTES,
            Magic::Response => Self::RESPONSE_BYTES,
            Magic::Text => *b"\0\0\0\0", // never written to the wire
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Command {
    CanDo,
    CantDo,
    ResetAbilities,
    PreSleep,
    Noop,
    SubmitJob,
    JobCreated,
    GrabJob,
    NoJob,
    JobAssign,
    WorkStatus,
    WorkComplete,
    WorkFail,
    GetStatus,
    EchoReq,
    EchoRes,
    SubmitJobBg,
    Error,
    StatusRes,
    SubmitJobHigh,
    SetClientId,
    CanDoTimeout,
    AllYours,
    WorkException,
    OptionReq,
    OptionRes,
    WorkData,
    WorkWarning,
    GrabJobUniq,
    JobAssignUniq,
    SubmitJobHighBg,
    SubmitJobLow,
    SubmitJobLowBg,
    SubmitJobSched,
    SubmitJobEpoch,
}

/// Highest command code the wire protocol defines (spec.md §6).
pub const MAX_COMMAND_CODE: u32 = 36;

/// (expected plain-argument count, whether the final argument is an opaque
/// trailing data payload). Total physical arguments on the wire is
/// `argc + carries_data as usize`; only the very last physical argument is
/// allowed to omit its trailing NUL / contain embedded NULs.
#[derive(Copy, Clone, Debug)]
pub struct Descriptor {
    pub argc: u8,
    pub carries_data: bool,
}

impl Descriptor {
    const fn new(argc: u8, carries_data: bool) -> Self {
        Descriptor { argc, carries_data }
    }

    pub fn total_args(self) -> usize {
        self.argc as usize + usize::from(self.carries_data)
    }
}

impl Command {
    pub fn from_code(code: u32) -> Option<Self> {
        use Command::*;
        Some(match code {
            1 => CanDo,
            2 => CantDo,
            3 => ResetAbilities,
            4 => PreSleep,
            6 => Noop,
            7 => SubmitJob,
            8 => JobCreated,
            9 => GrabJob,
            10 => NoJob,
            11 => JobAssign,
            12 => WorkStatus,
            13 => WorkComplete,
            14 => WorkFail,
            15 => GetStatus,
            16 => EchoReq,
            17 => EchoRes,
            18 => SubmitJobBg,
            19 => Error,
            20 => StatusRes,
            21 => SubmitJobHigh,
            22 => SetClientId,
            23 => CanDoTimeout,
            24 => AllYours,
            25 => WorkException,
            26 => OptionReq,
            27 => OptionRes,
            28 => WorkData,
            29 => WorkWarning,
            30 => GrabJobUniq,
            31 => JobAssignUniq,
            32 => SubmitJobHighBg,
            33 => SubmitJobLow,
            34 => SubmitJobLowBg,
            35 => SubmitJobSched,
            36 => SubmitJobEpoch,
            _ => return None,
        })
    }

    pub fn code(self) -> u32 {
        use Command::*;
        match self {
            CanDo => 1,
            CantDo => 2,
            ResetAbilities => 3,
            PreSleep => 4,
            Noop => 6,
            SubmitJob => 7,
            JobCreated => 8,
            GrabJob => 9,
            NoJob => 10,
            JobAssign => 11,
            WorkStatus => 12,
            WorkComplete => 13,
            WorkFail => 14,
            GetStatus => 15,
            EchoReq => 16,
            EchoRes => 17,
            SubmitJobBg => 18,
            Error => 19,
            StatusRes => 20,
            SubmitJobHigh => 21,
            SetClientId => 22,
            CanDoTimeout => 23,
            AllYours => 24,
            WorkException => 25,
            OptionReq => 26,
            OptionRes => 27,
            WorkData => 28,
            WorkWarning => 29,
            GrabJobUniq => 30,
            JobAssignUniq => 31,
            SubmitJobHighBg => 32,
            SubmitJobLow => 33,
            SubmitJobLowBg => 34,
            SubmitJobSched => 35,
            SubmitJobEpoch => 36,
        }
    }

    /// Whether this command is only ever sent from the server (a response)
    /// rather than by a peer (a request). Used only for documentation/
    /// debugging; the codec itself is magic-driven, not command-driven.
    pub fn descriptor(self) -> Descriptor {
        use Command::*;
        match self {
            CanDo => Descriptor::new(1, false),
            CantDo => Descriptor::new(1, false),
            ResetAbilities => Descriptor::new(0, false),
            PreSleep => Descriptor::new(0, false),
            Noop => Descriptor::new(0, false),
            SubmitJob => Descriptor::new(2, true),
            JobCreated => Descriptor::new(1, false),
            GrabJob => Descriptor::new(0, false),
            NoJob => Descriptor::new(0, false),
            JobAssign => Descriptor::new(2, true),
            WorkStatus => Descriptor::new(3, false),
            WorkComplete => Descriptor::new(1, true),
            WorkFail => Descriptor::new(1, false),
            GetStatus => Descriptor::new(1, false),
            EchoReq => Descriptor::new(0, true),
            EchoRes => Descriptor::new(0, true),
            SubmitJobBg => Descriptor::new(2, true),
            Error => Descriptor::new(2, false),
            StatusRes => Descriptor::new(5, false),
            SubmitJobHigh => Descriptor::new(2, true),
            SetClientId => Descriptor::new(1, false),
            CanDoTimeout => Descriptor::new(2, false),
            AllYours => Descriptor::new(0, false),
            WorkException => Descriptor::new(1, true),
            OptionReq => Descriptor::new(1, false),
            OptionRes => Descriptor::new(1, false),
            WorkData => Descriptor::new(1, true),
            WorkWarning => Descriptor::new(1, true),
            GrabJobUniq => Descriptor::new(0, false),
            JobAssignUniq => Descriptor::new(3, true),
            SubmitJobHighBg => Descriptor::new(2, true),
            SubmitJobLow => Descriptor::new(2, true),
            SubmitJobLowBg => Descriptor::new(2, true),
            SubmitJobSched => Descriptor::new(7, true),
            SubmitJobEpoch => Descriptor::new(3, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips() {
        for code in 1..=MAX_COMMAND_CODE {
            if code == 5 {
                // 5 is reserved/unused in the upstream protocol.
                continue;
            }
            let Some(cmd) = Command::from_code(code) else {
                continue;
            };
            assert_eq!(cmd.code(), code);
        }
    }

    #[test]
    fn zero_and_overflow_are_not_commands() {
        assert!(Command::from_code(0).is_none());
        assert!(Command::from_code(MAX_COMMAND_CODE + 1).is_none());
    }
}
