//! Typed request/response views over [`Packet`], in the teacher's
//! `wire::protocol::{Command, Response}` style: a strongly-typed enum per
//! direction, with conversions to and from the raw framed [`Packet`] so the
//! dispatcher never has to index into `args` by hand.

use bytes::Bytes;

use super::command::{Command, Magic};
use super::packet::Packet;
use crate::error::Error;

fn u32_arg(b: &Bytes) -> Result<u32, Error> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(Error::InvalidPacket)
}

/// A message sent by a client or worker to the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    CanDo { function: Bytes },
    CantDo { function: Bytes },
    ResetAbilities,
    PreSleep,
    SubmitJob { function: Bytes, unique: Bytes, data: Bytes, priority: Priority, background: bool },
    GrabJob,
    GrabJobUniq,
    WorkStatus { handle: Bytes, numerator: u32, denominator: u32 },
    WorkComplete { handle: Bytes, data: Bytes },
    WorkFail { handle: Bytes },
    WorkException { handle: Bytes, data: Bytes },
    WorkData { handle: Bytes, data: Bytes },
    WorkWarning { handle: Bytes, data: Bytes },
    GetStatus { handle: Bytes },
    EchoReq { data: Bytes },
    SetClientId { id: Bytes },
    CanDoTimeout { function: Bytes, timeout: u32 },
    AllYours,
    OptionReq { option: Bytes },
    /// In scope for the wire codec only; see SPEC_FULL.md §9 Open Question 2.
    SubmitJobSched,
    /// In scope for the wire codec only; see SPEC_FULL.md §9 Open Question 2.
    SubmitJobEpoch,
}

/// Submission priority, decoded from which `SUBMIT_JOB*` command was used.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    pub const COUNT: usize = 3;
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    pub fn as_index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

impl TryFrom<Packet> for Request {
    type Error = Error;

    fn try_from(p: Packet) -> Result<Self, Error> {
        use Command::*;

        let command = p.command;
        let args = p.args;

        Ok(match command {
            CanDo => Request::CanDo { function: args[0].clone() },
            CantDo => Request::CantDo { function: args[0].clone() },
            ResetAbilities => Request::ResetAbilities,
            PreSleep => Request::PreSleep,
            GrabJob => Request::GrabJob,
            GrabJobUniq => Request::GrabJobUniq,
            AllYours => Request::AllYours,

            SubmitJob | SubmitJobHigh | SubmitJobLow | SubmitJobBg
            | SubmitJobHighBg | SubmitJobLowBg => {
                let (priority, background) = match command {
                    SubmitJob => (Priority::Normal, false),
                    SubmitJobHigh => (Priority::High, false),
                    SubmitJobLow => (Priority::Low, false),
                    SubmitJobBg => (Priority::Normal, true),
                    SubmitJobHighBg => (Priority::High, true),
                    SubmitJobLowBg => (Priority::Low, true),
                    _ => unreachable!(),
                };
                Request::SubmitJob {
                    function: args[0].clone(),
                    unique: args[1].clone(),
                    data: args[2].clone(),
                    priority,
                    background,
                }
            },

            SubmitJobSched => Request::SubmitJobSched,
            SubmitJobEpoch => Request::SubmitJobEpoch,

            WorkStatus => Request::WorkStatus {
                handle: args[0].clone(),
                numerator: u32_arg(&args[1])?,
                denominator: u32_arg(&args[2])?,
            },
            WorkComplete => Request::WorkComplete {
                handle: args[0].clone(),
                data: args[1].clone(),
            },
            WorkFail => Request::WorkFail { handle: args[0].clone() },
            WorkException => Request::WorkException {
                handle: args[0].clone(),
                data: args[1].clone(),
            },
            WorkData => Request::WorkData {
                handle: args[0].clone(),
                data: args[1].clone(),
            },
            WorkWarning => Request::WorkWarning {
                handle: args[0].clone(),
                data: args[1].clone(),
            },
            GetStatus => Request::GetStatus { handle: args[0].clone() },
            EchoReq => Request::EchoReq { data: args[0].clone() },
            SetClientId => Request::SetClientId { id: args[0].clone() },
            CanDoTimeout => Request::CanDoTimeout {
                function: args[0].clone(),
                timeout: u32_arg(&args[1])?,
            },
            OptionReq => Request::OptionReq { option: args[0].clone() },

            // Server-only (response) commands never arrive as a request.
            Noop | JobCreated | NoJob | JobAssign | JobAssignUniq | StatusRes
            | Command::Error | OptionRes => {
                return Err(crate::error::Error::InvalidCommand)
            },
        })
    }
}

impl From<Request> for Packet {
    fn from(r: Request) -> Packet {
        let (command, args): (Command, Vec<Bytes>) = match r {
            Request::CanDo { function } => (Command::CanDo, vec![function]),
            Request::CantDo { function } => (Command::CantDo, vec![function]),
            Request::ResetAbilities => (Command::ResetAbilities, vec![]),
            Request::PreSleep => (Command::PreSleep, vec![]),
            Request::GrabJob => (Command::GrabJob, vec![]),
            Request::GrabJobUniq => (Command::GrabJobUniq, vec![]),
            Request::AllYours => (Command::AllYours, vec![]),
            Request::SubmitJob { function, unique, data, priority, background } => {
                let command = match (priority, background) {
                    (Priority::Normal, false) => Command::SubmitJob,
                    (Priority::High, false) => Command::SubmitJobHigh,
                    (Priority::Low, false) => Command::SubmitJobLow,
                    (Priority::Normal, true) => Command::SubmitJobBg,
                    (Priority::High, true) => Command::SubmitJobHighBg,
                    (Priority::Low, true) => Command::SubmitJobLowBg,
                };
                (command, vec![function, unique, data])
            },
            Request::SubmitJobSched => (Command::SubmitJobSched, vec![]),
            Request::SubmitJobEpoch => (Command::SubmitJobEpoch, vec![]),
            Request::WorkStatus { handle, numerator, denominator } => (
                Command::WorkStatus,
                vec![handle, Bytes::from(numerator.to_string()), Bytes::from(denominator.to_string())],
            ),
            Request::WorkComplete { handle, data } => (Command::WorkComplete, vec![handle, data]),
            Request::WorkFail { handle } => (Command::WorkFail, vec![handle]),
            Request::WorkException { handle, data } => (Command::WorkException, vec![handle, data]),
            Request::WorkData { handle, data } => (Command::WorkData, vec![handle, data]),
            Request::WorkWarning { handle, data } => (Command::WorkWarning, vec![handle, data]),
            Request::GetStatus { handle } => (Command::GetStatus, vec![handle]),
            Request::EchoReq { data } => (Command::EchoReq, vec![data]),
            Request::SetClientId { id } => (Command::SetClientId, vec![id]),
            Request::CanDoTimeout { function, timeout } => {
                (Command::CanDoTimeout, vec![function, Bytes::from(timeout.to_string())])
            },
            Request::OptionReq { option } => (Command::OptionReq, vec![option]),
        };

        Packet::new(Magic::Request, command, args)
            .expect("Request variant does not match its command's descriptor")
    }
}

/// A message sent by the server to a client or worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Noop,
    JobCreated { handle: Bytes },
    NoJob,
    JobAssign { handle: Bytes, function: Bytes, data: Bytes },
    JobAssignUniq { handle: Bytes, function: Bytes, unique: Bytes, data: Bytes },
    WorkStatus { handle: Bytes, numerator: u32, denominator: u32 },
    WorkComplete { handle: Bytes, data: Bytes },
    WorkFail { handle: Bytes },
    WorkException { handle: Bytes, data: Bytes },
    WorkData { handle: Bytes, data: Bytes },
    WorkWarning { handle: Bytes, data: Bytes },
    StatusRes { handle: Bytes, known: bool, running: bool, numerator: u32, denominator: u32 },
    Echo { data: Bytes },
    Error { code: &'static str, message: Bytes },
    OptionRes { option: Bytes },
}

impl From<Response> for Packet {
    fn from(r: Response) -> Packet {
        use Response::*;

        let (command, args): (Command, Vec<Bytes>) = match r {
            Noop => (Command::Noop, vec![]),
            JobCreated { handle } => (Command::JobCreated, vec![handle]),
            NoJob => (Command::NoJob, vec![]),
            JobAssign { handle, function, data } => {
                (Command::JobAssign, vec![handle, function, data])
            },
            JobAssignUniq { handle, function, unique, data } => {
                (Command::JobAssignUniq, vec![handle, function, unique, data])
            },
            WorkStatus { handle, numerator, denominator } => (
                Command::WorkStatus,
                vec![handle, Bytes::from(numerator.to_string()), Bytes::from(denominator.to_string())],
            ),
            WorkComplete { handle, data } => (Command::WorkComplete, vec![handle, data]),
            WorkFail { handle } => (Command::WorkFail, vec![handle]),
            WorkException { handle, data } => (Command::WorkException, vec![handle, data]),
            WorkData { handle, data } => (Command::WorkData, vec![handle, data]),
            WorkWarning { handle, data } => (Command::WorkWarning, vec![handle, data]),
            StatusRes { handle, known, running, numerator, denominator } => (
                Command::StatusRes,
                vec![
                    handle,
                    Bytes::from(if known { "1" } else { "0" }),
                    Bytes::from(if running { "1" } else { "0" }),
                    Bytes::from(numerator.to_string()),
                    Bytes::from(denominator.to_string()),
                ],
            ),
            Echo { data } => (Command::EchoRes, vec![data]),
            Response::Error { code, message } => {
                (Command::Error, vec![Bytes::from(code), message])
            },
            OptionRes { option } => (Command::OptionRes, vec![option]),
        };

        // Construction here is infallible by contract: every arm above
        // supplies exactly the argument count its command's descriptor
        // expects. A mismatch would be a bug in this match, not bad input.
        Packet::new(Magic::Response, command, args)
            .expect("Response variant does not match its command's descriptor")
    }
}

/// `Response::Error.code` is `&'static str` so the server side never
/// allocates when replying with one of its known codes; decoding an
/// arbitrary wire ERROR (client side) maps the code bytes onto the closest
/// known tag, falling back to `"error"` for anything unrecognized. The
/// original bytes are never lost — they stay in `message` as sent.
fn static_error_code(code: &Bytes) -> &'static str {
    match code.as_ref() {
        b"queue" => "queue",
        b"unknown option" => "unknown option",
        b"unsupported" => "unsupported",
        b"lost_connection" => "lost_connection",
        b"could_not_connect" => "could_not_connect",
        b"invalid_magic" => "invalid_magic",
        b"unknown command" => "unknown command",
        b"invalid_packet" => "invalid_packet",
        b"too_many_args" => "too_many_args",
        _ => "error",
    }
}

impl TryFrom<Packet> for Response {
    type Error = Error;

    fn try_from(p: Packet) -> Result<Self, Error> {
        let command = p.command;
        let args = p.args;

        Ok(match command {
            Command::Noop => Response::Noop,
            Command::JobCreated => Response::JobCreated { handle: args[0].clone() },
            Command::NoJob => Response::NoJob,
            Command::JobAssign => Response::JobAssign {
                handle: args[0].clone(),
                function: args[1].clone(),
                data: args[2].clone(),
            },
            Command::JobAssignUniq => Response::JobAssignUniq {
                handle: args[0].clone(),
                function: args[1].clone(),
                unique: args[2].clone(),
                data: args[3].clone(),
            },
            Command::WorkStatus => Response::WorkStatus {
                handle: args[0].clone(),
                numerator: u32_arg(&args[1])?,
                denominator: u32_arg(&args[2])?,
            },
            Command::WorkComplete => Response::WorkComplete { handle: args[0].clone(), data: args[1].clone() },
            Command::WorkFail => Response::WorkFail { handle: args[0].clone() },
            Command::WorkException => {
                Response::WorkException { handle: args[0].clone(), data: args[1].clone() }
            },
            Command::WorkData => Response::WorkData { handle: args[0].clone(), data: args[1].clone() },
            Command::WorkWarning => Response::WorkWarning { handle: args[0].clone(), data: args[1].clone() },
            Command::StatusRes => Response::StatusRes {
                handle: args[0].clone(),
                known: args[1].as_ref() == b"1",
                running: args[2].as_ref() == b"1",
                numerator: u32_arg(&args[3])?,
                denominator: u32_arg(&args[4])?,
            },
            Command::EchoRes => Response::Echo { data: args[0].clone() },
            Command::Error => Response::Error {
                code: static_error_code(&args[0]),
                message: args.get(1).cloned().unwrap_or_default(),
            },
            Command::OptionRes => Response::OptionRes { option: args[0].clone() },

            // Client/worker-only (request) commands never arrive as a response.
            _ => return Err(crate::error::Error::InvalidCommand),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_job_high_bg_decodes_priority_and_background() {
        let p = Packet::new(
            Magic::Request,
            Command::SubmitJobHighBg,
            vec![Bytes::from("f"), Bytes::from("u"), Bytes::from("d")],
        )
        .unwrap();
        let req: Request = p.try_into().unwrap();
        assert_eq!(
            req,
            Request::SubmitJob {
                function: Bytes::from("f"),
                unique: Bytes::from("u"),
                data: Bytes::from("d"),
                priority: Priority::High,
                background: true,
            }
        );
    }

    #[test]
    fn response_round_trips_through_packet() {
        let resp = Response::JobCreated { handle: Bytes::from("H:host:1") };
        let packet: Packet = resp.into();
        assert_eq!(packet.command, Command::JobCreated);
        assert_eq!(packet.args, vec![Bytes::from("H:host:1")]);
    }
}
