//! The framed packet type (spec.md §3 "Packet").

use bytes::Bytes;

use super::command::{Command, Magic};
use crate::error::Error;

/// A single framed message: magic, command, and its argument vector.
///
/// Invariant upheld by every constructor below: `args.len()` always equals
/// `command.descriptor().total_args()`. If the command's descriptor marks
/// `carries_data`, the last element of `args` is the opaque data payload;
/// otherwise every element is a NUL-terminated-on-the-wire plain argument.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Packet {
    pub magic: Magic,
    pub command: Command,
    pub args: Vec<Bytes>,
}

impl Packet {
    /// Builds a packet, checking the argument count against the command's
    /// descriptor. Mismatches are a caller bug (building a reply with the
    /// wrong shape), not a peer-triggered error, so this is the analogue of
    /// the wire-level `INVALID_PACKET` / `TOO_MANY_ARGS` checks applied at
    /// construction time instead of at decode time.
    pub fn new(
        magic: Magic,
        command: Command,
        args: Vec<Bytes>,
    ) -> Result<Self, Error> {
        let expected = command.descriptor().total_args();
        if args.len() > expected && !command.descriptor().carries_data {
            return Err(Error::TooManyArgs);
        }
        if args.len() != expected {
            return Err(Error::InvalidPacket);
        }
        Ok(Packet {
            magic,
            command,
            args,
        })
    }

    /// The opaque trailing payload, if this command's descriptor carries
    /// one.
    pub fn data(&self) -> Option<&Bytes> {
        if self.command.descriptor().carries_data {
            self.args.last()
        } else {
            None
        }
    }

    /// All arguments excluding the trailing data payload, if any.
    pub fn plain_args(&self) -> &[Bytes] {
        if self.command.descriptor().carries_data {
            &self.args[..self.args.len() - 1]
        } else {
            &self.args
        }
    }

    /// Total size in bytes of the argument region as it would appear on the
    /// wire: every argument except the last contributes a trailing NUL.
    pub fn region_len(&self) -> usize {
        let n = self.args.len();
        self.args
            .iter()
            .enumerate()
            .map(|(i, a)| a.len() + usize::from(i + 1 != n))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_argc() {
        let err = Packet::new(Magic::Request, Command::CanDo, vec![]).unwrap_err();
        assert!(matches!(err, Error::InvalidPacket));
    }

    #[test]
    fn data_and_plain_args_split_correctly() {
        let p = Packet::new(
            Magic::Request,
            Command::SubmitJob,
            vec![Bytes::from("fn"), Bytes::from("uniq"), Bytes::from("payload")],
        )
        .unwrap();
        assert_eq!(p.plain_args(), &[Bytes::from("fn"), Bytes::from("uniq")]);
        assert_eq!(p.data(), Some(&Bytes::from("payload")));
    }

    #[test]
    fn region_len_accounts_for_nul_separators() {
        let p = Packet::new(
            Magic::Request,
            Command::CanDo,
            vec![Bytes::from("reverse")],
        )
        .unwrap();
        // single arg, no trailing NUL (it's also the last arg)
        assert_eq!(p.region_len(), 7);

        let p2 = Packet::new(
            Magic::Response,
            Command::Error,
            vec![Bytes::from("queue"), Bytes::from("boom")],
        )
        .unwrap();
        // "queue\0" + "boom"
        assert_eq!(p2.region_len(), 6 + 4);
    }
}
