//! Binary + TEXT packet codec (spec.md §4.1).
//!
//! Modeled directly on the teacher's `wire::decoder::Decoder`: an explicit
//! state enum driving a `tokio_util::codec::Decoder::decode` loop, with a
//! `DiscardToNewline` recovery state reused verbatim for the admin TEXT
//! sub-protocol.

use bytes::{Buf, Bytes, BytesMut};
use itertools::Itertools;

use super::command::{Command, Magic};
use super::events::ProtocolEvent;
use super::packet::Packet;
use crate::error::Error;

const HEADER_LEN: usize = 12;
/// Admin console lines are capped the same way beanstalkd caps its command
/// lines, to bound the TEXT-mode line scan.
const MAX_TEXT_LINE: usize = 224;

#[derive(Debug)]
enum State {
    Header,
    Body {
        magic: Magic,
        command: Command,
        remaining: usize,
    },
    TextLine,
    DiscardToNewline,
}

#[derive(Debug)]
pub struct Decoder {
    state: State,
    max_body_size: usize,
}

impl Decoder {
    pub fn new(max_body_size: usize) -> Self {
        Decoder {
            state: State::Header,
            max_body_size,
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder::new(1024 * 1024)
    }
}

impl tokio_util::codec::Decoder for Decoder {
    type Item = ProtocolEvent;
    type Error = Error;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match &self.state {
                State::Header => {
                    if src.is_empty() {
                        return Ok(None);
                    }

                    // spec.md §4.1: a non-NUL first byte of a new message
                    // switches the connection into line-oriented TEXT mode.
                    if src[0] != 0 {
                        self.state = State::TextLine;
                        continue;
                    }

                    if src.len() < HEADER_LEN {
                        return Ok(None);
                    }

                    let magic = match &src[0..4] {
                        b if b == &Magic::REQUEST_BYTES => Magic::Request,
                        b if b == &Magic::RESPONSE_BYTES => Magic::Response,
                        _ => {
                            src.advance(HEADER_LEN.min(src.len()));
                            return Err(Error::InvalidMagic);
                        },
                    };

                    let code = u32::from_be_bytes(src[4..8].try_into().unwrap());
                    let size = u32::from_be_bytes(src[8..12].try_into().unwrap());

                    let command = match Command::from_code(code) {
                        Some(c) => c,
                        None => {
                            src.advance(HEADER_LEN);
                            return Err(Error::InvalidCommand);
                        },
                    };

                    // spec.md §6: the arg region caps at `max_body_size`,
                    // but a trailing data payload is streamed and not
                    // limited by that cap. Commands with no payload have no
                    // distinct region to defer the check to, so reject them
                    // here before buffering the rest of the frame; commands
                    // that carry one are re-checked in `parse_args`, which
                    // only measures the bytes preceding the payload.
                    if !command.descriptor().carries_data && size as usize > self.max_body_size {
                        src.advance(HEADER_LEN);
                        return Err(Error::InvalidPacket);
                    }

                    src.advance(HEADER_LEN);
                    self.state = State::Body {
                        magic,
                        command,
                        remaining: size as usize,
                    };
                },
                State::Body {
                    magic,
                    command,
                    remaining,
                } => {
                    if src.len() < *remaining {
                        return Ok(None);
                    }

                    let (magic, command, remaining) = (*magic, *command, *remaining);
                    let body = src.split_to(remaining).freeze();
                    self.state = State::Header;

                    let args = parse_args(command, body, self.max_body_size)?;
                    let packet = Packet::new(magic, command, args)?;
                    return Ok(Some(ProtocolEvent::Packet(packet)));
                },
                State::TextLine => {
                    match src
                        .iter()
                        .take(MAX_TEXT_LINE)
                        .tuple_windows()
                        .find_position(|&(&a, &b)| a == b'\r' && b == b'\n')
                    {
                        Some((idx, _)) => {
                            let line = src.split_to(idx);
                            src.advance(2);
                            self.state = State::Header;

                            let tokens: Vec<Vec<u8>> = line
                                .split(|&b| b == b' ')
                                .filter(|tok| !tok.is_empty())
                                .map(|tok| tok.to_vec())
                                .collect();

                            return Ok(Some(ProtocolEvent::AdminLine(tokens)));
                        },
                        None => {
                            if src.len() >= MAX_TEXT_LINE {
                                self.state = State::DiscardToNewline;
                                return Err(Error::InvalidPacket);
                            }
                            return Ok(None);
                        },
                    }
                },
                State::DiscardToNewline => {
                    if src.is_empty() {
                        return Ok(None);
                    }

                    if let Some((idx, _)) = src
                        .iter()
                        .tuple_windows()
                        .find_position(|&(&a, &b)| a == b'\r' && b == b'\n')
                    {
                        src.advance(idx + 2);
                        self.state = State::Header;
                    } else {
                        let keep = src.len() - 1;
                        src.advance(keep);
                    }

                    return Ok(Some(ProtocolEvent::Discarded));
                },
            }
        }
    }
}

fn parse_args(command: Command, mut body: Bytes, max_body_size: usize) -> Result<Vec<Bytes>, Error> {
    let descriptor = command.descriptor();
    let total = descriptor.total_args();

    if total == 0 {
        return if body.is_empty() {
            Ok(vec![])
        } else {
            Err(Error::InvalidPacket)
        };
    }

    let mut args = Vec::with_capacity(total);
    let mut arg_region_len = 0usize;
    for _ in 0..total - 1 {
        match body.iter().position(|&b| b == 0) {
            Some(pos) => {
                args.push(body.split_to(pos));
                body.advance(1);
                arg_region_len += pos + 1;
            },
            None => return Err(Error::InvalidPacket),
        }
    }

    // The header-time check already bounded commands with no trailing
    // payload; this is the deferred check for ones that carry one (§6): the
    // payload itself (`body`, now just the final argument) is exempt.
    if descriptor.carries_data && arg_region_len > max_body_size {
        return Err(Error::InvalidPacket);
    }

    args.push(body);

    Ok(args)
}

/// Serializes a packet into `dst` per the wire format in spec.md §4.1.
/// TEXT-magic packets have no place on the wire (the admin console is
/// reply-as-lines, produced separately by `crate::admin`), so encoding one
/// is a programmer error.
pub fn encode(packet: &Packet, dst: &mut BytesMut) -> Result<(), Error> {
    if packet.magic == Magic::Text {
        return Err(Error::UnknownState("cannot encode a TEXT-magic packet"));
    }

    let region_len = packet.region_len();
    dst.reserve(HEADER_LEN + region_len);
    dst.extend_from_slice(&packet.magic.bytes());
    dst.extend_from_slice(&packet.command.code().to_be_bytes());
    dst.extend_from_slice(&(region_len as u32).to_be_bytes());

    let n = packet.args.len();
    for (i, arg) in packet.args.iter().enumerate() {
        dst.extend_from_slice(arg);
        if i + 1 != n {
            dst.extend_from_slice(&[0]);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use tokio_stream::StreamExt;
    use tokio_util::codec::FramedRead;

    use super::*;

    #[tokio::test]
    async fn round_trips_submit_job() {
        let packet = Packet::new(
            Magic::Request,
            Command::SubmitJob,
            vec![Bytes::from("reverse"), Bytes::from(""), Bytes::from("abc")],
        )
        .unwrap();

        let mut buf = BytesMut::new();
        encode(&packet, &mut buf).unwrap();

        let decoder = Decoder::new(1024 * 1024);
        let mut framed = FramedRead::new(buf.as_ref(), decoder);
        let got = framed.next().await.unwrap().unwrap();
        assert_eq!(got, ProtocolEvent::Packet(packet));
    }

    #[tokio::test]
    async fn streams_across_multiple_reads() {
        let packet = Packet::new(
            Magic::Response,
            Command::JobAssign,
            vec![Bytes::from("H:1"), Bytes::from("reverse"), Bytes::from("abc")],
        )
        .unwrap();
        let mut buf = BytesMut::new();
        encode(&packet, &mut buf).unwrap();

        let mut decoder = Decoder::new(1024 * 1024);
        let mut src = BytesMut::new();

        // Feed one byte at a time; decoder must keep returning Ok(None)
        // until the full packet has arrived (I4: packet round-trip even
        // when streamed byte-by-byte).
        use tokio_util::codec::Decoder as _;
        let mut result = None;
        for byte in buf.iter() {
            src.extend_from_slice(&[*byte]);
            if let Some(evt) = decoder.decode(&mut src).unwrap() {
                result = Some(evt);
                break;
            }
        }
        assert_eq!(result.unwrap(), ProtocolEvent::Packet(packet));
    }

    #[tokio::test]
    async fn rejects_bad_magic() {
        let mut src = BytesMut::new();
        src.extend_from_slice(b"\0BAD");
        src.extend_from_slice(&1u32.to_be_bytes());
        src.extend_from_slice(&0u32.to_be_bytes());

        let mut decoder = Decoder::new(1024 * 1024);
        use tokio_util::codec::Decoder as _;
        let err = decoder.decode(&mut src).unwrap_err();
        assert!(matches!(err, Error::InvalidMagic));
    }

    #[tokio::test]
    async fn admin_line_splits_on_spaces_collapsing_runs() {
        let mut src = BytesMut::new();
        src.extend_from_slice(b"maxqueue   reverse  10\r\n");

        let mut decoder = Decoder::new(1024 * 1024);
        use tokio_util::codec::Decoder as _;
        let evt = decoder.decode(&mut src).unwrap().unwrap();
        assert_eq!(
            evt,
            ProtocolEvent::AdminLine(vec![
                b"maxqueue".to_vec(),
                b"reverse".to_vec(),
                b"10".to_vec(),
            ])
        );
    }

    #[tokio::test]
    async fn data_payload_is_not_capped_by_max_body_size() {
        // §6: the arg-region cap applies to the args preceding a trailing
        // data payload, never to the payload itself.
        let small_cap = 64;
        let payload = Bytes::from(vec![b'x'; small_cap * 4]);
        let packet = Packet::new(
            Magic::Request,
            Command::SubmitJob,
            vec![Bytes::from("reverse"), Bytes::from(""), payload.clone()],
        )
        .unwrap();

        let mut buf = BytesMut::new();
        encode(&packet, &mut buf).unwrap();

        let decoder = Decoder::new(small_cap);
        let mut framed = FramedRead::new(buf.as_ref(), decoder);
        let got = framed.next().await.unwrap().unwrap();
        assert_eq!(got, ProtocolEvent::Packet(packet));
    }

    #[tokio::test]
    async fn oversized_arg_region_is_still_rejected() {
        let small_cap = 8;
        let packet = Packet::new(
            Magic::Request,
            Command::SubmitJob,
            vec![Bytes::from("a-much-longer-function-name-than-the-cap"), Bytes::from(""), Bytes::from("x")],
        )
        .unwrap();

        let mut buf = BytesMut::new();
        encode(&packet, &mut buf).unwrap();

        let mut decoder = Decoder::new(small_cap);
        use tokio_util::codec::Decoder as _;
        let mut src = BytesMut::from(&buf[..]);
        let err = decoder.decode(&mut src).unwrap_err();
        assert!(matches!(err, Error::InvalidPacket));
    }

    #[test]
    fn encode_rejects_text_magic() {
        let packet = Packet {
            magic: Magic::Text,
            command: Command::Noop,
            args: vec![],
        };
        let mut buf = BytesMut::new();
        assert!(encode(&packet, &mut buf).is_err());
    }
}
