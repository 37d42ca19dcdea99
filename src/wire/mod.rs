use events::ProtocolEvent;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{self, Framed};

pub mod codec;
pub mod command;
pub mod events;
pub mod message;
pub mod packet;

pub use command::{Command, Descriptor, Magic};
pub use message::{Request, Response};
pub use packet::Packet;

/// Wraps a byte stream in the packet codec, exactly as the teacher's
/// `wire::framed` wraps a beanstalkd connection in its line codec.
pub fn framed<T: AsyncRead + AsyncWrite>(
    stream: T,
    max_body_size: usize,
) -> Framed<T, Codec> {
    Framed::new(stream, Codec::new(max_body_size))
}

#[derive(Debug)]
pub struct Codec {
    inner: codec::Decoder,
}

impl Codec {
    pub fn new(max_body_size: usize) -> Self {
        Codec {
            inner: codec::Decoder::new(max_body_size),
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Codec::new(1024 * 1024)
    }
}

impl codec::Decoder for Codec {
    type Item = ProtocolEvent;
    type Error = crate::Error;

    fn decode(
        &mut self,
        src: &mut bytes::BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        self.inner.decode(src)
    }
}

impl codec::Encoder<Packet> for Codec {
    type Error = crate::Error;

    fn encode(
        &mut self,
        item: Packet,
        dst: &mut bytes::BytesMut,
    ) -> Result<(), Self::Error> {
        codec::encode(&item, dst)
    }
}

/// A frame the dispatch loop can write back without caring whether the
/// connection is in binary or admin TEXT mode.
#[derive(Debug)]
pub enum Outbound {
    Packet(Packet),
    /// A line of the admin console, written verbatim (caller supplies the
    /// trailing `\r\n`/`.\n` terminator).
    Text(bytes::Bytes),
}

impl From<Packet> for Outbound {
    fn from(p: Packet) -> Self {
        Outbound::Packet(p)
    }
}

impl codec::Encoder<Outbound> for Codec {
    type Error = crate::Error;

    fn encode(
        &mut self,
        item: Outbound,
        dst: &mut bytes::BytesMut,
    ) -> Result<(), Self::Error> {
        match item {
            Outbound::Packet(p) => codec::encode(&p, dst),
            Outbound::Text(line) => {
                dst.extend_from_slice(&line);
                Ok(())
            },
        }
    }
}
