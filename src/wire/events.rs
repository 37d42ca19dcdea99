use super::packet::Packet;

/// An item produced by the codec's decode stream. Mirrors the teacher's
/// `BeanstalkClientEvent`, but a fully-framed binary `Packet` replaces the
/// `PutChunk`/`PutEnd` split since the data payload is buffered whole by
/// this codec (see `wire::codec`'s module doc).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProtocolEvent {
    /// A fully decoded binary packet.
    Packet(Packet),
    /// One line of the admin TEXT console, already split on whitespace.
    AdminLine(Vec<Vec<u8>>),
    /// Part of the input was discarded after a framing error while the
    /// codec resynchronizes on the next CRLF.
    Discarded,
}
