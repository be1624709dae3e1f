pub mod packet_reader;
pub mod packet_writer;
pub mod writers;

use crate::protocol::mysql::constants;
use crate::protocol::mysql::constants::HeaderInfo;

use std::ops::Deref;

use winnow::binary::{le_u24, le_u8};
use winnow::error::{ErrMode, ErrorKind, InputError};
use winnow::token::{literal, take};
use winnow::{IResult, Parser, Partial};

pub(crate) type Stream<'a> = Partial<&'a [u8]>;

/// One logical MySQL packet. Payloads of `MAX_PAYLOAD_LEN` continue in the
/// frame that follows; the parser folds such continuation frames back into a
/// single `Packet`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet(Vec<u8>);

impl Packet {
    fn extend(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }

    pub fn is_ok_packet(&self) -> bool {
        !self.0.is_empty() && self.0[0] == HeaderInfo::OKHeader as u8
    }

    pub fn is_err_packet(&self) -> bool {
        !self.0.is_empty() && self.0[0] == HeaderInfo::ErrHeader as u8
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for Packet {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        self.as_ref()
    }
}

/// A frame whose length field is pinned at `MAX_PAYLOAD_LEN`; the logical
/// packet continues in the next frame.
fn full_packet<'a>(i: Stream<'a>) -> IResult<Stream<'a>, (u8, &'a [u8])> {
    let (i, _) = literal([0xff, 0xff, 0xff]).parse_peek(i)?;
    let (i, seq) = le_u8.parse_peek(i)?;
    let (i, bytes) = take(constants::MAX_PAYLOAD_LEN).parse_peek(i)?;
    Ok((i, (seq, bytes)))
}

/// A single frame: u24 LE length, sequence id, payload.
pub fn one_packet<'a>(i: Stream<'a>) -> IResult<Stream<'a>, (u8, &'a [u8])> {
    let (i, length) = le_u24.parse_peek(i)?;
    let (i, seq) = le_u8.parse_peek(i)?;
    let (i, bytes) = take(length).parse_peek(i)?;
    Ok((i, (seq, bytes)))
}

/// Parses one logical packet off the front of `i`, folding continuation
/// frames. Returns `Incomplete` until the whole packet is buffered; a broken
/// sequence-id chain across continuation frames is a hard error.
pub fn packet(i: &[u8]) -> IResult<Stream<'_>, (u8, Packet)> {
    let mut input = Partial::new(i);
    let mut acc: Option<(u8, Packet)> = None;
    loop {
        match full_packet(input) {
            Ok((rest, (seq, bytes))) => {
                match acc.as_mut() {
                    Some((prev_seq, pkt)) => {
                        if seq != prev_seq.wrapping_add(1) {
                            return Err(ErrMode::Cut(InputError::new(input, ErrorKind::Verify)));
                        }
                        *prev_seq = seq;
                        pkt.extend(bytes);
                    }
                    None => acc = Some((seq, Packet(bytes.to_vec()))),
                }
                input = rest;
            }
            Err(ErrMode::Backtrack(_)) => break,
            Err(e) => return Err(e),
        }
    }
    let (rest, (seq, bytes)) = one_packet(input)?;
    let pkt = match acc {
        Some((prev_seq, mut pkt)) => {
            if seq != prev_seq.wrapping_add(1) {
                return Err(ErrMode::Cut(InputError::new(input, ErrorKind::Verify)));
            }
            pkt.extend(bytes);
            pkt
        }
        None => Packet(bytes.to_vec()),
    };
    Ok((rest, (seq, pkt)))
}

#[cfg(test)]
mod tests {
    use crate::protocol::mysql::packet::*;

    #[test]
    fn test_one_ping() {
        let one_pkg_rs = one_packet(Partial::new(&[0x01, 0, 0, 0, 0x10][..]));
        assert!(one_pkg_rs.is_ok());
        let pkg = one_pkg_rs.unwrap().1;
        assert_eq!(pkg.1, &[0x10]);
    }

    #[test]
    fn test_ping() {
        let p = packet(&[0x01, 0, 0, 0, 0x10]).unwrap().1;
        assert_eq!(p.0, 0);
        assert_eq!(&*p.1, &[0x10][..]);
    }

    #[test]
    fn test_incomplete_frame() {
        let rs = packet(&[0x08, 0, 0, 0, 0x03, b'S', b'E']);
        assert!(matches!(rs, Err(ErrMode::Incomplete(_))));
    }

    #[test]
    fn test_two_frames_consume_one() {
        let bytes = [0x01, 0, 0, 0, 0x0e, 0x01, 0, 0, 0, 0x0e];
        let (rest, (seq, pkt)) = packet(&bytes).unwrap();
        assert_eq!(seq, 0);
        assert_eq!(&*pkt, &[0x0e][..]);
        assert_eq!(rest.into_inner().len(), 5);
    }

    #[test]
    fn test_long_exact() {
        let mut data = vec![0xff, 0xff, 0xff, 0];
        data.extend(&[0; constants::MAX_PAYLOAD_LEN][..]);
        data.push(0x00);
        data.push(0x00);
        data.push(0x00);
        data.push(1);

        let (rest, p) = packet(&data[..]).unwrap();
        assert!(rest.into_inner().is_empty());
        assert_eq!(p.0, 1);
        assert_eq!(p.1.len(), constants::MAX_PAYLOAD_LEN);
    }

    #[test]
    fn test_long_more() {
        let mut data = vec![0xff, 0xff, 0xff, 0];
        data.extend(&[0; constants::MAX_PAYLOAD_LEN][..]);
        data.push(0x01);
        data.push(0x00);
        data.push(0x00);
        data.push(1);
        data.push(0x10);

        let (rest, p) = packet(&data[..]).unwrap();
        assert!(rest.into_inner().is_empty());
        assert_eq!(p.0, 1);
        assert_eq!(p.1.len(), constants::MAX_PAYLOAD_LEN + 1);
        assert_eq!(
            &p.1[..constants::MAX_PAYLOAD_LEN],
            &[0; constants::MAX_PAYLOAD_LEN][..]
        );
        assert_eq!(&p.1[constants::MAX_PAYLOAD_LEN..], &[0x10]);
    }

    #[test]
    fn test_continuation_seq_break_is_fatal() {
        let mut data = vec![0xff, 0xff, 0xff, 0];
        data.extend(&[0; constants::MAX_PAYLOAD_LEN][..]);
        data.push(0x01);
        data.push(0x00);
        data.push(0x00);
        data.push(7); // continuation must carry seq 1
        data.push(0x10);

        let rs = packet(&data[..]);
        assert!(matches!(rs, Err(ErrMode::Cut(_))));
    }
}
