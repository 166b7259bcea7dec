use byteorder::{BigEndian, ByteOrder};
use nom::{be_u8, be_i8, be_u32};
use std::{cmp, fmt};
use std::net::Ipv4Addr;
use super::timestamp::{NTPShort, NTPTimestamp, parse_short, parse_timestamp};
use super::{MAXPOLL, MAXSTRAT, MINDISP, MINPOLL, PACKET_LENGTH, PRECISION};

/// Byte offset of the transmit timestamp within a serialized packet.
/// The dispatcher stamps it directly into the outgoing buffer so it is
/// the last field written before the datagram leaves.
pub const XMT_OFFSET: usize = 40;

/// Reference ID of an uncalibrated local clock ("LOCL").
pub const REFID_LOCL: u32 = 0x4c4f_434c;

#[repr(C)]
#[derive(Debug, Eq, PartialEq)]
/// Network Time Protocol Packet
pub struct NTPPacket {
  /// 2-bit field warning of leap seconds
  pub leap: u8,
  /// 3-bit integer describing current protocol version
  pub version: u8,
  /// 3-bit integer representing the mode
  pub mode: NTPMode,
  /// Indicates server stratum, or 0 for unspecified.
  pub stratum: u8,
  /// Max interval between successive messages, as exponent of 2, in seconds
  pub poll: u8,
  /// System clock precision, as exponent of 2, in seconds
  pub precision: i8,
  /// Total round-trip delay to primary reference source, in seconds.
  pub rootdelay: NTPShort,
  /// Maximum error due to clock freq tolerance, in seconds.
  pub rootdisp: NTPShort,
  /// Reference ID identifying reference source.
  /// Interpret through `refid()`, which accounts for the stratum.
  pub refid: u32,
  /// Last time system clock set or corrected
  pub reference_timestamp: NTPTimestamp,
  /// Time when request departed client for server
  pub org: NTPTimestamp,
  /// Time when request arrived at server or reply arrived at client
  pub rec: NTPTimestamp,
  /// Time when request departed client or reply departed server
  pub xmt: NTPTimestamp,
  // `dst` is intentionally omitted, as it is only used on the client,
  // and never transits the network.
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
/// NTP packet modes
pub enum NTPMode {
  Reserved = 0,
  SymmetricActive = 1,
  SymmetricPassive = 2,
  Client = 3,
  Server = 4,
  Broadcast = 5,
  NTPControl = 6,
  ReservedPrivate = 7,
}

impl NTPMode {
  /// Creates a NTPMode from the NTPPacket value.
  ///
  /// Panics if mode >= 8.
  fn new(mode: u8) -> NTPMode {
    match mode {
      0 => NTPMode::Reserved,
      1 => NTPMode::SymmetricActive,
      2 => NTPMode::SymmetricPassive,
      3 => NTPMode::Client,
      4 => NTPMode::Server,
      5 => NTPMode::Broadcast,
      6 => NTPMode::NTPControl,
      7 => NTPMode::ReservedPrivate,
      _ => panic!("Impossible NTP Mode!"),
    }
  }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
/// A reference ID interpreted through the stratum of its packet.
pub enum RefId {
  /// Four-character source code of a primary or unspecified clock.
  Code([u8; 4]),
  /// IPv4 address of the parent server of a secondary clock.
  Addr(Ipv4Addr),
}

impl fmt::Display for RefId {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match *self {
      RefId::Code(ref code) => {
        for &byte in code.iter().filter(|&&byte| byte != 0) {
          write!(f, "{}", byte as char)?;
        }
        Ok(())
      }
      RefId::Addr(ref addr) => write!(f, "{}", addr),
    }
  }
}

named!(pub parse<NTPPacket>,
  do_parse!(
    livemo: bits!(tuple!(
      take_bits!(u8,2), // leap
      take_bits!(u8,3), // version
      take_bits!(u8,3) // mode
    )) >>
    stratum: be_u8    >>
    poll: be_u8       >>
    precision: be_i8  >>
    rootdelay: parse_short >>
    rootdisp: parse_short >>
    refid: be_u32     >>
    reference_timestamp: parse_timestamp >>
    org: parse_timestamp >>
    rec: parse_timestamp >>
    xmt: parse_timestamp >>
    (NTPPacket {
      leap: livemo.0,
      version: livemo.1,
      mode: NTPMode::new(livemo.2),
      stratum: stratum,
      poll: poll,
      precision: precision,
      rootdelay: rootdelay,
      rootdisp: rootdisp,
      refid: refid,
      reference_timestamp: reference_timestamp,
      org: org,
      rec: rec,
      xmt: xmt
    }
  ))
);

impl NTPPacket {
  /// Check sanity of a NTPPacket.
  pub fn validate<T: fmt::Display>(&self, from: T) -> bool {
    // version mismatches are answered anyway; the layout is the same
    if self.version != super::VERSION {
      warn!("Packet from {} speaks version {} rather than {}.",
            from,
            self.version,
            super::VERSION);
    }

    match self.mode {
      NTPMode::Client => {}
      _ => {
        error!("Packet from {} has unsupported mode {:?}", from, self.mode);
        return false;
      }
    }

    if self.stratum > MAXSTRAT {
      warn!("Packet from {} claims stratum {}, above the maximum of {}.",
            from,
            self.stratum,
            MAXSTRAT);
    }

    return true;
  }

  /// Interprets the reference ID: a four-character source code at
  /// stratum 0 or 1, the parent server's IPv4 address above that.
  pub fn refid(&self) -> RefId {
    let octets = [(self.refid >> 24) as u8,
                  (self.refid >> 16) as u8,
                  (self.refid >> 8) as u8,
                  self.refid as u8];
    if self.stratum <= 1 {
      RefId::Code(octets)
    } else {
      RefId::Addr(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]))
    }
  }

  /// Builds the reply to a client request received at `rec`.
  ///
  /// The client's transmit timestamp comes back whole as the origin
  /// timestamp. The transmit timestamp stays zero here; the dispatcher
  /// stamps it into the serialized buffer right before sending.
  pub fn reply(&self, rec: NTPTimestamp) -> NTPPacket {
    NTPPacket {
      leap: 0,
      version: self.version,
      mode: NTPMode::Server,
      stratum: 1,
      poll: cmp::max(MINPOLL, cmp::min(MAXPOLL, self.poll)),
      precision: PRECISION,
      rootdelay: NTPShort::default(),
      rootdisp: NTPShort::from_seconds(MINDISP),
      refid: REFID_LOCL,
      reference_timestamp: rec,
      org: self.xmt,
      rec: rec,
      xmt: NTPTimestamp::default(),
    }
  }

  /// Serializes the packet into a fresh wire buffer.
  pub fn to_bytes(&self) -> [u8; PACKET_LENGTH] {
    let mut buf = [0u8; PACKET_LENGTH];
    buf[0] = self.leap << 6 | self.version << 3 | self.mode as u8;
    buf[1] = self.stratum;
    buf[2] = self.poll;
    buf[3] = self.precision as u8;
    self.rootdelay.write(&mut buf, 4);
    self.rootdisp.write(&mut buf, 8);
    BigEndian::write_u32(&mut buf[12..16], self.refid);
    self.reference_timestamp.write(&mut buf, 16);
    self.org.write(&mut buf, 24);
    self.rec.write(&mut buf, 32);
    self.xmt.write(&mut buf, XMT_OFFSET);
    buf
  }
}

#[cfg(test)]
mod tests {
  use nom::IResult;
  use std::net::Ipv4Addr;
  use super::*;
  use super::super::timestamp::{NTPShort, NTPTimestamp};
  use super::super::{MINPOLL, PRECISION};

  fn server_packet() -> NTPPacket {
    NTPPacket {
      leap: 0,
      version: 4,
      mode: NTPMode::Server,
      stratum: 1,
      poll: 6,
      precision: -20,
      rootdelay: NTPShort::default(),
      rootdisp: NTPShort {
        seconds: 0,
        fraction: 328,
      },
      refid: REFID_LOCL,
      reference_timestamp: NTPTimestamp {
        seconds: 0xdeadbeef,
        fraction: 0,
      },
      org: NTPTimestamp {
        seconds: 0x01020304,
        fraction: 0x05060708,
      },
      rec: NTPTimestamp {
        seconds: 0xdeadbeef,
        fraction: 0x80000000,
      },
      xmt: NTPTimestamp {
        seconds: 0xcafebabe,
        fraction: 0,
      },
    }
  }

  fn server_packet_bytes() -> [u8; 48] {
    [36, 1, 6, 236,
     0, 0, 0, 0,
     0, 0, 1, 72,
     76, 79, 67, 76,
     222, 173, 190, 239, 0, 0, 0, 0,
     1, 2, 3, 4, 5, 6, 7, 8,
     222, 173, 190, 239, 128, 0, 0, 0,
     202, 254, 186, 190, 0, 0, 0, 0]
  }

  #[test]
  fn packet_from_bytes() {
    match parse(&server_packet_bytes()) {
      IResult::Done(rest, pkt) => {
        assert!(rest.is_empty());
        assert_eq!(pkt, server_packet());
      }
      other => panic!("parse failed: {:?}", other),
    }
  }

  #[test]
  fn packet_to_bytes() {
    assert_eq!(&server_packet().to_bytes()[..], &server_packet_bytes()[..]);
  }

  #[test]
  fn refid_is_a_source_code_at_low_stratum() {
    let mut pkt = server_packet();
    pkt.stratum = 1;
    pkt.refid = 0x4c4f_434c;
    assert_eq!(pkt.refid(), RefId::Code(*b"LOCL"));
    assert_eq!(format!("{}", pkt.refid()), "LOCL");
  }

  #[test]
  fn refid_is_a_parent_address_at_high_stratum() {
    let mut pkt = server_packet();
    pkt.stratum = 2;
    pkt.refid = 0xc0a8_0101;
    assert_eq!(pkt.refid(), RefId::Addr(Ipv4Addr::new(192, 168, 1, 1)));
    assert_eq!(format!("{}", pkt.refid()), "192.168.1.1");
  }

  #[test]
  fn reply_echoes_the_client_transmit_as_origin() {
    let mut request = server_packet();
    request.mode = NTPMode::Client;
    request.version = 3;
    request.poll = 3;
    let rec = NTPTimestamp {
      seconds: 0xfeedface,
      fraction: 0x40000000,
    };
    let reply = request.reply(rec);
    assert_eq!(reply.leap, 0);
    assert_eq!(reply.version, 3);
    assert_eq!(reply.mode, NTPMode::Server);
    assert_eq!(reply.stratum, 1);
    assert_eq!(reply.poll, MINPOLL);
    assert_eq!(reply.precision, PRECISION);
    assert_eq!(reply.refid, REFID_LOCL);
    assert_eq!(reply.org, request.xmt);
    assert_eq!(reply.rec, rec);
    assert_eq!(reply.reference_timestamp, rec);
    assert_eq!(reply.xmt, NTPTimestamp::default());
  }

  #[test]
  fn only_client_packets_validate() {
    let mut pkt = server_packet();
    assert!(!pkt.validate("test"));
    pkt.mode = NTPMode::Client;
    assert!(pkt.validate("test"));
  }
}
