use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(unix)]
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::memory::Memory;

/// `u32 total size` + `u8 opcode/status`.
const HEADER_LEN: usize = 5;

/// Largest reply frame accepted. Memory replies carry at most 8 bytes and
/// identification strings a few hundred.
pub const MAX_REPLY_LEN: usize = 0x1_0000;

/// Status byte the emulator answers with when an access is refused.
pub const STATUS_FAIL: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Read8 = 0x00,
    Read16 = 0x01,
    Read32 = 0x02,
    Read64 = 0x03,
    Write8 = 0x04,
    Write16 = 0x05,
    Write32 = 0x06,
    Write64 = 0x07,
    Title = 0x0B,
    Id = 0x0C,
    Uuid = 0x0D,
    GameVersion = 0x0E,
}

/// Identification strings reported by the emulator for the running game.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameInfo {
    pub title: String,
    pub id: String,
    pub uuid: String,
    pub version: String,
}

/// Any bidirectional byte stream a [`Pine`] can run over.
pub trait Stream: Read + Write + Send {}

impl<T: Read + Write + Send> Stream for T {}

/// A connection to a PINE server.
///
/// Requests are strictly sequential. Each one writes a framed request and
/// blocks until the whole framed reply has been read, so the stream never
/// holds a partial message between calls.
pub struct Pine<S> {
    stream: S,
}

#[cfg(unix)]
impl Pine<UnixStream> {
    pub fn connect_unix(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::info!("connecting to PINE socket {}", path.display());
        Ok(Self::new(UnixStream::connect(path)?))
    }
}

impl Pine<TcpStream> {
    pub fn connect_tcp(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        log::info!("connected to PINE server at {}", stream.peer_addr()?);
        Ok(Self::new(stream))
    }
}

impl<S: Read + Write> Pine<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Sends one request and returns the reply payload (without its header).
    ///
    /// The reply body is always drained, even for a failed status, so the next
    /// request starts on a frame boundary. A header declaring more than
    /// [`MAX_REPLY_LEN`] bytes means the stream is out of step and is
    /// reported as malformed without reading further.
    fn command(&mut self, opcode: Opcode, address: u32, payload: &[u8]) -> Result<Vec<u8>> {
        let mut request = Vec::with_capacity(HEADER_LEN + payload.len());
        request.write_u32::<LittleEndian>((HEADER_LEN + payload.len()) as u32)?;
        request.write_u8(opcode as u8)?;
        request.extend_from_slice(payload);
        self.stream.write_all(&request)?;
        self.stream.flush()?;

        let size = self.stream.read_u32::<LittleEndian>()? as usize;
        let status = self.stream.read_u8()?;
        if size > MAX_REPLY_LEN {
            log::warn!("{:?} reply declares {} bytes, stream out of step", opcode, size);
            return Err(Error::Malformed {
                opcode,
                expected: MAX_REPLY_LEN,
                got: size,
            });
        }
        let mut reply = vec![0u8; size.saturating_sub(HEADER_LEN)];
        self.stream.read_exact(&mut reply)?;

        if status != 0 {
            log::debug!("{:?} at 0x{:08X} refused: status 0x{:02X}", opcode, address, status);
            return Err(Error::Status {
                opcode,
                address,
                status,
            });
        }

        log::trace!("{:?} 0x{:08X} -> {} bytes", opcode, address, reply.len());
        Ok(reply)
    }

    fn peek(&mut self, opcode: Opcode, address: u32, width: usize) -> Result<Vec<u8>> {
        let mut payload = [0u8; 4];
        LittleEndian::write_u32(&mut payload, address);
        let reply = self.command(opcode, address, &payload)?;
        expect_len(opcode, &reply, width)?;
        Ok(reply)
    }

    fn poke(&mut self, opcode: Opcode, address: u32, value: &[u8]) -> Result<()> {
        let mut payload = Vec::with_capacity(4 + value.len());
        payload.write_u32::<LittleEndian>(address)?;
        payload.extend_from_slice(value);
        let reply = self.command(opcode, address, &payload)?;
        expect_len(opcode, &reply, 0)
    }

    /// String replies are `u32 len` followed by `len` bytes, the last of
    /// which is a NUL terminator.
    fn query_string(&mut self, opcode: Opcode) -> Result<String> {
        let reply = self.command(opcode, 0, &[])?;
        if reply.len() < 4 {
            return Err(Error::Malformed {
                opcode,
                expected: 4,
                got: reply.len(),
            });
        }

        let declared = LittleEndian::read_u32(&reply[..4]) as usize;
        let body = &reply[4..];
        if body.len() != declared {
            return Err(Error::StringLength {
                opcode,
                declared,
                got: body.len(),
            });
        }

        let body = body.strip_suffix(&[0]).unwrap_or(body);
        Ok(String::from_utf8_lossy(body).into_owned())
    }

    pub fn title(&mut self) -> Result<String> {
        self.query_string(Opcode::Title)
    }

    pub fn id(&mut self) -> Result<String> {
        self.query_string(Opcode::Id)
    }

    pub fn uuid(&mut self) -> Result<String> {
        self.query_string(Opcode::Uuid)
    }

    pub fn game_version(&mut self) -> Result<String> {
        self.query_string(Opcode::GameVersion)
    }

    pub fn identify(&mut self) -> Result<GameInfo> {
        Ok(GameInfo {
            title: self.title()?,
            id: self.id()?,
            uuid: self.uuid()?,
            version: self.game_version()?,
        })
    }
}

fn expect_len(opcode: Opcode, reply: &[u8], expected: usize) -> Result<()> {
    if reply.len() != expected {
        return Err(Error::Malformed {
            opcode,
            expected,
            got: reply.len(),
        });
    }
    Ok(())
}

impl<S: Read + Write> Memory for Pine<S> {
    fn read_u8(&mut self, address: u32) -> Result<u8> {
        Ok(self.peek(Opcode::Read8, address, 1)?[0])
    }

    fn read_u16(&mut self, address: u32) -> Result<u16> {
        Ok(LittleEndian::read_u16(&self.peek(Opcode::Read16, address, 2)?))
    }

    fn read_u32(&mut self, address: u32) -> Result<u32> {
        Ok(LittleEndian::read_u32(&self.peek(Opcode::Read32, address, 4)?))
    }

    fn read_u64(&mut self, address: u32) -> Result<u64> {
        Ok(LittleEndian::read_u64(&self.peek(Opcode::Read64, address, 8)?))
    }

    fn write_u8(&mut self, address: u32, value: u8) -> Result<()> {
        self.poke(Opcode::Write8, address, &[value])
    }

    fn write_u16(&mut self, address: u32, value: u16) -> Result<()> {
        self.poke(Opcode::Write16, address, &value.to_le_bytes())
    }

    fn write_u32(&mut self, address: u32, value: u32) -> Result<()> {
        self.poke(Opcode::Write32, address, &value.to_le_bytes())
    }

    fn write_u64(&mut self, address: u32, value: u64) -> Result<()> {
        self.poke(Opcode::Write64, address, &value.to_le_bytes())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor};

    use pretty_assertions::assert_eq;

    use super::*;

    /// Replays canned replies and records everything written to it.
    struct Scripted {
        replies: Cursor<Vec<u8>>,
        sent: Vec<u8>,
    }

    impl Scripted {
        fn new(replies: &[&[u8]]) -> Self {
            Self {
                replies: Cursor::new(replies.concat()),
                sent: Vec::new(),
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.replies.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.sent.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn reply(status: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = ((HEADER_LEN + payload.len()) as u32).to_le_bytes().to_vec();
        out.push(status);
        out.extend_from_slice(payload);
        out
    }

    fn string_reply(text: &str) -> Vec<u8> {
        let mut payload = ((text.len() + 1) as u32).to_le_bytes().to_vec();
        payload.extend_from_slice(text.as_bytes());
        payload.push(0);
        reply(0, &payload)
    }

    #[test]
    fn read32_frames_request_and_decodes_little_endian() {
        let mut pine = Pine::new(Scripted::new(&[&reply(0, &[0x78, 0x56, 0x34, 0x12])]));
        assert_eq!(pine.read_u32(0x0056_CBD0).unwrap(), 0x1234_5678);
        assert_eq!(
            pine.into_inner().sent,
            vec![0x09, 0x00, 0x00, 0x00, 0x02, 0xD0, 0xCB, 0x56, 0x00]
        );
    }

    #[test]
    fn write32_sends_address_then_value() {
        let mut pine = Pine::new(Scripted::new(&[&reply(0, &[])]));
        pine.write_u32(0x0010_0000, 0xDEAD_BEEF).unwrap();
        assert_eq!(
            pine.into_inner().sent,
            vec![
                0x0D, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x10, 0x00, 0xEF, 0xBE, 0xAD, 0xDE
            ]
        );
    }

    #[test]
    fn f32_uses_the_32_bit_opcode() {
        let mut pine = Pine::new(Scripted::new(&[&reply(0, &1.5f32.to_bits().to_le_bytes())]));
        assert_eq!(pine.read_f32(0x100).unwrap(), 1.5);
        assert_eq!(pine.into_inner().sent[4], Opcode::Read32 as u8);
    }

    #[test]
    fn failed_status_is_an_error_and_keeps_framing() {
        let mut pine = Pine::new(Scripted::new(&[
            &reply(STATUS_FAIL, &[]),
            &reply(0, &[0x2A]),
        ]));
        match pine.read_u8(0xFFFF_FFF0) {
            Err(Error::Status {
                opcode: Opcode::Read8,
                address: 0xFFFF_FFF0,
                status: STATUS_FAIL,
            }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(pine.read_u8(0x10).unwrap(), 0x2A);
    }

    #[test]
    fn short_reply_is_malformed() {
        let mut pine = Pine::new(Scripted::new(&[&reply(0, &[1, 2])]));
        assert!(matches!(
            pine.read_u32(0),
            Err(Error::Malformed {
                opcode: Opcode::Read32,
                expected: 4,
                got: 2
            })
        ));
    }

    #[test]
    fn oversized_reply_header_is_rejected_before_allocating() {
        let garbage = [0xF0, 0xFF, 0xFF, 0xFF, 0x00, 0x12, 0x34];
        let mut pine = Pine::new(Scripted::new(&[&garbage]));
        assert!(matches!(
            pine.read_u64(0x0010_0000),
            Err(Error::Malformed {
                opcode: Opcode::Read64,
                expected: MAX_REPLY_LEN,
                got: 0xFFFF_FFF0
            })
        ));
    }

    #[test]
    fn identify_strips_terminators() {
        let title = string_reply("Mercenaries");
        let id = string_reply("SLUS-21089");
        let uuid = string_reply("c3d0b6e1");
        let version = string_reply("1.00");
        let mut pine = Pine::new(Scripted::new(&[&title, &id, &uuid, &version]));
        assert_eq!(
            pine.identify().unwrap(),
            GameInfo {
                title: "Mercenaries".into(),
                id: "SLUS-21089".into(),
                uuid: "c3d0b6e1".into(),
                version: "1.00".into(),
            }
        );
    }

    #[test]
    fn string_length_mismatch_is_reported() {
        let mut payload = 10u32.to_le_bytes().to_vec();
        payload.extend_from_slice(b"abc\0");
        let mut pine = Pine::new(Scripted::new(&[&reply(0, &payload)]));
        assert!(matches!(
            pine.title(),
            Err(Error::StringLength {
                declared: 10,
                got: 4,
                ..
            })
        ));
    }

    #[test]
    fn read_bytes_uses_wide_then_narrow_reads() {
        let wide = reply(0, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let narrow: Vec<Vec<u8>> = (9..=11).map(|b| reply(0, &[b])).collect();
        let mut pine = Pine::new(Scripted::new(&[&wide, &narrow[0], &narrow[1], &narrow[2]]));
        assert_eq!(
            pine.read_bytes(0x2000, 11).unwrap(),
            (1..=11).collect::<Vec<u8>>()
        );

        let sent = pine.into_inner().sent;
        let opcodes: Vec<u8> = sent.chunks(9).map(|req| req[4]).collect();
        assert_eq!(opcodes, vec![0x03, 0x00, 0x00, 0x00]);
        assert_eq!(&sent[9 + 5..9 + 9], &0x2008u32.to_le_bytes());
    }
}
