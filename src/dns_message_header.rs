use crate::{write_u16_be, DnsError, DnsResponseCode};
use fixed_buffer::FixedBuf;

/// > 4.1.1. Header section format
/// >
/// > The header contains the following fields:
/// >
/// > ```text
/// >                                 1  1  1  1  1  1
/// >   0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
/// > +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// > |                      ID                       |
/// > +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// > |QR|   Opcode  |AA|TC|RD|RA|   Z    |   RCODE   |
/// > +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// > |                    QDCOUNT                    |
/// > +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// > |                    ANCOUNT                    |
/// > +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// > |                    NSCOUNT                    |
/// > +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// > |                    ARCOUNT                    |
/// > +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// > ```
///
/// <https://datatracker.ietf.org/doc/html/rfc1035#section-4.1.1>
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DnsMessageHeader {
    pub id: u16,
    /// `QR`: query (`false`) or response (`true`).
    pub is_response: bool,
    pub op_code: u8,
    pub authoritative_answer: bool,
    /// `TC`: the message was truncated by the transmission channel.
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub response_code: DnsResponseCode,
    pub question_count: u16,
    pub answer_count: u16,
    pub name_server_count: u16,
    pub additional_count: u16,
}
impl DnsMessageHeader {
    pub const LEN: usize = 12;

    /// # Errors
    /// Returns an error when `buf` holds fewer than 12 bytes.
    pub fn parse(buf: &[u8]) -> Result<Self, DnsError> {
        if buf.len() < Self::LEN {
            return Err(DnsError::Truncated);
        }
        Ok(Self {
            id: u16::from_be_bytes([buf[0], buf[1]]),
            is_response: (buf[2] >> 7) == 1,
            op_code: (buf[2] >> 3) & 0xF,
            authoritative_answer: ((buf[2] >> 2) & 1) == 1,
            truncated: ((buf[2] >> 1) & 1) == 1,
            recursion_desired: (buf[2] & 1) == 1,
            recursion_available: (buf[3] >> 7) == 1,
            response_code: DnsResponseCode::new(buf[3] & 0xF),
            question_count: u16::from_be_bytes([buf[4], buf[5]]),
            answer_count: u16::from_be_bytes([buf[6], buf[7]]),
            name_server_count: u16::from_be_bytes([buf[8], buf[9]]),
            additional_count: u16::from_be_bytes([buf[10], buf[11]]),
        })
    }

    /// # Errors
    /// Returns an error when `out` has no room for the 12 header bytes.
    pub fn write<const N: usize>(&self, out: &mut FixedBuf<N>) -> Result<(), DnsError> {
        write_u16_be(out, self.id)?;
        let b = (u8::from(self.is_response) << 7)
            | (self.op_code << 3)
            | (u8::from(self.authoritative_answer) << 2)
            | (u8::from(self.truncated) << 1)
            | u8::from(self.recursion_desired);
        out.write_bytes(&[b]).map_err(|_| DnsError::BufferFull)?;
        let b = (u8::from(self.recursion_available) << 7) | self.response_code.num();
        out.write_bytes(&[b]).map_err(|_| DnsError::BufferFull)?;
        for count in [
            self.question_count,
            self.answer_count,
            self.name_server_count,
            self.additional_count,
        ] {
            write_u16_be(out, count)?;
        }
        Ok(())
    }

    /// A query header with `RD` set, the flag layout every outgoing query uses.
    #[must_use]
    pub fn query(id: u16) -> Self {
        Self {
            id,
            is_response: false,
            op_code: 0,
            authoritative_answer: false,
            truncated: false,
            recursion_desired: true,
            recursion_available: false,
            response_code: DnsResponseCode::NoError,
            question_count: 1,
            answer_count: 0,
            name_server_count: 0,
            additional_count: 1,
        }
    }
}
