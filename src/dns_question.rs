use crate::dns_name::read_name;
use crate::{write_u16_be, DnsError, DnsName, DnsType, INTERNET_CLASS};
use fixed_buffer::FixedBuf;

/// > The question section is used to carry the "question" in most queries, i.e., the parameters
/// > that define what is being asked.  The section contains QDCOUNT (usually 1) entries, each of
/// > the following format:
/// >
/// > ```text
/// >                                 1  1  1  1  1  1
/// >   0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
/// > +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// > |                                               |
/// > /                     QNAME                     /
/// > /                                               /
/// > +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// > |                     QTYPE                     |
/// > +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// > |                     QCLASS                    |
/// > +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// > ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DnsQuestion {
    pub name: DnsName,
    pub typ: DnsType,
    pub class: u16,
}
impl DnsQuestion {
    /// Reads the question starting at `packet[start]` and returns it with the
    /// number of bytes it occupied.
    ///
    /// # Errors
    /// Returns an error when the name is malformed or the packet is short.
    pub fn read(packet: &[u8], start: usize) -> Result<(Self, usize), DnsError> {
        let (name, name_len) = read_name(packet, start)?;
        let rest = start + name_len;
        if rest + 4 > packet.len() {
            return Err(DnsError::Truncated);
        }
        let typ = DnsType::new(u16::from_be_bytes([packet[rest], packet[rest + 1]]));
        let class = u16::from_be_bytes([packet[rest + 2], packet[rest + 3]]);
        Ok((Self { name, typ, class }, name_len + 4))
    }

    /// # Errors
    /// Returns an error when `out` has no room for the question.
    pub fn write<const N: usize>(&self, out: &mut FixedBuf<N>) -> Result<(), DnsError> {
        self.name.write(out)?;
        write_u16_be(out, self.typ.num())?;
        write_u16_be(out, self.class)?;
        Ok(())
    }

    #[must_use]
    pub fn new(name: DnsName, typ: DnsType) -> Self {
        Self {
            name,
            typ,
            class: INTERNET_CLASS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_round_trip() {
        let question = DnsQuestion::new(DnsName::new("example.org").unwrap(), DnsType::AAAA);
        let mut out: FixedBuf<32> = FixedBuf::new();
        question.write(&mut out).unwrap();
        assert_eq!(17, out.len());
        let (read, used) = DnsQuestion::read(out.readable(), 0).unwrap();
        assert_eq!(question, read);
        assert_eq!(17, used);
    }

    #[test]
    fn test_read_rejects_short_packet() {
        let mut out: FixedBuf<32> = FixedBuf::new();
        DnsQuestion::new(DnsName::new("a").unwrap(), DnsType::A)
            .write(&mut out)
            .unwrap();
        let bytes = out.readable();
        assert_eq!(
            DnsError::Truncated,
            DnsQuestion::read(&bytes[..bytes.len() - 1], 0).unwrap_err()
        );
    }
}
