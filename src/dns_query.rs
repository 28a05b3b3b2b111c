use crate::{
    write_u16_be, write_u32_be, DnsError, DnsMessageHeader, DnsName, DnsQuestion, DnsType,
};
use fixed_buffer::FixedBuf;

/// Bytes of the EDNS OPT pseudo-record appended to every query: an empty root
/// name, the OPT type, the advertised payload size in the class field, four
/// zero TTL/extension bytes and an empty RDATA.
const OPT_RECORD_SIZE: usize = 1 + 2 + 2 + 4 + 2;

/// Exact size of a query for `name`: header, question and OPT record.
#[must_use]
pub fn query_size(name: &DnsName) -> usize {
    DnsMessageHeader::LEN + name.label_len() + 1 + 4 + OPT_RECORD_SIZE
}

/// Forges one DNS query: a header with `RD` set, a single question and an
/// [EDNS](https://datatracker.ietf.org/doc/html/rfc6891) OPT record
/// advertising `accepted_payload_size`.  Returns the number of bytes written.
///
/// # Errors
/// Returns `DnsError::BufferFull` when `out` cannot hold the whole query.
pub fn write_query<const N: usize>(
    out: &mut FixedBuf<N>,
    query_id: u16,
    query_type: DnsType,
    accepted_payload_size: u16,
    hostname_dn: &DnsName,
) -> Result<usize, DnsError> {
    if query_size(hostname_dn) > N - out.len() {
        return Err(DnsError::BufferFull);
    }
    let before = out.len();
    DnsMessageHeader::query(query_id).write(out)?;
    DnsQuestion::new(hostname_dn.clone(), query_type).write(out)?;
    // OPT pseudo-record: root name, TYPE=OPT, CLASS carries the payload size.
    out.write_bytes(&[0]).map_err(|_| DnsError::BufferFull)?;
    write_u16_be(out, DnsType::OPT.num())?;
    write_u16_be(out, accepted_payload_size)?;
    write_u32_be(out, 0)?;
    write_u16_be(out, 0)?;
    Ok(out.len() - before)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns_name::read_name;

    #[test]
    fn test_write_query() {
        let name = DnsName::new("example.org").unwrap();
        let mut out: FixedBuf<512> = FixedBuf::new();
        let len = write_query(&mut out, 0x1234, DnsType::A, 512, &name).unwrap();
        assert_eq!(query_size(&name), len);
        assert_eq!(12 + name.label_len() + 1 + 4 + 11, len);
        let bytes = out.readable();
        let header = DnsMessageHeader::parse(bytes).unwrap();
        assert_eq!(0x1234, header.id);
        assert!(!header.is_response);
        assert!(header.recursion_desired);
        assert_eq!(1, header.question_count);
        assert_eq!(1, header.additional_count);
        assert_eq!(0, header.answer_count);
        // The encoded question recovers the name exactly.
        let (question, used) = DnsQuestion::read(bytes, 12).unwrap();
        assert_eq!(name, question.name);
        assert_eq!(DnsType::A, question.typ);
        let (reread, _) = read_name(bytes, 12).unwrap();
        assert_eq!(name, reread);
        // OPT record advertises the payload size in its class field.
        let opt = &bytes[12 + used..];
        assert_eq!(
            &[0, 0, 41, 2, 0, 0, 0, 0, 0, 0, 0],
            opt,
            "root name, TYPE=41, CLASS=512, TTL=0, RDLEN=0"
        );
    }

    #[test]
    fn test_write_query_buffer_too_small() {
        let name = DnsName::new("example.org").unwrap();
        let mut out: FixedBuf<16> = FixedBuf::new();
        assert_eq!(
            DnsError::BufferFull,
            write_query(&mut out, 1, DnsType::A, 512, &name).unwrap_err()
        );
        assert!(out.is_empty());
    }
}
