use crate::dns_name::read_name;
use crate::{
    AnswerData, AnswerItem, DnsMessageHeader, DnsName, DnsQuestion, DnsResponseCode, DnsType,
};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Instant;

/// Smallest wire size of one resource record: a one-byte root name, type,
/// class, TTL and RDLENGTH.  Bounds how many answers a datagram can announce.
pub const MIN_RECORD_SIZE: usize = 1 + 2 + 2 + 4 + 2;

/// Why a response was not usable.  These codes are the stable outcome
/// classification: they drive per-nameserver counters and, on the final
/// attempt, the resolution status reported to requesters.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ResponseError {
    /// Structurally broken packet, unexpected counts or record sizes.
    Invalid,
    /// RCODE 3: the queried name does not exist.
    NxDomain,
    /// RCODE 5: the server refused the query.
    Refused,
    /// The response does not echo exactly one question.
    QueryCountError,
    /// Well-formed response with an empty answer section.
    AncountZero,
    /// A CNAME chain is broken, or the answer section ends on a CNAME.
    CnameError,
    /// TC flag set on a non-SRV response.
    Truncated,
    /// The echoed question name differs from the one sent.
    WrongName,
    /// The answer set held no record usable by the requester.
    NoExpectedRecord,
    /// Any other RCODE.
    Error,
    /// Resolver-side failure while processing the response.
    Internal,
}

/// The parsed side of a resolution: the last response header and echoed
/// question, plus the deduplicated answer set accumulated across responses.
#[derive(Clone, Debug, Default)]
pub struct DnsResponse {
    pub header: Option<DnsMessageHeader>,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<AnswerItem>,
}
impl DnsResponse {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn read_u16(packet: &[u8], at: usize) -> Result<u16, ResponseError> {
    match packet.get(at..at + 2) {
        Some(b) => Ok(u16::from_be_bytes([b[0], b[1]])),
        None => Err(ResponseError::Invalid),
    }
}

fn read_u32(packet: &[u8], at: usize) -> Result<u32, ResponseError> {
    match packet.get(at..at + 4) {
        Some(b) => Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
        None => Err(ResponseError::Invalid),
    }
}

/// The fixed record part following the owner name.
struct RecordFixed {
    rtype: DnsType,
    class: u16,
    ttl: u32,
    rdlen: usize,
}

fn read_record_fixed(packet: &[u8], at: usize) -> Result<RecordFixed, ResponseError> {
    let fixed = RecordFixed {
        rtype: DnsType::new(read_u16(packet, at)?),
        class: read_u16(packet, at + 2)?,
        ttl: read_u32(packet, at + 4)?,
        rdlen: usize::from(read_u16(packet, at + 8)?),
    };
    if at + 10 + fixed.rdlen > packet.len() {
        return Err(ResponseError::Invalid);
    }
    Ok(fixed)
}

/// Validates one response datagram and merges its records into `response`.
///
/// On success the echoed question replaces `response.questions`, every
/// answer equivalent to a stored one refreshes that item's `last_seen` (and,
/// for SRV, its weight), new answers are appended, and — for SRV queries
/// only — additional A/AAAA records are attached as glue to the SRV item
/// naming them.  A truncated SRV response is still processed; any other
/// truncated response is rejected.
///
/// # Errors
/// Returns the [`ResponseError`] classification; `response.answers` is left
/// unchanged by responses rejected before the answer section.
pub fn validate_dns_response(
    packet: &[u8],
    max_answer_records: usize,
    response: &mut DnsResponse,
    now: Instant,
) -> Result<(), ResponseError> {
    let header = DnsMessageHeader::parse(packet).map_err(|_| ResponseError::Invalid)?;
    match header.response_code {
        DnsResponseCode::NoError => {}
        DnsResponseCode::NameError => return Err(ResponseError::NxDomain),
        DnsResponseCode::Refused => return Err(ResponseError::Refused),
        _ => return Err(ResponseError::Error),
    }
    if header.question_count != 1 {
        return Err(ResponseError::QueryCountError);
    }
    if header.answer_count == 0 {
        return Err(ResponseError::AncountZero);
    }
    if usize::from(header.answer_count) > max_answer_records {
        return Err(ResponseError::Invalid);
    }

    let mut cursor = DnsMessageHeader::LEN;
    let (question, used) =
        DnsQuestion::read(packet, cursor).map_err(|_| ResponseError::Invalid)?;
    cursor += used;
    let query_type = question.typ;
    let mut previous_dname = question.name.clone();

    // The TC flag is only meaningful once the query type is known: a
    // truncated SRV response can still be exploited.
    if query_type != DnsType::SRV && header.truncated {
        return Err(ResponseError::Truncated);
    }

    let answer_count = header.answer_count;
    let authority_count = header.name_server_count;
    let additional_count = header.additional_count;
    response.header = Some(header);
    response.questions.clear();
    response.questions.push(question);

    for i in 0..answer_count {
        let (name, used) = read_name(packet, cursor).map_err(|_| ResponseError::Invalid)?;
        // The owner must be the queried name, or the target of the last
        // CNAME seen.
        if query_type != DnsType::SRV && !name.eq_ignore_case(&previous_dname) {
            if i == 0 {
                return Err(ResponseError::Invalid);
            }
            return Err(ResponseError::CnameError);
        }
        cursor += used;
        let fixed = read_record_fixed(packet, cursor)?;
        cursor += 10;
        let mut advance = fixed.rdlen;
        let data = match fixed.rtype {
            DnsType::A => {
                if fixed.rdlen != 4 {
                    return Err(ResponseError::Invalid);
                }
                let b = &packet[cursor..cursor + 4];
                Some(AnswerData::A(Ipv4Addr::new(b[0], b[1], b[2], b[3])))
            }
            DnsType::AAAA => {
                if fixed.rdlen != 16 {
                    return Err(ResponseError::Invalid);
                }
                let mut b = [0_u8; 16];
                b.copy_from_slice(&packet[cursor..cursor + 16]);
                Some(AnswerData::AAAA(Ipv6Addr::from(b)))
            }
            DnsType::CNAME => {
                // A CNAME as the last record means no usable record can
                // follow, usually a sign of a wrong query type.
                if i + 1 == answer_count {
                    return Err(ResponseError::CnameError);
                }
                let (target, _) =
                    read_name(packet, cursor).map_err(|_| ResponseError::Invalid)?;
                previous_dname = target.clone();
                Some(AnswerData::CNAME(target))
            }
            DnsType::SRV => {
                // Priority, weight and port precede the target hostname.
                if fixed.rdlen <= 6 {
                    return Err(ResponseError::Invalid);
                }
                let priority = read_u16(packet, cursor)?;
                let weight = read_u16(packet, cursor + 2)?;
                let port = read_u16(packet, cursor + 4)?;
                let (target, target_used) =
                    read_name(packet, cursor + 6).map_err(|_| ResponseError::Invalid)?;
                advance = 6 + target_used;
                Some(AnswerData::SRV {
                    priority,
                    weight,
                    port,
                    target,
                })
            }
            DnsType::OPT | DnsType::Unknown(_) => None,
        };
        cursor += advance;
        let Some(data) = data else { continue };
        merge_answer(
            &mut response.answers,
            AnswerItem::new(name, fixed.class, fixed.ttl, data, now),
            now,
        );
    }

    if query_type == DnsType::SRV {
        cursor = skip_authority_records(packet, cursor, authority_count)?;
        parse_additional_records(packet, cursor, additional_count, response, now)?;
    }
    Ok(())
}

/// Appends `item`, or refreshes the equivalent stored record instead.  A
/// refreshed SRV record adopts the new weight.
fn merge_answer(answers: &mut Vec<AnswerItem>, item: AnswerItem, now: Instant) {
    for existing in answers.iter_mut() {
        if !existing.equivalent(&item) {
            continue;
        }
        existing.last_seen = now;
        if let (
            AnswerData::SRV { weight: stored, .. },
            AnswerData::SRV { weight: fresh, .. },
        ) = (&mut existing.data, &item.data)
        {
            *stored = *fresh;
        }
        return;
    }
    answers.push(item);
}

fn skip_authority_records(
    packet: &[u8],
    mut cursor: usize,
    count: u16,
) -> Result<usize, ResponseError> {
    for _ in 0..count {
        let (_, used) = read_name(packet, cursor).map_err(|_| ResponseError::Invalid)?;
        cursor += used;
        let fixed = read_record_fixed(packet, cursor)?;
        cursor += 10 + fixed.rdlen;
    }
    Ok(cursor)
}

/// Walks the additional section of an SRV response and pairs A/AAAA glue
/// records with the SRV answers naming them.  A glue record equal to an
/// already-attached one refreshes it; otherwise it attaches to the first SRV
/// item with a matching target and no glue yet; leftovers are dropped.
fn parse_additional_records(
    packet: &[u8],
    mut cursor: usize,
    count: u16,
    response: &mut DnsResponse,
    now: Instant,
) -> Result<(), ResponseError> {
    for _ in 0..count {
        let (name, used) = read_name(packet, cursor).map_err(|_| ResponseError::Invalid)?;
        cursor += used;
        let fixed = read_record_fixed(packet, cursor)?;
        cursor += 10;
        let data = match fixed.rtype {
            DnsType::A => {
                if fixed.rdlen != 4 {
                    return Err(ResponseError::Invalid);
                }
                let b = &packet[cursor..cursor + 4];
                AnswerData::A(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
            }
            DnsType::AAAA => {
                if fixed.rdlen != 16 {
                    return Err(ResponseError::Invalid);
                }
                let mut b = [0_u8; 16];
                b.copy_from_slice(&packet[cursor..cursor + 16]);
                AnswerData::AAAA(Ipv6Addr::from(b))
            }
            _ => {
                cursor += fixed.rdlen;
                continue;
            }
        };
        cursor += fixed.rdlen;
        let record = AnswerItem::new(name, fixed.class, fixed.ttl, data, now);

        if refresh_attached_glue(&mut response.answers, &record, now) {
            continue;
        }
        let slot = response.answers.iter().position(|existing| {
            existing.ar_item.is_none()
                && matches!(&existing.data, AnswerData::SRV { target, .. }
                    if target.eq_ignore_case(&record.name))
        });
        if let Some(i) = slot {
            response.answers[i].ar_item = Some(Box::new(record));
        }
    }
    Ok(())
}

/// Refreshes the glue already attached to some SRV item when `record`
/// duplicates it.  Glue refreshed by the current response is skipped, so a
/// repeated record can still attach to another SRV with the same target.
fn refresh_attached_glue(answers: &mut [AnswerItem], record: &AnswerItem, now: Instant) -> bool {
    for existing in answers.iter_mut() {
        let AnswerData::SRV { target, .. } = &existing.data else {
            continue;
        };
        if !target.eq_ignore_case(&record.name) {
            continue;
        }
        let Some(glue) = existing.ar_item.as_mut() else {
            continue;
        };
        if glue.rtype() != record.rtype() || glue.last_seen == now {
            continue;
        }
        if glue.address() == record.address() {
            glue.last_seen = now;
            return true;
        }
    }
    false
}

/// Finds a held SRV answer in `response` matching a `(target, port)` pair.
#[must_use]
pub fn find_srv_answer<'a>(
    response: &'a DnsResponse,
    target: &DnsName,
    port: u16,
) -> Option<&'a AnswerItem> {
    response.answers.iter().find(|item| {
        matches!(&item.data, AnswerData::SRV { port: item_port, target: item_target, .. }
            if *item_port == port && item_target.eq_ignore_case(target))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_ERROR: u16 = 0x8180;
    const NX_DOMAIN: u16 = 0x8183;
    const REFUSED: u16 = 0x8185;
    const SERVER_FAILURE: u16 = 0x8182;
    const TRUNCATED: u16 = 0x8380;

    fn push_u16(out: &mut Vec<u8>, value: u16) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    fn push_name(out: &mut Vec<u8>, name: &str) {
        let name = DnsName::new(name).unwrap();
        out.extend_from_slice(name.labels());
        out.push(0);
    }

    fn header(id: u16, flags: u16, counts: [u16; 4]) -> Vec<u8> {
        let mut out = Vec::new();
        push_u16(&mut out, id);
        push_u16(&mut out, flags);
        for count in counts {
            push_u16(&mut out, count);
        }
        out
    }

    fn push_question(out: &mut Vec<u8>, name: &str, typ: DnsType) {
        push_name(out, name);
        push_u16(out, typ.num());
        push_u16(out, crate::INTERNET_CLASS);
    }

    fn push_record(out: &mut Vec<u8>, name: &str, typ: DnsType, rdata: &[u8]) {
        push_name(out, name);
        push_u16(out, typ.num());
        push_u16(out, crate::INTERNET_CLASS);
        out.extend_from_slice(&300_u32.to_be_bytes());
        push_u16(out, u16::try_from(rdata.len()).unwrap());
        out.extend_from_slice(rdata);
    }

    fn srv_rdata(priority: u16, weight: u16, port: u16, target: &str) -> Vec<u8> {
        let mut out = Vec::new();
        push_u16(&mut out, priority);
        push_u16(&mut out, weight);
        push_u16(&mut out, port);
        push_name(&mut out, target);
        out
    }

    fn a_response(flags: u16, answers: &[(&str, [u8; 4])]) -> Vec<u8> {
        let mut out = header(
            7,
            flags,
            [1, u16::try_from(answers.len()).unwrap(), 0, 0],
        );
        push_question(&mut out, "example.org", DnsType::A);
        for (name, addr) in answers {
            push_record(&mut out, name, DnsType::A, addr);
        }
        out
    }

    fn validate(packet: &[u8], response: &mut DnsResponse) -> Result<(), ResponseError> {
        validate_dns_response(packet, 45, response, Instant::now())
    }

    #[test]
    fn test_rcode_classification() {
        let mut response = DnsResponse::new();
        for (flags, expected) in [
            (NX_DOMAIN, ResponseError::NxDomain),
            (REFUSED, ResponseError::Refused),
            (SERVER_FAILURE, ResponseError::Error),
        ] {
            let packet = a_response(flags, &[("example.org", [1, 2, 3, 4])]);
            assert_eq!(expected, validate(&packet, &mut response).unwrap_err());
        }
        assert!(response.answers.is_empty());
    }

    #[test]
    fn test_query_count_and_ancount() {
        let mut response = DnsResponse::new();
        let mut packet = header(7, NO_ERROR, [2, 1, 0, 0]);
        push_question(&mut packet, "example.org", DnsType::A);
        assert_eq!(
            ResponseError::QueryCountError,
            validate(&packet, &mut response).unwrap_err()
        );

        let mut packet = header(7, NO_ERROR, [1, 0, 0, 0]);
        push_question(&mut packet, "example.org", DnsType::A);
        assert_eq!(
            ResponseError::AncountZero,
            validate(&packet, &mut response).unwrap_err()
        );

        // Announcing more answers than the payload could carry is invalid.
        let packet = a_response(NO_ERROR, &[("example.org", [1, 2, 3, 4])]);
        assert_eq!(
            ResponseError::Invalid,
            validate_dns_response(&packet, 0, &mut response, Instant::now()).unwrap_err()
        );
    }

    #[test]
    fn test_truncated_is_fatal_except_for_srv() {
        let mut response = DnsResponse::new();
        let packet = a_response(TRUNCATED, &[("example.org", [1, 2, 3, 4])]);
        assert_eq!(
            ResponseError::Truncated,
            validate(&packet, &mut response).unwrap_err()
        );

        let mut packet = header(7, TRUNCATED, [1, 1, 0, 0]);
        push_question(&mut packet, "_http._tcp.example", DnsType::SRV);
        push_record(
            &mut packet,
            "_http._tcp.example",
            DnsType::SRV,
            &srv_rdata(10, 5, 80, "backend.example"),
        );
        validate(&packet, &mut response).unwrap();
        assert_eq!(1, response.answers.len());
    }

    #[test]
    fn test_single_a_record() {
        let mut response = DnsResponse::new();
        let packet = a_response(NO_ERROR, &[("example.org", [93, 184, 216, 34])]);
        validate(&packet, &mut response).unwrap();
        assert_eq!(1, response.answers.len());
        assert_eq!(
            AnswerData::A(Ipv4Addr::new(93, 184, 216, 34)),
            response.answers[0].data
        );
        assert_eq!("example.org", response.questions[0].name.to_string());
        assert_eq!(300, response.answers[0].ttl);
    }

    #[test]
    fn test_merge_refreshes_duplicates() {
        let mut response = DnsResponse::new();
        let packet = a_response(
            NO_ERROR,
            &[("example.org", [1, 1, 1, 1]), ("example.org", [2, 2, 2, 2])],
        );
        validate(&packet, &mut response).unwrap();
        assert_eq!(2, response.answers.len());
        let early = response.answers[0].last_seen;

        let later = Instant::now();
        let packet = a_response(NO_ERROR, &[("example.org", [1, 1, 1, 1])]);
        validate_dns_response(&packet, 45, &mut response, later).unwrap();
        assert_eq!(2, response.answers.len());
        assert_eq!(later, response.answers[0].last_seen);
        assert!(response.answers[1].last_seen <= early);
    }

    #[test]
    fn test_bad_rdlen_is_invalid() {
        let mut response = DnsResponse::new();
        let mut packet = header(7, NO_ERROR, [1, 1, 0, 0]);
        push_question(&mut packet, "example.org", DnsType::A);
        push_record(&mut packet, "example.org", DnsType::A, &[1, 2, 3]);
        assert_eq!(
            ResponseError::Invalid,
            validate(&packet, &mut response).unwrap_err()
        );
    }

    #[test]
    fn test_first_record_name_mismatch_is_invalid() {
        let mut response = DnsResponse::new();
        let packet = a_response(NO_ERROR, &[("other.org", [1, 2, 3, 4])]);
        assert_eq!(
            ResponseError::Invalid,
            validate(&packet, &mut response).unwrap_err()
        );
    }

    #[test]
    fn test_cname_chain() {
        let mut response = DnsResponse::new();
        let mut packet = header(7, NO_ERROR, [1, 2, 0, 0]);
        push_question(&mut packet, "example.org", DnsType::A);
        let mut cname = Vec::new();
        push_name(&mut cname, "real.example.org");
        push_record(&mut packet, "example.org", DnsType::CNAME, &cname);
        push_record(&mut packet, "real.example.org", DnsType::A, &[1, 2, 3, 4]);
        validate(&packet, &mut response).unwrap();
        assert_eq!(2, response.answers.len());
        assert_eq!(
            AnswerData::CNAME(DnsName::new("real.example.org").unwrap()),
            response.answers[0].data
        );

        // A broken chain: the A record does not match the CNAME target.
        let mut response = DnsResponse::new();
        let mut packet = header(7, NO_ERROR, [1, 2, 0, 0]);
        push_question(&mut packet, "example.org", DnsType::A);
        push_record(&mut packet, "example.org", DnsType::CNAME, &cname);
        push_record(&mut packet, "stray.example.org", DnsType::A, &[1, 2, 3, 4]);
        assert_eq!(
            ResponseError::CnameError,
            validate(&packet, &mut response).unwrap_err()
        );
    }

    #[test]
    fn test_trailing_cname_is_an_error() {
        let mut response = DnsResponse::new();
        let mut packet = header(7, NO_ERROR, [1, 1, 0, 0]);
        push_question(&mut packet, "example.org", DnsType::A);
        let mut cname = Vec::new();
        push_name(&mut cname, "real.example.org");
        push_record(&mut packet, "example.org", DnsType::CNAME, &cname);
        assert_eq!(
            ResponseError::CnameError,
            validate(&packet, &mut response).unwrap_err()
        );
    }

    #[test]
    fn test_srv_with_glue() {
        let mut response = DnsResponse::new();
        let mut packet = header(7, NO_ERROR, [1, 1, 0, 1]);
        push_question(&mut packet, "_http._tcp.example", DnsType::SRV);
        push_record(
            &mut packet,
            "_http._tcp.example",
            DnsType::SRV,
            &srv_rdata(10, 5, 80, "backend.example"),
        );
        push_record(&mut packet, "backend.example", DnsType::A, &[10, 0, 0, 1]);
        validate(&packet, &mut response).unwrap();
        assert_eq!(1, response.answers.len());
        let item = &response.answers[0];
        assert_eq!(
            AnswerData::SRV {
                priority: 10,
                weight: 5,
                port: 80,
                target: DnsName::new("backend.example").unwrap(),
            },
            item.data
        );
        let glue = item.ar_item.as_ref().unwrap();
        assert_eq!(Some("10.0.0.1".parse().unwrap()), glue.address());

        // The same glue in a later response refreshes the attachment.
        let later = Instant::now();
        validate_dns_response(&packet, 45, &mut response, later).unwrap();
        assert_eq!(1, response.answers.len());
        let glue = response.answers[0].ar_item.as_ref().unwrap();
        assert_eq!(later, glue.last_seen);
    }

    #[test]
    fn test_duplicate_glue_spreads_over_equal_targets() {
        // Two SRV answers aim the same target on different ports; the
        // repeated glue record attaches to each of them.
        let mut response = DnsResponse::new();
        let mut packet = header(7, NO_ERROR, [1, 2, 0, 2]);
        push_question(&mut packet, "_http._tcp.example", DnsType::SRV);
        push_record(
            &mut packet,
            "_http._tcp.example",
            DnsType::SRV,
            &srv_rdata(10, 5, 80, "backend.example"),
        );
        push_record(
            &mut packet,
            "_http._tcp.example",
            DnsType::SRV,
            &srv_rdata(10, 5, 81, "backend.example"),
        );
        push_record(&mut packet, "backend.example", DnsType::A, &[10, 0, 0, 1]);
        push_record(&mut packet, "backend.example", DnsType::A, &[10, 0, 0, 1]);
        validate(&packet, &mut response).unwrap();
        assert_eq!(2, response.answers.len());
        for item in &response.answers {
            assert_eq!(
                Some("10.0.0.1".parse().unwrap()),
                item.ar_item.as_ref().unwrap().address()
            );
        }
    }

    #[test]
    fn test_srv_weight_refresh() {
        let mut response = DnsResponse::new();
        let mut packet = header(7, NO_ERROR, [1, 1, 0, 0]);
        push_question(&mut packet, "_http._tcp.example", DnsType::SRV);
        push_record(
            &mut packet,
            "_http._tcp.example",
            DnsType::SRV,
            &srv_rdata(10, 5, 80, "backend.example"),
        );
        validate(&packet, &mut response).unwrap();

        let mut packet = header(7, NO_ERROR, [1, 1, 0, 0]);
        push_question(&mut packet, "_http._tcp.example", DnsType::SRV);
        push_record(
            &mut packet,
            "_http._tcp.example",
            DnsType::SRV,
            &srv_rdata(10, 9, 80, "backend.example"),
        );
        validate(&packet, &mut response).unwrap();
        assert_eq!(1, response.answers.len());
        assert!(matches!(
            response.answers[0].data,
            AnswerData::SRV { weight: 9, .. }
        ));
    }

    #[test]
    fn test_authority_records_are_skipped() {
        let mut response = DnsResponse::new();
        let mut packet = header(7, NO_ERROR, [1, 1, 1, 1]);
        push_question(&mut packet, "_http._tcp.example", DnsType::SRV);
        push_record(
            &mut packet,
            "_http._tcp.example",
            DnsType::SRV,
            &srv_rdata(10, 5, 80, "backend.example"),
        );
        push_record(&mut packet, "example", DnsType::Unknown(2), b"\x02ns\x07example\x00");
        push_record(&mut packet, "backend.example", DnsType::A, &[10, 0, 0, 1]);
        validate(&packet, &mut response).unwrap();
        assert!(response.answers[0].ar_item.is_some());
    }

    #[test]
    fn test_find_srv_answer() {
        let mut response = DnsResponse::new();
        let mut packet = header(7, NO_ERROR, [1, 1, 0, 0]);
        push_question(&mut packet, "_http._tcp.example", DnsType::SRV);
        push_record(
            &mut packet,
            "_http._tcp.example",
            DnsType::SRV,
            &srv_rdata(10, 5, 80, "backend.example"),
        );
        validate(&packet, &mut response).unwrap();
        let target = DnsName::new("BACKEND.example").unwrap();
        assert!(find_srv_answer(&response, &target, 80).is_some());
        assert!(find_srv_answer(&response, &target, 81).is_none());
    }
}
