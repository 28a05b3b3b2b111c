use crate::DnsError;
use core::fmt::{Debug, Display, Formatter};
use fixed_buffer::FixedBuf;

/// Longest accepted hostname, in dotted notation.
pub const MAX_NAME_SIZE: usize = 255;
/// Longest accepted label.
pub const MAX_LABEL_SIZE: usize = 63;
/// Compression pointers followed before a packet is declared cyclic.
const MAX_POINTER_FOLLOWS: u32 = 100;

/// A hostname held in DNS label form: a sequence of `len, bytes...` segments
/// without the terminating zero byte (`3www7example3org` for
/// `www.example.org`).
///
/// Accepted hostnames follow the resolver conventions rather than the strict
/// [RFC 1035](https://datatracker.ietf.org/doc/html/rfc1035#section-2.3.1)
/// grammar: every byte of a label is `[A-Za-z0-9_-]`, which admits the
/// underscore labels used by SRV queries (`_http._tcp.example`).
///
/// `PartialEq` is byte-exact. DNS name comparisons are case-insensitive, so
/// lookups use [`DnsName::eq_ignore_case`].
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct DnsName {
    labels: Vec<u8>,
}
impl DnsName {
    fn is_hostname_byte(b: u8) -> bool {
        b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
    }

    /// # Errors
    /// Returns an error when `value` is empty, too long, contains an empty or
    /// oversized label, or a byte outside `[A-Za-z0-9_-]`.  A single trailing
    /// dot is tolerated.
    pub fn new(value: &str) -> Result<Self, DnsError> {
        let trimmed = value.strip_suffix('.').unwrap_or(value);
        if trimmed.is_empty() {
            return Err(DnsError::EmptyName);
        }
        if trimmed.len() > MAX_NAME_SIZE {
            return Err(DnsError::NameTooLong);
        }
        let mut labels = Vec::with_capacity(trimmed.len() + 1);
        for label in trimmed.split('.') {
            if label.is_empty() {
                return Err(DnsError::EmptyLabel);
            }
            if label.len() > MAX_LABEL_SIZE {
                return Err(DnsError::LabelTooLong);
            }
            if !label.bytes().all(Self::is_hostname_byte) {
                return Err(DnsError::InvalidLabel);
            }
            labels.push(u8::try_from(label.len()).map_err(|_| DnsError::LabelTooLong)?);
            labels.extend_from_slice(label.as_bytes());
        }
        Ok(Self { labels })
    }

    /// Builds a name from raw label-form bytes, checking only the structure.
    ///
    /// # Errors
    /// Returns an error when the segment lengths do not line up, a label is
    /// oversized, or the name is empty or too long.
    pub fn from_labels(labels: Vec<u8>) -> Result<Self, DnsError> {
        if labels.is_empty() {
            return Err(DnsError::EmptyName);
        }
        if labels.len() > MAX_NAME_SIZE {
            return Err(DnsError::NameTooLong);
        }
        let mut i = 0;
        while i < labels.len() {
            let len = usize::from(labels[i]);
            if len == 0 || len > MAX_LABEL_SIZE {
                return Err(DnsError::InvalidLabel);
            }
            i += 1 + len;
        }
        if i != labels.len() {
            return Err(DnsError::InvalidLabel);
        }
        Ok(Self { labels })
    }

    /// The label-form bytes, without the terminating zero.
    #[must_use]
    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    /// Length of the label form, excluding the terminating zero.
    #[must_use]
    pub fn label_len(&self) -> usize {
        self.labels.len()
    }

    /// Case-insensitive equality, the comparison DNS mandates for names.
    #[must_use]
    pub fn eq_ignore_case(&self, other: &DnsName) -> bool {
        labels_eq_ignore_case(&self.labels, &other.labels)
    }

    /// # Errors
    /// Returns an error when `out` has no room for the labels and their
    /// terminating zero.
    pub fn write<const N: usize>(&self, out: &mut FixedBuf<N>) -> Result<(), DnsError> {
        out.write_bytes(&self.labels)
            .map_err(|_| DnsError::BufferFull)?;
        out.write_bytes(&[0]).map_err(|_| DnsError::BufferFull)?;
        Ok(())
    }
}
impl Display for DnsName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), core::fmt::Error> {
        let mut i = 0;
        while i < self.labels.len() {
            let len = usize::from(self.labels[i]);
            if i > 0 {
                write!(f, ".")?;
            }
            for b in &self.labels[i + 1..i + 1 + len] {
                write!(f, "{}", char::from(*b))?;
            }
            i += 1 + len;
        }
        Ok(())
    }
}
impl Debug for DnsName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), core::fmt::Error> {
        write!(f, "DnsName({})", self)
    }
}
impl core::str::FromStr for DnsName {
    type Err = DnsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        DnsName::new(value)
    }
}

/// Case-insensitive comparison over raw label-form bytes.
#[must_use]
pub fn labels_eq_ignore_case(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.eq_ignore_ascii_case(y))
}

/// Decodes the possibly-compressed name starting at `packet[start]`.
///
/// Returns the name and the number of bytes it occupies at `start`: a
/// compression pointer occupies two bytes wherever it appears, regardless of
/// how much data the indirection expands to.
///
/// Compression pointers must aim strictly backward, and at most
/// [`MAX_POINTER_FOLLOWS`] of them are followed, so decoding always
/// terminates and never reads outside `packet`.
///
/// # Errors
/// Returns an error on a truncated packet, a forward or cyclic pointer, an
/// invalid label length, an empty (root) name, or a name over
/// [`MAX_NAME_SIZE`] bytes.
pub fn read_name(packet: &[u8], start: usize) -> Result<(DnsName, usize), DnsError> {
    let mut labels = Vec::new();
    let mut pos = start;
    let mut follows = 0;
    loop {
        let len = *packet.get(pos).ok_or(DnsError::Truncated)?;
        if len & 0xC0 == 0xC0 {
            let lo = *packet.get(pos + 1).ok_or(DnsError::Truncated)?;
            let target = (usize::from(len & 0x3F) << 8) | usize::from(lo);
            if target >= pos {
                return Err(DnsError::InvalidPointer);
            }
            if follows >= MAX_POINTER_FOLLOWS {
                return Err(DnsError::PointerLoop);
            }
            follows += 1;
            pos = target;
            continue;
        }
        if len == 0 {
            break;
        }
        if len & 0xC0 != 0 {
            return Err(DnsError::InvalidLabel);
        }
        let end = pos + 1 + usize::from(len);
        if end > packet.len() {
            return Err(DnsError::Truncated);
        }
        if labels.len() + 1 + usize::from(len) > MAX_NAME_SIZE {
            return Err(DnsError::NameTooLong);
        }
        labels.extend_from_slice(&packet[pos..end]);
        pos = end;
    }
    let name = DnsName::from_labels(labels)?;
    Ok((name, consumed_len(packet, start)?))
}

/// Bytes the name occupies in place: labels up to and including the first
/// terminator, or up to and including the first pointer.
fn consumed_len(packet: &[u8], start: usize) -> Result<usize, DnsError> {
    let mut pos = start;
    loop {
        let len = *packet.get(pos).ok_or(DnsError::Truncated)?;
        if len & 0xC0 == 0xC0 {
            return Ok(pos + 2 - start);
        }
        if len == 0 {
            return Ok(pos + 1 - start);
        }
        pos += 1 + usize::from(len);
    }
}
