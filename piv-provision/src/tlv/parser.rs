//! TLV parsing

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TLVError {
    #[error("TLV truncated: need {needed} bytes, {available} left")]
    Truncated { needed: usize, available: usize },

    #[error("Unsupported multi-byte tag starting with {0:02X}")]
    MultiByteTag(u8),

    #[error("Unsupported length encoding {0:02X}")]
    LengthEncoding(u8),
}

/// One parsed data object; constructed tags carry their children in `subs`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TLV {
    pub tag: u8,
    pub value: Vec<u8>,
    pub subs: Vec<TLV>,
}

impl TLV {
    /// Bit 6 of the tag marks a constructed object
    pub fn is_constructed(&self) -> bool {
        self.tag & 0x20 != 0
    }

    /// Direct child with `tag`
    pub fn find_child(&self, tag: u8) -> Option<&TLV> {
        self.subs.iter().find(|child| child.tag == tag)
    }
}

fn take(data: &[u8], count: usize) -> Result<(&[u8], &[u8]), TLVError> {
    if data.len() < count {
        return Err(TLVError::Truncated {
            needed: count,
            available: data.len(),
        });
    }
    Ok(data.split_at(count))
}

/// Decode a length field; returns the length and the bytes after it
fn read_length(data: &[u8]) -> Result<(usize, &[u8]), TLVError> {
    let (first, rest) = take(data, 1)?;
    match first[0] {
        short @ 0x00..=0x7F => Ok((usize::from(short), rest)),
        0x81 => {
            let (len, rest) = take(rest, 1)?;
            Ok((usize::from(len[0]), rest))
        }
        0x82 => {
            let (len, rest) = take(rest, 2)?;
            Ok((usize::from(u16::from_be_bytes([len[0], len[1]])), rest))
        }
        other => Err(TLVError::LengthEncoding(other)),
    }
}

/// Parse one object from the front of `data`, returning it with the bytes used
pub fn read_single(data: &[u8]) -> Result<(TLV, usize), TLVError> {
    let (tag, rest) = take(data, 1)?;
    let tag = tag[0];
    if tag & 0x1F == 0x1F {
        return Err(TLVError::MultiByteTag(tag));
    }

    let (length, rest) = read_length(rest)?;
    let (value, rest) = take(rest, length)?;

    let mut tlv = TLV {
        tag,
        value: value.to_vec(),
        subs: Vec::new(),
    };
    if tlv.is_constructed() {
        tlv.subs = read_list(value)?;
    }
    Ok((tlv, data.len() - rest.len()))
}

/// Parse consecutive objects, skipping 00/FF padding between them
pub fn read_list(mut data: &[u8]) -> Result<Vec<TLV>, TLVError> {
    let mut tlvs = Vec::new();
    while let Some(&first) = data.first() {
        if first == 0x00 || first == 0xFF {
            data = &data[1..];
            continue;
        }
        let (tlv, used) = read_single(data)?;
        tlvs.push(tlv);
        data = &data[used..];
    }
    Ok(tlvs)
}
