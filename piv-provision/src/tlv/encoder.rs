//! TLV construction

fn push_length(out: &mut Vec<u8>, length: usize) {
    match length {
        0..=0x7F => out.push(length as u8),
        0x80..=0xFF => out.extend_from_slice(&[0x81, length as u8]),
        _ => out.extend_from_slice(&[0x82, (length >> 8) as u8, length as u8]),
    }
}

/// Builds a flat run of TLVs, optionally wrapped in a constructed tag
#[derive(Debug, Default)]
pub struct TLVBuilder {
    data: Vec<u8>,
}

impl TLVBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a primitive object
    pub fn add(mut self, tag: u8, value: &[u8]) -> Self {
        self.data.push(tag);
        push_length(&mut self.data, value.len());
        self.data.extend_from_slice(value);
        self
    }

    /// Everything added so far becomes the value of `tag`
    pub fn wrap(self, tag: u8) -> Self {
        Self::new().add(tag, &self.data)
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tlv::{read_list, tags};

    #[test]
    fn test_witness_request() {
        let data = TLVBuilder::new()
            .add(tags::WITNESS, &[])
            .wrap(tags::DYNAMIC_AUTH_TEMPLATE)
            .build();
        assert_eq!(data, vec![0x7C, 0x02, 0x80, 0x00]);
    }

    #[test]
    fn test_witness_and_challenge() {
        let data = TLVBuilder::new()
            .add(tags::WITNESS, &[0xAA; 8])
            .add(tags::CHALLENGE, &[0xBB; 8])
            .wrap(tags::DYNAMIC_AUTH_TEMPLATE)
            .build();

        assert_eq!(&data[..4], &[0x7C, 0x14, 0x80, 0x08]);
        let tlvs = read_list(&data).unwrap();
        assert_eq!(tlvs[0].subs.len(), 2);
        assert_eq!(tlvs[0].find_child(tags::CHALLENGE).unwrap().value, vec![0xBB; 8]);
    }

    #[test]
    fn test_long_lengths() {
        let data = TLVBuilder::new().add(0x53, &[0u8; 200]).build();
        assert_eq!(&data[..3], &[0x53, 0x81, 200]);

        let data = TLVBuilder::new().add(0x53, &[0u8; 300]).build();
        assert_eq!(&data[..4], &[0x53, 0x82, 0x01, 0x2C]);
    }
}
