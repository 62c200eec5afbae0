//! BER-TLV for the PIV dynamic authentication template
//!
//! GENERAL AUTHENTICATE wraps witness (`80`), challenge (`81`) and response
//! (`82`) objects in a constructed `7C` template. All of them use one-byte
//! tags, which is all this module supports.
//!
//! # Example
//! ```ignore
//! use piv_provision::tlv::{read_list, tags, TLVBuilder};
//!
//! let request = TLVBuilder::new()
//!     .add(tags::WITNESS, &[])
//!     .wrap(tags::DYNAMIC_AUTH_TEMPLATE)
//!     .build();
//! assert_eq!(request, vec![0x7C, 0x02, 0x80, 0x00]);
//! ```

mod encoder;
mod parser;

pub use encoder::TLVBuilder;
pub use parser::{read_list, read_single, TLVError, TLV};

pub mod tags {
    pub const DYNAMIC_AUTH_TEMPLATE: u8 = 0x7C;
    pub const WITNESS: u8 = 0x80;
    pub const CHALLENGE: u8 = 0x81;
    pub const RESPONSE: u8 = 0x82;
}
