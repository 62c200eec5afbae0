//! PIV session on one connected token
//!
//! A session selects the PIV application when opened and releases the
//! transport when dropped. Each operation is one synchronous round-trip
//! (plus any GET RESPONSE continuation); nothing is retried.

use log::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use super::CardTransport;
use crate::apdu::{ins, Response, APDU, SW};
use crate::crypto::{fill_random, TDesOperations};
use crate::error::{PivError, PivResult};
use crate::keys::{ManagementKey, ReferenceTarget};
use crate::secure_buffer::SecureBuffer;
use crate::store::DeviceGeneration;
use crate::tlv::{read_list, tags, TLVBuilder, TLV};

/// PIV Application Identifier
pub const PIV_AID: &[u8] = &[0xA0, 0x00, 0x00, 0x03, 0x08];

/// Key reference of the card management key
pub const MANAGEMENT_KEY_REF: u8 = 0x9B;

/// PIN and PUK are padded with 0xFF to this length
const REFERENCE_DATA_LEN: usize = 8;

/// Upper bound on wrong attempts used to block PIN/PUK before a reset
const MAX_BLOCK_ATTEMPTS: usize = 16;

/// GET RESPONSE continuations accepted for a single command
const MAX_RESPONSE_CHAIN: usize = 256;

/// Encrypted witness issued by the card in the first authentication step
pub struct Challenge {
    witness: [u8; TDesOperations::BLOCK_SIZE],
}

impl Challenge {
    pub fn as_bytes(&self) -> &[u8] {
        &self.witness
    }
}

impl Drop for Challenge {
    fn drop(&mut self) {
        self.witness.zeroize();
    }
}

/// Pad PIN/PUK bytes to eight with 0xFF
fn pad_reference(value: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut padded = Zeroizing::new(value.to_vec());
    if padded.len() < REFERENCE_DATA_LEN {
        padded.resize(REFERENCE_DATA_LEN, 0xFF);
    }
    padded
}

/// Map a rejected VERIFY / CHANGE REFERENCE DATA status word
fn reference_error(command: &'static str, target: ReferenceTarget, sw: u16) -> PivError {
    if SW::is_reference_data_rejected(sw) {
        let retries = if sw == SW::AUTH_METHOD_BLOCKED {
            Some(0)
        } else {
            SW::get_retry_count(sw)
        };
        PivError::VerificationFailed { target, retries }
    } else {
        PivError::CommandFailed { command, sw }
    }
}

/// Find a data object inside the `7C` dynamic authentication template
fn auth_template_value(
    command: &'static str,
    data: &[u8],
    tag: u8,
) -> PivResult<[u8; TDesOperations::BLOCK_SIZE]> {
    let malformed = |reason: String| PivError::MalformedResponse { command, reason };

    let tlvs = read_list(data).map_err(|e| malformed(e.to_string()))?;
    let template = tlvs
        .iter()
        .find(|t| t.tag == tags::DYNAMIC_AUTH_TEMPLATE)
        .ok_or_else(|| malformed("missing 7C template".to_string()))?;
    let object: &TLV = template
        .find_child(tag)
        .ok_or_else(|| malformed(format!("missing {:02X} object", tag)))?;

    if object.value.len() != TDesOperations::BLOCK_SIZE {
        return Err(malformed(format!(
            "{:02X} object is {} bytes",
            tag,
            object.value.len()
        )));
    }
    let mut out = [0u8; TDesOperations::BLOCK_SIZE];
    out.copy_from_slice(&object.value);
    Ok(out)
}

/// Scoped connection to one PIV token
pub struct DeviceSession<T: CardTransport> {
    transport: T,
    generation: Option<DeviceGeneration>,
}

impl<T: CardTransport> DeviceSession<T> {
    /// Select the PIV application on `transport`
    pub fn open(transport: T) -> PivResult<Self> {
        let generation = DeviceGeneration::from_atr(transport.atr());
        let mut session = Self {
            transport,
            generation,
        };

        let select = APDU::with_data(0x00, ins::SELECT, 0x04, 0x00, PIV_AID.to_vec());
        let response = session
            .transceive(select)
            .map_err(|e| PivError::DeviceUnavailable(e.to_string()))?;
        if !response.is_okay() {
            return Err(PivError::DeviceUnavailable(format!(
                "PIV application not available ({})",
                SW::describe(response.sw())
            )));
        }

        match session.generation {
            Some(generation) => info!("PIV application selected on {:?}", generation),
            None => info!("PIV application selected on unrecognised token"),
        }
        Ok(session)
    }

    /// Token generation recognised from the ATR, if any
    pub fn generation(&self) -> Option<DeviceGeneration> {
        self.generation
    }

    pub fn atr(&self) -> &[u8] {
        self.transport.atr()
    }

    /// Send a command, following 61xx with GET RESPONSE
    ///
    /// The serialized command is wiped after transmission since VERIFY,
    /// CHANGE REFERENCE DATA and SET MANAGEMENT KEY carry secrets.
    fn transceive(&mut self, mut command: APDU) -> PivResult<Response> {
        debug!(
            "-> INS={:02X} P1={:02X} P2={:02X} Lc={}",
            command.ins,
            command.p1,
            command.p2,
            command.data.len()
        );
        let raw = command.to_bytes().map(Zeroizing::new);
        command.data.zeroize();
        let raw = raw.map_err(|e| PivError::InvalidInput(e.to_string()))?;

        let reply = self.transport.transmit(&raw)?;
        let mut response = Response::from_bytes(&reply).map_err(super::TransportError::from)?;

        let mut continuations = 0;
        while let Some(remaining) = response.available_response() {
            continuations += 1;
            if continuations > MAX_RESPONSE_CHAIN {
                warn!("Card still announcing data after {} GET RESPONSE", MAX_RESPONSE_CHAIN);
                return Err(PivError::MalformedResponse {
                    command: "GET RESPONSE",
                    reason: "card kept announcing more data".to_string(),
                });
            }
            let le = if remaining == 0 { 256 } else { u16::from(remaining) };
            let get_response = APDU::new(0x00, ins::GET_RESPONSE, 0x00, 0x00).expect(le);
            let get_response = get_response.to_bytes().map_err(super::TransportError::from)?;
            let next = self.transport.transmit(&get_response)?;
            let next = Response::from_bytes(&next).map_err(super::TransportError::from)?;
            response.data.extend_from_slice(&next.data);
            response.sw = next.sw;
        }

        debug!("<- SW={:04X} ({} bytes)", response.sw(), response.data.len());
        Ok(response)
    }

    /// First authentication step: ask the card for an encrypted witness
    pub fn authenticate_management_key_init(&mut self) -> PivResult<Challenge> {
        const COMMAND: &str = "GENERAL AUTHENTICATE";

        let data = TLVBuilder::new()
            .add(tags::WITNESS, &[])
            .wrap(tags::DYNAMIC_AUTH_TEMPLATE)
            .build();
        let apdu = APDU::with_data(
            0x00,
            ins::GENERAL_AUTHENTICATE,
            TDesOperations::ALGORITHM_ID,
            MANAGEMENT_KEY_REF,
            data,
        )
        .expect(256);

        let response = self.transceive(apdu)?;
        if !response.is_okay() {
            return Err(PivError::CommandFailed {
                command: COMMAND,
                sw: response.sw(),
            });
        }

        let witness = auth_template_value(COMMAND, &response.data, tags::WITNESS)?;
        debug!("Received management key witness");
        Ok(Challenge { witness })
    }

    /// Second authentication step: prove knowledge of `candidate`
    ///
    /// The witness is decrypted with the candidate key and returned together
    /// with a fresh host challenge. The card's encryption of that challenge is
    /// checked as well, so a success means both sides hold the same key.
    pub fn authenticate_management_key_complete(
        &mut self,
        challenge: &Challenge,
        candidate: &ManagementKey,
    ) -> PivResult<()> {
        const COMMAND: &str = "GENERAL AUTHENTICATE";

        let tdes_err = |e: crate::crypto::TDesError| PivError::InvalidKey(e.to_string());

        let witness = Zeroizing::new(
            TDesOperations::decrypt_block(candidate.as_bytes(), &challenge.witness)
                .map_err(tdes_err)?,
        );
        let mut host_challenge = Zeroizing::new([0u8; TDesOperations::BLOCK_SIZE]);
        fill_random(&mut host_challenge[..]);

        let data = TLVBuilder::new()
            .add(tags::WITNESS, &witness[..])
            .add(tags::CHALLENGE, &host_challenge[..])
            .wrap(tags::DYNAMIC_AUTH_TEMPLATE)
            .build();
        let apdu = APDU::with_data(
            0x00,
            ins::GENERAL_AUTHENTICATE,
            TDesOperations::ALGORITHM_ID,
            MANAGEMENT_KEY_REF,
            data,
        )
        .expect(256);

        let response = self.transceive(apdu)?;
        match response.sw() {
            SW::SUCCESS => {}
            SW::SECURITY_STATUS_NOT_SATISFIED => {
                warn!("Card rejected the management key");
                return Err(PivError::AuthenticationRequired(
                    "card rejected the management key".to_string(),
                ));
            }
            sw => return Err(PivError::CommandFailed { command: COMMAND, sw }),
        }

        let card_response = Zeroizing::new(auth_template_value(
            COMMAND,
            &response.data,
            tags::RESPONSE,
        )?);
        let expected = Zeroizing::new(
            TDesOperations::encrypt_block(candidate.as_bytes(), &host_challenge[..])
                .map_err(tdes_err)?,
        );
        if *card_response != *expected {
            warn!("Card response to host challenge did not match");
            return Err(PivError::AuthenticationRequired(
                "card failed to prove knowledge of the management key".to_string(),
            ));
        }

        info!("Management key authenticated");
        Ok(())
    }

    /// Replace the management key (requires a completed authentication)
    pub fn set_management_key(&mut self, new_key: &ManagementKey) -> PivResult<()> {
        let mut data = Vec::with_capacity(3 + new_key.as_bytes().len());
        data.push(TDesOperations::ALGORITHM_ID);
        data.push(MANAGEMENT_KEY_REF);
        data.push(new_key.as_bytes().len() as u8);
        data.extend_from_slice(new_key.as_bytes());

        let apdu = APDU::with_data(0x00, ins::SET_MANAGEMENT_KEY, 0xFF, 0xFF, data);
        let response = self.transceive(apdu)?;
        if !response.is_okay() {
            return Err(PivError::CommandFailed {
                command: "SET MANAGEMENT KEY",
                sw: response.sw(),
            });
        }
        info!("Management key replaced on device");
        Ok(())
    }

    /// Verify the card holder PIN
    pub fn verify_pin(&mut self, pin: &SecureBuffer) -> PivResult<()> {
        let data = pad_reference(pin.as_bytes());
        let apdu = APDU::with_data(
            0x00,
            ins::VERIFY,
            0x00,
            ReferenceTarget::Pin.key_reference(),
            data.to_vec(),
        );
        let response = self.transceive(apdu)?;
        if !response.is_okay() {
            return Err(reference_error("VERIFY", ReferenceTarget::Pin, response.sw()));
        }
        debug!("PIN verified");
        Ok(())
    }

    /// Change the PIN or PUK from `old` to `new`
    pub fn change_reference_data(
        &mut self,
        target: ReferenceTarget,
        old: &SecureBuffer,
        new: &SecureBuffer,
    ) -> PivResult<()> {
        let mut data = Zeroizing::new(Vec::with_capacity(2 * REFERENCE_DATA_LEN));
        data.extend_from_slice(&pad_reference(old.as_bytes()));
        data.extend_from_slice(&pad_reference(new.as_bytes()));

        let apdu = APDU::with_data(
            0x00,
            ins::CHANGE_REFERENCE_DATA,
            0x00,
            target.key_reference(),
            data.to_vec(),
        );
        let response = self.transceive(apdu)?;
        if !response.is_okay() {
            return Err(reference_error(
                "CHANGE REFERENCE DATA",
                target,
                response.sw(),
            ));
        }
        info!("{} changed", target);
        Ok(())
    }

    /// Exhaust the retry counter of `target` with a value no token accepts
    fn block_reference(&mut self, target: ReferenceTarget) -> PivResult<()> {
        let wrong = [0x00u8; REFERENCE_DATA_LEN];
        for _ in 0..MAX_BLOCK_ATTEMPTS {
            let apdu = match target {
                ReferenceTarget::Pin => {
                    APDU::with_data(0x00, ins::VERIFY, 0x00, target.key_reference(), wrong.to_vec())
                }
                ReferenceTarget::Puk => APDU::with_data(
                    0x00,
                    ins::CHANGE_REFERENCE_DATA,
                    0x00,
                    target.key_reference(),
                    [wrong, wrong].concat(),
                ),
            };
            let sw = self.transceive(apdu)?.sw();
            if sw == SW::AUTH_METHOD_BLOCKED || sw == SW::counter_warning(0) {
                debug!("{} blocked", target);
                return Ok(());
            }
            if !SW::is_counter_warning(sw) {
                return Err(PivError::CommandFailed {
                    command: "RESET",
                    sw,
                });
            }
        }
        Err(PivError::CommandFailed {
            command: "RESET",
            sw: SW::CONDITIONS_NOT_SATISFIED,
        })
    }

    /// Reset the PIV application to factory state
    ///
    /// YubiKeys only accept RESET once PIN and PUK are blocked, so both are
    /// exhausted first.
    pub fn reset_application(&mut self) -> PivResult<()> {
        self.block_reference(ReferenceTarget::Pin)?;
        self.block_reference(ReferenceTarget::Puk)?;

        let response = self.transceive(APDU::new(0x00, ins::RESET, 0x00, 0x00))?;
        if !response.is_okay() {
            return Err(PivError::CommandFailed {
                command: "RESET",
                sw: response.sw(),
            });
        }
        info!("PIV application reset");
        Ok(())
    }

    /// Firmware version (Yubico extension)
    pub fn version(&mut self) -> PivResult<(u8, u8, u8)> {
        let response = self.transceive(APDU::new(0x00, ins::GET_VERSION, 0x00, 0x00))?;
        if !response.is_okay() {
            return Err(PivError::CommandFailed {
                command: "GET VERSION",
                sw: response.sw(),
            });
        }
        match response.data.as_slice() {
            [major, minor, patch, ..] => Ok((*major, *minor, *patch)),
            _ => Err(PivError::MalformedResponse {
                command: "GET VERSION",
                reason: format!("{} bytes", response.data.len()),
            }),
        }
    }

    /// Device serial number (Yubico extension)
    pub fn serial(&mut self) -> PivResult<u32> {
        let response = self.transceive(APDU::new(0x00, ins::GET_SERIAL, 0x00, 0x00))?;
        if !response.is_okay() {
            return Err(PivError::CommandFailed {
                command: "GET SERIAL",
                sw: response.sw(),
            });
        }
        match response.data.as_slice() {
            [a, b, c, d, ..] => Ok(u32::from_be_bytes([*a, *b, *c, *d])),
            _ => Err(PivError::MalformedResponse {
                command: "GET SERIAL",
                reason: format!("{} bytes", response.data.len()),
            }),
        }
    }
}

impl<T: CardTransport> Drop for DeviceSession<T> {
    fn drop(&mut self) {
        debug!("Releasing device session");
        self.transport.disconnect();
    }
}
