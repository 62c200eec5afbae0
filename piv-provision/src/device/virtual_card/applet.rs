//! Simulated PIV application
//!
//! Implements the subset of NIST SP 800-73-4 plus Yubico extensions that
//! provisioning uses: SELECT, VERIFY, CHANGE REFERENCE DATA, GENERAL
//! AUTHENTICATE with the 3DES management key, SET MANAGEMENT KEY, RESET,
//! GET RESPONSE, GET VERSION and GET SERIAL.

use log::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use super::credentials::{SecurityState, TokenCredentials};
use crate::apdu::{ins, Response, APDU, SW};
use crate::crypto::{fill_random, TDesOperations};
use crate::device::session::{MANAGEMENT_KEY_REF, PIV_AID};
use crate::keys::{ReferenceTarget, MANAGEMENT_KEY_LEN};
use crate::tlv::{read_list, tags, TLVBuilder};

/// Strip 0xFF padding from PIN/PUK reference data
fn unpad(data: &[u8]) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(data.iter().take_while(|&&b| b != 0xFF).copied().collect())
}

/// PIV applet state machine
pub struct PivApplet {
    credentials: TokenCredentials,
    security_state: SecurityState,
    selected: bool,
    witness: Option<Zeroizing<[u8; TDesOperations::BLOCK_SIZE]>>,
    response_buffer: Vec<u8>,
    response_offset: usize,
    chunk_size: Option<usize>,
    version: (u8, u8, u8),
    dirty: bool,
}

impl PivApplet {
    pub fn new(credentials: TokenCredentials, version: (u8, u8, u8)) -> Self {
        Self {
            credentials,
            security_state: SecurityState::default(),
            selected: false,
            witness: None,
            response_buffer: Vec::new(),
            response_offset: 0,
            chunk_size: None,
            version,
            dirty: false,
        }
    }

    /// Answer with at most `size` data bytes, chaining the rest via 61xx
    pub fn set_chunk_size(&mut self, size: Option<usize>) {
        self.chunk_size = size.map(|s| s.clamp(1, 256));
    }

    pub fn credentials(&self) -> &TokenCredentials {
        &self.credentials
    }

    /// True once since the last call if credentials changed
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Drop every security condition (card removed or reset)
    pub fn reset(&mut self) {
        self.security_state.clear_all();
        self.selected = false;
        self.witness = None;
        self.response_buffer.zeroize();
        self.response_buffer.clear();
        self.response_offset = 0;
    }

    /// Process an APDU command and return the response
    pub fn process_apdu(&mut self, cmd: &APDU) -> Response {
        debug!("PIV APDU: INS={:02X} P1={:02X} P2={:02X}", cmd.ins, cmd.p1, cmd.p2);

        if cmd.ins == ins::GET_RESPONSE {
            return self.handle_get_response(cmd);
        }
        // Any other command abandons a pending chained response
        self.response_buffer.clear();
        self.response_offset = 0;

        if cmd.ins == ins::SELECT {
            return self.handle_select(cmd);
        }
        if !self.selected {
            return Response::error(SW::CONDITIONS_NOT_SATISFIED);
        }

        let response = match cmd.ins {
            ins::VERIFY => self.handle_verify(cmd),
            ins::CHANGE_REFERENCE_DATA => self.handle_change_reference_data(cmd),
            ins::GENERAL_AUTHENTICATE => self.handle_general_authenticate(cmd),
            ins::SET_MANAGEMENT_KEY => self.handle_set_management_key(cmd),
            ins::RESET => self.handle_reset(),
            ins::GET_VERSION => self.handle_get_version(),
            ins::GET_SERIAL => self.handle_get_serial(),
            _ => {
                warn!("Unknown PIV instruction: {:02X}", cmd.ins);
                Response::error(SW::INS_NOT_SUPPORTED)
            }
        };
        self.chain(response)
    }

    /// Split long response data according to the configured chunk size
    fn chain(&mut self, response: Response) -> Response {
        let chunk = match self.chunk_size {
            Some(chunk) if response.is_okay() && response.data.len() > chunk => chunk,
            _ => return response,
        };

        let Response { data, .. } = response;
        self.response_buffer = data[chunk..].to_vec();
        self.response_offset = 0;
        let remaining = self.response_buffer.len().min(255) as u8;
        Response::more_data(data[..chunk].to_vec(), remaining)
    }

    fn handle_select(&mut self, cmd: &APDU) -> Response {
        if cmd.p1 != 0x04 {
            return Response::error(SW::WRONG_P1_P2);
        }
        if !cmd.data.starts_with(PIV_AID) {
            self.selected = false;
            return Response::error(SW::FILE_NOT_FOUND);
        }

        self.security_state.clear_all();
        self.witness = None;
        self.selected = true;

        // Application property template
        let response_data = [
            0x61, 0x11, 0x4F, 0x06, 0x00, 0x00, 0x10, 0x00, 0x01, 0x00, 0x79, 0x07, 0x4F, 0x05,
        ]
        .iter()
        .chain(PIV_AID.iter())
        .copied()
        .collect::<Vec<u8>>();

        info!("PIV application selected");
        Response::success(response_data)
    }

    /// Compare presented reference data, maintaining the retry counter
    fn check_reference(&mut self, target: ReferenceTarget, presented: &[u8]) -> Result<(), Response> {
        if self.credentials.retries(target) == 0 {
            return Err(Response::error(SW::AUTH_METHOD_BLOCKED));
        }

        if presented == self.credentials.reference(target) {
            *self.credentials.retries_mut(target) = TokenCredentials::DEFAULT_RETRIES;
            self.dirty = true;
            return Ok(());
        }

        let retries = self.credentials.retries_mut(target);
        *retries = retries.saturating_sub(1);
        let left = *retries;
        self.dirty = true;
        warn!("{} verification failed, {} retries remaining", target, left);
        if left == 0 {
            Err(Response::error(SW::AUTH_METHOD_BLOCKED))
        } else {
            Err(Response::counter_warning(left))
        }
    }

    fn target_for(p2: u8) -> Option<ReferenceTarget> {
        match p2 {
            0x80 => Some(ReferenceTarget::Pin),
            0x81 => Some(ReferenceTarget::Puk),
            _ => None,
        }
    }

    fn handle_verify(&mut self, cmd: &APDU) -> Response {
        if cmd.p2 != ReferenceTarget::Pin.key_reference() {
            return Response::error(SW::INCORRECT_P1_P2);
        }

        if cmd.data.is_empty() {
            // Status query: report the retry counter
            return match self.credentials.pin_retries {
                0 => Response::error(SW::AUTH_METHOD_BLOCKED),
                _ if self.security_state.is_pin_verified() => Response::ok(),
                n => Response::counter_warning(n),
            };
        }

        let pin = unpad(&cmd.data);
        match self.check_reference(ReferenceTarget::Pin, &pin) {
            Ok(()) => {
                self.security_state.set_pin_verified(true);
                info!("PIV PIN verified successfully");
                Response::ok()
            }
            Err(response) => {
                self.security_state.set_pin_verified(false);
                response
            }
        }
    }

    fn handle_change_reference_data(&mut self, cmd: &APDU) -> Response {
        let target = match Self::target_for(cmd.p2) {
            Some(target) => target,
            None => return Response::error(SW::INCORRECT_P1_P2),
        };
        if cmd.data.len() != 16 {
            return Response::error(SW::WRONG_LENGTH);
        }

        let old_value = unpad(&cmd.data[..8]);
        let new_value = unpad(&cmd.data[8..]);

        if let Err(response) = self.check_reference(target, &old_value) {
            return response;
        }

        self.credentials.set_reference(target, new_value.to_vec());
        self.dirty = true;
        info!("PIV {} changed successfully", target);
        Response::ok()
    }

    fn handle_general_authenticate(&mut self, cmd: &APDU) -> Response {
        if cmd.p2 != MANAGEMENT_KEY_REF {
            // Key slots other than the management key are not modelled
            return Response::error(SW::FUNCTION_NOT_SUPPORTED);
        }
        if cmd.p1 != TDesOperations::ALGORITHM_ID {
            return Response::error(SW::INCORRECT_P1_P2);
        }

        let tlvs = match read_list(&cmd.data) {
            Ok(tlvs) => tlvs,
            Err(_) => return Response::error(SW::WRONG_DATA),
        };
        let template = match tlvs.iter().find(|t| t.tag == tags::DYNAMIC_AUTH_TEMPLATE) {
            Some(template) => template,
            None => return Response::error(SW::WRONG_DATA),
        };

        let witness = template.find_child(tags::WITNESS).map(|t| t.value.as_slice());
        let challenge = template.find_child(tags::CHALLENGE).map(|t| t.value.as_slice());

        match (witness, challenge) {
            (Some([]), None) => self.issue_witness(),
            (Some(witness), Some(challenge)) => self.check_witness(witness, challenge),
            _ => Response::error(SW::WRONG_DATA),
        }
    }

    /// Step 1: encrypt a fresh random witness under the management key
    fn issue_witness(&mut self) -> Response {
        let mut witness = Zeroizing::new([0u8; TDesOperations::BLOCK_SIZE]);
        fill_random(&mut witness[..]);

        match TDesOperations::encrypt_block(&self.credentials.management_key, &witness[..]) {
            Ok(encrypted) => {
                self.witness = Some(witness);
                self.security_state.set_management_key_authenticated(false);
                let data = TLVBuilder::new()
                    .add(tags::WITNESS, &encrypted)
                    .wrap(tags::DYNAMIC_AUTH_TEMPLATE)
                    .build();
                debug!("Issued management key witness");
                Response::success(data)
            }
            Err(_) => Response::error(SW::EXEC_ERROR),
        }
    }

    /// Step 2: compare the decrypted witness and answer the host challenge
    fn check_witness(&mut self, presented: &[u8], challenge: &[u8]) -> Response {
        let expected = match self.witness.take() {
            Some(witness) => witness,
            None => return Response::error(SW::CONDITIONS_NOT_SATISFIED),
        };

        if presented != &expected[..] {
            warn!("Management key authentication failed");
            self.security_state.set_management_key_authenticated(false);
            return Response::error(SW::SECURITY_STATUS_NOT_SATISFIED);
        }

        match TDesOperations::encrypt_block(&self.credentials.management_key, challenge) {
            Ok(encrypted) => {
                self.security_state.set_management_key_authenticated(true);
                let data = TLVBuilder::new()
                    .add(tags::RESPONSE, &encrypted)
                    .wrap(tags::DYNAMIC_AUTH_TEMPLATE)
                    .build();
                info!("Management key authenticated successfully");
                Response::success(data)
            }
            Err(_) => Response::error(SW::WRONG_DATA),
        }
    }

    fn handle_set_management_key(&mut self, cmd: &APDU) -> Response {
        // P2 FE requests touch policy; accepted and ignored
        if cmd.p1 != 0xFF || (cmd.p2 != 0xFF && cmd.p2 != 0xFE) {
            return Response::error(SW::INCORRECT_P1_P2);
        }
        if !self.security_state.is_management_key_authenticated() {
            return Response::error(SW::SECURITY_STATUS_NOT_SATISFIED);
        }

        match cmd.data.as_slice() {
            [algorithm, key_ref, len, key @ ..]
                if *algorithm == TDesOperations::ALGORITHM_ID
                    && *key_ref == MANAGEMENT_KEY_REF
                    && *len as usize == MANAGEMENT_KEY_LEN
                    && key.len() == MANAGEMENT_KEY_LEN =>
            {
                self.credentials.management_key.zeroize();
                self.credentials.management_key = key.to_vec();
                self.dirty = true;
                info!("Management key replaced");
                Response::ok()
            }
            _ => Response::error(SW::WRONG_DATA),
        }
    }

    fn handle_reset(&mut self) -> Response {
        let serial = self.credentials.serial;
        self.credentials = TokenCredentials::factory(serial);
        self.security_state.clear_all();
        self.witness = None;
        self.dirty = true;
        info!("PIV application reset to factory state");
        Response::ok()
    }

    fn handle_get_response(&mut self, cmd: &APDU) -> Response {
        if self.response_buffer.is_empty() {
            return Response::error(SW::CONDITIONS_NOT_SATISFIED);
        }

        let mut le = cmd.le.unwrap_or(256) as usize;
        if let Some(chunk) = self.chunk_size {
            le = le.min(chunk);
        }
        let remaining = self.response_buffer.len() - self.response_offset;
        let to_send = le.min(remaining);

        let data =
            self.response_buffer[self.response_offset..self.response_offset + to_send].to_vec();
        self.response_offset += to_send;

        if self.response_offset >= self.response_buffer.len() {
            self.response_buffer.clear();
            self.response_offset = 0;
            Response::success(data)
        } else {
            let still_remaining = self.response_buffer.len() - self.response_offset;
            Response::more_data(data, still_remaining.min(255) as u8)
        }
    }

    fn handle_get_version(&self) -> Response {
        let (major, minor, patch) = self.version;
        Response::success(vec![major, minor, patch])
    }

    fn handle_get_serial(&self) -> Response {
        Response::success(self.credentials.serial.to_be_bytes().to_vec())
    }
}
