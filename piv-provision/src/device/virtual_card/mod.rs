//! Simulated PIV token
//!
//! [`VirtualCard`] answers APDUs through [`CardTransport`] exactly like a
//! token in a reader, so every operation can run without hardware. State can
//! be kept in a JSON file between runs; the CLI uses this for
//! `--virtual-card`.

mod applet;
mod credentials;

use applet::PivApplet;
pub use credentials::TokenCredentials;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{CardTransport, TransportError};
use crate::apdu::{parse_apdu, Response, SW};
use crate::crypto::fill_random;
use crate::store::DeviceGeneration;

/// On-disk form of a simulated token
#[derive(Serialize, Deserialize)]
struct CardFile {
    #[serde(with = "credentials::hex_bytes")]
    atr: Vec<u8>,
    credentials: TokenCredentials,
}

fn random_serial() -> u32 {
    let mut bytes = [0u8; 4];
    fill_random(&mut bytes);
    // Keep it in the 8-digit range printed on real keys
    u32::from_be_bytes(bytes) % 100_000_000
}

fn firmware_version(atr: &[u8]) -> (u8, u8, u8) {
    match DeviceGeneration::from_atr(atr) {
        Some(DeviceGeneration::YubiKey4) => (4, 3, 7),
        _ => (5, 4, 3),
    }
}

/// In-process token implementing [`CardTransport`]
pub struct VirtualCard {
    applet: PivApplet,
    atr: Vec<u8>,
    state_path: Option<PathBuf>,
    commands: Vec<u8>,
    injected: HashMap<u8, u16>,
    disconnects: usize,
}

impl VirtualCard {
    /// Factory-fresh token of the given generation
    pub fn new(generation: DeviceGeneration) -> Self {
        Self::with_atr(generation.atr().to_vec())
    }

    /// Factory-fresh token reporting an arbitrary ATR
    pub fn with_atr(atr: Vec<u8>) -> Self {
        let applet = PivApplet::new(TokenCredentials::factory(random_serial()), firmware_version(&atr));
        Self {
            applet,
            atr,
            state_path: None,
            commands: Vec::new(),
            injected: HashMap::new(),
            disconnects: 0,
        }
    }

    /// Replace the token's credentials
    pub fn with_credentials(mut self, credentials: TokenCredentials) -> Self {
        self.applet = PivApplet::new(credentials, firmware_version(&self.atr));
        self
    }

    /// Load a token from `path`, creating a factory YubiKey 5 if absent
    ///
    /// Changes are written back to the same file as they happen.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TransportError> {
        let path = path.into();
        let state_err = |reason: String| TransportError::State {
            path: path.clone(),
            reason,
        };

        let mut card = if path.exists() {
            let content =
                Zeroizing::new(fs::read_to_string(&path).map_err(|e| state_err(e.to_string()))?);
            let file: CardFile =
                serde_json::from_str(&content).map_err(|e| state_err(e.to_string()))?;
            info!("Loaded simulated token from {:?}", path);
            let CardFile { atr, credentials } = file;
            Self::with_atr(atr).with_credentials(credentials)
        } else {
            info!("No simulated token at {:?}, creating a factory one", path);
            Self::new(DeviceGeneration::YubiKey5)
        };

        card.state_path = Some(path);
        card.save()?;
        Ok(card)
    }

    /// Write the token state to its file, if it has one
    pub fn save(&self) -> Result<(), TransportError> {
        let path = match &self.state_path {
            Some(path) => path,
            None => return Ok(()),
        };
        let state_err = |reason: String| TransportError::State {
            path: path.clone(),
            reason,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| state_err(e.to_string()))?;
            }
        }

        let file = CardFile {
            atr: self.atr.clone(),
            credentials: self.applet.credentials().clone(),
        };
        let json = Zeroizing::new(
            serde_json::to_string_pretty(&file).map_err(|e| state_err(e.to_string()))?,
        );
        fs::write(path, json.as_bytes()).map_err(|e| state_err(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))
                .map_err(|e| state_err(e.to_string()))?;
        }
        debug!("Saved simulated token to {:?}", path);
        Ok(())
    }

    pub fn state_path(&self) -> Option<&Path> {
        self.state_path.as_deref()
    }

    pub fn credentials(&self) -> &TokenCredentials {
        self.applet.credentials()
    }

    /// Instruction bytes received so far, in order
    pub fn commands(&self) -> &[u8] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Answer every later command with instruction `ins` with status `sw`
    pub fn fail_instruction(&mut self, ins: u8, sw: u16) {
        self.injected.insert(ins, sw);
    }

    /// Limit response data per APDU, forcing GET RESPONSE chaining
    pub fn set_response_chunk_size(&mut self, size: Option<usize>) {
        self.applet.set_chunk_size(size);
    }

    /// How many sessions have released the card
    pub fn disconnects(&self) -> usize {
        self.disconnects
    }
}

impl CardTransport for VirtualCard {
    fn atr(&self) -> &[u8] {
        &self.atr
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        if let Some(&ins) = command.get(1) {
            self.commands.push(ins);
        }

        let cmd = match parse_apdu(command) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!("Failed to parse APDU: {}", e);
                return Ok(Response::error(SW::WRONG_LENGTH).to_bytes());
            }
        };

        if let Some(&sw) = self.injected.get(&cmd.ins) {
            debug!("Injected SW {:04X} for INS {:02X}", sw, cmd.ins);
            return Ok(Response::error(sw).to_bytes());
        }

        let response = self.applet.process_apdu(&cmd);
        if self.applet.take_dirty() {
            if let Err(e) = self.save() {
                warn!("Failed to persist simulated token: {}", e);
            }
        }
        Ok(response.to_bytes())
    }

    fn disconnect(&mut self) {
        self.applet.reset();
        self.disconnects += 1;
        debug!("Simulated token released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apdu::{ins, APDU};
    use crate::device::PIV_AID;
    use tempfile::TempDir;

    fn select(card: &mut VirtualCard) -> Response {
        let apdu = APDU::with_data(0x00, ins::SELECT, 0x04, 0x00, PIV_AID.to_vec());
        Response::from_bytes(&card.transmit(&apdu.to_bytes().unwrap()).unwrap()).unwrap()
    }

    #[test]
    fn test_generation_atr() {
        let card = VirtualCard::new(DeviceGeneration::YubiKey4);
        assert_eq!(card.atr(), DeviceGeneration::YUBIKEY4_ATR);
    }

    #[test]
    fn test_records_instructions() {
        let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
        assert!(select(&mut card).is_okay());
        card.transmit(&[0x00, ins::GET_SERIAL, 0x00, 0x00]).unwrap();
        assert_eq!(card.commands(), &[ins::SELECT, ins::GET_SERIAL]);
    }

    #[test]
    fn test_injected_failure() {
        let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
        card.fail_instruction(ins::SELECT, SW::FILE_NOT_FOUND);
        assert_eq!(select(&mut card).sw(), SW::FILE_NOT_FOUND);
    }

    #[test]
    fn test_garbage_apdu() {
        let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
        let reply = card.transmit(&[0x00, 0xA4]).unwrap();
        assert_eq!(reply, vec![0x67, 0x00]);
    }

    #[test]
    fn test_state_persists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("token.json");

        let serial = {
            let mut card = VirtualCard::open(&path).unwrap();
            assert!(select(&mut card).is_okay());
            let mut data = b"123456\xFF\xFF".to_vec();
            data.extend_from_slice(b"246810\xFF\xFF");
            let change = APDU::with_data(0x00, ins::CHANGE_REFERENCE_DATA, 0x00, 0x80, data);
            card.transmit(&change.to_bytes().unwrap()).unwrap();
            card.credentials().serial
        };

        let card = VirtualCard::open(&path).unwrap();
        assert_eq!(card.credentials().pin, b"246810");
        assert_eq!(card.credentials().serial, serial);
        assert_eq!(card.atr(), DeviceGeneration::YUBIKEY5_ATR);
    }

    #[test]
    fn test_corrupt_state_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("token.json");
        fs::write(&path, "[]").unwrap();
        assert!(matches!(
            VirtualCard::open(&path),
            Err(TransportError::State { .. })
        ));
    }

    #[test]
    fn test_disconnect_clears_security_state() {
        let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
        assert!(select(&mut card).is_okay());
        card.disconnect();
        assert_eq!(card.disconnects(), 1);

        // Application must be selected again after release
        let reply = card.transmit(&[0x00, ins::GET_VERSION, 0x00, 0x00]).unwrap();
        assert_eq!(reply, vec![0x69, 0x85]);
    }
}
