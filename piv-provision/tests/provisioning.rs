//! End-to-end operations against the simulated token

use piv_provision::apdu::ins;
use piv_provision::store::mirror_identifiers;
use piv_provision::{
    operations, DeviceGeneration, FileSecretStore, InMemorySecretStore, ManagementKey, Operation,
    PivError, PivResult, ReferenceTarget, RotationMode, SecretStore, SecureBuffer,
    VerifyFailurePolicy, VirtualCard,
};
use tempfile::TempDir;

fn run<S: SecretStore>(
    card: &mut VirtualCard,
    store: &mut S,
    operation: Operation,
) -> (PivResult<()>, Vec<String>) {
    let mut lines = Vec::new();
    let result = operations::run(
        card,
        store,
        operation,
        VerifyFailurePolicy::Continue,
        &mut |line: &str| lines.push(line.to_string()),
    );
    (result, lines)
}

fn mirrored_key<S: SecretStore>(store: &S) -> String {
    let values: Vec<String> = mirror_identifiers()
        .map(|id| store.get(id).unwrap().unwrap().to_string())
        .collect();
    assert!(values.windows(2).all(|pair| pair[0] == pair[1]));
    values[0].clone()
}

#[test]
fn test_default_rotation_updates_every_mirror() {
    let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
    let mut store = InMemorySecretStore::new();

    let (result, lines) = run(
        &mut card,
        &mut store,
        Operation::ChangeManagementKey(RotationMode::Default),
    );
    assert!(result.is_ok());
    assert_eq!(lines, vec!["Change Management Key successfully completed"]);

    let key = mirrored_key(&store);
    assert_eq!(key.len(), 48);
    assert_eq!(
        ManagementKey::from_hex(&key).unwrap().as_bytes(),
        &card.credentials().management_key[..]
    );
}

#[test]
fn test_random_rotation_follows_default_rotation() {
    let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
    let mut store = InMemorySecretStore::new();

    run(
        &mut card,
        &mut store,
        Operation::ChangeManagementKey(RotationMode::Default),
    )
    .0
    .unwrap();
    let first = mirrored_key(&store);

    let (result, _) = run(
        &mut card,
        &mut store,
        Operation::ChangeManagementKey(RotationMode::Random),
    );
    assert!(result.is_ok());
    let second = mirrored_key(&store);
    assert_ne!(first, second);
    assert_eq!(
        ManagementKey::from_hex(&second).unwrap().as_bytes(),
        &card.credentials().management_key[..]
    );
}

#[test]
fn test_random_rotation_with_empty_store_fails_fast() {
    let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
    let mut store = InMemorySecretStore::new();

    let (result, lines) = run(
        &mut card,
        &mut store,
        Operation::ChangeManagementKey(RotationMode::Random),
    );
    assert!(matches!(result, Err(PivError::ConfigurationMissing { .. })));
    assert!(lines[0].starts_with("Error: "));
    assert_eq!(card.commands(), &[ins::SELECT]);
    assert!(store.writes().is_empty());
    assert!(ManagementKey::from_bytes(&card.credentials().management_key)
        .unwrap()
        .is_factory_default());
}

#[test]
fn test_change_pin() {
    let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
    let mut store = InMemorySecretStore::new();

    let (result, lines) = run(
        &mut card,
        &mut store,
        Operation::ChangePin {
            old: SecureBuffer::from_text("123456"),
            new: SecureBuffer::from_text("654321"),
        },
    );
    assert!(result.is_ok());
    assert_eq!(lines, vec!["Changed PIN successfully"]);
    assert_eq!(card.credentials().pin, b"654321");
}

#[test]
fn test_change_puk_with_wrong_old_puk() {
    let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
    let mut store = InMemorySecretStore::new();

    let (result, lines) = run(
        &mut card,
        &mut store,
        Operation::ChangePuk {
            old: SecureBuffer::from_text("00000000"),
            new: SecureBuffer::from_text("87654321"),
        },
    );
    assert!(matches!(
        result,
        Err(PivError::VerificationFailed {
            target: ReferenceTarget::Puk,
            retries: Some(2)
        })
    ));
    assert_eq!(operations::exit_code(&result), 0);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("Change PUK failed"));
    assert_eq!(card.credentials().puk, b"12345678");
}

#[test]
fn test_missing_application_exits_with_failure() {
    let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
    card.fail_instruction(ins::SELECT, 0x6A82);
    let mut store = InMemorySecretStore::new();

    let (result, _) = run(&mut card, &mut store, Operation::Reset);
    assert_eq!(operations::exit_code(&result), 1);
}

#[test]
fn test_reset_allows_default_rotation_again() {
    let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
    let mut store = InMemorySecretStore::new();

    run(
        &mut card,
        &mut store,
        Operation::ChangeManagementKey(RotationMode::Default),
    )
    .0
    .unwrap();

    let (result, lines) = run(&mut card, &mut store, Operation::Reset);
    assert!(result.is_ok());
    assert_eq!(lines, vec!["YubiKey reset to factory settings"]);

    let (result, _) = run(
        &mut card,
        &mut store,
        Operation::ChangeManagementKey(RotationMode::Default),
    );
    assert!(result.is_ok());
}

#[test]
fn test_state_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let card_path = temp_dir.path().join("token.json");
    let store_path = temp_dir.path().join("store").join("secrets.json");

    {
        let mut card = VirtualCard::open(&card_path).unwrap();
        let mut store = FileSecretStore::new(&store_path);
        run(
            &mut card,
            &mut store,
            Operation::ChangeManagementKey(RotationMode::Default),
        )
        .0
        .unwrap();
    }

    let mut card = VirtualCard::open(&card_path).unwrap();
    let mut store = FileSecretStore::new(&store_path);
    assert!(!ManagementKey::from_bytes(&card.credentials().management_key)
        .unwrap()
        .is_factory_default());

    let (result, lines) = run(
        &mut card,
        &mut store,
        Operation::ChangeManagementKey(RotationMode::Random),
    );
    assert!(result.is_ok(), "{:?}", lines);
    assert_eq!(
        ManagementKey::from_hex(&mirrored_key(&store)).unwrap().as_bytes(),
        &card.credentials().management_key[..]
    );
}

#[test]
fn test_legacy_token_reads_legacy_mirror() {
    let mut card = VirtualCard::new(DeviceGeneration::YubiKey4);
    let mut store = InMemorySecretStore::new();

    run(
        &mut card,
        &mut store,
        Operation::ChangeManagementKey(RotationMode::Default),
    )
    .0
    .unwrap();

    let (result, _) = run(
        &mut card,
        &mut store,
        Operation::ChangeManagementKey(RotationMode::Random),
    );
    assert!(result.is_ok());
    assert!(store
        .get(DeviceGeneration::YubiKey4.store_identifier())
        .unwrap()
        .is_some());
}
