use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use env_logger::Builder;
use log::{debug, LevelFilter};
use zeroize::Zeroize;

use piv_provision::config::{Settings, STORE_ENV, VIRTUAL_CARD_ENV};
use piv_provision::{operations, Operation, RotationMode, SecureBuffer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
/// Provision PIV credentials on a YubiKey
struct Cli {
    /// Increase verbosity
    #[arg(long, global = true)]
    verbose: bool,

    /// File holding the host-side management key mirror
    #[arg(long, global = true, env = STORE_ENV)]
    store: Option<PathBuf>,

    /// Use a simulated token persisted in this file instead of a reader
    #[arg(long, global = true, env = VIRTUAL_CARD_ENV)]
    virtual_card: Option<PathBuf>,

    /// Skip the PIN change when the old PIN fails verification
    #[arg(long, global = true)]
    abort_on_verify_failure: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reset the PIV application to factory settings
    Reset,
    /// Replace the management key and update the host mirror
    ChangeManagementKey {
        #[command(flatten)]
        mode: KeyMode,
    },
    /// Change the PIN
    ChangePin {
        #[arg(short, long)]
        old: String,
        #[arg(short, long)]
        new: String,
    },
    /// Change the PUK
    ChangePuk {
        #[arg(short, long)]
        old: String,
        #[arg(short, long)]
        new: String,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct KeyMode {
    /// Authenticate with the factory default management key
    #[arg(short, long)]
    default: bool,
    /// Authenticate with the key held in the host mirror
    #[arg(short, long)]
    random: bool,
}

fn secret(mut text: String) -> SecureBuffer {
    let buffer = SecureBuffer::from_text(&text);
    text.zeroize();
    buffer
}

impl Command {
    fn into_operation(self) -> Operation {
        match self {
            Command::Reset => Operation::Reset,
            Command::ChangeManagementKey { mode } => {
                if mode.random {
                    Operation::ChangeManagementKey(RotationMode::Random)
                } else {
                    Operation::ChangeManagementKey(RotationMode::Default)
                }
            }
            Command::ChangePin { old, new } => Operation::ChangePin {
                old: secret(old),
                new: secret(new),
            },
            Command::ChangePuk { old, new } => Operation::ChangePuk {
                old: secret(old),
                new: secret(new),
            },
        }
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // --help and --version are not failures
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Warn).parse_default_env();
    if cli.verbose {
        builder.filter_level(LevelFilter::Debug);
    }
    builder.init();

    let settings = Settings::new(cli.store, cli.virtual_card, cli.abort_on_verify_failure);
    let operation = cli.command.into_operation();

    let transport = match settings.open_transport() {
        Ok(transport) => transport,
        Err(e) => {
            println!("No YubiKey available: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut store = settings.open_store();

    let name = operation.name();
    let result = operations::run(
        transport,
        &mut store,
        operation,
        settings.verify_policy,
        &mut |line: &str| println!("{}", line),
    );
    if let Err(e) = &result {
        debug!("{} finished with error: {}", name, e);
    }
    ExitCode::from(operations::exit_code(&result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_help_is_not_a_failure() {
        let err = Cli::try_parse_from(["piv-provision", "--help"]).err().unwrap();
        assert!(!err.use_stderr());
    }

    #[test]
    fn test_key_mode_short_flags() {
        let cli = Cli::try_parse_from(["piv-provision", "change-management-key", "-d"]).unwrap();
        assert!(matches!(
            cli.command.into_operation(),
            Operation::ChangeManagementKey(RotationMode::Default)
        ));

        let cli = Cli::try_parse_from(["piv-provision", "change-management-key", "-r"]).unwrap();
        assert!(matches!(
            cli.command.into_operation(),
            Operation::ChangeManagementKey(RotationMode::Random)
        ));
    }

    #[test]
    fn test_key_mode_is_exclusive_and_required() {
        let both = Cli::try_parse_from(["piv-provision", "change-management-key", "-d", "-r"]);
        assert!(both.err().unwrap().use_stderr());

        let neither = Cli::try_parse_from(["piv-provision", "change-management-key"]);
        assert!(neither.err().unwrap().use_stderr());
    }
}
