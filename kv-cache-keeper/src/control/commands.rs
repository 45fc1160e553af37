//! Operator commands typed at the console while the keeper runs.

use crate::naming::BackupLabel;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Named backup of the latest snapshot group; always copies
    Backup(BackupLabel),
    /// Interactive restore
    Load,
    /// Change the restore target for files without a slot id
    Slot(u32),
    Help,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {0:?} (type 'help')")]
    Unknown(String),

    #[error("'{0}' needs an argument (type 'help')")]
    MissingArgument(&'static str),

    #[error("Invalid slot number: {0:?}")]
    InvalidSlot(String),

    #[error("Invalid backup name {0:?}: use letters, digits and '-'")]
    InvalidBackupName(String),
}

pub const HELP: &str = "\
Commands:
  backup <name>   back up the latest snapshot group as <name> (letters, digits, '-')
  load | restore  choose a restore point interactively
  slot <n>        restore files without a slot id into slot <n>
  help            show this help";

/// Parse one console line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Option<Result<Command, CommandError>> {
    let mut words = line.split_whitespace();
    let verb = words.next()?;
    let arg = words.next();

    let command = match verb.to_ascii_lowercase().as_str() {
        "backup" => match arg {
            None => Err(CommandError::MissingArgument("backup")),
            Some(name) => BackupLabel::new(name)
                .map(Command::Backup)
                .ok_or_else(|| CommandError::InvalidBackupName(name.to_string())),
        },
        "load" | "restore" => Ok(Command::Load),
        "slot" => match arg {
            None => Err(CommandError::MissingArgument("slot")),
            Some(raw) => raw
                .parse::<u32>()
                .map(Command::Slot)
                .map_err(|_| CommandError::InvalidSlot(raw.to_string())),
        },
        "help" | "?" => Ok(Command::Help),
        _ => Err(CommandError::Unknown(line.trim().to_string())),
    };
    Some(command)
}
