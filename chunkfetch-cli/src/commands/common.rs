//! Common types and utilities shared across CLI commands.

use clap::{Args, ValueEnum};
use chunkfetch::{Locator, MediaKind, TierId};

use crate::error::CliError;

/// Media kind selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum MediaArg {
    /// Video file
    Video,
    /// Voice note or other audio
    Audio,
    /// Generic document
    Document,
}

impl From<MediaArg> for MediaKind {
    fn from(arg: MediaArg) -> Self {
        match arg {
            MediaArg::Video => MediaKind::Video,
            MediaArg::Audio => MediaKind::Audio,
            MediaArg::Document => MediaKind::Document,
        }
    }
}

/// Address of one remote object.
///
/// Keyed media takes `--kind` and `--id`; legacy images take `--volume`,
/// `--local` and `--secret`.
#[derive(Debug, Clone, Args)]
pub struct LocatorArgs {
    /// Storage tier holding the object
    #[arg(long, default_value_t = 1)]
    pub tier: u32,

    /// Media kind of a keyed object
    #[arg(long, value_enum)]
    pub kind: Option<MediaArg>,

    /// Object id of a keyed object
    #[arg(long)]
    pub id: Option<u64>,

    /// Access token of a keyed object
    #[arg(long, default_value_t = 0)]
    pub token: u64,

    /// Volume id of a legacy image
    #[arg(long)]
    pub volume: Option<u64>,

    /// Local id of a legacy image
    #[arg(long, allow_hyphen_values = true)]
    pub local: Option<i32>,

    /// Secret of a legacy image
    #[arg(long)]
    pub secret: Option<u64>,
}

impl LocatorArgs {
    /// Build the locator, requiring exactly one complete address form.
    pub fn to_locator(&self) -> Result<Locator, CliError> {
        let tier = TierId(self.tier);
        let legacy_given = self.volume.is_some() || self.local.is_some() || self.secret.is_some();

        match (self.kind, self.id) {
            (Some(kind), Some(id)) if !legacy_given => {
                Ok(Locator::keyed(tier, kind.into(), id, self.token))
            }
            (Some(_), Some(_)) => Err(CliError::Locator(
                "--kind/--id cannot be combined with --volume/--local/--secret".to_string(),
            )),
            (Some(_), None) | (None, Some(_)) => Err(CliError::Locator(
                "keyed objects need both --kind and --id".to_string(),
            )),
            (None, None) => match (self.volume, self.local, self.secret) {
                (Some(volume), Some(local), Some(secret)) => {
                    Ok(Locator::legacy(tier, volume, local, secret))
                }
                _ => Err(CliError::Locator(
                    "give --kind and --id, or --volume, --local and --secret".to_string(),
                )),
            },
        }
    }
}
