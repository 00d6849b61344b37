//! Reading assumable profiles out of the AWS config file.
//!
//! Only sections carrying a `role_arn` key are kept. Plain credential profiles
//! live in the same file and are skipped without complaint:
//!
//! ```ini
//! [default]
//! region = eu-west-1
//!
//! [profile dev]
//! role_arn = arn:aws:iam::111111111111:role/Dev
//! source_profile = default
//! ```

use std::{
    io,
    path::{Path, PathBuf},
};

use configparser::ini::{Ini, IniDefault, WriteOptions};
use log::debug;

use crate::error::AssumeError;

/// Key holding the role to assume.
const ROLE_ARN_KEY: &str = "role_arn";

/// Section name for keys that appear before any `[section]` header.
///
/// configparser's own default is `default`, which would swallow the real
/// `[default]` profile.
pub const TOP_LEVEL_SECTION: &str = "__top_level__";

/// A single assumable profile as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRole {
    pub name: String,
    pub role_arn: String,
}

/// Profile name to role ARN, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileRoleMap {
    entries: Vec<ProfileRole>,
}

impl ProfileRoleMap {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up the profile at a 1-based menu position.
    pub fn nth(&self, index: usize) -> Option<&ProfileRole> {
        index.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProfileRole> {
        self.entries.iter()
    }
}

impl FromIterator<ProfileRole> for ProfileRoleMap {
    fn from_iter<T: IntoIterator<Item = ProfileRole>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf, AssumeError> {
    match path.strip_prefix('~') {
        Some("") => dirs::home_dir().ok_or(AssumeError::HomeDirectory),
        Some(rest) if rest.starts_with('/') || rest.starts_with(std::path::MAIN_SEPARATOR) => {
            let home = dirs::home_dir().ok_or(AssumeError::HomeDirectory)?;
            Ok(home.join(rest.trim_start_matches(['/', std::path::MAIN_SEPARATOR])))
        }
        _ => Ok(PathBuf::from(path)),
    }
}

/// New INI parser matching how the AWS CLI reads its shared files.
///
/// * section names keep their case, and `[default]` is an ordinary section
/// * `;` and `#` only start a comment at the beginning of a line, so values
///   such as `credential_process = sh -c 'a; b'` survive intact
/// * indented continuation lines belong to the key above them, which keeps
///   nested settings like `s3 =` / `    max_concurrent_requests = 20`
pub fn new_ini() -> Ini {
    let mut defaults = IniDefault::default();
    defaults.default_section = TOP_LEVEL_SECTION.to_string();
    defaults.case_sensitive = true;
    defaults.enable_inline_comments = false;
    defaults.multiline = true;
    Ini::new_from_defaults(defaults)
}

/// Layout used when writing a document back: `key = value`, four-space
/// continuation indent and a blank line between sections.
pub fn write_options() -> WriteOptions {
    WriteOptions::new_with_params(true, 4, 1)
}

/// Loads every profile with a `role_arn` from the config file at `path`.
///
/// # Errors
///
/// * [`AssumeError::ConfigNotFound`] if the file does not exist
/// * [`AssumeError::ConfigEmpty`] if it has no sections at all
/// * [`AssumeError::ConfigRead`] / [`AssumeError::ConfigParse`] for I/O and
///   syntax problems
pub fn read_profiles(path: &str) -> Result<ProfileRoleMap, AssumeError> {
    let path = expand_home(path)?;
    let content = read_config(&path)?;
    if content.trim().is_empty() {
        return Err(AssumeError::ConfigEmpty { path });
    }

    let mut ini = new_ini();
    ini.read(content)
        .map_err(|message| AssumeError::ConfigParse {
            path: path.clone(),
            message,
        })?;

    let sections = ini
        .get_map_ref()
        .iter()
        .filter(|(name, _)| name.as_str() != TOP_LEVEL_SECTION)
        .collect::<Vec<_>>();

    if sections.is_empty() {
        return Err(AssumeError::ConfigEmpty { path });
    }

    let profiles = sections
        .into_iter()
        // Option names are case-insensitive in the AWS CLI; section names are not.
        .filter_map(|(name, keys)| match keys
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(ROLE_ARN_KEY))
            .map(|(_, value)| value)
        {
            Some(Some(role_arn)) if !role_arn.is_empty() => Some(ProfileRole {
                name: name.clone(),
                role_arn: role_arn.clone(),
            }),
            _ => {
                debug!("Skipping profile without {ROLE_ARN_KEY}: {name}");
                None
            }
        })
        .collect::<ProfileRoleMap>();

    debug!(
        "Found {} assumable profile(s) in {}",
        profiles.len(),
        path.display()
    );
    Ok(profiles)
}

fn read_config(path: &Path) -> Result<String, AssumeError> {
    std::fs::read_to_string(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => AssumeError::ConfigNotFound {
            path: path.to_path_buf(),
        },
        _ => AssumeError::ConfigRead {
            path: path.to_path_buf(),
            source,
        },
    })
}
