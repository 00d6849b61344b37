//! Interactive profile selection.

use std::io::{self, BufRead, Write};

use log::debug;

use crate::{error::AssumeError, profiles::ProfileRoleMap};

/// Source of the operator's answer to the profile menu.
pub trait Prompt {
    /// Shows `menu`, asks `question` and returns the raw answer.
    fn ask(&mut self, menu: &str, question: &str) -> io::Result<String>;
}

/// Prompt bound to the process's stdin/stdout.
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn ask(&mut self, menu: &str, question: &str) -> io::Result<String> {
        let mut stdout = io::stdout().lock();
        write!(stdout, "{menu}{question}")?;
        stdout.flush()?;

        let mut input = String::new();
        io::stdin().lock().read_line(&mut input)?;
        Ok(input)
    }
}

/// The profile picked by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedProfile {
    /// Normalized profile name, see [`normalize_profile_name`].
    pub name: String,
    pub role_arn: String,
}

/// Keeps only the last whitespace-separated token, so `profile dev` becomes `dev`.
pub fn normalize_profile_name(raw: &str) -> &str {
    raw.split_whitespace().next_back().unwrap_or(raw)
}

/// Renders the numbered menu shown before asking for a profile id.
pub fn render_menu(profiles: &ProfileRoleMap) -> String {
    let mut menu = String::from("\nPlease choose from the following profile(s) : \n\n");
    for (i, profile) in profiles.iter().enumerate() {
        menu.push_str(&format!("{})  {}\n", i + 1, profile.name));
    }
    menu
}

/// Asks the operator to pick one of `profiles`.
///
/// This function:
/// 1. Refuses to prompt when there is nothing to choose from
/// 2. Shows the numbered menu and reads one answer
/// 3. Resolves the answer to a profile by its 1-based position
/// 4. Normalizes the section name (`profile dev` -> `dev`)
///
/// There is a single attempt: bad input is an error, not a re-prompt.
///
/// # Arguments
/// * `profiles` - Assumable profiles in menu order
/// * `prompt` - Source of the operator's answer
///
/// # Returns
/// * `Ok(SelectedProfile)` - The chosen profile and its role ARN
///
/// # Errors
/// * [`AssumeError::NoAssumableProfiles`] - `profiles` is empty
/// * [`AssumeError::Prompt`] - The answer could not be read
/// * [`AssumeError::SelectionNotNumeric`] - The answer is not an integer
/// * [`AssumeError::SelectionOutOfRange`] - The integer is not in `1..=N`
pub fn select(
    profiles: &ProfileRoleMap,
    prompt: &mut impl Prompt,
) -> Result<SelectedProfile, AssumeError> {
    if profiles.is_empty() {
        return Err(AssumeError::NoAssumableProfiles);
    }

    // Menu and question go out together; the answer comes back raw
    let answer = prompt
        .ask(&render_menu(profiles), "\n Enter profile id: ")
        .map_err(AssumeError::Prompt)?;
    let answer = answer.trim();

    let index = answer
        .parse::<i64>()
        .map_err(|_| AssumeError::SelectionNotNumeric {
            input: answer.to_string(),
        })?;

    // Negative ids fail the conversion and land in the same error as too-large ones
    let profile = usize::try_from(index)
        .ok()
        .and_then(|i| profiles.nth(i))
        .ok_or(AssumeError::SelectionOutOfRange {
            index,
            max: profiles.len(),
        })?;

    debug!("Selected profile: {} ({})", profile.name, profile.role_arn);
    Ok(SelectedProfile {
        name: normalize_profile_name(&profile.name).to_string(),
        role_arn: profile.role_arn.clone(),
    })
}
