//! Emitting temporary credentials.
//!
//! Credentials either go to stdout as a flat JSON object, ready for `jq` or an
//! `eval`-style wrapper, or are merged into the shared credentials file under
//! the session name:
//!
//! ```ini
//! [default]
//! aws_access_key_id=AKIA...           # untouched
//! aws_secret_access_key=...
//!
//! [temp_dev]
//! aws_access_key_id=ASIA...           # replaced on every run
//! aws_secret_access_key=...
//! aws_session_token=...
//! ```
//!
//! Only the target section changes. Everything else in the file is written
//! back as it was read.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use configparser::ini::Ini;
use log::{debug, info};
use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};
use tokio::{fs, io::AsyncWriteExt};

use crate::{
    cli::OutputMode,
    credentials::CredentialBundle,
    error::AssumeError,
    profiles::{new_ini, write_options},
};

/// Environment-variable shaped view of a bundle, in output order.
#[derive(Serialize)]
struct EnvCredentials<'a> {
    #[serde(rename = "AWS_ACCESS_KEY_ID")]
    access_key_id: &'a str,
    #[serde(rename = "AWS_SECRET_ACCESS_KEY")]
    secret_access_key: &'a str,
    #[serde(rename = "AWS_SESSION_TOKEN")]
    session_token: &'a str,
}

/// Single-line JSON with `", "` and `": "` separators.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        writer.write_all(b": ")
    }
}

/// Writes `bundle` to `out` as one JSON line.
pub fn print_json(bundle: &CredentialBundle, out: &mut impl Write) -> io::Result<()> {
    let env = EnvCredentials {
        access_key_id: &bundle.access_key_id,
        secret_access_key: &bundle.secret_access_key,
        session_token: &bundle.session_token,
    };

    let mut serializer = Serializer::with_formatter(&mut *out, SpacedFormatter);
    env.serialize(&mut serializer)?;
    writeln!(out)?;
    out.flush()
}

/// Merges temporary credentials into the shared credentials file.
///
/// The updater owns nothing but the path; every [`write`](Self::write) reads
/// the current file, changes one section and replaces the file as a whole.
pub struct CredentialsUpdater {
    /// Path to the credentials file (typically ~/.aws/credentials)
    path: PathBuf,
}

impl CredentialsUpdater {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Stores `bundle` in the `[session_name]` section of the credentials file.
    ///
    /// This method performs the complete update:
    /// 1. Resolves symlinks so that a linked credentials file keeps its link
    /// 2. Creates the parent directory when it is missing
    /// 3. Loads the existing document, or starts from an empty one
    /// 4. Creates or overwrites the session section with the three credential keys
    /// 5. Writes the document to an owner-only staging file and renames it over
    ///    the original
    ///
    /// # Arguments
    ///
    /// * `session_name` - Section to create or replace, e.g. `temp_dev`
    /// * `bundle` - Temporary credentials returned by STS
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The file holds the new section; all other sections are as
    ///   they were
    /// * `Err(AssumeError::WriteFailure)` - Any I/O or parse problem. The
    ///   original file is left untouched and no staging file remains.
    pub async fn write(
        &self,
        session_name: &str,
        bundle: &CredentialBundle,
    ) -> Result<(), AssumeError> {
        let fail = |source: io::Error| AssumeError::WriteFailure {
            path: self.path.clone(),
            source,
        };

        // Follow a symlinked credentials file (dotfile managers) to its real
        // location; replacing the link itself would orphan the target.
        let target = match fs::canonicalize(&self.path).await {
            Ok(resolved) => resolved,
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.path.clone(),
            Err(e) => return Err(fail(e)),
        };

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(fail)?;
        }

        let mut ini = load(&target).await.map_err(fail)?;
        upsert_section(&mut ini, session_name, bundle);

        replace_file(&target, &ini.pretty_writes(&write_options()))
            .await
            .map_err(fail)?;

        info!("Set your profile to {session_name}, export AWS_PROFILE={session_name}");
        if let Some(expiration) = bundle.expiration_display() {
            info!("Credentials expire at: {expiration}");
        }
        Ok(())
    }
}

/// Current content of `path`, or an empty document when there is none yet.
async fn load(path: &Path) -> io::Result<Ini> {
    let mut ini = new_ini();
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ini),
        Err(e) => return Err(e),
    };

    if !content.trim().is_empty() {
        ini.read(content)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    }
    Ok(ini)
}

/// Sibling of `target` that receives the new content before the rename.
fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "credentials".to_string());
    target.with_file_name(format!(".{name}.tmp"))
}

/// Replaces `target` with `content` in a single rename.
///
/// The staging file is created owner-only, so secrets are never readable by
/// others, and it is removed again if any step fails.
async fn replace_file(target: &Path, content: &str) -> io::Result<()> {
    let staging = staging_path(target);

    let result = async {
        let mut file = open_private(&staging).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        restrict_permissions(&staging).await?;
        fs::rename(&staging, target).await
    }
    .await;

    if result.is_err() {
        // The first error is the one returned.
        if let Err(e) = fs::remove_file(&staging).await {
            debug!("Could not remove {}: {e}", staging.display());
        }
    }
    result
}

async fn open_private(path: &Path) -> io::Result<fs::File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path).await
}

fn upsert_section(ini: &mut Ini, section: &str, bundle: &CredentialBundle) {
    ini.set(section, "aws_access_key_id", Some(bundle.access_key_id.clone()));
    ini.set(
        section,
        "aws_secret_access_key",
        Some(bundle.secret_access_key.clone()),
    );
    ini.set(section, "aws_session_token", Some(bundle.session_token.clone()));
}

// A pre-existing staging file keeps its old mode despite `open_private`.
#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
}

#[cfg(not(unix))]
async fn restrict_permissions(_: &Path) -> io::Result<()> {
    Ok(())
}

/// Sends `bundle` wherever `mode` says.
///
/// # Arguments
///
/// * `session_name` - Section name used in [`OutputMode::Write`]
/// * `bundle` - Credentials to emit
/// * `mode` - JSON on `out`, or the credentials file
/// * `credentials_path` - Resolves the credentials file; only called in
///   [`OutputMode::Write`], so JSON output never depends on a home directory
/// * `out` - Receives the JSON document; left alone in [`OutputMode::Write`]
///
/// # Errors
///
/// [`AssumeError::Output`] when stdout cannot be written, otherwise whatever
/// resolving the path or [`CredentialsUpdater::write`] reports.
pub async fn emit(
    session_name: &str,
    bundle: &CredentialBundle,
    mode: OutputMode,
    credentials_path: impl FnOnce() -> Result<PathBuf, AssumeError>,
    out: &mut impl Write,
) -> Result<(), AssumeError> {
    match mode {
        OutputMode::Json => print_json(bundle, out).map_err(AssumeError::Output),
        OutputMode::Write => {
            CredentialsUpdater::new(credentials_path()?)
                .write(session_name, bundle)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn bundle(id: &str, secret: &str, token: &str) -> CredentialBundle {
        CredentialBundle::new(id, secret, token)
    }

    fn read_back(path: &Path) -> Ini {
        let mut ini = new_ini();
        ini.read(std::fs::read_to_string(path).unwrap()).unwrap();
        ini
    }

    #[test]
    fn test_json_output_is_exact() {
        let mut out = Vec::new();
        print_json(&bundle("AKIA1", "secret1", "tok1"), &mut out).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "{\"AWS_ACCESS_KEY_ID\": \"AKIA1\", \"AWS_SECRET_ACCESS_KEY\": \"secret1\", \"AWS_SESSION_TOKEN\": \"tok1\"}\n"
        );
    }

    #[tokio::test]
    async fn test_json_mode_touches_no_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("aws").join("credentials");
        let mut out = Vec::new();

        emit(
            "temp_dev",
            &bundle("AKIA1", "secret1", "tok1"),
            OutputMode::Json,
            || Ok(path),
            &mut out,
        )
        .await
        .unwrap();

        assert!(!out.is_empty());
        assert!(!dir.path().join("aws").exists());
    }

    #[tokio::test]
    async fn test_json_mode_never_resolves_credentials_path() {
        let mut out = Vec::new();

        emit(
            "temp_dev",
            &bundle("AKIA1", "secret1", "tok1"),
            OutputMode::Json,
            || Err(AssumeError::HomeDirectory),
            &mut out,
        )
        .await
        .unwrap();

        assert!(String::from_utf8(out).unwrap().contains("AKIA1"));
    }

    #[tokio::test]
    async fn test_write_mode_reports_unresolved_path() {
        let err = emit(
            "temp_dev",
            &bundle("AKIA1", "secret1", "tok1"),
            OutputMode::Write,
            || Err(AssumeError::HomeDirectory),
            &mut Vec::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AssumeError::HomeDirectory));
    }

    #[tokio::test]
    async fn test_write_creates_directory_and_section() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".aws").join("credentials");
        let updater = CredentialsUpdater::new(path.clone());

        updater
            .write("temp_dev", &bundle("ASIA1", "secret1", "tok1"))
            .await
            .unwrap();

        let ini = read_back(&path);
        assert_eq!(ini.get("temp_dev", "aws_access_key_id").unwrap(), "ASIA1");
        assert_eq!(
            ini.get("temp_dev", "aws_secret_access_key").unwrap(),
            "secret1"
        );
        assert_eq!(ini.get("temp_dev", "aws_session_token").unwrap(), "tok1");
        assert!(!staging_path(&path).exists());
    }

    #[tokio::test]
    async fn test_write_overwrites_only_target_section() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(
            &path,
            "[default]\n\
             aws_access_key_id = AKIADEFAULT\n\
             aws_secret_access_key = longterm\n\
             \n\
             [temp_dev]\n\
             aws_access_key_id = OLD\n\
             aws_secret_access_key = OLD\n\
             aws_session_token = OLD\n\
             \n\
             [other]\n\
             region = eu-west-1\n",
        )
        .unwrap();
        let updater = CredentialsUpdater::new(path.clone());

        updater
            .write("temp_dev", &bundle("ASIA2", "secret2", "tok2"))
            .await
            .unwrap();

        let ini = read_back(&path);
        assert_eq!(ini.get("temp_dev", "aws_access_key_id").unwrap(), "ASIA2");
        assert_eq!(ini.get("temp_dev", "aws_session_token").unwrap(), "tok2");
        assert_eq!(ini.get("default", "aws_access_key_id").unwrap(), "AKIADEFAULT");
        assert_eq!(ini.get("default", "aws_secret_access_key").unwrap(), "longterm");
        assert_eq!(ini.get("other", "region").unwrap(), "eu-west-1");
    }

    #[tokio::test]
    async fn test_rewriting_same_session_replaces_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials");
        let updater = CredentialsUpdater::new(path.clone());

        updater
            .write("temp_dev", &bundle("ASIA1", "secret1", "tok1"))
            .await
            .unwrap();
        updater
            .write("temp_prod", &bundle("ASIAP", "secretP", "tokP"))
            .await
            .unwrap();
        updater
            .write("temp_dev", &bundle("ASIA2", "secret2", "tok2"))
            .await
            .unwrap();

        let ini = read_back(&path);
        assert_eq!(ini.get("temp_dev", "aws_access_key_id").unwrap(), "ASIA2");
        assert_eq!(ini.get("temp_dev", "aws_secret_access_key").unwrap(), "secret2");
        assert_eq!(ini.get("temp_prod", "aws_access_key_id").unwrap(), "ASIAP");
    }

    #[tokio::test]
    async fn test_empty_existing_file_is_treated_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(&path, "").unwrap();

        CredentialsUpdater::new(path.clone())
            .write("temp_dev", &bundle("ASIA1", "secret1", "tok1"))
            .await
            .unwrap();

        assert_eq!(
            read_back(&path).get("temp_dev", "aws_session_token").unwrap(),
            "tok1"
        );
    }

    #[tokio::test]
    async fn test_write_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        // A directory sitting where the file should be.
        let path = dir.path().join("credentials");
        std::fs::create_dir(&path).unwrap();

        let err = CredentialsUpdater::new(path.clone())
            .write("temp_dev", &bundle("ASIA1", "secret1", "tok1"))
            .await
            .unwrap_err();

        assert!(matches!(err, AssumeError::WriteFailure { .. }));
        assert!(!err.is_fatal());
        assert!(path.is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_written_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials");

        CredentialsUpdater::new(path.clone())
            .write("temp_dev", &bundle("ASIA1", "secret1", "tok1"))
            .await
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_untouched_values_keep_comment_characters() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(
            &path,
            "# managed by hand\n\
             [work]\n\
             credential_process = sh -c 'op signin; op read x'\n\
             note = team#ops\n",
        )
        .unwrap();

        CredentialsUpdater::new(path.clone())
            .write("temp_dev", &bundle("ASIA1", "secret1", "tok1"))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("credential_process = sh -c 'op signin; op read x'"));

        let ini = read_back(&path);
        assert_eq!(
            ini.get("work", "credential_process").unwrap(),
            "sh -c 'op signin; op read x'"
        );
        assert_eq!(ini.get("work", "note").unwrap(), "team#ops");
    }

    #[tokio::test]
    async fn test_untouched_nested_values_keep_indentation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(
            &path,
            "[tools]\n\
             s3 =\n    max_concurrent_requests = 20\n    max_queue_size = 100\n\
             region = eu-west-1\n",
        )
        .unwrap();

        CredentialsUpdater::new(path.clone())
            .write("temp_dev", &bundle("ASIA1", "secret1", "tok1"))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n    max_concurrent_requests = 20\n    max_queue_size = 100\n"));

        let ini = read_back(&path);
        assert!(ini.get("tools", "max_concurrent_requests").is_none());
        assert_eq!(
            ini.get("tools", "s3").unwrap(),
            "\nmax_concurrent_requests = 20\nmax_queue_size = 100"
        );
        assert_eq!(ini.get("tools", "region").unwrap(), "eu-west-1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_file_is_updated_in_place() {
        let dir = TempDir::new().unwrap();
        let real = dir.path().join("real_credentials");
        let link = dir.path().join("credentials");
        std::fs::write(&real, "[default]\naws_access_key_id = AKIADEFAULT\n").unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        CredentialsUpdater::new(link.clone())
            .write("temp_dev", &bundle("ASIA1", "secret1", "tok1"))
            .await
            .unwrap();

        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        let ini = read_back(&real);
        assert_eq!(ini.get("temp_dev", "aws_access_key_id").unwrap(), "ASIA1");
        assert_eq!(ini.get("default", "aws_access_key_id").unwrap(), "AKIADEFAULT");
    }

    #[tokio::test]
    async fn test_failed_replace_removes_staging_file() {
        let dir = TempDir::new().unwrap();
        // Renaming a file over a directory fails after the staging file exists.
        let target = dir.path().join("credentials");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep"), "x").unwrap();

        let result = replace_file(&target, "[temp_dev]\naws_session_token = tok1\n").await;

        assert!(result.is_err());
        assert!(!staging_path(&target).exists());
        assert!(target.join("keep").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stale_staging_file_is_made_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials");
        let staging = staging_path(&path);
        std::fs::write(&staging, "leftover").unwrap();
        std::fs::set_permissions(&staging, std::fs::Permissions::from_mode(0o644)).unwrap();

        CredentialsUpdater::new(path.clone())
            .write("temp_dev", &bundle("ASIA1", "secret1", "tok1"))
            .await
            .unwrap();

        assert!(!staging.exists());
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
