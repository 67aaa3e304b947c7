//! CLI argument types and layered configuration for the `xmeta` binary.
//! Loads from CLI args, environment (prefix `XMETA_`), and optional config
//! files.

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use ortho_config::{OrthoConfig, OrthoError, OrthoResult, load_config_file, sanitized_provider};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

const ENV_PREFIX: &str = "XMETA_";

/// Command-line arguments for the `xmeta` binary.
///
/// Values are loaded from command line arguments, environment variables
/// (prefixed with `XMETA_`), and an optional configuration file, in that
/// order of precedence. A flag left off the command line never masks a
/// value from a lower layer.
///
/// # Examples
///
/// Parse flags directly:
/// ```
/// use explain_metadata::cli::XmetaArgs;
/// use ortho_config::OrthoConfig;
///
/// let args = XmetaArgs::load_from_iter(["xmeta", "--normalise"])
///     .expect("load args from CLI iterator");
/// assert!(args.normalise);
/// assert!(args.metadata.is_none());
///
/// let args = XmetaArgs::load_from_iter(["xmeta", "--strict-version=false"])
///     .expect("load args with an explicit value");
/// assert!(!args.strict_version);
/// ```
///
/// Load from a configuration file:
/// ```
/// use explain_metadata::cli::XmetaArgs;
/// use ortho_config::OrthoConfig;
/// use std::io::Write;
/// use tempfile::NamedTempFile;
///
/// let mut file = NamedTempFile::new().expect("create temp file");
/// writeln!(file, "strict_version = true").expect("write config");
/// let path = file.path().to_str().expect("path str");
/// let args = XmetaArgs::load_from_iter(["xmeta", "--config-path", path])
///     .expect("load args from config path");
/// assert!(args.strict_version);
/// ```
#[derive(Debug, Deserialize)]
pub struct XmetaArgs {
    /// Metadata JSON file to validate.
    #[serde(default)]
    pub metadata: Option<PathBuf>,

    /// Print the metadata back in canonical form.
    #[serde(default)]
    pub normalise: bool,

    /// Fail when the metadata carries no `preparer_version`.
    #[serde(default)]
    pub strict_version: bool,

    /// Optional path to a configuration file.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

/// Flags exactly as given on the command line; `None` means absent.
#[derive(Debug, Parser, Serialize)]
#[command(name = "xmeta", about = "Validate explanation metadata files")]
struct XmetaCli {
    /// Metadata JSON file to validate.
    #[arg(long)]
    metadata: Option<PathBuf>,

    /// Print the metadata back in canonical form.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    normalise: Option<bool>,

    /// Fail when the metadata carries no `preparer_version`.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    strict_version: Option<bool>,

    /// Optional path to a configuration file.
    #[arg(long)]
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

impl OrthoConfig for XmetaArgs {
    fn load_from_iter<I, T>(iter: I) -> OrthoResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = XmetaCli::try_parse_from(iter).map_err(|e| Arc::new(OrthoError::from(e)))?;
        let config_path = cli
            .config_path
            .clone()
            .or_else(|| std::env::var_os("XMETA_CONFIG_PATH").map(PathBuf::from));

        let mut fig = Figment::new();
        if let Some(path) = config_path.as_deref() {
            let file = load_config_file(path)?.ok_or_else(|| {
                Arc::new(OrthoError::File {
                    path: path.to_path_buf(),
                    source: "configuration file not found".into(),
                })
            })?;
            fig = fig.merge(file);
        }
        fig = fig
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(sanitized_provider(&cli)?);

        let mut args: Self = fig
            .extract()
            .map_err(|e| Arc::new(OrthoError::merge(e)))?;
        args.config_path = config_path;
        Ok(args)
    }

    fn prefix() -> &'static str {
        "XMETA"
    }
}

impl XmetaArgs {
    /// Load configuration solely from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an [`OrthoError`] if any variable cannot be parsed.
    pub fn load_from_env() -> Result<Self, OrthoError> {
        Figment::new()
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(Into::into)
    }

    /// Load configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an [`OrthoError`] if the file cannot be read or parsed.
    pub fn load_from_config(path: &str) -> Result<Self, OrthoError> {
        Figment::new()
            .merge(Toml::file(path))
            .extract()
            .map_err(Into::into)
    }

    /// Load configuration from environment variables and a file path.
    /// Environment variables take precedence.
    ///
    /// # Errors
    ///
    /// Returns an [`OrthoError`] if either source contains invalid values.
    pub fn load_from_env_and_config(path: &str) -> Result<Self, OrthoError> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(Into::into)
    }
}
