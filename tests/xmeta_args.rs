//! Unit tests for `XmetaArgs` argument parsing and layering.

use explain_metadata::cli::XmetaArgs;
use rstest::{fixture, rstest};
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::Path;
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;

#[fixture]
fn temp_toml_file() -> NamedTempFile {
    NamedTempFile::new().unwrap_or_else(|e| panic!("create temp file: {e}"))
}

fn write_toml_content(file: &mut NamedTempFile, content: &str) {
    writeln!(file, "{content}").unwrap_or_else(|e| panic!("write config: {e}"));
}

fn get_config_path(file: &NamedTempFile) -> &str {
    file.path().to_str().unwrap_or_else(|| panic!("path str"))
}

static ENV_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

struct EnvVarGuard {
    key: String,
    _lock: MutexGuard<'static, ()>,
}

impl EnvVarGuard {
    fn new(key: &str, val: &str) -> Self {
        let lock = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        // Safety: process-wide env mutation is synchronised by ENV_LOCK.
        unsafe { env::set_var(key, val) };
        Self {
            key: key.to_owned(),
            _lock: lock,
        }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        // Safety: process-wide env mutation is synchronised by ENV_LOCK.
        unsafe { env::remove_var(&self.key) };
    }
}

fn load(argv: &[&str]) -> XmetaArgs {
    <XmetaArgs as ortho_config::OrthoConfig>::load_from_iter(argv.iter().copied())
        .unwrap_or_else(|e| panic!("unexpected parse error: {e}"))
}

#[rstest]
#[case(&["xmeta"], false, false)]
#[case(&["xmeta", "--normalise"], true, false)]
#[case(&["xmeta", "--normalise=true"], true, false)]
#[case(&["xmeta", "--strict-version"], false, true)]
#[case(&["xmeta", "--normalise", "--strict-version=true"], true, true)]
#[case(&["xmeta", "--normalise=false", "--strict-version=false"], false, false)]
#[serial]
fn load_parses_flags(#[case] argv: &[&str], #[case] normalise: bool, #[case] strict: bool) {
    let cfg = load(argv);
    assert_eq!(cfg.normalise, normalise);
    assert_eq!(cfg.strict_version, strict);
}

#[rstest]
#[serial]
fn load_parses_metadata_path() {
    let cfg = load(&["xmeta", "--metadata", "model/explanation_metadata.json"]);
    assert_eq!(
        cfg.metadata.as_deref(),
        Some(Path::new("model/explanation_metadata.json"))
    );
}

#[rstest]
#[case("--normalise=maybe")]
#[case("--normalise=1")]
#[case("--strict-version=yes")]
#[case("--bogus")]
#[serial]
fn load_rejects_invalid_arguments(#[case] arg: &str) {
    let result = <XmetaArgs as ortho_config::OrthoConfig>::load_from_iter(["xmeta", arg]);
    assert!(result.is_err());
}

#[rstest]
#[serial]
fn load_reads_strict_version_from_env() {
    let _guard = EnvVarGuard::new("XMETA_STRICT_VERSION", "true");
    let cfg = load(&["xmeta", "--metadata", "meta.json"]);
    assert!(cfg.strict_version);
    assert!(!cfg.normalise);
}

#[rstest]
#[serial]
fn load_reads_config_file(mut temp_toml_file: NamedTempFile) {
    write_toml_content(
        &mut temp_toml_file,
        "strict_version = true\nmetadata = \"meta.json\"",
    );
    let path = get_config_path(&temp_toml_file);
    let cfg = load(&["xmeta", "--config-path", path]);
    assert!(cfg.strict_version);
    assert_eq!(cfg.metadata.as_deref(), Some(Path::new("meta.json")));
    assert_eq!(cfg.config_path.as_deref(), Some(Path::new(path)));
}

#[rstest]
#[serial]
fn load_rejects_missing_config_file() {
    let result = <XmetaArgs as ortho_config::OrthoConfig>::load_from_iter([
        "xmeta",
        "--config-path",
        "does/not/exist.toml",
    ]);
    assert!(result.is_err());
}

#[rstest]
#[serial]
fn env_var_parsing_sets_strict_version() {
    let _guard = EnvVarGuard::new("XMETA_STRICT_VERSION", "true");
    let cfg =
        XmetaArgs::load_from_env().unwrap_or_else(|e| panic!("unexpected env parse error: {e}"));
    assert!(cfg.strict_version);
}

#[rstest]
#[serial]
fn env_var_parsing_invalid_bool() {
    let _guard = EnvVarGuard::new("XMETA_NORMALISE", "notabool");
    let result = XmetaArgs::load_from_env();
    assert!(result.is_err());
    let layered = <XmetaArgs as ortho_config::OrthoConfig>::load_from_iter(["xmeta"]);
    assert!(layered.is_err());
}

#[rstest]
fn config_file_parsing_sets_fields(mut temp_toml_file: NamedTempFile) {
    write_toml_content(
        &mut temp_toml_file,
        "normalise = true\nmetadata = \"meta.json\"",
    );
    let path = get_config_path(&temp_toml_file);
    let cfg = XmetaArgs::load_from_config(path)
        .unwrap_or_else(|e| panic!("unexpected config parse error: {e}"));
    assert!(cfg.normalise);
    assert_eq!(cfg.metadata.as_deref(), Some(Path::new("meta.json")));
}

#[rstest]
fn config_file_parsing_invalid_bool(mut temp_toml_file: NamedTempFile) {
    write_toml_content(&mut temp_toml_file, "normalise = notabool");
    let path = get_config_path(&temp_toml_file);
    let result = XmetaArgs::load_from_config(path);
    assert!(result.is_err());
}

#[rstest]
#[case(&["--normalise"], "false", "false", true)]
#[case(&["--normalise=false"], "true", "true", false)]
#[case(&[], "true", "false", true)]
#[case(&[], "false", "true", false)]
#[serial]
fn precedence_cli_over_env_over_config(
    mut temp_toml_file: NamedTempFile,
    #[case] flags: &[&str],
    #[case] env_value: &str,
    #[case] file_value: &str,
    #[case] expected: bool,
) {
    let _guard = EnvVarGuard::new("XMETA_NORMALISE", env_value);
    write_toml_content(&mut temp_toml_file, &format!("normalise = {file_value}"));
    let path = get_config_path(&temp_toml_file);
    let mut argv = vec!["xmeta", "--config-path", path];
    argv.extend_from_slice(flags);
    let cfg = load(&argv);
    assert_eq!(cfg.normalise, expected);
}

#[rstest]
#[serial]
fn file_value_survives_an_absent_flag(mut temp_toml_file: NamedTempFile) {
    write_toml_content(&mut temp_toml_file, "normalise = true");
    let path = get_config_path(&temp_toml_file);
    let cfg = load(&["xmeta", "--config-path", path, "--strict-version"]);
    assert!(cfg.normalise);
    assert!(cfg.strict_version);
}

#[rstest]
#[serial]
fn precedence_env_over_config_helper(mut temp_toml_file: NamedTempFile) {
    let _guard = EnvVarGuard::new("XMETA_NORMALISE", "true");
    write_toml_content(&mut temp_toml_file, "normalise = false");
    let path = get_config_path(&temp_toml_file);
    let cfg = XmetaArgs::load_from_env_and_config(path)
        .unwrap_or_else(|e| panic!("unexpected parse error: {e}"));
    assert!(cfg.normalise);
}
