use std::path::Path;
use std::process::ExitCode;

use explain_metadata::ExplainMetadata;
use explain_metadata::cli::XmetaArgs;
use ortho_config::OrthoConfig;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn check(path: &Path, args: &XmetaArgs) -> Result<(), String> {
    let metadata = ExplainMetadata::from_file(path).map_err(|e| e.to_string())?;
    if args.strict_version && metadata.preparer_version().is_none() {
        return Err(format!("{}: preparer_version is required", path.display()));
    }
    info!(
        path = %path.display(),
        framework = %metadata.framework(),
        inputs = metadata.inputs().len(),
        outputs = metadata.outputs().len(),
        baselines = metadata.num_baselines(),
        "metadata is valid"
    );
    if args.normalise {
        let json = metadata
            .to_json(Some(4), Some((", ", ": ")))
            .map_err(|e| e.to_string())?;
        println!("{json}");
    }
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();
    let args = match XmetaArgs::load() {
        Ok(args) => args,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    let Some(path) = args.metadata.as_deref() else {
        info!("no metadata file given");
        return ExitCode::SUCCESS;
    };
    match check(path, &args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "metadata check failed");
            ExitCode::FAILURE
        }
    }
}
