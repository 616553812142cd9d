use std::path::PathBuf;

use clap::Args;
use loadgen_lib::{LoadProfile, ProfilePreset};
use rama::{
    error::{BoxError, ErrorContext as _},
    telemetry::tracing,
};

pub mod check;
pub mod run;

/// Where to take the load profile from.
#[derive(Debug, Clone, Args)]
pub struct ProfileArgs {
    /// JSON file defining either `stages` or an `arrivalRate`
    #[arg(long, value_name = "FILE", conflicts_with = "preset")]
    profile: Option<PathBuf>,

    /// named profile to use if no profile file is given
    #[arg(long, value_name = "NAME")]
    preset: Option<ProfilePreset>,
}

impl ProfileArgs {
    pub fn resolve(&self) -> Result<LoadProfile, BoxError> {
        if let Some(path) = self.profile.as_deref() {
            tracing::info!(path = %path.display(), "load profile from file");
            let profile = LoadProfile::load_file(path)
                .context("load profile file")
                .with_context_debug_field("path", || path.to_owned())?;
            return Ok(profile);
        }

        let preset = self.preset.unwrap_or_default();
        tracing::info!(%preset, "use preset load profile");
        Ok(preset.profile())
    }
}
