use clap::Args;
use loadgen_lib::LoadProfile;
use rama::error::{BoxError, ErrorContext as _};

use super::ProfileArgs;

#[derive(Debug, Clone, Args)]
/// validate a load profile and print its normalized form
pub struct CheckCommand {
    #[command(flatten)]
    profile: ProfileArgs,
}

pub fn exec(args: CheckCommand) -> Result<(), BoxError> {
    let profile = args.profile.resolve()?;
    println!("{}", describe(&profile)?);
    Ok(())
}

fn describe(profile: &LoadProfile) -> Result<String, BoxError> {
    let json = profile
        .to_json_string()
        .context("encode profile as json")?;
    Ok(format!(
        "kind: {}\nduration: {}\nmax workers: {}\n{json}",
        profile.kind(),
        humantime::format_duration(profile.total_duration()),
        profile.max_workers(),
    ))
}
