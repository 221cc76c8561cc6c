use anyhow::Result;

use crate::detect;

const USAGE: &str = "Usage: ppe-sentinel <serve|watch> [flags]\n\n  \
serve  Run the detection API in front of an external inference worker\n  \
watch  Pace frames from a local source into a running detection API";

pub fn handle_commands(args: &[String]) -> Result<bool> {
    match args.get(1).map(|s| s.as_str()) {
        Some("serve") => {
            detect::run_server(detect::ServeConfig::from_args(args)?)?;
            Ok(true)
        }
        Some("watch") => {
            detect::run_watch(detect::WatchConfig::from_args(args)?)?;
            Ok(true)
        }
        Some("help" | "--help" | "-h") => {
            println!("{USAGE}");
            Ok(true)
        }
        _ => Ok(false),
    }
}
