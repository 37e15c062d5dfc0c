use crate::cli::{ConfigAction, ConfigArgs, GlobalArgs};
use crate::config::CliConfig;

pub async fn execute(global: GlobalArgs, args: ConfigArgs) -> anyhow::Result<()> {
    let path = CliConfig::path(global.config.as_deref());
    match args.action {
        ConfigAction::Show => {
            let cfg = CliConfig::load_or_default(&path)?;
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Set { key, value } => {
            let mut cfg = CliConfig::load_or_default(&path)?;
            cfg.set(&key, &value)?;
            cfg.save(&path)?;
            println!("Configuration updated.");
        }
    }
    Ok(())
}
