use std::io;

use crate::cli::{GenerateArgs, GlobalArgs, open_session, stream_turn};
use crate::config::CliConfig;

pub async fn execute(global: GlobalArgs, args: GenerateArgs) -> anyhow::Result<()> {
    let cfg = CliConfig::load(global.config.as_deref())?;
    let session = open_session(&args.model, &cfg)?;

    {
        let mut s = session.lock();
        s.clear_history();
        if let Some(system) = args.turn.system(&cfg) {
            s.append_system(system);
        }
        s.append_user(args.prompt.as_str());
    }

    stream_turn(&session, args.turn.options(&cfg), &mut io::stdout()).await?;
    Ok(())
}
