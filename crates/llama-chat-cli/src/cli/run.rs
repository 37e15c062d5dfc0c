use std::io::{self, BufRead, Write};

use tracing::warn;

use crate::cli::{GlobalArgs, RunArgs, open_session, stream_turn};
use crate::config::CliConfig;

/// One line of REPL input.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Empty,
    Quit,
    /// Clear history and cache.
    Clear,
    /// Clear the cache only.
    KvClear,
    Tokens,
    Message(&'a str),
}

impl<'a> Input<'a> {
    fn parse(line: &'a str) -> Self {
        match line.trim() {
            "" => Self::Empty,
            "quit" | "exit" | "/quit" | "/exit" => Self::Quit,
            "/clear" => Self::Clear,
            "/kv-clear" => Self::KvClear,
            "/tokens" => Self::Tokens,
            text => Self::Message(text),
        }
    }
}

pub async fn execute(global: GlobalArgs, args: RunArgs) -> anyhow::Result<()> {
    let cfg = CliConfig::load(global.config.as_deref())?;
    let session = open_session(&args.model, &cfg)?;
    let opts = args.turn.options(&cfg);
    let system = args.turn.system(&cfg).map(str::to_string);

    if let Some(system) = &system {
        session.lock().append_system(system.as_str());
    }

    println!("Model loaded. Type your message (/clear, /tokens, /kv-clear, Ctrl-D to quit).\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            println!();
            break; // EOF
        }

        match Input::parse(&line) {
            Input::Empty => continue,
            Input::Quit => break,
            Input::Clear => {
                let mut s = session.lock();
                s.clear_history();
                if let Some(system) = &system {
                    s.append_system(system.as_str());
                }
                println!("History cleared.\n");
            }
            Input::KvClear => {
                session.lock().kv_clear();
                println!("KV cache cleared.\n");
            }
            Input::Tokens => {
                println!("{} tokens in the KV cache.\n", session.token_count());
            }
            Input::Message(text) => {
                session.lock().append_user(text);
                match stream_turn(&session, opts, &mut stdout).await {
                    Ok(reply) => session.lock().append_assistant(reply.text()),
                    Err(e) => {
                        warn!("Turn failed: {e:#}");
                        eprintln!("\nError: {e:#}");
                    }
                }
                println!();
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_recognized() {
        assert_eq!(Input::parse("/clear\n"), Input::Clear);
        assert_eq!(Input::parse("  /tokens "), Input::Tokens);
        assert_eq!(Input::parse("/kv-clear"), Input::KvClear);
        assert_eq!(Input::parse("exit\n"), Input::Quit);
        assert_eq!(Input::parse("quit"), Input::Quit);
        assert_eq!(Input::parse("   \n"), Input::Empty);
    }

    #[test]
    fn other_lines_are_messages() {
        assert_eq!(Input::parse("hello there\n"), Input::Message("hello there"));
        assert_eq!(Input::parse("/unknown"), Input::Message("/unknown"));
    }
}
