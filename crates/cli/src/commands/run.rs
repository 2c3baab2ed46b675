//! `procloom run`: single-message or interactive mode.

use procloom_config::RuntimeConfig;
use procloom_core::process::{FinalResult, ProcessState};
use procloom_engine::{ProcessEngine, ProcessFactory};
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(
    config_path: &Path,
    program: Option<String>,
    message: Option<String>,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = RuntimeConfig::load_at(config_path)?;
    if !config.has_api_keys() {
        eprintln!("⚠️  Some backends have no API key. Set PROCLOOM_API_KEY or add api_key to the config.");
    }

    let program = program.unwrap_or_else(|| config.default_program.clone());
    let factory = ProcessFactory::from_config(config)?;
    let mut process = factory.create(&program)?;

    match message {
        Some(msg) => single_message(&mut process, msg, verbose).await,
        None => interactive(&mut process).await,
    }
}

async fn single_message(
    process: &mut ProcessEngine,
    message: String,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = process.run(message).await?;
    println!("{}", result.text);
    if verbose {
        eprintln!("  {}", format_stats(&result));
    }
    Ok(())
}

async fn interactive(process: &mut ProcessEngine) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("🧵 procloom interactive mode");
    eprintln!("   Program: {} (model: {})", process.program(), process.config().model);
    eprintln!("   Commands: /stats, /fds, /resume, exit");
    eprintln!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("  You > ");
        std::io::stderr().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "exit" | "quit" => break,
            "/stats" => {
                eprintln!("  {} (state: {})", format_stats(process.totals()), process.state());
                continue;
            }
            "/fds" => {
                print_handles(process);
                continue;
            }
            "/resume" => {
                if process.state() != ProcessState::Failed {
                    eprintln!("  Nothing to resume.");
                    continue;
                }
                reply(process.resume().await);
                continue;
            }
            _ => {}
        }

        reply(process.run(input).await);
    }

    eprintln!("  Goodbye.");
    Ok(())
}

fn reply(result: Result<FinalResult, procloom_core::error::ProcessError>) {
    match result {
        Ok(result) => {
            println!("\n  Assistant > {}\n", result.text);
        }
        Err(e) => {
            eprintln!("\n  [Error] {e}");
            eprintln!("  The conversation is kept; use /resume to retry.\n");
        }
    }
}

fn print_handles(process: &ProcessEngine) {
    let store = process.store();
    if store.is_empty() {
        eprintln!("  No stored content.");
        return;
    }
    for handle in store.handles() {
        let chars = store.get(handle).map(|s| s.chars().count()).unwrap_or(0);
        let labels: Vec<&str> = store
            .labels()
            .filter(|(_, h)| *h == handle)
            .map(|(label, _)| label)
            .collect();
        if labels.is_empty() {
            eprintln!("  {handle}  {chars} chars");
        } else {
            eprintln!("  {handle}  {chars} chars  ({})", labels.join(", "));
        }
    }
}

fn format_stats(result: &FinalResult) -> String {
    format!(
        "[{} turns, {} tool calls, {} tokens, {:.1}s]",
        result.turns,
        result.tool_calls,
        result.usage.total_tokens,
        result.elapsed().as_secs_f64()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use procloom_core::backend::Usage;

    #[test]
    fn stats_line() {
        let result = FinalResult {
            text: "done".into(),
            turns: 3,
            tool_calls: 2,
            api_calls: 3,
            usage: Usage {
                prompt_tokens: 100,
                completion_tokens: 20,
                total_tokens: 120,
            },
            elapsed_ms: 1500,
        };
        assert_eq!(format_stats(&result), "[3 turns, 2 tool calls, 120 tokens, 1.5s]");
    }

    #[tokio::test]
    async fn missing_program_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("procloom.toml");
        let err = run(&path, Some("nope".into()), Some("hi".into()), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
