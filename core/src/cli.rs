use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::init::{InitBuilder, Stanza};
use crate::result::EvaluationResult;
use crate::session::{Engine, Session};

#[derive(Parser)]
#[command(name = "stanza")]
#[command(about = "stanza - an incremental evaluation environment", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Log everything, including reference resolution and cache hits
    #[arg(long, global = true)]
    pub trace: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate fragments in order against one session
    Eval {
        /// Fragments to evaluate
        #[arg(required = true)]
        fragments: Vec<String>,

        /// Values bound to `args` in every fragment
        #[arg(short = 'a', long = "arg")]
        args: Vec<String>,
    },

    /// Read fragments from stdin, one per line
    Repl,

    /// Show completions for a position in a fragment
    Complete {
        /// Fragment text
        text: String,

        /// Byte offset of the caret (default: end of text)
        #[arg(long)]
        caret: Option<usize>,
    },

    /// List the members of a type
    Members {
        /// Full type name (default: the globals module)
        type_name: Option<String>,
    },

    /// Compile a fragment and print the compiled program
    Inspect {
        /// Fragment text
        text: String,
    },

    /// Call a bridge tool
    Bridge {
        /// Tool name: list or invoke
        tool: String,

        /// Tool arguments (JSON object)
        #[arg(default_value = "{}")]
        arguments: String,
    },
}

const HELP: &str = "\
Enter a fragment to evaluate it. A trailing expression without `;` prints its value.

  #load \"<module>\"   bind a module (math, text, time, stats) or a project manifest
  use <module>       import a module's members
  #history           list committed fragments, oldest first (UTC times)
  #help              show this help
  exit               leave the prompt";

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run(cli).await
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut builder = InitBuilder::new();
    if let Some(path) = &cli.config {
        builder = builder.config_path(path);
    }
    let mut stanza = builder.init().await?;
    for result in &stanza.preload {
        if let Some(fault) = result.fault() {
            eprintln!("Preload failed: {}", fault.detail());
        }
    }

    match cli.command {
        Commands::Eval { fragments, args } => {
            let cancel = CancellationToken::new();
            let mut failed = 0;
            for fragment in &fragments {
                let result = stanza.session.evaluate(fragment, &args, &cancel).await;
                if !result.is_success() {
                    failed += 1;
                }
                print_result(&result);
            }
            if failed > 0 {
                bail!("{} of {} fragments failed", failed, fragments.len());
            }
        }

        Commands::Repl => repl(&mut stanza).await?,

        Commands::Complete { text, caret } => {
            let caret = caret.unwrap_or(text.len());
            let document = stanza.session.document("cli");
            let items = stanza
                .completions
                .complete(&document, &text, caret)
                .await
                .context("Failed to compute completions")?;
            if items.is_empty() {
                println!("No completions");
            }
            for item in items.iter() {
                let description = item.description().await;
                let summary = description.lines().next().unwrap_or_default();
                println!("{:<24} {}", item.display(), summary);
            }
        }

        Commands::Members { type_name } => {
            let type_name = type_name.unwrap_or_else(|| stanza.bridge.globals_type());
            let response = stanza.bridge.list(&type_name)?;
            println!("{}:", type_name);
            for member in &response.content {
                println!("  {}", member.text);
            }
        }

        Commands::Inspect { text } => match stanza.session.compile_only(&text) {
            Ok(unit) => {
                println!("Unit: {}", unit.name());
                let references: Vec<_> = unit.references().iter().map(|m| m.display.as_str()).collect();
                println!("References: {}", references.join("; "));
                println!("{}", serde_json::to_string_pretty(unit.program())?);
            }
            Err(diagnostics) => bail!("Compilation failed\n{}", diagnostics),
        },

        Commands::Bridge { tool, arguments } => {
            let arguments: serde_json::Value =
                serde_json::from_str(&arguments).context("Tool arguments must be a JSON object")?;
            let response = stanza.bridge.call(&tool, &arguments).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}

async fn repl(stanza: &mut Stanza) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "exit" => break,
            "#help" => {
                println!("{}", HELP);
                continue;
            }
            "#history" => {
                for line in history_lines(&stanza.session) {
                    println!("{}", line);
                }
                continue;
            }
            _ => {}
        }

        // Ctrl-C cancels the running fragment, not the prompt
        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };
        let result = stanza.session.evaluate(input, &[], &cancel).await;
        watcher.abort();

        print_result(&result);
    }
    Ok(())
}

fn print_result(result: &EvaluationResult) {
    match result {
        EvaluationResult::Success {
            return_value,
            loaded_modules,
            ..
        } => {
            for module in loaded_modules {
                println!("Loaded {}", module.display);
            }
            if let Some(value) = return_value {
                println!("{}", value);
            }
        }
        EvaluationResult::Fault { cause } => eprintln!("{}", cause.detail()),
        EvaluationResult::Cancelled => eprintln!("Cancelled"),
    }
}

/// One line per committed submission, oldest first
fn history_lines<E: Engine>(session: &Session<E>) -> Vec<String> {
    let mut lines: Vec<String> = session
        .history()
        .map(|submission| {
            format!(
                "[{}] {} {}",
                submission.evaluated_at().format("%H:%M:%S"),
                submission.unit().name(),
                submission.unit().source().lines().next().unwrap_or_default()
            )
        })
        .collect();
    lines.reverse();
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_history_lists_committed_fragments_oldest_first() {
        let mut stanza = InitBuilder::new()
            .config(Config::default())
            .skip_preload(true)
            .init().await.unwrap();
        assert!(history_lines(&stanza.session).is_empty());

        let cancel = CancellationToken::new();
        for fragment in ["let x = 1", "x +", "x + 1\n// next"] {
            stanza.session.evaluate(fragment, &[], &cancel).await;
        }

        let lines = history_lines(&stanza.session);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("> let x = 1"), "{}", lines[0]);
        assert!(lines[1].ends_with("> x + 1"), "{}", lines[1]);
        assert!(lines[0].contains("<submission#"));
    }
}
