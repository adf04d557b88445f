//! Minimal line-driven demo of the chat widget against the live API.
//!
//! Requires `GEMINI_API_KEY` in the environment. Commands: `:new` starts a
//! fresh chat, `:model <name>` switches models, `:quit` exits.

use std::io::{BufRead, Write};
use std::sync::Arc;

use lyra::{ChatModel, ChatWidget, GeminiProvider, MODEL_CATALOG, Role};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let provider = Arc::new(GeminiProvider::from_env()?);
    let mut widget = ChatWidget::new(provider);

    println!("{}", widget.transcript().last().unwrap().text);
    print_prompt(&widget);

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let input = line.trim();

        match input {
            ":quit" => break,
            ":new" => {
                widget.new_chat();
                println!("{}", widget.transcript().last().unwrap().text);
            }
            _ if input.starts_with(":model") => {
                let name = input.trim_start_matches(":model").trim();
                match ChatModel::from_remote_name(name) {
                    Some(model) => {
                        widget.select_model(model);
                        println!("using {} ({})", model.label(), model.description());
                    }
                    None => {
                        println!("unknown model; available:");
                        for model in MODEL_CATALOG {
                            println!("  {} - {}", model.remote_name(), model.label());
                        }
                    }
                }
            }
            _ => {
                widget.submit(input);
                let mut printed = 0usize;
                while widget.pump().await {
                    printed = print_reply_progress(&widget, printed);
                }
                print_reply_progress(&widget, printed);
                println!();
            }
        }

        print_prompt(&widget);
    }

    Ok(())
}

fn print_prompt(widget: &ChatWidget) {
    print!("[{}] > ", widget.model().label());
    let _ = std::io::stdout().flush();
}

/// Prints whatever tail of the current model reply has not been shown yet.
fn print_reply_progress(widget: &ChatWidget, printed: usize) -> usize {
    let Some(last) = widget.transcript().last() else {
        return printed;
    };
    if last.role != Role::Model {
        return printed;
    }

    if last.text.len() < printed {
        // The placeholder was replaced (failure path); show the full text.
        println!();
        print!("{}", last.text);
    } else {
        print!("{}", &last.text[printed..]);
    }
    let _ = std::io::stdout().flush();
    last.text.len()
}
