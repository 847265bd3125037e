use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use clap::Parser;
use scopeline::{Registry, ScanOptions};

#[derive(Parser, Debug)]
#[command(author, version, about = "Print the tokens of a file scanned with a grammar", long_about = None)]
struct Args {
    /// Grammar to scan the input with (YAML for `.yaml`/`.yml`, JSON otherwise)
    #[arg(value_name = "GRAMMAR")]
    grammar: PathBuf,

    /// File to scan, stdin if missing
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Other grammars that delegated regions can refer to
    #[arg(short, long, value_name = "GRAMMAR")]
    embed: Vec<PathBuf>,

    /// Maximum number of regex searches per line
    #[arg(long)]
    step_budget: Option<usize>,

    /// Lines longer than this many bytes are not scanned
    #[arg(long)]
    max_line_length: Option<usize>,

    /// Print the tokens as JSON, one array per line
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut registry = Registry::default();
    for path in &args.embed {
        registry.add_grammar_from_path(path)?;
    }
    let grammar_id = registry.add_grammar_from_path(&args.grammar)?;

    let text = match &args.file {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text)?;
            text
        }
    };

    let mut options = ScanOptions::new();
    if let Some(steps) = args.step_budget {
        options = options.step_budget(steps);
    }
    if let Some(len) = args.max_line_length {
        options = options.max_line_length(len);
    }

    let tokenized = registry.tokenize_grammar(grammar_id, &text, &options);

    if args.json {
        for tokens in &tokenized.lines {
            println!("{}", serde_json::to_string(tokens)?);
        }
    } else {
        for (i, (line, tokens)) in text.split('\n').zip(&tokenized.lines).enumerate() {
            for token in tokens {
                let scopes: Vec<&str> = token.scopes.iter().map(|s| s.as_str()).collect();
                println!(
                    "{i}:{}..{} {:?} [{}]",
                    token.span.start,
                    token.span.end,
                    &line[token.span.clone()],
                    scopes.join(" ")
                );
            }
        }
    }

    for i in &tokenized.exhausted_lines {
        eprintln!("line {i} went over the scan limits and was not fully scanned");
    }
    for frame in tokenized.unterminated_regions() {
        let scope = frame.scopes().last().map_or("(unnamed)", |s| s.as_str());
        eprintln!("region {scope} is never closed");
    }

    Ok(())
}
