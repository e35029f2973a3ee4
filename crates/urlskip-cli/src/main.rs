//! urlskip CLI
//!
//! CLI tool for running urlskip pipelines, testing scriptlet patterns and
//! checking compiled rule sets against URLs.

use std::fs;

use clap::{Parser, Subcommand};
use log::{debug, LevelFilter};
use serde::Serialize;

use urlskip_core::pattern::parse_flags;
use urlskip_core::{parse_steps, try_url_skip, PatternOptions, PatternSpec, RuleSet, Step};

#[derive(Parser)]
#[command(name = "urlskip")]
#[command(about = "urlskip pipelines, scriptlet patterns and rule sets")]
struct Cli {
    /// Log failed steps and skipped rules
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply urlskip steps to a URL
    Skip {
        /// URL to transform
        #[arg(short, long)]
        url: String,

        /// Treat the request as blocked
        #[arg(short, long)]
        blocked: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Steps, e.g. `?url -base64`; put them after `--` when the first
        /// one starts with `-`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        steps: Vec<String>,
    },

    /// Test haystacks against a scriptlet pattern
    TestPattern {
        /// Pattern: plain text or /regex/flags
        #[arg(short, long)]
        pattern: String,

        /// Allow a leading `!` to negate the pattern
        #[arg(short = 'n', long)]
        negate: bool,

        /// Default regex flags, e.g. `i`
        #[arg(short, long)]
        flags: Option<String>,

        /// Strings to test
        #[arg(required = true)]
        haystacks: Vec<String>,
    },

    /// Find redirects for URLs using compiled rule sets
    Rules {
        /// Rule set JSON files
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// URLs to check
        #[arg(short, long, required = true)]
        url: Vec<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show how a directive is split into steps
    Steps {
        /// Directive value, e.g. `?url ?to -base64`
        text: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Warn };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let result = match cli.command {
        Commands::Skip {
            url,
            blocked,
            json,
            steps,
        } => cmd_skip(&url, blocked, &steps, json),
        Commands::TestPattern {
            pattern,
            negate,
            flags,
            haystacks,
        } => cmd_test_pattern(&pattern, negate, flags.as_deref(), &haystacks),
        Commands::Rules { input, url, json } => cmd_rules(&input, &url, json),
        Commands::Steps { text } => cmd_steps(&text),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SkipReport<'a> {
    url: &'a str,
    steps: Vec<&'a str>,
    result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn cmd_skip(url: &str, blocked: bool, args: &[String], json: bool) -> Result<(), String> {
    let steps: Vec<&str> = args.iter().flat_map(|arg| parse_steps(arg)).collect();
    let outcome = try_url_skip(url, blocked, steps.as_slice(), None);

    if json {
        let (result, error) = match &outcome {
            Ok(out) => (Some(out.clone()), None),
            Err(e) => (None, Some(e.to_string())),
        };
        let report = SkipReport {
            url,
            steps,
            result,
            error,
        };
        let text = serde_json::to_string_pretty(&report)
            .map_err(|e| format!("Failed to serialize result: {}", e))?;
        println!("{text}");
        return Ok(());
    }

    match outcome {
        Ok(out) => {
            println!("{out}");
            Ok(())
        }
        Err(e) => Err(format!("No redirect: {}", e)),
    }
}

fn cmd_test_pattern(
    pattern: &str,
    negate: bool,
    flags: Option<&str>,
    haystacks: &[String],
) -> Result<(), String> {
    let flags = flags
        .map(parse_flags)
        .transpose()
        .map_err(|e| e.to_string())?;
    let options = PatternOptions {
        can_negate: negate,
        flags,
    };
    let spec = PatternSpec::new(pattern, &options);
    debug!("compiled pattern {pattern:?}: {spec:?}");

    for haystack in haystacks {
        let verdict = if spec.test(haystack) { "match" } else { "no match" };
        println!("{verdict}\t{haystack}");
    }

    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RuleReport<'a> {
    url: &'a str,
    rule_index: Option<usize>,
    redirect: Option<String>,
}

fn cmd_rules(inputs: &[String], urls: &[String], json: bool) -> Result<(), String> {
    let mut set = RuleSet::new();
    for path in inputs {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read '{}': {}", path, e))?;
        set.extend_json(&content)
            .map_err(|e| format!("Failed to load '{}': {}", path, e))?;
    }

    if !json {
        println!("Loaded {} rules ({} skipped)", set.len(), set.skipped());
    }

    let reports: Vec<RuleReport<'_>> = urls
        .iter()
        .map(|url| {
            let redirect = set.find_redirect(url);
            RuleReport {
                url,
                rule_index: redirect.as_ref().map(|r| r.rule_index),
                redirect: redirect.map(|r| r.url),
            }
        })
        .collect();

    if json {
        let text = serde_json::to_string_pretty(&reports)
            .map_err(|e| format!("Failed to serialize results: {}", e))?;
        println!("{text}");
        return Ok(());
    }

    for report in &reports {
        match (&report.redirect, report.rule_index) {
            (Some(redirect), Some(index)) => {
                println!("  {} -> {} (rule {})", report.url, redirect, index)
            }
            _ => println!("  {} -> (none)", report.url),
        }
    }

    Ok(())
}

fn cmd_steps(text: &str) -> Result<(), String> {
    let tokens = parse_steps(text);
    if tokens.is_empty() {
        return Err("No steps found".to_string());
    }

    let mut failed = false;
    for (i, token) in tokens.iter().enumerate() {
        match Step::parse(token) {
            Ok(step) => println!("  [{}] {:<16} {:?}", i, step.to_string(), step),
            Err(e) => {
                failed = true;
                println!("  [{}] {:<16} error: {}", i, token, e);
            }
        }
    }

    if failed {
        return Err("Directive contains invalid steps".to_string());
    }
    Ok(())
}
