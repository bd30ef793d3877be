//! ListMan - merge wordlists into one deduplicated master list
//!
//! Main entry point for the command-line application.

use clap::Parser;
use std::process;

use listman::cli::Args;
use listman::pause::PauseToken;
use listman::processor::{Processor, ProcessorConfig};
use listman::progress::{
    format_duration, print_about, print_banner, print_error, print_header, print_info, print_warning,
};

fn main() {
    // Parse command-line arguments
    let args = Args::parse();

    if args.about {
        print_about();
        return;
    }

    // Set up logging
    if args.verbose {
        std::env::set_var("RUST_LOG", "debug");
    } else if !args.quiet && std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    match run(args) {
        Ok(code) => process::exit(code),
        Err(e) => {
            print_error(&format!("{}", e));

            // Print chain of errors
            for cause in e.chain().skip(1) {
                print_error(&format!("  Caused by: {}", cause));
            }

            process::exit(listman::tracker::EXIT_FAILED);
        }
    }
}

fn run(args: Args) -> anyhow::Result<i32> {
    // Print banner unless quiet mode
    if !args.quiet {
        print_banner();
    }

    let config = ProcessorConfig::from_args(&args)?;

    if !args.quiet && args.verbose {
        print_config(&config);
    }

    // Ctrl-C asks the workers to stop at the next line boundary
    let pause = PauseToken::new();
    let handler_token = pause.clone();
    let quiet = args.quiet;
    ctrlc::set_handler(move || {
        if !handler_token.is_requested() && !quiet {
            print_warning("Pausing, waiting for pending entries to be committed...");
        }
        handler_token.request();
    })?;

    let processor = Processor::new(config);
    let report = processor.run(&pause)?;

    log::info!(
        "Run finished: {} in {} ({} new entries, exit code {})",
        report.state,
        format_duration(report.elapsed()),
        report.stats.get_accepted_lines(),
        report.exit_code()
    );
    Ok(report.exit_code())
}

/// Print configuration summary
fn print_config(config: &ProcessorConfig) {
    print_header("Configuration");

    match config.mode {
        Some(mode) => print_info(&format!("Mode:         {}", mode.label())),
        None => print_info("Mode:         from resume state"),
    }
    print_info(&format!("Files:        {:?}", config.files));
    print_info(&format!("Folders:      {:?}", config.folders));
    print_info(&format!("Output dir:   {:?}", config.output_dir));
    print_info(&format!(
        "Compression:  {}",
        config.compress.map_or("none", |c| c.name())
    ));
    print_info(&format!("Recursive:    {}", config.recursive));
    print_info(&format!("Extensions:   {:?}", config.extensions));
    print_info(&format!("Case policy:  {:?}", config.case_policy));
    print_info(&format!("Dedup:        {:?}", config.dedup_strategy));
    print_info(&format!("Log:          {} ({:?})", config.log_enabled, config.log_file));
    print_info(&format!("Skip logged:  {}", config.skip_logged));
    print_info(&format!("Batch lines:  {}", config.batch_lines));
    print_info(&format!("Threads:      {}", config.threads));
}
