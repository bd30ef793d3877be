//! Progress display module
//!
//! Styled console output, progress bars, and run statistics.

use bytesize::ByteSize;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Print the application banner
pub fn print_banner() {
    let banner = r#"
╔══════════════════════════════════════════════════════════════════╗
║                                                                  ║
║   ██╗     ██╗███████╗████████╗███╗   ███╗ █████╗ ███╗   ██╗      ║
║   ██║     ██║██╔════╝╚══██╔══╝████╗ ████║██╔══██╗████╗  ██║      ║
║   ██║     ██║███████╗   ██║   ██╔████╔██║███████║██╔██╗ ██║      ║
║   ██║     ██║╚════██║   ██║   ██║╚██╔╝██║██╔══██║██║╚██╗██║      ║
║   ███████╗██║███████║   ██║   ██║ ╚═╝ ██║██║  ██║██║ ╚████║      ║
║   ╚══════╝╚═╝╚══════╝   ╚═╝   ╚═╝     ╚═╝╚═╝  ╚═╝╚═╝  ╚═══╝      ║
║                                                                  ║
║            Merge wordlists into one deduplicated master          ║
║                                                        v1.0.0    ║
╚══════════════════════════════════════════════════════════════════╝
"#;

    println!("{}", banner.green());
}

pub const AUTHOR: &str = "CySec Don";
pub const EMAIL: &str = "cysecdon@proton.me";
pub const LICENSE: &str = "MIT License";

/// Print the banner followed by author, license and basic usage
pub fn print_about() {
    print_banner();
    println!(
        "{}",
        format!("ListMan v{}", env!("CARGO_PKG_VERSION")).cyan().bold()
    );
    println!("Author : {}", AUTHOR);
    println!("Email  : {}", EMAIL);
    println!("License: {}", LICENSE);
    println!();
    println!("{}", "Description:".yellow());
    println!("    ListMan unifies multiple wordlists into a single master wordlist.");
    println!("    It supports multi-threading, logging, pause/resume, and compression.");
    println!();
    println!("{}", "Basic Usage:".yellow());
    for (what, cmd) in [
        ("Create new master wordlist from files:", "listman --create file1.txt file2.txt --threads 8"),
        ("Create from folder of wordlists:", "listman --create-folder /path/to/lists --compress gzip"),
        ("Add new lists to existing master:", "listman --add newlist.txt --log --skip-logged"),
        ("Resume after interruption:", "listman --resume"),
        ("Show version:", "listman --version"),
        ("Show this banner:", "listman --about"),
    ] {
        println!("    {}", what);
        println!("        {}", cmd);
        println!();
    }
}

/// Print a section header
pub fn print_header(text: &str) {
    println!("\n{} {}", "▶".green(), text.green().bold());
}

/// Print an info message
pub fn print_info(text: &str) {
    println!("  {} {}", "ℹ".cyan(), text);
}

/// Print a success message
pub fn print_success(text: &str) {
    println!("  {} {}", "✔".green(), text.green());
}

/// Print a warning message
pub fn print_warning(text: &str) {
    println!("  {} {}", "⚠".yellow(), text.yellow());
}

/// Print an error message
pub fn print_error(text: &str) {
    eprintln!("  {} {}", "✖".red(), text.red());
}

/// Print a bullet point
pub fn print_bullet(text: &str) {
    println!("  {} {}", "•".green(), text);
}

/// Create a styled progress bar
pub fn create_progress_bar(total: u64, msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);

    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.green/dim}] {pos}/{len} files ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░"),
    );

    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));

    pb
}

/// Create a styled spinner for indeterminate progress
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();

    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "),
    );

    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));

    pb
}

/// Run statistics, updated concurrently by the workers
#[derive(Debug)]
pub struct ProcessingStats {
    pub total_files: AtomicU64,
    pub completed_files: AtomicU64,
    pub failed_files: AtomicU64,
    pub total_lines: AtomicU64,
    pub accepted_lines: AtomicU64,
    pub duplicate_lines: AtomicU64,
    pub blank_lines: AtomicU64,
    pub preloaded_entries: AtomicU64,
    pub start_time: Instant,
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self {
            total_files: AtomicU64::new(0),
            completed_files: AtomicU64::new(0),
            failed_files: AtomicU64::new(0),
            total_lines: AtomicU64::new(0),
            accepted_lines: AtomicU64::new(0),
            duplicate_lines: AtomicU64::new(0),
            blank_lines: AtomicU64::new(0),
            preloaded_entries: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn add_files(&self, count: u64) {
        self.total_files.fetch_add(count, Ordering::Relaxed);
    }

    pub fn complete_file(&self) {
        self.completed_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fail_file(&self) {
        self.failed_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_line(&self) {
        self.total_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_accepted(&self) {
        self.accepted_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_duplicate(&self) {
        self.duplicate_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_blank(&self) {
        self.blank_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_preloaded(&self, count: u64) {
        self.preloaded_entries.store(count, Ordering::Relaxed);
    }

    pub fn get_total_files(&self) -> u64 {
        self.total_files.load(Ordering::Relaxed)
    }

    pub fn get_completed_files(&self) -> u64 {
        self.completed_files.load(Ordering::Relaxed)
    }

    pub fn get_failed_files(&self) -> u64 {
        self.failed_files.load(Ordering::Relaxed)
    }

    pub fn get_total_lines(&self) -> u64 {
        self.total_lines.load(Ordering::Relaxed)
    }

    pub fn get_accepted_lines(&self) -> u64 {
        self.accepted_lines.load(Ordering::Relaxed)
    }

    pub fn get_duplicate_lines(&self) -> u64 {
        self.duplicate_lines.load(Ordering::Relaxed)
    }

    pub fn get_blank_lines(&self) -> u64 {
        self.blank_lines.load(Ordering::Relaxed)
    }

    pub fn get_preloaded_entries(&self) -> u64 {
        self.preloaded_entries.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn lines_per_second(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.get_total_lines() as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Print final statistics
    pub fn print_summary(&self, title: &str, master_size: u64) {
        let failed = self.get_failed_files();

        println!();
        println!("{}", "═".repeat(60).green());
        println!("{}", format!("                    {}", title).green().bold());
        println!("{}", "═".repeat(60).green());
        println!();

        println!("  {} {}/{}", "Files merged:   ".green(),
            self.get_completed_files(), self.get_total_files());
        if failed > 0 {
            println!("  {} {}", "Files failed:   ".red(), failed.to_string().red());
        }
        println!();

        println!("  {} {}", "Lines read:     ".green(),
            format_number(self.get_total_lines()));
        println!("  {} {}", "Existing master:".green(),
            format_number(self.get_preloaded_entries()));
        println!("  {} {}", "Duplicates:     ".yellow(),
            format_number(self.get_duplicate_lines()));
        println!("  {} {}", "New entries:    ".green().bold(),
            format_number(self.get_accepted_lines()).green().bold());
        println!("  {} {}", "Master size:    ".green(), ByteSize(master_size));

        println!();
        println!("  {} {}", "Duration:       ".green(), format_duration(self.elapsed()));
        println!("  {} {:.2} lines/sec", "Throughput:     ".green(),
            self.lines_per_second());
        println!();
        println!("{}", "═".repeat(60).green());
    }
}

impl Default for ProcessingStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousand separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    let chars: Vec<char> = s.chars().collect();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    result
}

/// Format duration as human-readable string
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if secs < 3600 {
        let mins = secs / 60;
        let secs = secs % 60;
        format!("{}m {}s", mins, secs)
    } else {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        format!("{}h {}m", hours, mins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(123), "123");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30.0s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m");
    }

    #[test]
    fn test_stats() {
        let stats = ProcessingStats::new();

        stats.add_files(2);
        stats.add_line();
        stats.add_line();
        stats.add_accepted();
        stats.add_duplicate();
        stats.complete_file();

        assert_eq!(stats.get_total_files(), 2);
        assert_eq!(stats.get_total_lines(), 2);
        assert_eq!(stats.get_accepted_lines(), 1);
        assert_eq!(stats.get_duplicate_lines(), 1);
        assert_eq!(stats.get_completed_files(), 1);
    }
}
