// Output formatting and display for the launcher

use crate::config::LaunchConfig;
use colored::*;

/// Print the result of a successful detach in the parent
pub fn print_detached(pid: i32, config: &LaunchConfig, quiet: bool) {
    if quiet {
        println!("{}", pid);
        return;
    }

    println!("{}", "✓ Detached successfully".green().bold());
    println!("  {}: {}", "PID".bold(), pid);
    println!(
        "  {}: {}",
        "Program".bold(),
        config.program.display().to_string().cyan()
    );
    if !config.args.is_empty() {
        println!("  {}: {}", "Args".bold(), config.args.join(" "));
    }
}

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}
