use daemonizer::cli::{output, Cli};

fn main() {
    if let Err(e) = Cli::run() {
        output::print_error(&e.to_string());
        std::process::exit(1);
    }
}
