use devdash::cli::run_devdash;

fn main() {
    if let Err(err) = run_devdash() {
        tracing::error!(error = %err, "devdash failed");
        eprintln!("{err}");
        std::process::exit(1);
    }
}
