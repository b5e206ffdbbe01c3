fn main() {
    #[cfg(feature = "cli")]
    trackmend::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("trackmend: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
