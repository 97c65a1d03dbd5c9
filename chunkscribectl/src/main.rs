use clap::Parser;

fn main() {
    let cli = chunkscribectl::Cli::parse();
    chunkscribectl::init_tracing(cli.verbose);
    if let Err(err) = chunkscribectl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
