fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if ppe_sentinel::cli::handle_commands(&args)? {
        return Ok(());
    }

    eprintln!("Unknown command. Try: ppe-sentinel help");
    std::process::exit(2);
}
