fn main() {
    if let Err(err) = wave_loader::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
