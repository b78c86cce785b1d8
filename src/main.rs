fn main() {
    if let Err(err) = csv_refresh::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
