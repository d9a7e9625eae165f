fn main() {
    if let Err(err) = csvfire::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
