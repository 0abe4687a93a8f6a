fn main() {
    if let Err(err) = layerflow::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
