fn main() {
    if let Err(e) = trash_analyzer_lib::run() {
        eprintln!("trash-analyzer: {}", e);
        std::process::exit(1);
    }
}
