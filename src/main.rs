use std::process::exit;

fn main() {
    if let Err(e) = reflectprobe::app::run_cli() {
        eprintln!("{e}");
        exit(1);
    }
}
