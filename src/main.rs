fn main() {
    let code = nitro_launcher::run_cli();
    if code != 0 {
        std::process::exit(code);
    }
}
