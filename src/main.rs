fn main() {
    if let Err(e) = missionctl::run() {
        let envelope = missionctl::error_envelope(&e);
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&envelope).unwrap_or_else(|_| e.to_string())
        );
        std::process::exit(1);
    }
}
