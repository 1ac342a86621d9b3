use chrono::Utc;

fn main() {
    // Stamp the build date so generated signatures can be associated with
    // the sigforge version that produced them. SOURCE_DATE_EPOCH wins to
    // keep reproducible builds reproducible.
    let build_date = std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|epoch| epoch.parse::<i64>().ok())
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string());
    println!("cargo:rustc-env=SIGFORGE_BUILD_DATE={build_date}");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
}
