use chrono::{SecondsFormat, Utc};

fn main() {
    if std::env::var_os("CARGO_FEATURE_ESP32").is_some() {
        embuild::espidf::sysenv::output();
    }

    // A fresh marker per rebuilt binary drives first-boot detection on the device.
    println!("cargo:rerun-if-changed=src");
    println!("cargo:rerun-if-changed=Cargo.toml");
    let marker = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    println!("cargo:rustc-env=TEMPLINK_BUILD_MARKER={marker}");
}
