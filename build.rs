use std::env;

fn main() {
    // Declared unconditionally so editing the plist re-triggers the build
    // even when switching between host and macOS cross targets.
    println!("cargo:rerun-if-changed=Info.plist");

    // Only macOS needs anything else: CoreBluetooth refuses to scan for
    // peripherals unless the running binary carries an Info.plist with
    // NSBluetoothAlwaysUsageDescription. CLI binaries have no app bundle,
    // so the plist is injected into the __TEXT,__info_plist section of the
    // Mach-O image, which macOS consults exactly like a bundled plist.
    // Keyed on the target OS, not the host, so Linux-to-macOS cross builds
    // get the section too.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("macos") {
        return;
    }

    let manifest_dir = env::var("CARGO_MANIFEST_DIR").expect("cargo sets CARGO_MANIFEST_DIR");
    let link_args = [
        "-sectcreate".to_owned(),
        "__TEXT".to_owned(),
        "__info_plist".to_owned(),
        format!("{manifest_dir}/Info.plist"),
    ];
    for arg in link_args {
        println!("cargo:rustc-link-arg={arg}");
    }
}
