fn main() {
    // sqlparser recurses per nesting level of an expression, and CHECK or
    // DEFAULT clauses in real dumps nest deep enough to overflow the 1MB
    // Windows main-thread stack. Give it the 8MB that Linux and macOS have.
    // Checked via CARGO_CFG_* so cross builds see the target, not the host.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("windows") {
        return;
    }
    let arg = match std::env::var("CARGO_CFG_TARGET_ENV").as_deref() {
        Ok("msvc") => "/STACK:8388608",
        _ => "-Wl,--stack,8388608",
    };
    println!("cargo:rustc-link-arg={arg}");
}
