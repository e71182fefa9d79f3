/// The C compiler named by the `CLANG` environment variable, if set.
pub fn clang_path() -> Option<String> {
    match std::env::var("CLANG") {
        Ok(v) if !v.is_empty() => Some(v),
        _ => None,
    }
}

/// Flags passed to the compiler before the output path.
pub fn cli_flags() -> &'static [&'static str] {
    &["-std=gnu11", "-O2", "-fno-strict-aliasing", "-o"]
}
