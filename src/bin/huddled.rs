//! huddled - multi-user line-based chat server
//!
//! See `huddled --help` for options. Logging is controlled with `RUST_LOG`
//! (default `huddled=info`).

fn main() -> anyhow::Result<()> {
    huddled::cli::run()
}
