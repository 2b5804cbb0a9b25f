//! huddle - terminal client for the huddle chat server

fn main() -> anyhow::Result<()> {
    huddle_client::cli::run()
}
