use anyhow::Result;

fn main() -> Result<()> {
    loadcheck::cli::run()
}
