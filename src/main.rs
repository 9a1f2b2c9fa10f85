use anyhow::Result;

fn main() -> Result<()> {
    modloom::cli::run()
}
