use anyhow::Result;

fn main() -> Result<()> {
    phasegate::run()?;
    Ok(())
}
