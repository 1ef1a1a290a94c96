use anyhow::Result;

pub fn run() -> Result<()> {
    println!("epp {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
