use optalign::AlignmentConfig;
use std::{fs::File, io::Write};

fn main() -> anyhow::Result<()> {
    let config = AlignmentConfig::default();
    let toml = config.to_toml()?;
    let mut file = File::create("alignment.toml")?;
    write!(file, "{}", toml)?;

    Ok(())
}
