use anyhow::Result;
use std::path::PathBuf;

use super::load_config;

pub async fn execute(config: Option<PathBuf>) -> Result<()> {
    let registry = load_config(config)?.build_registry()?;

    println!("Languages:");
    for profile in registry.profiles() {
        println!("\n  {}", profile.id());
        if !profile.aliases().is_empty() {
            println!("    Aliases: {}", profile.aliases().join(", "));
        }
        println!("    Source file: {}", profile.source_file());
        match profile.compile() {
            Some(compile) => println!("    Compile: {}", compile),
            None => println!("    Compile: (interpreted)"),
        }
        println!("    Run: {}", profile.run());
        if !profile.limits_address_space() {
            println!("    Address space limit: disabled");
        }
    }

    Ok(())
}
