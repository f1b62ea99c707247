//! Company domain listing

use anyhow::Result;
use fsmap_core::domains::{domain_rules, is_known, DEFAULT_DOMAIN, DOMAINS};

pub fn cmd_domains(show: Option<&str>, configured: &str) -> Result<()> {
    if let Some(domain) = show {
        if !is_known(domain) {
            println!("Unknown domain \"{}\", showing the general rules", domain);
            println!();
        }
        println!("{}", domain_rules(domain));
        return Ok(());
    }

    println!("Company domains:\n");
    for domain in DOMAINS {
        let mut marks = Vec::new();
        if domain == DEFAULT_DOMAIN {
            marks.push("default");
        }
        if domain == configured {
            marks.push("configured");
        }
        if marks.is_empty() {
            println!("  {}", domain);
        } else {
            println!("  {} ({})", domain, marks.join(", "));
        }
    }
    println!();
    println!("Use --domain on classify, batch or run, or set [llm] domain in the config.");
    Ok(())
}
