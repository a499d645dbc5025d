use mimic_config::MimicConfig;
use mimic_runtime::{Availability, BehaviourCatalog, default_behaviours};

pub(super) fn cmd_behaviours(config: &MimicConfig, json: bool) -> mimic_core::Result<()> {
    let catalog = BehaviourCatalog::build(default_behaviours(config));
    let descriptors = catalog.descriptors();

    if json {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(());
    }

    if descriptors.is_empty() {
        println!("No behaviours configured.");
        return Ok(());
    }

    println!("{:<24} {:<8} {:<28} STATUS", "ID", "CATEGORY", "NAME");
    for d in &descriptors {
        let status = match &d.availability {
            Availability::Available => "✅ available".to_string(),
            Availability::Unavailable { reason } => format!("❌ {reason}"),
        };
        println!(
            "{:<24} {:<8} {:<28} {}",
            d.id,
            d.category.to_string(),
            d.display_name,
            status
        );
        if !d.description.is_empty() {
            println!("   \x1b[90m{}\x1b[0m", d.description);
        }
    }
    Ok(())
}
