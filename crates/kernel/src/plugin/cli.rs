//! CLI command implementations for plugin inspection.
//!
//! These commands run discovery and resolution only. No database connection
//! is opened and no lifecycle hook is called.

use anyhow::{Context, Result};

use super::catalog::PluginCatalog;
use super::dependency::resolve_load_order;
use super::discovery::discover;
use super::overrides::ConfigOverrides;

/// List every discovered plugin with its effective enabled state.
pub fn cmd_plugin_list(catalog: &PluginCatalog, overrides: &ConfigOverrides) -> Result<()> {
    let discovered = discover(catalog).context("plugin discovery failed")?;

    if discovered.is_empty() {
        println!("No plugins found.");
        return Ok(());
    }

    println!(
        "{:<16} {:<16} {:<10} {:<10} DEPENDENCIES",
        "PLUGIN", "MODULE", "VERSION", "STATUS"
    );
    println!("{}", "-".repeat(72));

    for handle in discovered.iter() {
        let descriptor = handle.descriptor();
        let status = match overrides.config_for(descriptor) {
            Ok(config) if config.enabled => "enabled".to_string(),
            Ok(_) => "disabled".to_string(),
            Err(e) => format!("invalid ({e})"),
        };
        let deps = if descriptor.dependencies.is_empty() {
            "-".to_string()
        } else {
            descriptor.dependencies.join(", ")
        };

        println!(
            "{:<16} {:<16} {:<10} {:<10} {}",
            descriptor.slug,
            handle.module(),
            descriptor.version,
            status,
            deps
        );
    }

    Ok(())
}

/// Print the resolved activation order.
pub fn cmd_plugin_order(catalog: &PluginCatalog) -> Result<()> {
    let discovered = discover(catalog).context("plugin discovery failed")?;
    let order = resolve_load_order(&discovered).context("plugin dependency resolution failed")?;

    if order.is_empty() {
        println!("No plugins found.");
        return Ok(());
    }

    for (i, slug) in order.iter().enumerate() {
        let deps = discovered
            .get(slug)
            .map(|h| h.descriptor().dependencies.join(", "))
            .unwrap_or_default();
        if deps.is_empty() {
            println!("{:>3}. {slug}", i + 1);
        } else {
            println!("{:>3}. {slug} (after {deps})", i + 1);
        }
    }

    Ok(())
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use marketplace_test_utils::FakePlugin;

    #[test]
    fn list_and_order_builtin_catalog() {
        let catalog = super::super::catalog::builtin();
        cmd_plugin_list(&catalog, &ConfigOverrides::new()).unwrap();
        cmd_plugin_order(&catalog).unwrap();
    }

    #[test]
    fn order_reports_cycles() {
        let catalog = PluginCatalog::new()
            .with("a", FakePlugin::new("a").depends_on("b").factory())
            .with("b", FakePlugin::new("b").depends_on("a").factory());

        let err = cmd_plugin_order(&catalog).unwrap_err();
        assert!(format!("{err:#}").contains("circular"));
    }
}
