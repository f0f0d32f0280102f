//! `--upgrade-legacy` support.
//!
//! Converts every `[[pipelines]]` entry that still uses the nested
//! `actions` list into the equivalent script.

use anyhow::{Context, Result};

use logforge_core::config::LogforgeConfig;
use logforge_processor::config::action_context;
use logforge_processor::{ActionRegistry, LegacyCompiler};

/// Render the upgraded scripts, one block per legacy pipeline.
///
/// Each block starts with a `// pipelines[i]` comment line. Returns an
/// empty string when no pipeline uses the legacy form.
pub fn upgrade_legacy(config: &LogforgeConfig) -> Result<String> {
    let ctx = action_context(config).context("failed to prepare action context")?;
    let registry = ActionRegistry::with_defaults();
    let compiler = LegacyCompiler::new(&registry, &ctx);

    let mut out = String::new();
    for (index, pipeline) in config.pipelines.iter().enumerate() {
        let Some(actions) = &pipeline.actions else {
            continue;
        };
        let root = format!("pipelines[{index}].actions");
        let script = compiler
            .upgrade(actions, &root)
            .with_context(|| format!("failed to upgrade {root}"))?;

        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("// pipelines[{index}]\n"));
        if let Some(condition) = &pipeline.condition_expr {
            out.push_str(&format!("// condition_expr: {condition}\n"));
        }
        out.push_str(&script);
        if !script.ends_with('\n') {
            out.push('\n');
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrades_only_legacy_pipelines() {
        let config = LogforgeConfig::parse(
            r#"
[[pipelines]]
script = 'add_tag tag="modern"'

[[pipelines]]
condition_expr = 'has(event.level)'
actions = [
    { name = "add_tag", tag = "legacy" },
]
"#,
        )
        .unwrap();

        let text = upgrade_legacy(&config).unwrap();
        assert!(text.starts_with("// pipelines[1]\n// condition_expr: has(event.level)\n"));
        assert!(text.contains("add_tag tag=\"legacy\""));
        assert!(!text.contains("modern"));
    }

    #[test]
    fn nothing_to_upgrade() {
        assert_eq!(upgrade_legacy(&LogforgeConfig::default()).unwrap(), "");
    }

    #[test]
    fn reports_the_pipeline_path() {
        let config = LogforgeConfig::parse(
            r#"
[[pipelines]]
actions = [ { tag = "missing name" } ]
"#,
        )
        .unwrap();
        let err = upgrade_legacy(&config).unwrap_err();
        assert!(format!("{err:#}").contains("pipelines[0].actions"));
    }
}
