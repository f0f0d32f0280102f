#![no_main]

use libfuzzer_sys::fuzz_target;
use logforge_core::config::LegacyEntry;
use logforge_processor::{ActionContext, ActionRegistry, LegacyCompiler};

fuzz_target!(|data: &[u8]| {
    let Ok(entries) = serde_json::from_slice::<Vec<LegacyEntry>>(data) else {
        return;
    };
    let registry = ActionRegistry::with_defaults();
    let ctx = ActionContext::default();
    let compiler = LegacyCompiler::new(&registry, &ctx);

    let _ = compiler.compile(&entries, "fuzz");
    let _ = compiler.upgrade(&entries, "fuzz");
});
