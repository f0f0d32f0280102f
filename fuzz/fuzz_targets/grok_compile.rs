#![no_main]

use std::convert::Infallible;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use logforge_processor::Grok;

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    pattern: String,
    subject: String,
}

fuzz_target!(|input: FuzzInput| {
    let grok = Grok::with_defaults();
    if let Ok(pattern) = grok.compile_pattern(&input.pattern, &[]) {
        let _ = pattern.apply(&input.subject, |_, _| Ok::<(), Infallible>(()));
    }
});
