//! Tokenizer fuzz target: arbitrary format strings must tokenize or fail cleanly, and a
//! successful tokenization must cover the source without gaps. Accepted formats are compiled
//! and run against their own source text, which must not panic.
//! Build with: cargo fuzz run tokenize_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    let parsed = match protofmt::tokenize(s) {
        Ok(p) => p,
        Err(_) => return,
    };
    let mut pos = 0;
    for t in &parsed.tokens {
        assert_eq!(t.start, pos, "gap before token {:?}", t);
        assert!(t.end > t.start);
        pos = t.end;
    }
    assert_eq!(pos, s.len());
    if let Ok(machine) = protofmt::compile(&parsed, &[], "Fuzz") {
        let _ = protofmt::run(&machine, data);
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run tokenize_fuzz");
}
