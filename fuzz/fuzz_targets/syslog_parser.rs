#![no_main]

use libfuzzer_sys::fuzz_target;
use relaypost_pipeline::parser::ParserSet;

fuzz_target!(|line: &str| {
    let parsers = ParserSet::with_defaults();

    // 어떤 입력이든 패닉 없이 Some 또는 None을 반환해야 한다
    let _ = parsers.parse(line);
});
