#![no_main]

use libfuzzer_sys::fuzz_target;
use relaypost_core::Record;

fuzz_target!(|line: &str| {
    // 파싱은 실패할 수 있지만 패닉은 안 된다
    let Ok(record) = line.parse::<Record>() else {
        return;
    };

    // 파싱에 성공한 레코드의 텍스트 표현은 항상 같은 필드로 되돌아온다
    let rendered = record.to_string();
    let reparsed: Record = rendered
        .parse()
        .expect("rendered record must parse back");
    assert_eq!(reparsed.host, record.host);
    assert_eq!(reparsed.timestamp, record.timestamp);
    assert_eq!(reparsed.content, record.content);
});
