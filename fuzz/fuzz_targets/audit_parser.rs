#![no_main]

use libfuzzer_sys::fuzz_target;
use querywatch_pipeline::AuditRecord;

fuzz_target!(|data: &[u8]| {
    let Ok(message) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(record) = AuditRecord::parse_message(message) else {
        return;
    };

    // 정규 형식으로 다시 쓰면 같은 레코드로 파싱되어야 함
    let reparsed = AuditRecord::parse_message(&record.to_canonical())
        .expect("canonical form must parse");
    assert_eq!(reparsed.statement, record.statement);
});
