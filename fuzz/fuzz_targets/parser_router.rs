#![no_main]

use libfuzzer_sys::fuzz_target;
use querywatch_pipeline::{ParserRouter, RawRecord, RecordFormat};

fuzz_target!(|data: &[u8]| {
    let router = ParserRouter::with_defaults(64 * 1024);
    for format in [RecordFormat::Audit, RecordFormat::LogLine, RecordFormat::Json] {
        let _ = router.parse(&RawRecord::new(data.to_vec(), "fuzz", format));
    }
});
