#![no_main]

use libfuzzer_sys::fuzz_target;
use querywatch_core::pipeline::QueryParser;
use querywatch_pipeline::JsonRowParser;

fuzz_target!(|data: &[u8]| {
    let parser = JsonRowParser::default();
    let _ = parser.parse(data);
});
