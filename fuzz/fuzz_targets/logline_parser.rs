#![no_main]

use libfuzzer_sys::fuzz_target;
use querywatch_core::pipeline::QueryParser;
use querywatch_pipeline::PostgresLogLineParser;

fuzz_target!(|data: &[u8]| {
    let parser = PostgresLogLineParser::new();
    let _ = parser.parse(data);
});
